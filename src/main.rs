//! Cashier Server Binary
//!
//! Wires storage, ledger, settlement backend, and the HTTP API together.

use cashier::api::server::{ApiConfig, ApiServer};
use cashier::config::{CashierConfig, Network};
use cashier::hooks::{AllowAllLimiter, FlagKillSwitch, TracingAuditLog};
use cashier::ledger::Ledger;
use cashier::settlement::simulated::{SimulatedNode, SimulatedNodeConfig};
use cashier::storage::CashierStorage;
use cashier::withdrawal::WithdrawalEngine;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cashier")]
#[command(about = "Casino withdrawal processing engine", long_about = None)]
struct Args {
    /// API server host
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// API server port
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Database directory (overrides config file)
    #[arg(long)]
    db_path: Option<String>,

    /// Settlement network: mainnet or testnet (overrides config file)
    #[arg(long)]
    network: Option<String>,

    /// House wallet address for the selected network (overrides config file)
    #[arg(long)]
    house_wallet: Option<String>,

    /// Allowed CORS origins (comma-separated, use * for all)
    #[arg(long, default_value = "*")]
    cors_origins: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Node ID
    #[arg(long, default_value = "cashier-node-1")]
    node_id: String,

    /// Start with the withdrawal kill switch engaged
    #[arg(long)]
    maintenance: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cashier=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str::<CashierConfig>(&raw)?
        }
        None => CashierConfig::testnet(),
    };

    if let Some(db_path) = &args.db_path {
        config.storage.data_directory = db_path.clone();
    }
    if let Some(network) = &args.network {
        config.settlement.network = match network.as_str() {
            "mainnet" => Network::Mainnet,
            "testnet" => Network::Testnet,
            other => return Err(format!("unknown network '{}'", other).into()),
        };
    }
    if let Some(house_wallet) = &args.house_wallet {
        match config.settlement.network {
            Network::Mainnet => config.settlement.mainnet_house_wallet = house_wallet.clone(),
            Network::Testnet => config.settlement.testnet_house_wallet = house_wallet.clone(),
        }
    }

    config.validate()?;
    let network = config.settlement.network;

    info!("Opening cashier database: {}", config.storage.data_directory);
    let storage = CashierStorage::new_with_config(&config.storage)?;
    let ledger = Ledger::new(storage.clone());

    // The real node RPC client is deployed as an external integration; this
    // binary ships with the in-process simulated node.
    if network == Network::Mainnet {
        warn!("mainnet selected but only the simulated settlement backend is wired in");
    }
    let node = Arc::new(SimulatedNode::new(SimulatedNodeConfig::default()));
    node.fund_source(
        network,
        config.settlement.house_wallet(network),
        1_000_000_000,
    );

    let engine = WithdrawalEngine::new(
        storage,
        ledger,
        node,
        config.withdrawal.clone(),
        config.settlement.clone(),
        Arc::new(FlagKillSwitch::new(args.maintenance)),
        Arc::new(AllowAllLimiter),
        Arc::new(TracingAuditLog),
    );

    let allowed_origins: Vec<String> = args
        .cors_origins
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();

    let api_config = ApiConfig {
        host: args.host,
        port: args.port,
        allowed_origins,
        request_timeout_secs: args.timeout,
        node_id: args.node_id,
        network: network.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let server = ApiServer::new(api_config, engine);
    server.run().await?;

    Ok(())
}
