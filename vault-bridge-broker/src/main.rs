use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{info, warn};
use vault_bridge_broker::config::{CliOverrides, ConfigLoader};
use vault_bridge_broker::telemetry;

#[derive(Parser)]
#[command(name = "vault-bridge", version, about = "Tenant-scoped access to Vault secrets and transit keys")]
struct BridgeArgs {
    /// Override config file path
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override environment name
    #[arg(long)]
    env: Option<String>,
    /// Override bind address
    #[arg(long)]
    bind: Option<String>,
    /// Override storage backend (vault or memory)
    #[arg(long)]
    backend: Option<String>,
    /// Verbose output
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = real_main().await {
        eprintln!("vault-bridge exited with error: {err:#}");
        process::exit(1);
    }
}

async fn real_main() -> anyhow::Result<()> {
    let args = BridgeArgs::parse();
    telemetry::init(args.verbose)?;

    let overrides = CliOverrides {
        config_path: args.config,
        environment: args.env,
        bind: args.bind,
        backend: args.backend,
    };
    let resolved = ConfigLoader::new(overrides).load()?;
    for warning in &resolved.warnings {
        warn!(%warning, "configuration warning");
    }
    info!(
        source = ?resolved.source,
        config = ?resolved.config.redacted(),
        "configuration loaded"
    );

    vault_bridge_broker::run(resolved.config).await
}
