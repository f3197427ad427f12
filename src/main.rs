//! Egress guard proxy.
//!
//! ```text
//!   caller ──▶ http server ──▶ rate limiter ──▶ circuit breaker ──▶ upstream host
//!                                   │                 │
//!                                   └──── state store (CAS) ◀── reconciler
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use egress_guard::config::load_config;
use egress_guard::lifecycle::startup;
use egress_guard::observability::{logging, metrics};
use egress_guard::Components;

#[derive(Parser)]
#[command(name = "egress-guard", version, about = "Circuit-breaking egress proxy")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "EGRESS_CONFIG", default_value = "egress.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        hosts = config.hosts.len(),
        store = ?config.store.backend,
        "egress-guard starting"
    );

    if config.observability.metrics_enabled {
        let addr = config
            .observability
            .metrics_address
            .parse()
            .with_context(|| format!("invalid metrics address {}", config.observability.metrics_address))?;
        metrics::init_metrics(addr);
    }

    let components = Components::build(config).await?;
    startup::run(components).await?;
    Ok(())
}
