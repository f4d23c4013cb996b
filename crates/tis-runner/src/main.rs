use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use tis_engine::stop_signal;
use tis_runner::{init_logging, Cli, Result, RunnerConfig, RunnerError};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            eprintln!("tisctl: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = RunnerConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    init_logging(&config.log_filter);

    if let Some(addr) = cli.metrics_addr {
        start_metrics(addr)?;
    }

    let (stop, signal) = stop_signal();
    ctrlc::set_handler(move || {
        info!("interrupted, stopping");
        stop.stop();
    })?;

    cli.run(config, signal).await
}

#[cfg(feature = "prometheus")]
fn start_metrics(addr: std::net::SocketAddr) -> Result<()> {
    tis_metrics::install_prometheus_exporter(addr)
        .map_err(|e| RunnerError::Metrics(e.to_string()))?;
    info!("metrics on http://{}/metrics", addr);
    Ok(())
}

#[cfg(not(feature = "prometheus"))]
fn start_metrics(addr: std::net::SocketAddr) -> Result<()> {
    Err(RunnerError::Metrics(format!(
        "cannot serve metrics on {}: built without the prometheus feature",
        addr
    )))
}
