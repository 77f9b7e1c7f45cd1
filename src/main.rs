//! CLI entrypoint: parse arguments, initialize logging, and dispatch to
//! either agent mode (serve one master) or master mode (drive the run,
//! federating out to any configured `--agent`s).

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mutenant::agent::AgentServer;
use mutenant::error::MutenantError;
use mutenant::master::Master;
use mutenant::options::{Cli, Options};

fn init_tracing(options: &Options) {
    let default_level = if options.quiet {
        "warn"
    } else {
        match options.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let options = match Options::from_cli(cli) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("mutenant: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&options);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("mutenant: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(options));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            match e {
                MutenantError::Config(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(options: Options) -> mutenant::error::Result<()> {
    metrics::register_histogram!(mutenant::stats::METRIC_GET_LATENCY_US);
    metrics::register_histogram!(mutenant::stats::METRIC_SET_LATENCY_US);

    let options = Arc::new(options);

    if options.agentmode {
        return AgentServer::new(options.agent_port).run().await;
    }

    let stats = Master::new(options.clone()).run().await?;
    let elapsed = (stats.stop_time_s - stats.start_time_s).max(0.0);
    tracing::info!(
        gets = stats.gets,
        sets = stats.sets,
        get_misses = stats.get_misses,
        skips = stats.skips,
        rx_bytes = stats.rx_bytes,
        tx_bytes = stats.tx_bytes,
        elapsed_s = elapsed,
        "run complete"
    );

    Ok(())
}
