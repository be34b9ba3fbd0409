mod cli;
mod commands;
mod error;

use std::process::ExitCode;

use clap::Parser;
use otterstax_adapters::registry::default_registry;
use otterstax_core::environments::EnvironmentStore;
use otterstax_core::logging::{init_logging, LogConfig};

use crate::cli::Cli;
use crate::commands::{Runner, TunnelSettings};
use crate::error::AppError;

fn run(cli: &Cli) -> Result<String, AppError> {
    let mut store = match &cli.global.config {
        Some(path) => EnvironmentStore::load_from_path(path)?,
        None => EnvironmentStore::load_default()?,
    };
    tracing::debug!(
        path = %store.path().display(),
        environment = store.active_name(),
        protocol = %store.protocol(),
        "configuration loaded"
    );

    let registry = default_registry();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?;

    let runner = Runner::new(&registry, &cli.global).with_tunnel_settings(
        TunnelSettings::default().with_context(cli.global.kube_context.as_deref()),
    );
    runtime.block_on(runner.run(&cli.command, &mut store))
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return if error.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(&LogConfig::new(cli.global.verbose));

    match run(&cli) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::debug!(?error, "command failed");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
