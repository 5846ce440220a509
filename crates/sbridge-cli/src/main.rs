mod cli;
mod commands;
mod config;
mod cost;
mod output;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command};
use config::AppConfig;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("An error occurred during startup: {}", e);
            return 1;
        }
    };
    let log_file = config.log_file.clone();
    init_tracing(&log_file);

    let app = match commands::App::new(config) {
        Ok(app) => app,
        Err(e) => {
            report_failure("startup", &log_file, e);
            return 1;
        }
    };

    let (name, result) = match cli.command {
        Command::Resume { node_list, no_wait } => (
            "resume",
            commands::resume(&app, &node_list, no_wait).await,
        ),
        Command::Suspend { node_list } => {
            ("suspend", commands::suspend(&app, &node_list).await)
        }
        Command::ResumeFail { node_list } => {
            ("resume-fail", commands::resume_fail(&app, &node_list).await)
        }
        Command::Scale { force } => ("scale", commands::scale(&app, force).await),
        Command::Nodes { output_format } => {
            ("nodes", commands::nodes(&app, output_format).await)
        }
        Command::Topology {
            partition,
            input,
            kind,
            output,
            block_size,
            min_block_size,
            visualize,
        } => (
            "topology",
            commands::topology(
                &app,
                partition,
                input,
                kind,
                output,
                block_size,
                min_block_size,
                visualize,
            )
            .await,
        ),
        Command::Cost { start, end, output, format } => (
            "cost",
            cost::run(&app, &start, &end, &output, format.as_deref()).await,
        ),
        Command::Daemon { interval } => {
            return match commands::daemon(&app, interval).await {
                Ok(true) => 130,
                Ok(false) => 0,
                Err(e) => {
                    report_failure("daemon", &log_file, e);
                    1
                }
            };
        }
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            report_failure(name, &log_file, e);
            1
        }
    }
}

fn init_tracing(log_file: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match std::fs::OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_target(false)
                .with_writer(Arc::new(file))
                .init();
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

/// One line to the operator, the full chain to the log file.
fn report_failure(command: &str, log_file: &Path, e: anyhow::Error) {
    error!(command, error = ?e, "command failed");
    eprintln!(
        "An error occurred during {}. See {} for details.",
        command,
        log_file.display()
    );
}
