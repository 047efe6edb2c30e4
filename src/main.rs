use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use nestegg::api::{RunMode, run_http_server, run_offline};
use nestegg::config::ServerConfig;
use tracing::error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "nestegg", version, about = "Retirement plan simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API.
    Serve(ServerConfig),
    /// Run one request body from a file and print the JSON result.
    Run {
        #[arg(long)]
        params: PathBuf,
        #[arg(long, value_enum, default_value_t = RunMode::Simulate)]
        mode: RunMode,
        #[command(flatten)]
        config: ServerConfig,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "nestegg=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Cli::parse().command {
        Command::Serve(config) => {
            if let Err(e) = run_http_server(config).await {
                error!(error = %e, "server error");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Command::Run {
            params,
            mode,
            config,
        } => {
            if let Err(msg) = config.validate() {
                eprintln!("{msg}");
                return ExitCode::from(2);
            }
            let body = match std::fs::read_to_string(&params) {
                Ok(body) => body,
                Err(e) => {
                    eprintln!("failed to read {}: {e}", params.display());
                    return ExitCode::from(2);
                }
            };
            let result =
                tokio::task::spawn_blocking(move || run_offline(mode, &body, &config)).await;
            match result {
                Ok(Ok(json)) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Ok(Err(e)) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
                Err(e) => {
                    error!(error = %e, "offline run panicked");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
