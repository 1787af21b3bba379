use anyhow::Result;
use clap::Parser;
use meetscribe::{
    app,
    cli::{
        handle_screenshot_command, handle_status_command, handle_toggle_command, resolve_port,
        Cli, CliCommand,
    },
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("meetscribe {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(CliCommand::Toggle) => {
            return handle_toggle_command(resolve_port(cli.port)?).await;
        }
        Some(CliCommand::Status) => {
            return handle_status_command(resolve_port(cli.port)?).await;
        }
        Some(CliCommand::Screenshot) => {
            return handle_screenshot_command(resolve_port(cli.port)?).await;
        }
        None => {}
    }

    app::run_service(cli.port).await
}
