use anyhow::Result;
use clap::Parser;
use meeting_engine::cli::{
    handle_check_link_command, handle_countdown_command, handle_layout_command,
    handle_upload_command, Cli, CliCommand,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        CliCommand::Version => {
            println!("meeting-engine {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliCommand::CheckLink(args) => handle_check_link_command(args).await,
        CliCommand::Countdown(args) => handle_countdown_command(args).await,
        CliCommand::Layout(args) => handle_layout_command(args),
        CliCommand::Upload(args) => handle_upload_command(args).await,
    }
}
