use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meeting-engine")]
#[command(about = "Join gating, tile layout and recording upload for live meetings", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Validate a join link and show whether it can be used
    CheckLink(CheckLinkCliArgs),
    /// Count down to a scheduled start and exit when joining opens
    Countdown(CountdownCliArgs),
    /// Compute the tile grid for a viewport
    Layout(LayoutCliArgs),
    /// Upload a finished recording (resumes a previous partial upload)
    Upload(UploadCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct CheckLinkCliArgs {
    /// Full join link, including token, email and expires parameters
    pub url: String,
    /// Look the meeting up on the backend and report its countdown
    #[arg(long)]
    pub fetch: bool,
    /// Evaluate at this epoch-millisecond instant instead of now
    #[arg(long)]
    pub now_ms: Option<i64>,
}

#[derive(ClapArgs, Debug)]
pub struct CountdownCliArgs {
    /// Scheduled start (RFC 3339, e.g. 2026-03-01T10:00:00Z)
    #[arg(long)]
    pub at: String,
}

#[derive(ClapArgs, Debug)]
pub struct LayoutCliArgs {
    #[arg(long)]
    pub width: u32,
    #[arg(long)]
    pub height: u32,
    /// Number of participant tiles
    #[arg(long)]
    pub tiles: u32,
    /// Override the configured minimum tile width
    #[arg(long)]
    pub min_tile_width: Option<u32>,
    /// Override the configured gap between tiles
    #[arg(long)]
    pub gap: Option<u32>,
}

#[derive(ClapArgs, Debug)]
pub struct UploadCliArgs {
    /// Recording file to upload
    pub file: PathBuf,
    /// Meeting the recording belongs to
    #[arg(short, long)]
    pub meeting: String,
    /// MIME type; inferred from the extension when omitted
    #[arg(long)]
    pub mime: Option<String>,
    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}
