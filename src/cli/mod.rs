pub mod args;
pub mod link;
pub mod upload;

pub use args::{
    CheckLinkCliArgs, Cli, CliCommand, CountdownCliArgs, LayoutCliArgs, UploadCliArgs,
};
pub use link::{handle_check_link_command, handle_countdown_command};
pub use upload::handle_upload_command;

use anyhow::Result;

use crate::config::Config;
use crate::layout::compute_layout;

pub fn handle_layout_command(args: LayoutCliArgs) -> Result<()> {
    let config = Config::load()?;
    let mut options = config.layout.options();
    if let Some(min_width) = args.min_tile_width {
        options.min_tile_width_px = min_width;
    }
    if let Some(gap) = args.gap {
        options.gap_px = gap;
    }

    let frame = compute_layout(args.width, args.height, args.tiles, options);
    println!("{}", serde_json::to_string_pretty(&frame)?);
    println!(
        "Visible tiles: {} | Hidden behind badge: {}",
        frame.visible_tile_count(args.tiles),
        frame.hidden_count(args.tiles)
    );
    Ok(())
}
