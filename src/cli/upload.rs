//! CLI handler for uploading a finished recording.

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::backend::BackendClient;
use crate::cli::args::UploadCliArgs;
use crate::config::Config;
use crate::recording::{RecordingBlob, RecordingFormat, RecordingUploader};

pub async fn handle_upload_command(args: UploadCliArgs) -> Result<()> {
    if !args.file.is_file() {
        bail!("Recording not found: {:?}", args.file);
    }

    let format = match args.mime.as_deref() {
        Some(mime) => RecordingFormat::from_mime(mime)
            .with_context(|| format!("Unsupported recording MIME type '{}'", mime))?,
        None => format_for_extension(&args.file)?,
    };
    let blob = RecordingBlob::from_file(&args.file, format).await?;

    let config = Config::load()?;
    let backend = BackendClient::from_config(&config.backend)?;
    let uploader = backend.uploader(config.recording.upload_chunk_bytes);

    let pb = if args.no_progress {
        None
    } else {
        let pb = create_progress_bar()?;
        pb.set_message("Uploading...");
        Some(pb)
    };

    let report = |percent: u8| {
        if let Some(pb) = &pb {
            pb.set_position(u64::from(percent));
        }
    };
    let result = uploader.upload(&args.meeting, &blob, &report).await;

    if let Some(pb) = &pb {
        match &result {
            Ok(_) => pb.finish_with_message("Done"),
            Err(_) => pb.abandon_with_message("Failed"),
        }
    }

    // Printed verbatim: a lost recording must be visible to the user.
    let uploaded = result.with_context(|| format!("Upload of {:?} failed", args.file))?;
    println!("Uploaded {} ({}) -> {}", blob.path.display(), blob.mime(), uploaded.file_url);
    Ok(())
}

fn format_for_extension(path: &std::path::Path) -> Result<RecordingFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("webm") => Ok(RecordingFormat::Webm),
        Some("mp4") => Ok(RecordingFormat::Mp4),
        other => bail!(
            "Cannot infer recording format from extension {:?}; pass --mime",
            other
        ),
    }
}

fn create_progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("━╸━"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}
