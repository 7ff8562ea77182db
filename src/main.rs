//! # Reelvault CLI
//!
//! Command-line interface for the reelvault library.
//! Downloads and uploads archived videos with resumable chunked transfers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{error, LevelFilter};
use reelvault::{
    resolve_output_filename, DownloadRequest, OverwriteBehavior, TransferConfig, TransferController,
    TransferOutcome, TransferRequest, UploadRequest, UploadTarget, DEFAULT_CHUNK_SIZE,
};

mod cli;

/// Exit status after Ctrl+C
const EXIT_INTERRUPTED: i32 = 130;

/// Command-line interface for reelvault
#[derive(Parser)]
#[command(name = "reelvault")]
#[command(about = "Resumable chunked video transfers over HTTP")]
#[command(long_about = "Downloads and uploads archived videos in resumable chunks:
  reelvault download 'https://host:10000/video?file_id=7&session_id=42'
  reelvault download https://cdn.example.org/clip.mp4 clip.mp4 --continue
  reelvault upload holiday.mp4 --endpoint https://host:10000/upload --session-id 42 --chat-id -100200

File Overwrite Behavior:
  By default, you'll be prompted if destination file exists
  --force                          # Overwrite without asking
  --no-clobber                     # Never overwrite, fail if file exists
  --continue                       # Resume from the end of the existing file")]
#[command(version = env!("REELVAULT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable dry-run mode (show what would be transferred without transferring)
    #[arg(long, global = true)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the final task snapshot as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Download buffer and upload chunk size in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Download a video, resuming across server-side stream closes
    Download {
        /// URL of the video
        url: String,

        /// Output file path (derived from the URL when omitted)
        #[arg(default_value = "")]
        output: String,

        /// Continue a partial download from the end of the existing file
        #[arg(short = 'c', long = "continue")]
        resume: bool,

        /// Force overwrite existing files without prompting
        #[arg(short, long)]
        force: bool,

        /// Never overwrite existing files (fail if destination exists)
        #[arg(long)]
        no_clobber: bool,
    },

    /// Upload a video in addressed chunks
    Upload {
        /// File to upload
        file: PathBuf,

        /// Chunk endpoint URL
        #[arg(long)]
        endpoint: String,

        /// Session key of the signed-in user
        #[arg(long)]
        session_id: String,

        /// Destination channel id
        #[arg(long, allow_hyphen_values = true)]
        chat_id: String,
    },
}

/// Resolve the download destination from CLI arguments
fn resolve_output(url: &str, output: &str) -> PathBuf {
    if output.is_empty() {
        PathBuf::from(resolve_output_filename(url))
    } else {
        PathBuf::from(output)
    }
}

/// Pick the overwrite behavior from CLI flags
fn overwrite_behavior(resume: bool, force: bool, no_clobber: bool) -> anyhow::Result<OverwriteBehavior> {
    match (resume, force, no_clobber) {
        (_, true, true) => bail!("--force and --no-clobber cannot be used together"),
        (true, true, _) => bail!("--continue and --force cannot be used together"),
        (true, _, _) => Ok(OverwriteBehavior::Resume),
        (_, true, _) => Ok(OverwriteBehavior::Force),
        (_, _, true) => Ok(OverwriteBehavior::NeverOverwrite),
        _ => Ok(OverwriteBehavior::Prompt),
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("❌ Error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let mut logger = env_logger::Builder::from_default_env();
    logger.target(env_logger::Target::Stderr);
    if cli.verbose {
        logger.filter_module("reelvault", LevelFilter::Debug);
    }
    logger.init();

    if cli.verbose {
        eprintln!("🎞️  Reelvault v{} starting...", env!("REELVAULT_VERSION"));
    }

    let request: TransferRequest = match &cli.command {
        Command::Download {
            url,
            output,
            resume,
            force,
            no_clobber,
        } => {
            let behavior = overwrite_behavior(*resume, *force, *no_clobber)?;
            let path = resolve_output(url, output);

            if cli.dry_run {
                eprintln!("🔍 [DRY RUN] Would download: {url} to {}", path.display());
                return Ok(0);
            }

            let offset = cli::check_overwrite_permission(&path, behavior)?;
            eprintln!("📁 Saving to: {}", path.display());
            DownloadRequest::new(url.as_str(), path).resume_from(offset).into()
        }
        Command::Upload {
            file,
            endpoint,
            session_id,
            chat_id,
        } => {
            if cli.dry_run {
                eprintln!("🔍 [DRY RUN] Would upload: {} to {endpoint}", file.display());
                return Ok(0);
            }
            let target = UploadTarget::new(endpoint.as_str(), session_id.as_str(), chat_id.as_str());
            UploadRequest::new(file.as_path(), target).into()
        }
    };

    transfer(&cli, request).await
}

/// Run one transfer with a progress bar, cancelling it on Ctrl+C
async fn transfer(cli: &Cli, request: TransferRequest) -> anyhow::Result<i32> {
    let manager = if cli.json {
        cli::ProgressManager::hidden()
    } else {
        cli::ProgressManager::new(&describe(&request))
    };

    let config = TransferConfig {
        chunk_size: cli.chunk_size,
        ..TransferConfig::default()
    };
    let controller = TransferController::new(config, Arc::new(manager))?;
    controller
        .start(request)
        .await
        .context("transfer could not be started")?;

    let finished = tokio::select! {
        finished = controller.wait() => finished,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("⏹  Interrupted, cancelling...");
            controller.cancel().await;
            controller.wait().await
        }
    };
    controller.shutdown().await;

    let Some((snapshot, outcome)) = finished else {
        bail!("transfer ended without a result");
    };

    if cli.json {
        let report = serde_json::json!({
            "snapshot": snapshot,
            "outcome": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(match outcome {
        TransferOutcome::Completed => 0,
        TransferOutcome::Failed { reason } => {
            error!("❌ {} failed: {reason}", snapshot.id);
            1
        }
        TransferOutcome::Cancelled => EXIT_INTERRUPTED,
    })
}

fn describe(request: &TransferRequest) -> String {
    match request {
        TransferRequest::Download(download) => format!("🌐 Downloading {}", download.url),
        TransferRequest::Upload(upload) => format!(
            "📤 Uploading {} to {}",
            file_label(&upload.source),
            upload.target.endpoint
        ),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_output_auto() {
        let path = resolve_output("https://host:10000/video?file_id=77&session_id=1", "");
        assert_eq!(path, PathBuf::from("video-77.mp4"));
    }

    #[test]
    fn test_resolve_output_custom_file() {
        let path = resolve_output("https://cdn.example.org/clip.mp4", "my-clip.mp4");
        assert_eq!(path, PathBuf::from("my-clip.mp4"));
    }

    #[test]
    fn test_overwrite_flags() {
        assert_eq!(overwrite_behavior(false, false, false).unwrap(), OverwriteBehavior::Prompt);
        assert_eq!(overwrite_behavior(true, false, false).unwrap(), OverwriteBehavior::Resume);
        assert_eq!(overwrite_behavior(false, true, false).unwrap(), OverwriteBehavior::Force);
        assert_eq!(
            overwrite_behavior(false, false, true).unwrap(),
            OverwriteBehavior::NeverOverwrite
        );
        assert!(overwrite_behavior(false, true, true).is_err());
        assert!(overwrite_behavior(true, true, false).is_err());
    }

    #[test]
    fn test_cli_parses_upload() {
        let cli = Cli::try_parse_from([
            "reelvault",
            "upload",
            "holiday.mp4",
            "--endpoint",
            "http://localhost:10000/upload",
            "--session-id",
            "42",
            "--chat-id",
            "-100200",
            "--chunk-size",
            "4096",
        ])
        .unwrap();
        assert_eq!(cli.chunk_size, 4096);
        match cli.command {
            Command::Upload { chat_id, .. } => assert_eq!(chat_id, "-100200"),
            Command::Download { .. } => panic!("expected upload"),
        }
    }
}
