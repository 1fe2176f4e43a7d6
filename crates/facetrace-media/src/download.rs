//! Video download using yt-dlp.
//!
//! Scans read local files; network sources are fetched into the work
//! directory first.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::check_ytdlp;
use crate::error::{MediaError, MediaResult};

/// Whether `input` names a network source rather than a local file.
pub fn is_url(input: &str) -> bool {
    let lower = input.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Fresh download target inside `dir`.
pub fn download_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref()
        .join(format!("source_{}.mp4", Uuid::new_v4().simple()))
}

/// Download `url` as MP4 to `output_path`.
///
/// A non-empty file already at `output_path` is reused.
pub async fn download_video(url: &str, output_path: impl AsRef<Path>) -> MediaResult<()> {
    let output_path = output_path.as_ref();

    if let Ok(metadata) = output_path.metadata() {
        if metadata.len() > 0 {
            info!(path = %output_path.display(), "Using existing video file");
            return Ok(());
        }
        warn!(path = %output_path.display(), "Existing file is empty, re-downloading");
        tokio::fs::remove_file(output_path).await?;
    }

    check_ytdlp()?;
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!(url = %url, output = %output_path.display(), "Downloading video");

    let output = Command::new("yt-dlp")
        .args(ytdlp_args(url, output_path))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("yt-dlp stderr: {}", stderr);
        let error_msg = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("Unknown error");
        return Err(MediaError::download_failed(format!(
            "yt-dlp failed: {}",
            error_msg
        )));
    }

    if !output_path.exists() {
        return Err(MediaError::download_failed("Output file not created"));
    }

    let file_size = output_path.metadata()?.len();
    info!(
        output = %output_path.display(),
        size_mb = file_size as f64 / (1024.0 * 1024.0),
        "Downloaded video successfully"
    );
    Ok(())
}

fn ytdlp_args(url: &str, output_path: &Path) -> Vec<String> {
    vec![
        "-f".to_string(),
        "mp4".to_string(),
        "--no-playlist".to_string(),
        "-o".to_string(),
        output_path.to_string_lossy().to_string(),
        url.to_string(),
    ]
}
