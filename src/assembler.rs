use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::{info, instrument, warn};

use crate::error::{DownloadError, Result};

/// Post-download assembler. For single-stream formats this is a
/// no-op beyond the session already having written to the final path; for
/// formats with a companion audio track it invokes an external muxer to
/// losslessly combine the two source files.
pub struct Assembler {
    /// Path to the muxer binary, default `ffmpeg` (configurable).
    pub muxer_path: String,
}

impl Default for Assembler {
    fn default() -> Self {
        Assembler {
            muxer_path: "ffmpeg".to_string(),
        }
    }
}

impl Assembler {
    pub fn new(muxer_path: impl Into<String>) -> Self {
        Assembler {
            muxer_path: muxer_path.into(),
        }
    }

    /// Invokes the muxer with two input paths and one output path,
    /// copying streams without re-encoding. On non-zero exit the two
    /// source files are retained and a `PostProcessing` error is
    /// surfaced; on success the sources are removed.
    #[instrument(skip(self), fields(video = ?video_path, audio = ?audio_path, output = ?output_path))]
    pub async fn mux(&self, video_path: &Path, audio_path: &Path, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        info!("invoking muxer to combine video and audio streams");
        let output = Command::new(&self.muxer_path)
            .args([
                "-i",
                &video_path.to_string_lossy(),
                "-i",
                &audio_path.to_string_lossy(),
                "-c",
                "copy",
                "-strict",
                "unofficial",
                "-y",
                &output_path.to_string_lossy(),
            ])
            .output()
            .await
            .map_err(|e| DownloadError::PostProcessing(format!("failed to spawn muxer: {e}")))?;

        if !output.status.success() {
            warn!(
                status = ?output.status.code(),
                "muxer exited non-zero, retaining source files"
            );
            return Err(DownloadError::PostProcessing(format!(
                "muxer exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        fs::remove_file(video_path).await.ok();
        fs::remove_file(audio_path).await.ok();
        info!("mux completed, temporary streams removed");
        Ok(())
    }

    /// No-op finalization for single-stream formats: the session already
    /// wrote directly to the final path, so there is nothing left to move.
    pub async fn finalize(&self, output_path: &Path) -> Result<PathBuf> {
        Ok(output_path.to_path_buf())
    }
}
