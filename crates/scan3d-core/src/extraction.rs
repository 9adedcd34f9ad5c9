//! Frame extraction adapter
//!
//! Runs the frame-sampling tool (ffmpeg by default) against the source video
//! and collects the numbered JPEG frames it writes. No retries happen here:
//! a failed extraction is reported upward as-is.

use crate::config::ExtractionConfig;
use crate::error::{stderr_budget, truncate_chars, PipelineError};
use crate::types::{FrameSet, Stage};
use once_cell::sync::Lazy;
use regex::Regex;
use scan3d_kernel::{ToolCommand, ToolRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output pattern handed to the sampling tool
pub const FRAME_PATTERN: &str = "frame-%04d.jpg";

static FRAME_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^frame-(\d+)\.jpg$").expect("frame name regex is valid"));

/// Drives the frame-sampling tool
#[derive(Clone)]
pub struct FrameExtractor {
    settings: ExtractionConfig,
    runner: Arc<dyn ToolRunner>,
    diagnostic_chars: usize,
}

impl std::fmt::Debug for FrameExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameExtractor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl FrameExtractor {
    /// Extractor using `runner` to execute the tool
    #[must_use]
    pub fn new(settings: ExtractionConfig, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            settings,
            runner,
            diagnostic_chars: 512,
        }
    }

    /// Cap on diagnostic text passed upward
    #[inline]
    #[must_use]
    pub fn with_diagnostic_chars(mut self, chars: usize) -> Self {
        self.diagnostic_chars = chars;
        self
    }

    /// Command sampling `video` into `frames_dir`
    #[must_use]
    pub fn command(&self, video: &Path, frames_dir: &Path) -> ToolCommand {
        ToolCommand::new(&self.settings.program)
            .args(&self.settings.args)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"])
            .arg(video)
            .arg("-vf")
            .arg(format!("fps={}", self.settings.fps))
            .arg("-q:v")
            .arg(self.settings.quality.to_string())
            .arg(frames_dir.join(FRAME_PATTERN))
    }

    /// Sample frames from `video` into `frames_dir`
    ///
    /// Blocks (asynchronously) until the tool has terminated and its exit
    /// status has been observed; only then is `frames_dir` read.
    ///
    /// # Errors
    /// - [`PipelineError::ToolUnavailable`] if the tool cannot be started
    /// - [`PipelineError::Timeout`] if it exceeds its deadline
    /// - [`PipelineError::ExternalTool`] on non-zero exit, or when the tool
    ///   reports success without writing any frame
    pub async fn extract(&self, video: &Path, frames_dir: &Path) -> Result<FrameSet, PipelineError> {
        let command = self.command(video, frames_dir);
        tracing::info!("Extracting frames: {}", command.display());

        let exit = self
            .runner
            .run(&command, self.settings.timeout())
            .await
            .map_err(|e| PipelineError::from_supervisor(Stage::Extraction, e, self.diagnostic_chars))?;

        if !exit.success {
            tracing::warn!(
                "Frame extraction exited with {:?}:\n{}",
                exit.code,
                exit.output.to_string_lossy()
            );
            return Err(PipelineError::ExternalTool {
                stage: Stage::Extraction,
                exit_code: exit.code,
                stderr_tail: exit.output.last_chars(stderr_budget(
                    Stage::Extraction,
                    exit.code,
                    self.diagnostic_chars,
                )),
            });
        }

        let frames = collect_frames(frames_dir).map_err(|e| PipelineError::ExternalTool {
            stage: Stage::Extraction,
            exit_code: exit.code,
            stderr_tail: truncate_chars(
                &format!("cannot list {}: {e}", frames_dir.display()),
                self.diagnostic_chars,
            ),
        })?;
        if frames.is_empty() {
            return Err(PipelineError::ExternalTool {
                stage: Stage::Extraction,
                exit_code: exit.code,
                stderr_tail: "tool reported success but wrote no frames".to_string(),
            });
        }

        tracing::info!(
            "Extracted {} frames in {}ms",
            frames.len(),
            exit.elapsed.as_millis()
        );
        Ok(FrameSet::new(frames_dir, frames))
    }
}

/// Frames in `dir` matching the naming convention, ordered by index
///
/// # Errors
/// Returns the I/O error if `dir` cannot be listed.
pub fn collect_frames(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut numbered = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(caps) = FRAME_NAME.captures(name) {
            if let Ok(index) = caps[1].parse::<u64>() {
                numbered.push((index, entry.path()));
            }
        }
    }
    numbered.sort_by_key(|(index, _)| *index);
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan3d_kernel::Supervisor;
    use tempfile::TempDir;

    #[test]
    fn command_samples_at_configured_rate() {
        let extractor = FrameExtractor::new(ExtractionConfig::default(), Arc::new(Supervisor::new()));
        let cmd = extractor.command(Path::new("in.mp4"), Path::new("/w/frames"));
        let rendered = cmd.display();

        assert!(rendered.starts_with("ffmpeg "));
        assert!(rendered.contains("-i in.mp4"));
        assert!(rendered.contains("-vf fps=2"));
        assert!(rendered.contains("-q:v 2"));
        assert!(rendered.ends_with("/w/frames/frame-%04d.jpg"));
    }

    #[test]
    fn collect_orders_numerically_and_ignores_strangers() {
        let dir = TempDir::new().unwrap();
        for name in [
            "frame-0010.jpg",
            "frame-0002.jpg",
            "frame-10000.jpg",
            "frame-0001.jpg",
            "thumb.jpg",
            "frame-0003.png",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("frame-0004.jpg")).unwrap();

        let frames = collect_frames(dir.path()).unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            ["frame-0001.jpg", "frame-0002.jpg", "frame-0010.jpg", "frame-10000.jpg"]
        );
    }
}
