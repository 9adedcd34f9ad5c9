//! Reconstruction adapter
//!
//! Hands a frame directory to the reconstruction tool and checks that the
//! model file it promised actually exists and is non-empty.

use crate::config::ReconstructionConfig;
use crate::error::{stderr_budget, truncate_chars, PipelineError};
use crate::types::{FrameSet, Stage};
use scan3d_kernel::{ToolCommand, ToolRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Drives the reconstruction tool
#[derive(Clone)]
pub struct Reconstructor {
    settings: ReconstructionConfig,
    runner: Arc<dyn ToolRunner>,
    diagnostic_chars: usize,
}

impl std::fmt::Debug for Reconstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconstructor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconstructor {
    #[must_use]
    pub fn new(settings: ReconstructionConfig, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            settings,
            runner,
            diagnostic_chars: 512,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_diagnostic_chars(mut self, chars: usize) -> Self {
        self.diagnostic_chars = chars;
        self
    }

    /// Command reconstructing `frames_dir` into `output`
    #[must_use]
    pub fn command(&self, frames_dir: &Path, output: &Path) -> ToolCommand {
        ToolCommand::new(&self.settings.program)
            .args(&self.settings.args)
            .arg(frames_dir)
            .arg(output)
    }

    /// Build a model from `frames` at `output`
    ///
    /// # Errors
    /// - [`PipelineError::ToolUnavailable`] if the tool cannot be started
    /// - [`PipelineError::Timeout`] if it exceeds its deadline
    /// - [`PipelineError::ExternalTool`] on non-zero exit
    /// - [`PipelineError::InvalidOutput`] if it exits zero but `output` is
    ///   missing or empty
    pub async fn reconstruct(&self, frames: &FrameSet, output: &Path) -> Result<PathBuf, PipelineError> {
        debug_assert!(!frames.is_empty(), "reconstruction needs frames");

        let command = self.command(frames.dir(), output);
        tracing::info!(
            "Reconstructing from {} frames: {}",
            frames.len(),
            command.display()
        );

        let exit = self
            .runner
            .run(&command, self.settings.timeout())
            .await
            .map_err(|e| {
                PipelineError::from_supervisor(Stage::Reconstruction, e, self.diagnostic_chars)
            })?;

        if !exit.success {
            tracing::warn!(
                "Reconstruction exited with {:?}:\n{}",
                exit.code,
                exit.output.to_string_lossy()
            );
            return Err(PipelineError::ExternalTool {
                stage: Stage::Reconstruction,
                exit_code: exit.code,
                stderr_tail: exit.output.last_chars(stderr_budget(
                    Stage::Reconstruction,
                    exit.code,
                    self.diagnostic_chars,
                )),
            });
        }

        let invalid = |reason: String| PipelineError::InvalidOutput {
            stage: Stage::Reconstruction,
            reason: truncate_chars(&reason, self.diagnostic_chars),
        };
        match std::fs::metadata(output) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                tracing::info!(
                    "Reconstruction wrote {} bytes in {}ms",
                    meta.len(),
                    exit.elapsed.as_millis()
                );
                Ok(output.to_path_buf())
            }
            Ok(meta) if meta.is_file() => Err(invalid(format!(
                "tool exited 0 but {} is empty",
                output.display()
            ))),
            Ok(_) => Err(invalid(format!("{} is not a file", output.display()))),
            Err(e) => Err(invalid(format!(
                "tool exited 0 but {} is missing: {e}",
                output.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan3d_kernel::Supervisor;

    #[test]
    fn frames_then_output_follow_configured_args() {
        let settings = ReconstructionConfig {
            program: "python3".into(),
            args: vec!["reconstruction3d.py".into()],
            timeout_secs: 10,
        };
        let recon = Reconstructor::new(settings, Arc::new(Supervisor::new()));
        let cmd = recon.command(Path::new("/w/frames"), Path::new("/w/model.glb"));

        assert_eq!(cmd.program(), Path::new("python3"));
        let args: Vec<_> = cmd.get_args().iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["reconstruction3d.py", "/w/frames", "/w/model.glb"]);
    }
}
