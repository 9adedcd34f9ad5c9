//! Pipeline configuration
//!
//! Loaded from TOML, then optionally overridden from `SCAN3D_*` environment
//! variables. Every field has a default so a partial file is enough.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do with the durable artifact when catalog registration fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationFailurePolicy {
    /// Remove the artifact so no unregistered model is left behind
    #[default]
    DeleteArtifact,
    /// Leave the artifact in place for out-of-band reconciliation
    KeepOrphan,
}

/// Accepted source videos
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoPolicy {
    /// Lower-case extensions without the dot
    pub allowed_extensions: Vec<String>,
    /// Largest accepted video
    pub max_bytes: u64,
}

impl Default for VideoPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: ["mp4", "webm", "mov", "avi", "mkv"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            max_bytes: 500 * 1024 * 1024,
        }
    }
}

/// Frame-sampling tool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments placed before the generated ones
    pub args: Vec<String>,
    /// Frames sampled per second of video
    pub fps: u32,
    /// Encoder quality (lower is better)
    pub quality: u32,
    /// Wall-clock deadline
    pub timeout_secs: u64,
}

impl ExtractionConfig {
    /// Deadline as a duration
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            args: Vec::new(),
            fps: 2,
            quality: 2,
            timeout_secs: 300,
        }
    }
}

/// Reconstruction tool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments placed before `<frames_dir> <output_path>`
    pub args: Vec<String>,
    /// Wall-clock deadline
    pub timeout_secs: u64,
}

impl ReconstructionConfig {
    /// Deadline as a duration
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("python3"),
            args: vec!["reconstruction3d.py".to_string()],
            timeout_secs: 1800,
        }
    }
}

/// Smallest `min_frames` a configuration may set
///
/// Deployments may demand more frames, never fewer.
pub const MIN_FRAMES_FLOOR: usize = 10;

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Parent of per-run workspaces
    pub workspace_root: PathBuf,
    /// Durable model storage
    pub artifacts_root: PathBuf,
    /// URL prefix models are served under
    pub public_url_prefix: String,
    /// Fewest frames reconstruction is attempted with, at least
    /// [`MIN_FRAMES_FLOOR`]
    pub min_frames: usize,
    /// Keep failed workspaces for diagnostics
    pub retain_on_failure: bool,
    /// Longest diagnostic returned to callers
    pub diagnostic_chars: usize,
    /// Tool output retained per invocation
    pub output_tail_bytes: usize,
    /// Artifact handling when registration fails
    pub registration_failure_policy: RegistrationFailurePolicy,
    pub video: VideoPolicy,
    pub extraction: ExtractionConfig,
    pub reconstruction: ReconstructionConfig,
}

impl PipelineConfig {
    /// Default configuration with explicit storage roots
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>, artifacts_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            artifacts_root: artifacts_root.into(),
            ..Self::default()
        }
    }

    /// With extraction tool settings
    #[inline]
    #[must_use]
    pub fn with_extraction(mut self, extraction: ExtractionConfig) -> Self {
        self.extraction = extraction;
        self
    }

    /// With reconstruction tool settings
    #[inline]
    #[must_use]
    pub fn with_reconstruction(mut self, reconstruction: ReconstructionConfig) -> Self {
        self.reconstruction = reconstruction;
        self
    }

    /// With minimum frame count
    #[inline]
    #[must_use]
    pub fn with_min_frames(mut self, min_frames: usize) -> Self {
        self.min_frames = min_frames;
        self
    }

    /// With registration failure policy
    #[inline]
    #[must_use]
    pub fn with_registration_failure_policy(mut self, policy: RegistrationFailurePolicy) -> Self {
        self.registration_failure_policy = policy;
        self
    }

    /// Keep failed workspaces
    #[inline]
    #[must_use]
    pub fn retaining_failed_workspaces(mut self, retain: bool) -> Self {
        self.retain_on_failure = retain;
        self
    }

    /// Parse a TOML document
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] on malformed TOML.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns [`ConfigError::Render`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `SCAN3D_*` overrides from the process environment
    ///
    /// # Errors
    /// Returns [`ConfigError::Env`] for unparsable numeric values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    ///
    /// # Errors
    /// Returns [`ConfigError::Env`] for unparsable numeric values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SCAN3D_WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCAN3D_ARTIFACTS_ROOT") {
            self.artifacts_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCAN3D_FFMPEG") {
            self.extraction.program = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCAN3D_RECONSTRUCTOR") {
            self.reconstruction.program = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCAN3D_EXTRACTION_TIMEOUT_SECS") {
            self.extraction.timeout_secs = parse_secs("SCAN3D_EXTRACTION_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("SCAN3D_RECONSTRUCTION_TIMEOUT_SECS") {
            self.reconstruction.timeout_secs =
                parse_secs("SCAN3D_RECONSTRUCTION_TIMEOUT_SECS", v)?;
        }
        Ok(())
    }

    /// Check the values are usable together
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_frames < MIN_FRAMES_FLOOR {
            return Err(ConfigError::Invalid(format!(
                "min_frames must be at least {MIN_FRAMES_FLOOR}, got {}",
                self.min_frames
            )));
        }
        if self.extraction.fps == 0 {
            return Err(ConfigError::Invalid("extraction.fps must be positive".into()));
        }
        if self.extraction.timeout_secs == 0 || self.reconstruction.timeout_secs == 0 {
            return Err(ConfigError::Invalid("tool timeouts must be positive".into()));
        }
        if self.workspace_root == self.artifacts_root {
            return Err(ConfigError::Invalid(
                "workspace_root and artifacts_root must differ".into(),
            ));
        }
        if self.diagnostic_chars < 16 {
            return Err(ConfigError::Invalid("diagnostic_chars must be at least 16".into()));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("scan3d").join("workspaces"),
            artifacts_root: PathBuf::from("uploads").join("models"),
            public_url_prefix: "/uploads/models".to_string(),
            min_frames: MIN_FRAMES_FLOOR,
            retain_on_failure: false,
            diagnostic_chars: 512,
            output_tail_bytes: scan3d_kernel::tail::DEFAULT_TAIL_BYTES,
            registration_failure_policy: RegistrationFailurePolicy::default(),
            video: VideoPolicy::default(),
            extraction: ExtractionConfig::default(),
            reconstruction: ReconstructionConfig::default(),
        }
    }
}

fn parse_secs(var: &str, value: String) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value,
    })
}
