//! Core types for the pipeline
//!
//! Defines the values that flow through a run:
//! - Request identity and the request itself
//! - Frame sets produced by extraction
//! - The descriptor of a finished model
//! - The terminal outcome returned to callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// Longest caller-supplied request token accepted
pub const MAX_REQUEST_ID_LEN: usize = 64;

/// Opaque request token
///
/// Embedded in workspace directory names, so only `[A-Za-z0-9_-]` is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh request ID (ULID for sortability)
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Accept a caller-supplied token
    ///
    /// # Errors
    /// Returns [`InvalidRequestId`] if the token is empty, too long, or
    /// contains characters that are unsafe in a directory name.
    pub fn parse(token: impl Into<String>) -> Result<Self, InvalidRequestId> {
        let token = token.into();
        let valid = !token.is_empty()
            && token.len() <= MAX_REQUEST_ID_LEN
            && token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(token))
        } else {
            Err(InvalidRequestId(token))
        }
    }

    /// Token as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RequestId {
    type Error = InvalidRequestId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RequestId> for String {
    fn from(value: RequestId) -> Self {
        value.0
    }
}

/// Rejected request token
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid request id {0:?}: expected 1-64 characters from [A-Za-z0-9_-]")]
pub struct InvalidRequestId(pub String);

/// Owner of a catalog entry (the restaurant, in the menu use case)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    /// Wrap an owner identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier handed back by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CatalogEntryId(pub Ulid);

impl CatalogEntryId {
    /// Generate new entry ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CatalogEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CatalogEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog metadata attached to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Owner the entry is filed under
    pub owner_id: OwnerId,
    /// Human-readable name shown in the catalog
    pub display_name: String,
    /// Free-form description
    pub description: String,
    /// Catalog category
    pub category: String,
}

impl Registration {
    /// Default category for new entries
    pub const DEFAULT_CATEGORY: &'static str = "General";

    /// Registration with an empty description and the default category
    #[must_use]
    pub fn new(owner_id: OwnerId, display_name: impl Into<String>) -> Self {
        Self {
            owner_id,
            display_name: display_name.into(),
            description: String::new(),
            category: Self::DEFAULT_CATEGORY.to_string(),
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// With category
    #[inline]
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

/// One conversion request
///
/// Immutable once built; the orchestrator only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    source_video_path: PathBuf,
    desired_name: String,
    request_id: RequestId,
    registration: Option<Registration>,
}

impl PipelineRequest {
    /// Request with a freshly generated ID
    #[must_use]
    pub fn new(source_video_path: impl Into<PathBuf>, desired_name: impl Into<String>) -> Self {
        Self {
            source_video_path: source_video_path.into(),
            desired_name: desired_name.into(),
            request_id: RequestId::new(),
            registration: None,
        }
    }

    /// With a caller-chosen request ID
    #[inline]
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// With catalog registration after a successful run
    #[inline]
    #[must_use]
    pub fn with_registration(mut self, registration: Registration) -> Self {
        self.registration = Some(registration);
        self
    }

    /// Video the run converts
    #[inline]
    #[must_use]
    pub fn source_video_path(&self) -> &Path {
        &self.source_video_path
    }

    /// Name requested for the artifact (unsanitised)
    #[inline]
    #[must_use]
    pub fn desired_name(&self) -> &str {
        &self.desired_name
    }

    /// Request ID
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Catalog registration, if requested
    #[inline]
    #[must_use]
    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }
}

/// Ordered frames sampled from one video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSet {
    dir: PathBuf,
    frames: Vec<PathBuf>,
}

impl FrameSet {
    /// Frames living in `dir`, already in sequence order
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, frames: Vec<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            frames,
        }
    }

    /// Directory holding the frames
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of frames
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frames were produced
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame paths in order
    #[inline]
    #[must_use]
    pub fn frames(&self) -> &[PathBuf] {
        &self.frames
    }
}

/// Model file formats the catalog understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// Binary glTF
    Glb,
    /// JSON glTF
    Gltf,
    /// Wavefront OBJ
    Obj,
}

impl ModelFormat {
    /// File extension without the dot
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Glb => "glb",
            Self::Gltf => "gltf",
            Self::Obj => "obj",
        }
    }
}

/// Metadata of a finished model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Durable location of the model
    pub model_path: PathBuf,
    /// File name inside the artifacts root
    pub file_name: String,
    /// Public URL the model is served under
    pub model_url: String,
    /// Size of the durable file
    pub size_bytes: u64,
    /// Number of frames the model was reconstructed from
    pub frame_count: usize,
    /// Workspace the run used (already discarded)
    pub workspace_ref: PathBuf,
    /// When the descriptor was produced
    pub produced_at: DateTime<Utc>,
    /// Model format
    pub format: ModelFormat,
    /// BLAKE3 digest of the durable file (hex)
    pub checksum: String,
}

/// Classified failure, see [`PipelineOutcome::Failure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Workspace could not be created or the input was rejected
    SetupFailure,
    /// A tool exited non-zero or produced nothing
    ExternalToolFailure,
    /// A tool executable was missing or could not be started
    ToolUnavailable,
    /// A tool reported success but its output failed a sanity check
    InvalidOutput,
    /// Too few frames to attempt reconstruction
    InsufficientFrames,
    /// A tool exceeded its deadline
    Timeout,
    /// Moving, measuring or registering the artifact failed
    FinalizationFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SetupFailure => "setup failure",
            Self::ExternalToolFailure => "external tool failure",
            Self::ToolUnavailable => "tool unavailable",
            Self::InvalidOutput => "invalid output",
            Self::InsufficientFrames => "insufficient frames",
            Self::Timeout => "timeout",
            Self::FinalizationFailure => "finalization failure",
        };
        f.write_str(s)
    }
}

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    Extraction,
    FrameValidation,
    Reconstruction,
    ArtifactValidation,
    Finalization,
    Registration,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Setup => "setup",
            Self::Extraction => "extraction",
            Self::FrameValidation => "frame_validation",
            Self::Reconstruction => "reconstruction",
            Self::ArtifactValidation => "artifact_validation",
            Self::Finalization => "finalization",
            Self::Registration => "registration",
        };
        f.write_str(s)
    }
}

/// Terminal result of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// The model is in durable storage
    Success {
        descriptor: ArtifactDescriptor,
        /// Set when the run registered the model in the catalog
        catalog_entry: Option<CatalogEntryId>,
    },
    /// The run failed; the workspace has been cleaned up
    Failure {
        kind: FailureKind,
        /// Short, truncated diagnostic
        message: String,
        stage: Stage,
    },
}

impl PipelineOutcome {
    /// Whether the run succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Descriptor of a successful run
    #[must_use]
    pub fn descriptor(&self) -> Option<&ArtifactDescriptor> {
        match self {
            Self::Success { descriptor, .. } => Some(descriptor),
            Self::Failure { .. } => None,
        }
    }

    /// Failure classification
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failure { kind, .. } => Some(*kind),
            Self::Success { .. } => None,
        }
    }

    /// Stage a failed run stopped in
    #[must_use]
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::Failure { stage, .. } => Some(*stage),
            Self::Success { .. } => None,
        }
    }
}

/// Longest file name stem [`sanitize_name`] produces
pub const MAX_NAME_STEM_CHARS: usize = 100;

/// Make `name` safe to use as a file name stem
///
/// Characters outside `[A-Za-z0-9_-]` become `-`, runs of `-` collapse, and
/// leading/trailing `-` are trimmed. The stem is cut to
/// [`MAX_NAME_STEM_CHARS`]. An empty result falls back to `model`.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(MAX_NAME_STEM_CHARS + 1));
    for c in name.chars() {
        if out.len() > MAX_NAME_STEM_CHARS {
            break;
        }
        let c = if c.is_ascii_alphanumeric() || c == '_' {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    // Output is ASCII, so byte and char counts agree
    out.truncate(MAX_NAME_STEM_CHARS);
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "model".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn request_id_rejects_path_separators() {
        assert!(RequestId::parse("req-42_a").is_ok());
        assert!(RequestId::parse("../etc").is_err());
        assert!(RequestId::parse("").is_err());
        assert!(RequestId::parse("a".repeat(65)).is_err());
    }

    #[test]
    fn generated_request_ids_are_valid_tokens() {
        let id = RequestId::new();
        assert!(RequestId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn request_builder() {
        let owner = OwnerId::new("rest-1");
        let request = PipelineRequest::new("clip.mp4", "Pizza")
            .with_request_id(RequestId::parse("r1").unwrap())
            .with_registration(Registration::new(owner.clone(), "Pizza").with_category("Mains"));

        assert_eq!(request.request_id().as_str(), "r1");
        assert_eq!(request.registration().unwrap().owner_id, owner);
        assert_eq!(request.registration().unwrap().category, "Mains");
    }

    #[test]
    fn sanitize_examples() {
        assert_eq!(sanitize_name("demo"), "demo");
        assert_eq!(sanitize_name("Çiğ köfte / 2"), "i-k-fte-2");
        assert_eq!(sanitize_name("../../etc/passwd"), "etc-passwd");
        assert_eq!(sanitize_name("   "), "model");
    }

    #[test]
    fn long_names_are_capped() {
        assert_eq!(sanitize_name(&"a".repeat(300)), "a".repeat(MAX_NAME_STEM_CHARS));
        let cut_at_dash = format!("{}-{}", "b".repeat(MAX_NAME_STEM_CHARS - 1), "c".repeat(50));
        assert_eq!(sanitize_name(&cut_at_dash), "b".repeat(MAX_NAME_STEM_CHARS - 1));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = PipelineOutcome::Failure {
            kind: FailureKind::InsufficientFrames,
            message: "found 9 frames, need 10".to_string(),
            stage: Stage::FrameValidation,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "insufficient_frames");
        assert_eq!(json["stage"], "frame_validation");
    }

    proptest! {
        #[test]
        fn prop_sanitized_names_are_safe(name in ".{0,40}|.{200,600}") {
            let s = sanitize_name(&name);
            prop_assert!(!s.is_empty());
            prop_assert!(s.len() <= MAX_NAME_STEM_CHARS);
            prop_assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            prop_assert!(!s.starts_with('-') && !s.ends_with('-'));
            prop_assert!(!s.contains("--"));
        }
    }
}
