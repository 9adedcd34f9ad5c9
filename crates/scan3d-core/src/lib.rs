//! scan3d Core - video to 3D model pipeline
//!
//! The control layer around two black-box tools:
//! - Allocates a run-exclusive workspace per request
//! - Samples frames from the source video with an external tool
//! - Refuses to reconstruct from too few frames
//! - Drives the external reconstruction tool under a deadline
//! - Moves the produced model to durable storage and records it in a catalog
//! - Cleans up the workspace on every failure path
//!
//! # Example
//!
//! ```rust,ignore
//! use scan3d_core::{PipelineConfig, PipelineOrchestrator, PipelineRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::new("/var/tmp/scan3d", "/srv/uploads/models");
//! let orchestrator = PipelineOrchestrator::new(config)?;
//!
//! let request = PipelineRequest::new("uploads/videos/video-1.mp4", "margherita");
//! let outcome = orchestrator.run(request).await;
//!
//! if let Some(descriptor) = outcome.descriptor() {
//!     println!("{} ({} bytes)", descriptor.model_url, descriptor.size_bytes);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod catalog;
pub mod config;
pub mod error;
pub mod extraction;
pub mod pipeline;
pub mod precheck;
pub mod reconstruction;
pub mod state;
pub mod types;
pub mod workspace;

// Re-exports for convenience
pub use catalog::{CatalogRecord, CatalogRegistrar, InMemoryCatalog, JsonLinesCatalog};
pub use config::{
    ExtractionConfig, PipelineConfig, ReconstructionConfig, RegistrationFailurePolicy,
    VideoPolicy, MIN_FRAMES_FLOOR,
};
pub use error::{CatalogError, ConfigError, PipelineError, WorkspaceError};
pub use extraction::FrameExtractor;
pub use pipeline::PipelineOrchestrator;
pub use reconstruction::Reconstructor;
pub use state::{FailedAt, PipelineState, RunTracker, StateMachineError};
pub use types::{
    ArtifactDescriptor, CatalogEntryId, FailureKind, FrameSet, InvalidRequestId, ModelFormat,
    OwnerId, PipelineOutcome, PipelineRequest, Registration, RequestId, Stage,
    MAX_NAME_STEM_CHARS,
};
pub use workspace::{Workspace, WorkspaceManager, WorkspaceState};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running the pipeline
    pub use crate::{
        ArtifactDescriptor, CatalogRegistrar, FailureKind, InMemoryCatalog, PipelineConfig,
        PipelineOrchestrator, PipelineOutcome, PipelineRequest, Registration, RequestId, Stage,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
