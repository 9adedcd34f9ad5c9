//! Pipeline orchestrator
//!
//! Sequences precheck, extraction, frame validation, reconstruction, artifact
//! validation, finalization and (optionally) catalog registration for one
//! request. Every step is recorded in a [`RunTracker`], which is the only
//! place that decides which stage a run failed in.
//!
//! On failure the workspace is discarded (unless retained for diagnostics)
//! before the outcome is returned. Discard errors are logged and never
//! replace the original failure.

use crate::catalog::CatalogRegistrar;
use crate::config::{PipelineConfig, RegistrationFailurePolicy};
use crate::error::{truncate_chars, ConfigError, PipelineError};
use crate::extraction::FrameExtractor;
use crate::precheck::check_source_video;
use crate::reconstruction::Reconstructor;
use crate::state::{PipelineState, RunTracker};
use crate::types::{
    sanitize_name, ArtifactDescriptor, CatalogEntryId, ModelFormat, PipelineOutcome,
    PipelineRequest, RequestId, Stage,
};
use crate::workspace::{Workspace, WorkspaceManager, WorkspaceState};
use chrono::Utc;
use scan3d_kernel::{Supervisor, ToolRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Drives pipeline runs
///
/// Cheap to share: runs hold no state in the orchestrator, so one instance
/// can serve any number of concurrent requests.
pub struct PipelineOrchestrator {
    config: Arc<PipelineConfig>,
    workspaces: WorkspaceManager,
    extractor: FrameExtractor,
    reconstructor: Reconstructor,
    registrar: Option<Arc<dyn CatalogRegistrar>>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("config", &self.config)
            .field("registrar", &self.registrar.is_some())
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Orchestrator running tools as supervised child processes
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if `config` fails
    /// [`PipelineConfig::validate`].
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        let runner: Arc<dyn ToolRunner> =
            Arc::new(Supervisor::with_tail_bytes(config.output_tail_bytes));
        Self::with_runner(config, runner)
    }

    /// Orchestrator executing tools through `runner`
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if `config` fails
    /// [`PipelineConfig::validate`].
    pub fn with_runner(
        config: PipelineConfig,
        runner: Arc<dyn ToolRunner>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let workspaces = WorkspaceManager::new(&config.workspace_root, &config.artifacts_root);
        let extractor = FrameExtractor::new(config.extraction.clone(), Arc::clone(&runner))
            .with_diagnostic_chars(config.diagnostic_chars);
        let reconstructor = Reconstructor::new(config.reconstruction.clone(), runner)
            .with_diagnostic_chars(config.diagnostic_chars);
        Ok(Self {
            config: Arc::new(config),
            workspaces,
            extractor,
            reconstructor,
            registrar: None,
        })
    }

    /// Register finished models with `registrar`
    #[must_use]
    pub fn with_registrar(mut self, registrar: Arc<dyn CatalogRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Run `request` to a terminal state
    ///
    /// Never panics on tool or filesystem failures; every failure becomes a
    /// [`PipelineOutcome::Failure`]. Dropping the returned future kills any
    /// running tool and removes the run's workspace.
    pub async fn run(&self, request: PipelineRequest) -> PipelineOutcome {
        let request_id = request.request_id().clone();
        tracing::info!(
            request_id = %request_id,
            "Starting pipeline for {} as {:?}",
            request.source_video_path().display(),
            request.desired_name()
        );

        let mut tracker = RunTracker::new(request_id.clone());
        let mut scratch = RunScratch::new(&self.workspaces, request_id.clone());

        let result = self.drive(&request, &mut tracker, &mut scratch).await;
        match result {
            Ok((descriptor, catalog_entry)) => {
                // The durable artifact now belongs to the caller
                scratch.durable = None;
                scratch.workspace = None;
                tracing::info!(
                    request_id = %request_id,
                    "Pipeline succeeded: {} ({} bytes, {} frames)",
                    descriptor.model_url,
                    descriptor.size_bytes,
                    descriptor.frame_count
                );
                PipelineOutcome::Success {
                    descriptor,
                    catalog_entry,
                }
            }
            Err(err) => {
                advance(&mut tracker, PipelineState::Failed(err.failed_at()));
                self.clean_up_failure(&err, &mut scratch);
                tracing::error!(
                    request_id = %request_id,
                    "Pipeline failed in {}: {}",
                    err.stage(),
                    err
                );
                PipelineOutcome::Failure {
                    kind: err.kind(),
                    message: truncate_chars(&err.to_string(), self.config.diagnostic_chars),
                    stage: err.stage(),
                }
            }
        }
    }

    async fn drive(
        &self,
        request: &PipelineRequest,
        tracker: &mut RunTracker,
        scratch: &mut RunScratch<'_>,
    ) -> Result<(ArtifactDescriptor, Option<CatalogEntryId>), PipelineError> {
        let RunScratch {
            workspace: workspace_slot,
            durable,
            ..
        } = scratch;

        check_source_video(request.source_video_path(), &self.config.video)?;
        let workspace = self
            .workspaces
            .open(request.request_id())
            .map_err(|e| PipelineError::Setup {
                reason: e.to_string(),
            })?;
        let workspace = workspace_slot.insert(workspace);

        advance(tracker, PipelineState::ExtractingFrames);
        let frames = self
            .extractor
            .extract(request.source_video_path(), workspace.frames_dir())
            .await?;

        advance(tracker, PipelineState::ValidatingFrames);
        if frames.len() < self.config.min_frames {
            return Err(PipelineError::InsufficientFrames {
                found: frames.len(),
                required: self.config.min_frames,
            });
        }

        advance(tracker, PipelineState::Reconstructing);
        let model = self
            .reconstructor
            .reconstruct(&frames, &workspace.model_path())
            .await?;

        advance(tracker, PipelineState::ValidatingArtifact);
        validate_artifact(&model)?;

        advance(tracker, PipelineState::Finalizing);
        let format = ModelFormat::Glb;
        let file_name =
            workspace.artifact_file_name(&sanitize_name(request.desired_name()), format.extension());
        let finalization = |reason: String| PipelineError::Finalization {
            stage: Stage::Finalization,
            reason,
        };
        let model_path = self
            .workspaces
            .finalize(workspace, &model, &file_name)
            .map_err(|e| finalization(e.to_string()))?;
        let model_path = durable.insert(model_path).clone();

        let size_bytes = std::fs::metadata(&model_path)
            .map_err(|e| finalization(format!("cannot measure {}: {e}", model_path.display())))?
            .len();
        let checksum = checksum_file(model_path.clone())
            .await
            .map_err(|e| finalization(format!("cannot hash {}: {e}", model_path.display())))?;

        let descriptor = ArtifactDescriptor {
            model_url: format!(
                "{}/{}",
                self.config.public_url_prefix.trim_end_matches('/'),
                file_name
            ),
            model_path,
            file_name,
            size_bytes,
            frame_count: frames.len(),
            workspace_ref: workspace.root_dir().to_path_buf(),
            produced_at: Utc::now(),
            format,
            checksum,
        };
        // Already logged by the manager; a leftover tree is not a run failure
        let _ = self.workspaces.discard(workspace);

        let mut catalog_entry = None;
        match (request.registration(), &self.registrar) {
            (Some(registration), Some(registrar)) => {
                advance(tracker, PipelineState::Registering);
                let id = registrar
                    .register(&descriptor, registration)
                    .await
                    .map_err(|e| PipelineError::Finalization {
                        stage: Stage::Registration,
                        reason: e.to_string(),
                    })?;
                tracing::info!(
                    request_id = %request.request_id(),
                    "Registered {} as catalog entry {}",
                    descriptor.file_name,
                    id
                );
                catalog_entry = Some(id);
            }
            (Some(_), None) => {
                tracing::warn!(
                    request_id = %request.request_id(),
                    "Request carries a registration but no catalog is configured"
                );
            }
            (None, _) => {}
        }

        advance(tracker, PipelineState::Succeeded);
        Ok((descriptor, catalog_entry))
    }

    fn clean_up_failure(&self, err: &PipelineError, scratch: &mut RunScratch<'_>) {
        if let Some(path) = scratch.durable.take() {
            let keep = err.stage() == Stage::Registration
                && self.config.registration_failure_policy == RegistrationFailurePolicy::KeepOrphan;
            if keep {
                tracing::warn!(
                    request_id = %scratch.request_id,
                    "Keeping unregistered artifact {}",
                    path.display()
                );
            } else {
                remove_artifact(&path);
            }
        }

        if let Some(mut workspace) = scratch.workspace.take() {
            if self.config.retain_on_failure && workspace.state() != WorkspaceState::Discarded {
                tracing::info!(
                    request_id = %scratch.request_id,
                    "Retaining failed workspace {}",
                    workspace.root_dir().display()
                );
                return;
            }
            // Already logged by the manager; the original failure wins
            let _ = self.workspaces.discard(&mut workspace);
        }
    }
}

/// Resources a run has created and not yet handed over
///
/// Cleaned up on drop, which only happens with something left in it when the
/// run future is dropped mid-flight.
struct RunScratch<'a> {
    manager: &'a WorkspaceManager,
    request_id: RequestId,
    workspace: Option<Workspace>,
    durable: Option<PathBuf>,
}

impl<'a> RunScratch<'a> {
    fn new(manager: &'a WorkspaceManager, request_id: RequestId) -> Self {
        Self {
            manager,
            request_id,
            workspace: None,
            durable: None,
        }
    }
}

impl Drop for RunScratch<'_> {
    fn drop(&mut self) {
        if self.workspace.is_none() && self.durable.is_none() {
            return;
        }
        tracing::warn!(request_id = %self.request_id, "Pipeline run cancelled, cleaning up");
        if let Some(path) = self.durable.take() {
            remove_artifact(&path);
        }
        if let Some(mut workspace) = self.workspace.take() {
            let _ = self.manager.discard(&mut workspace);
        }
    }
}

fn advance(tracker: &mut RunTracker, to: PipelineState) {
    let advanced = tracker.advance(to);
    if let Err(e) = &advanced {
        tracing::error!("{}", e);
    }
    debug_assert!(advanced.is_ok(), "illegal pipeline transition");
}

fn validate_artifact(model: &Path) -> Result<(), PipelineError> {
    let invalid = |reason: String| PipelineError::InvalidOutput {
        stage: Stage::ArtifactValidation,
        reason,
    };
    match std::fs::metadata(model) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(_) => Err(invalid(format!("{} is empty", model.display()))),
        Err(e) => Err(invalid(format!("{} unreadable: {e}", model.display()))),
    }
}

fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!("Removed artifact {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove artifact {}: {}", path.display(), e),
    }
}

/// BLAKE3 hex digest of the file at `path`
async fn checksum_file(path: PathBuf) -> std::io::Result<String> {
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = blake3::Hasher::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(hasher.finalize().to_hex().to_string())
    })
    .await
    .map_err(std::io::Error::other)?
}
