//! Per-run workspaces
//!
//! Each run gets `<workspace_root>/<request_id>-<stamp>/` with a `frames/`
//! subdirectory. Workspaces are never shared or reused: a non-empty directory
//! at the derived path is treated as a corrupted prior run.
//!
//! The finished model is moved into the shared artifacts root by
//! [`WorkspaceManager::finalize`] before the workspace is discarded. That root
//! is append-only: destinations are created exclusively, never overwritten.

use crate::error::WorkspaceError;
use crate::types::RequestId;
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Subdirectory frames are written to
pub const FRAMES_DIR: &str = "frames";

/// File name the reconstruction tool writes inside the workspace
pub const MODEL_FILE: &str = "model.glb";

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Millisecond timestamp that never repeats within this process
fn monotonic_stamp(now_ms: u64) -> u64 {
    let mut prev = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let next = now_ms.max(prev + 1);
        match LAST_STAMP.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

/// Lifecycle of a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    /// Directory tree exists and is in use
    Open,
    /// Artifact has been moved to durable storage
    Finalized,
    /// Directory tree has been removed
    Discarded,
}

/// Run-exclusive directory tree
#[derive(Debug)]
pub struct Workspace {
    request_id: RequestId,
    root_dir: PathBuf,
    frames_dir: PathBuf,
    created_at: DateTime<Utc>,
    stamp: u64,
    state: WorkspaceState,
}

impl Workspace {
    /// Root of the tree
    #[inline]
    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Where frames go
    #[inline]
    #[must_use]
    pub fn frames_dir(&self) -> &Path {
        &self.frames_dir
    }

    /// Where the reconstruction tool writes its model
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.root_dir.join(MODEL_FILE)
    }

    /// When the workspace was opened
    #[inline]
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Unique millisecond stamp used in directory and artifact names
    #[inline]
    #[must_use]
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Owning request
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Current lifecycle state
    #[inline]
    #[must_use]
    pub fn state(&self) -> WorkspaceState {
        self.state
    }

    /// Durable file name for an artifact called `name` (already sanitised)
    #[must_use]
    pub fn artifact_file_name(&self, name: &str, extension: &str) -> String {
        format!("{name}-{}.{extension}", self.stamp)
    }
}

/// Allocates, finalizes and tears down workspaces
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    workspace_root: PathBuf,
    artifacts_root: PathBuf,
}

impl WorkspaceManager {
    /// Manager over the given roots
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>, artifacts_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            artifacts_root: artifacts_root.into(),
        }
    }

    /// Parent of all workspaces
    #[inline]
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Durable artifact storage
    #[inline]
    #[must_use]
    pub fn artifacts_root(&self) -> &Path {
        &self.artifacts_root
    }

    /// Create the workspace tree for `request_id`
    ///
    /// # Errors
    /// - [`WorkspaceError::Occupied`] if the derived path holds files
    /// - [`WorkspaceError::Create`] if the tree cannot be created
    pub fn open(&self, request_id: &RequestId) -> Result<Workspace, WorkspaceError> {
        let now = Utc::now();
        let stamp = monotonic_stamp(u64::try_from(now.timestamp_millis()).unwrap_or(0));
        self.open_stamped(request_id, stamp, now)
    }

    fn open_stamped(
        &self,
        request_id: &RequestId,
        stamp: u64,
        now: DateTime<Utc>,
    ) -> Result<Workspace, WorkspaceError> {
        let created_at = i64::try_from(stamp)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(now);

        let root_dir = self.workspace_root.join(format!("{request_id}-{stamp}"));
        match fs::read_dir(&root_dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    return Err(WorkspaceError::Occupied { path: root_dir });
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(WorkspaceError::Create {
                    path: root_dir,
                    source,
                })
            }
        }

        let frames_dir = root_dir.join(FRAMES_DIR);
        fs::create_dir_all(&frames_dir).map_err(|source| WorkspaceError::Create {
            path: frames_dir.clone(),
            source,
        })?;
        tracing::debug!(request_id = %request_id, "Opened workspace {}", root_dir.display());

        Ok(Workspace {
            request_id: request_id.clone(),
            root_dir,
            frames_dir,
            created_at,
            stamp,
            state: WorkspaceState::Open,
        })
    }

    /// Move `artifact` out of `workspace` into the artifacts root as `file_name`
    ///
    /// # Errors
    /// - [`WorkspaceError::NotOpen`] unless the workspace is open
    /// - [`WorkspaceError::DestinationExists`] if another run owns that name
    /// - [`WorkspaceError::Finalize`] if the move fails
    pub fn finalize(
        &self,
        workspace: &mut Workspace,
        artifact: &Path,
        file_name: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        if workspace.state != WorkspaceState::Open {
            return Err(WorkspaceError::NotOpen {
                path: workspace.root_dir.clone(),
            });
        }

        let dest = self.artifacts_root.join(file_name);
        let finalize_err = |source| WorkspaceError::Finalize {
            from: artifact.to_path_buf(),
            to: dest.clone(),
            source,
        };
        fs::create_dir_all(&self.artifacts_root).map_err(finalize_err)?;

        match fs::hard_link(artifact, &dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(WorkspaceError::DestinationExists { path: dest });
            }
            // Different filesystem (or no hard links): copy instead
            Err(_) => copy_exclusive(artifact, &dest).map_err(|source| {
                if source.kind() == io::ErrorKind::AlreadyExists {
                    WorkspaceError::DestinationExists { path: dest.clone() }
                } else {
                    finalize_err(source)
                }
            })?,
        }

        if let Err(e) = fs::remove_file(artifact) {
            tracing::debug!("Leaving {} for discard: {}", artifact.display(), e);
        }
        workspace.state = WorkspaceState::Finalized;
        tracing::info!(
            request_id = %workspace.request_id,
            "Finalized artifact {}",
            dest.display()
        );
        Ok(dest)
    }

    /// Recursively remove the workspace tree
    ///
    /// Idempotent: a missing tree or an already discarded workspace is a
    /// no-op. Failures are logged here; callers decide whether to care.
    ///
    /// # Errors
    /// Returns [`WorkspaceError::Remove`] if the tree exists but cannot be
    /// removed. The workspace stays in its previous state so the call can be
    /// repeated.
    pub fn discard(&self, workspace: &mut Workspace) -> Result<(), WorkspaceError> {
        if workspace.state == WorkspaceState::Discarded {
            return Ok(());
        }
        match fs::remove_dir_all(&workspace.root_dir) {
            Ok(()) => {
                tracing::debug!(
                    request_id = %workspace.request_id,
                    "Discarded workspace {}",
                    workspace.root_dir.display()
                );
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                tracing::warn!(
                    request_id = %workspace.request_id,
                    "Failed to discard workspace {}: {}",
                    workspace.root_dir.display(),
                    source
                );
                return Err(WorkspaceError::Remove {
                    path: workspace.root_dir.clone(),
                    source,
                });
            }
        }
        workspace.state = WorkspaceState::Discarded;
        Ok(())
    }
}

fn copy_exclusive(from: &Path, to: &Path) -> io::Result<()> {
    let mut src = File::open(from)?;
    let mut dst = OpenOptions::new().write(true).create_new(true).open(to)?;
    let copied = io::copy(&mut src, &mut dst).and_then(|_| dst.sync_all());
    if let Err(e) = copied {
        drop(dst);
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}
