//! Source video preconditions
//!
//! Cheap checks run before a workspace is opened or any tool is started.

use crate::config::VideoPolicy;
use crate::error::PipelineError;
use std::path::Path;

/// Check `video` against `policy`, returning its size in bytes
///
/// # Errors
/// Returns [`PipelineError::Setup`] if the file is missing, not a regular
/// file, empty, too large, or has an extension outside the policy.
pub fn check_source_video(video: &Path, policy: &VideoPolicy) -> Result<u64, PipelineError> {
    let reject = |reason: String| PipelineError::Setup { reason };

    let metadata = std::fs::metadata(video)
        .map_err(|e| reject(format!("source video {} unreadable: {e}", video.display())))?;
    if !metadata.is_file() {
        return Err(reject(format!("source video {} is not a file", video.display())));
    }
    if metadata.len() == 0 {
        return Err(reject(format!("source video {} is empty", video.display())));
    }
    if metadata.len() > policy.max_bytes {
        return Err(reject(format!(
            "source video is {} bytes, limit is {}",
            metadata.len(),
            policy.max_bytes
        )));
    }

    let extension = video
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !policy
        .allowed_extensions
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
    {
        return Err(reject(format!(
            "unsupported video type {extension:?} (allowed: {})",
            policy.allowed_extensions.join(", ")
        )));
    }

    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn accepts_known_extensions_case_insensitively() {
        let dir = TempDir::new().unwrap();
        let video = write(&dir, "CLIP.MP4", b"video");
        assert_eq!(check_source_video(&video, &VideoPolicy::default()).unwrap(), 5);
    }

    #[test]
    fn rejects_missing_empty_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let policy = VideoPolicy::default();

        assert!(check_source_video(&dir.path().join("nope.mp4"), &policy).is_err());
        assert!(check_source_video(&write(&dir, "empty.webm", b""), &policy).is_err());
        assert!(check_source_video(&write(&dir, "model.glb", b"glTF"), &policy).is_err());
        assert!(check_source_video(dir.path(), &policy).is_err());
    }

    #[test]
    fn enforces_size_limit() {
        let dir = TempDir::new().unwrap();
        let policy = VideoPolicy {
            max_bytes: 4,
            ..VideoPolicy::default()
        };
        let err = check_source_video(&write(&dir, "big.mov", b"12345"), &policy).unwrap_err();
        assert_eq!(err.kind(), crate::types::FailureKind::SetupFailure);
    }
}
