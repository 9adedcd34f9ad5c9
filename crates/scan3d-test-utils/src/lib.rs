//! Testing utilities for scan3d workspace
//!
//! Fake external tools (POSIX shell scripts run through `/bin/sh`), a
//! temporary-directory fixture and a catalog that always refuses.

#![allow(missing_docs)]

use async_trait::async_trait;
use scan3d_core::{
    ArtifactDescriptor, CatalogEntryId, CatalogError, CatalogRegistrar, ExtractionConfig,
    PipelineConfig, ReconstructionConfig, Registration,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Shell every fake tool runs under
pub const SHELL: &str = "/bin/sh";

/// A fake tool script plus its invocation log
#[derive(Debug, Clone)]
pub struct FakeTool {
    script: PathBuf,
    calls: PathBuf,
    pid_file: Option<PathBuf>,
}

impl FakeTool {
    fn write(dir: &Path, name: &str, body: &str) -> Self {
        std::fs::create_dir_all(dir).unwrap();
        let script = dir.join(format!("{name}.sh"));
        let calls = dir.join(format!("{name}.calls"));
        let text = format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\nfor last; do :; done\n{body}\n",
            calls.display()
        );
        std::fs::write(&script, text).unwrap();
        Self {
            script,
            calls,
            pid_file: None,
        }
    }

    /// Script path (first argument to [`SHELL`])
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Times the tool has been started
    pub fn invocations(&self) -> usize {
        std::fs::read_to_string(&self.calls)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Pid written by a hanging tool, once it has started
    pub fn recorded_pid(&self) -> Option<u32> {
        let file = self.pid_file.as_ref()?;
        std::fs::read_to_string(file).ok()?.trim().parse().ok()
    }

    /// Extraction settings running this tool with `timeout_secs`
    pub fn as_extraction(&self, timeout_secs: u64) -> ExtractionConfig {
        ExtractionConfig {
            program: PathBuf::from(SHELL),
            args: vec![self.script.display().to_string()],
            timeout_secs,
            ..ExtractionConfig::default()
        }
    }

    /// Reconstruction settings running this tool with `timeout_secs`
    pub fn as_reconstruction(&self, timeout_secs: u64) -> ReconstructionConfig {
        ReconstructionConfig {
            program: PathBuf::from(SHELL),
            args: vec![self.script.display().to_string()],
            timeout_secs,
        }
    }
}

/// Temporary storage roots, a dummy source video and a tool directory
#[derive(Debug)]
pub struct Fixture {
    dir: TempDir,
    video: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"\x00\x00\x00\x18ftypmp42 not a real video").unwrap();
        Self { dir, video }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Source video accepted by the precheck
    pub fn video(&self) -> &Path {
        &self.video
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn artifacts_root(&self) -> PathBuf {
        self.dir.path().join("models")
    }

    fn tools_dir(&self) -> PathBuf {
        self.dir.path().join("tools")
    }

    /// Extractor writing `frames` frames next to its output pattern
    pub fn fake_ffmpeg(&self, name: &str, frames: usize) -> FakeTool {
        let body = format!(
            "dir=$(dirname \"$last\")\ni=1\nwhile [ $i -le {frames} ]; do\n  printf 'jpeg' > \"$dir/$(printf 'frame-%04d.jpg' $i)\"\n  i=$((i+1))\ndone\necho \"wrote {frames} frames\" >&2"
        );
        FakeTool::write(&self.tools_dir(), name, &body)
    }

    /// Reconstructor writing `bytes` bytes to its last argument
    pub fn fake_reconstructor(&self, name: &str, bytes: usize) -> FakeTool {
        let body = if bytes == 0 {
            ": > \"$last\"".to_string()
        } else {
            format!("dd if=/dev/zero of=\"$last\" bs=1 count={bytes} 2>/dev/null")
        };
        FakeTool::write(&self.tools_dir(), name, &body)
    }

    /// Tool that exits 0 without writing anything
    pub fn silent_tool(&self, name: &str) -> FakeTool {
        FakeTool::write(&self.tools_dir(), name, "exit 0")
    }

    /// Tool that prints `message` on stderr and exits with `code`
    pub fn failing_tool(&self, name: &str, code: i32, message: &str) -> FakeTool {
        let body = format!("echo '{message}' >&2\nexit {code}");
        FakeTool::write(&self.tools_dir(), name, &body)
    }

    /// Tool that records its pid and then sleeps far past any test deadline
    pub fn hanging_tool(&self, name: &str) -> FakeTool {
        let pid_file = self.tools_dir().join(format!("{name}.pid"));
        let body = format!("echo $$ > '{}'\nexec sleep 30", pid_file.display());
        let mut tool = FakeTool::write(&self.tools_dir(), name, &body);
        tool.pid_file = Some(pid_file);
        tool
    }

    /// Tool that starts a background sleeper, records the sleeper's pid and
    /// waits on it
    pub fn hanging_tool_with_helper(&self, name: &str) -> FakeTool {
        let pid_file = self.tools_dir().join(format!("{name}.pid"));
        let body = format!("sleep 30 &
echo $! > '{}'
wait", pid_file.display());
        let mut tool = FakeTool::write(&self.tools_dir(), name, &body);
        tool.pid_file = Some(pid_file);
        tool
    }

    /// Pipeline config over this fixture's roots using the given tools
    pub fn config(&self, extractor: &FakeTool, reconstructor: &FakeTool) -> PipelineConfig {
        PipelineConfig::new(self.workspace_root(), self.artifacts_root())
            .with_extraction(extractor.as_extraction(30))
            .with_reconstruction(reconstructor.as_reconstruction(30))
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Entries directly under `dir`, sorted; empty if `dir` does not exist
pub fn list_dir(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<_> = entries.map(|e| e.unwrap().path()).collect();
    paths.sort();
    paths
}

/// Whether a process with `pid` is still running
///
/// Zombies count as gone: a killed orphan may linger unreaped when nothing
/// in the container reaps for PID 1.
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // State is the first field after the parenthesised command name
        Ok(stat) => !matches!(
            stat.rsplit(')')
                .next()
                .and_then(|rest| rest.trim_start().chars().next()),
            Some('Z' | 'X')
        ),
        Err(_) if Path::new("/proc/self").exists() => false,
        Err(_) => std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false),
    }
}

/// Poll until `pid` is gone or `limit` passes; true if it is gone
pub async fn exited_within(pid: u32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while process_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    true
}

/// Catalog that refuses every registration
#[derive(Debug, Default)]
pub struct FailingCatalog;

#[async_trait]
impl CatalogRegistrar for FailingCatalog {
    async fn register(
        &self,
        _descriptor: &ArtifactDescriptor,
        _registration: &Registration,
    ) -> Result<CatalogEntryId, CatalogError> {
        Err(CatalogError::Rejected("catalog unavailable".to_string()))
    }
}
