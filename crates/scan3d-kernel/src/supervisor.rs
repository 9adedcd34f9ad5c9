//! Supervised execution of external tools
//!
//! Every tool invocation goes through the same three steps: spawn, wait with
//! a deadline, forcibly terminate on expiry. Output from both streams is
//! drained concurrently into one bounded [`OutputTail`].
//!
//! On unix each tool runs in its own process group. However a run ends,
//! including the caller dropping the future, the whole group is killed, so
//! helpers the tool started cannot outlive it.
//!
//! Callers depend on the [`ToolRunner`] trait, not on [`Supervisor`]
//! directly, so tests and alternative runtimes can plug in their own runner.

use crate::error::SupervisorError;
use crate::tail::{OutputTail, DEFAULT_TAIL_BYTES};
use parking_lot::Mutex;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// How long output readers may keep running after the child is gone.
///
/// A grandchild that inherited the pipes can keep them open indefinitely.
const READER_GRACE: Duration = Duration::from_secs(2);

/// One invocation of an external tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
}

impl ToolCommand {
    /// Command running `program` with no arguments
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Set an environment variable for the child
    #[must_use]
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Run the child in `dir`
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Program to execute
    #[inline]
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments passed to the program
    #[inline]
    #[must_use]
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Shell-like rendering for logs
    #[must_use]
    pub fn display(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push('\'');
                line.push_str(&arg);
                line.push('\'');
            } else {
                line.push_str(&arg);
            }
        }
        line
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

/// Terminal result of a tool that ran to completion
#[derive(Debug, Clone)]
pub struct ToolExit {
    /// Exit code; `None` when the tool was terminated by a signal
    pub code: Option<i32>,
    /// Whether the tool reported success
    pub success: bool,
    /// Combined stdout/stderr tail
    pub output: OutputTail,
    /// Wall-clock time the tool ran
    pub elapsed: Duration,
}

/// Runs external tools under a deadline
///
/// Implement this trait to change how tools are executed.
#[async_trait::async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `command` to completion or until `timeout` elapses
    async fn run(
        &self,
        command: &ToolCommand,
        timeout: Duration,
    ) -> Result<ToolExit, SupervisorError>;
}

/// Default runner backed by OS processes
///
/// Children are spawned with `kill_on_drop` in a fresh process group, so
/// dropping an in-flight [`ToolRunner::run`] future (caller cancellation)
/// terminates the tool and everything it started.
#[derive(Debug, Clone)]
pub struct Supervisor {
    tail_bytes: usize,
}

impl Supervisor {
    /// Supervisor retaining [`DEFAULT_TAIL_BYTES`] of output per run
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supervisor retaining `bytes` of output per run
    #[inline]
    #[must_use]
    pub fn with_tail_bytes(bytes: usize) -> Self {
        Self { tail_bytes: bytes }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self {
            tail_bytes: DEFAULT_TAIL_BYTES,
        }
    }
}

#[async_trait::async_trait]
impl ToolRunner for Supervisor {
    async fn run(
        &self,
        command: &ToolCommand,
        timeout: Duration,
    ) -> Result<ToolExit, SupervisorError> {
        let program = command.program_name();
        let start = Instant::now();

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| {
            tracing::error!("Failed to spawn {}: {}", program, source);
            SupervisorError::Spawn {
                program: program.clone(),
                source,
            }
        })?;
        tracing::debug!("Spawned {} (pid {:?})", program, child.id());
        // Leader pid doubles as the group id
        let mut group = ProcessGroup::new(child.id());

        let tail = Arc::new(Mutex::new(OutputTail::with_capacity(self.tail_bytes)));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(drain(stdout, Arc::clone(&tail))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(drain(stderr, Arc::clone(&tail))));
        }

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                // Stragglers would otherwise keep the output pipes open
                group.kill();
                settle(readers).await;
                let output = tail.lock().clone();
                let elapsed = start.elapsed();
                tracing::debug!(
                    "{} exited with {:?} after {}ms",
                    program,
                    status.code(),
                    elapsed.as_millis()
                );
                Ok(ToolExit {
                    code: status.code(),
                    success: status.success(),
                    output,
                    elapsed,
                })
            }
            Ok(Err(source)) => {
                group.kill();
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill {} after wait error: {}", program, e);
                }
                settle(readers).await;
                Err(SupervisorError::Wait { program, source })
            }
            Err(_) => {
                tracing::warn!(
                    "{} exceeded its {}s deadline, terminating",
                    program,
                    timeout.as_secs_f64()
                );
                group.kill();
                // kill() also reaps the child
                if let Err(e) = child.kill().await {
                    tracing::error!("Failed to kill {}: {}", program, e);
                }
                settle(readers).await;
                let output = tail.lock().clone();
                Err(SupervisorError::TimedOut {
                    program,
                    after: timeout,
                    output,
                })
            }
        }
    }
}

/// Process group of one tool run, killed at most once
///
/// Dropping an unkilled group kills it, which covers cancellation.
struct ProcessGroup {
    id: Option<i32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self {
            id: leader.and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    fn kill(&mut self) {
        if let Some(id) = self.id.take() {
            kill_group(id);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_group(id: i32) {
    // SAFETY: killpg only sends a signal; no memory is shared with the callee.
    let rc = unsafe { libc::killpg(id, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: every member has already exited
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!("Failed to kill process group {}: {}", id, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_id: i32) {}

async fn drain<R>(mut stream: R, tail: Arc<Mutex<OutputTail>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => tail.lock().push(&buf[..n]),
            Err(e) => {
                tracing::debug!("Output stream closed with error: {}", e);
                break;
            }
        }
    }
}

async fn settle(readers: Vec<JoinHandle<()>>) {
    for mut reader in readers {
        if tokio::time::timeout(READER_GRACE, &mut reader).await.is_err() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let cmd = ToolCommand::new("ffmpeg")
            .args(["-i", "my video.mp4"])
            .arg("-y");
        assert_eq!(cmd.display(), "ffmpeg -i 'my video.mp4' -y");
    }

    #[test]
    fn builder_accumulates_arguments() {
        let cmd = ToolCommand::new("python3")
            .arg("reconstruct.py")
            .args(["frames", "model.glb"])
            .env("PYTHONUNBUFFERED", "1")
            .current_dir("/tmp");
        assert_eq!(cmd.program(), Path::new("python3"));
        assert_eq!(cmd.get_args().len(), 3);
    }
}
