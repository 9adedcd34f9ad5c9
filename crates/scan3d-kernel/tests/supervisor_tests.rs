#![cfg(unix)]

use scan3d_kernel::prelude::*;
use std::path::Path;
use std::time::Duration;

fn sh(script: &str) -> ToolCommand {
    ToolCommand::new("/bin/sh").arg("-c").arg(script)
}

/// Whether `pid` is a live (non-zombie) process
fn running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // State is the first field after the parenthesised command name
        Ok(stat) => !matches!(
            stat.rsplit(')').next().and_then(|rest| rest.trim_start().chars().next()),
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

/// Poll until `pid` is gone; a killed orphan is reaped asynchronously
async fn gone_within(pid: u32, limit: Duration) -> bool {
    let deadline = std::time::Instant::now() + limit;
    while running(pid) {
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    true
}

fn read_pid(path: &Path) -> u32 {
    std::fs::read_to_string(path).unwrap().trim().parse().unwrap()
}

#[tokio::test]
async fn test_successful_tool_reports_exit_and_output() {
    let supervisor = Supervisor::new();
    let exit = supervisor
        .run(&sh("echo frames ready"), Duration::from_secs(10))
        .await
        .unwrap();

    assert!(exit.success);
    assert_eq!(exit.code, Some(0));
    assert_eq!(exit.output.to_string_lossy().trim(), "frames ready");
}

#[tokio::test]
async fn test_non_zero_exit_is_not_a_supervisor_error() {
    let supervisor = Supervisor::new();
    let exit = supervisor
        .run(&sh("echo 'bad input' >&2; exit 3"), Duration::from_secs(10))
        .await
        .unwrap();

    assert!(!exit.success);
    assert_eq!(exit.code, Some(3));
    assert!(exit.output.to_string_lossy().contains("bad input"));
}

#[tokio::test]
async fn test_missing_program_is_spawn_error() {
    let supervisor = Supervisor::new();
    let err = supervisor
        .run(
            &ToolCommand::new("/nonexistent/scan3d-tool"),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SupervisorError::Spawn { .. }));
}

#[tokio::test]
async fn test_deadline_kills_the_process() {
    let supervisor = Supervisor::new();
    let err = supervisor
        .run(&sh("echo $$; exec sleep 30"), Duration::from_millis(300))
        .await
        .unwrap_err();

    let (output, after) = match err {
        SupervisorError::TimedOut { output, after, .. } => (output, after),
        other => panic!("expected timeout, got {other:?}"),
    };
    assert_eq!(after, Duration::from_millis(300));

    let pid: u32 = output.to_string_lossy().trim().parse().unwrap();
    assert!(
        !Path::new(&format!("/proc/{pid}")).exists(),
        "process {pid} still running after timeout"
    );
}

#[tokio::test]
async fn test_deadline_kills_background_helpers() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("helper.pid");
    let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());

    let started = std::time::Instant::now();
    let err = Supervisor::new()
        .run(&sh(&script), Duration::from_millis(500))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(10));
    let helper = read_pid(&pid_file);
    assert!(
        gone_within(helper, Duration::from_secs(5)).await,
        "helper {helper} survived the timeout"
    );
}

#[tokio::test]
async fn test_helpers_do_not_outlive_a_finished_tool() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("helper.pid");
    let script = format!("sleep 30 & echo $! > '{}'; exit 0", pid_file.display());

    let started = std::time::Instant::now();
    let exit = Supervisor::new()
        .run(&sh(&script), Duration::from_secs(10))
        .await
        .unwrap();

    assert!(exit.success);
    assert!(started.elapsed() < Duration::from_secs(5));
    let helper = read_pid(&pid_file);
    assert!(gone_within(helper, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_dropping_the_run_kills_the_tool() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("helper.pid");
    let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());
    let supervisor = Supervisor::new();
    let cmd = sh(&script);

    let cancelled = tokio::time::timeout(
        Duration::from_millis(500),
        supervisor.run(&cmd, Duration::from_secs(60)),
    )
    .await;

    assert!(cancelled.is_err());
    let helper = read_pid(&pid_file);
    assert!(gone_within(helper, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_output_capture_is_bounded() {
    let supervisor = Supervisor::with_tail_bytes(64);
    let exit = supervisor
        .run(
            &sh("i=0; while [ $i -lt 500 ]; do echo line-$i; i=$((i+1)); done"),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    assert!(exit.output.len() <= 64);
    assert!(exit.output.truncated());
    assert!(exit.output.to_string_lossy().ends_with("line-499\n"));
}

#[tokio::test]
async fn test_env_and_working_directory_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::new();
    let cmd = sh("echo \"$SCAN3D_MARKER\" > marker.txt")
        .env("SCAN3D_MARKER", "ok")
        .current_dir(dir.path());

    let exit = supervisor.run(&cmd, Duration::from_secs(10)).await.unwrap();

    assert!(exit.success);
    let written = std::fs::read_to_string(dir.path().join("marker.txt")).unwrap();
    assert_eq!(written.trim(), "ok");
}
