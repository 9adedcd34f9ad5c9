#![cfg(unix)]

use scan3d_test_utils::{list_dir, Fixture};
use std::path::Path;
use std::process::Command;

fn write_config(fx: &Fixture, frames: usize) -> std::path::PathBuf {
    let ffmpeg = fx.fake_ffmpeg("ffmpeg", frames);
    let recon = fx.fake_reconstructor("recon", 300);
    let text = fx.config(&ffmpeg, &recon).to_toml_string().unwrap();
    let path = fx.path().join("scan3d.toml");
    std::fs::write(&path, text).unwrap();
    path
}

fn scan3d(args: &[&str], config: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_scan3d"))
        .args(args)
        .arg("--config")
        .arg(config)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn run_prints_success_outcome() {
    let fx = Fixture::new();
    let config = write_config(&fx, 10);
    let catalog = fx.path().join("catalog.jsonl");
    let video = fx.video().to_str().unwrap();

    let output = scan3d(
        &[
            "run",
            "--video",
            video,
            "--name",
            "demo",
            "--owner",
            "r1",
            "--display-name",
            "Demo",
            "--catalog",
            catalog.to_str().unwrap(),
            "--json",
        ],
        &config,
    );

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["status"], "success");
    assert_eq!(outcome["descriptor"]["frame_count"], 10);
    assert_eq!(outcome["descriptor"]["size_bytes"], 300);
    assert!(outcome["catalog_entry"].is_string());
    assert_eq!(std::fs::read_to_string(catalog).unwrap().lines().count(), 1);
    assert_eq!(list_dir(&fx.artifacts_root()).len(), 1);
}

#[test]
fn run_exits_one_on_pipeline_failure() {
    let fx = Fixture::new();
    let config = write_config(&fx, 9);
    let video = fx.video().to_str().unwrap();

    let output = scan3d(&["run", "--video", video, "--name", "demo", "--json"], &config);

    assert_eq!(output.status.code(), Some(1));
    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["status"], "failure");
    assert_eq!(outcome["kind"], "insufficient_frames");
    assert_eq!(outcome["stage"], "frame_validation");
}

#[test]
fn config_prints_effective_toml() {
    let fx = Fixture::new();
    let config = write_config(&fx, 10);

    let output = scan3d(&["config"], &config);

    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.contains("min_frames = 10"), "{text}");
    assert!(text.contains("[reconstruction]"), "{text}");
}

#[test]
fn unreadable_config_exits_two() {
    let fx = Fixture::new();
    let output = scan3d(&["config"], &fx.path().join("missing.toml"));
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn lowered_frame_minimum_exits_two() {
    let fx = Fixture::new();
    let ffmpeg = fx.fake_ffmpeg("ffmpeg", 9);
    let recon = fx.fake_reconstructor("recon", 300);
    let text = fx
        .config(&ffmpeg, &recon)
        .with_min_frames(9)
        .to_toml_string()
        .unwrap();
    let config = fx.path().join("scan3d.toml");
    std::fs::write(&config, text).unwrap();
    let video = fx.video().to_str().unwrap();

    let output = scan3d(&["run", "--video", video, "--name", "demo", "--json"], &config);

    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    assert_eq!(ffmpeg.invocations(), 0);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("min_frames must be at least 10"), "{stderr}");
}
