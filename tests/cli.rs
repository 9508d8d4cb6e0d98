mod common;

use common::write_fixture;
use std::process::Command;
use ttsynth::audio::io::WavIo;

fn ttsynth() -> Command {
    Command::new(env!("CARGO_BIN_EXE_ttsynth"))
}

#[test]
fn inspect_lists_normalized_names_in_file_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path(), 1);
    let checkpoint = dir
        .path()
        .join("checkpoint")
        .join("nostop_token")
        .join("transformer");

    let output = ttsynth()
        .args(["inspect", "--step", "160000", "--dir"])
        .arg(&checkpoint)
        .output()
        .expect("run inspect");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("utf8");
    let names: Vec<&str> = stdout
        .lines()
        .filter_map(|line| line.split('\t').next())
        .collect();
    assert_eq!(names.len(), 9);
    assert!(names.iter().all(|name| !name.starts_with("_layers.")));
    assert!(names.contains(&"decoder.postnet.bias"));
}

#[test]
fn say_writes_test_wav() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_fixture(dir.path(), 2);

    let status = ttsynth()
        .args(["say", "--text", "Hi there.", "--backend", "ndarray", "--config"])
        .arg(&config)
        .status()
        .expect("run say");
    assert!(status.success());

    let sample = dir.path().join("sample").join("test.wav");
    let (samples, sample_rate) = WavIo::read_mono(&sample).expect("read wav");
    assert_eq!(sample_rate, 8000);
    // Two frames at hop 16.
    assert_eq!(samples.len(), 16);
    assert!(dir
        .path()
        .join("log")
        .join("synthesis")
        .join("events.jsonl")
        .exists());
}

#[test]
fn say_honors_output_and_max_len_overrides() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_fixture(dir.path(), 2);
    let output = dir.path().join("out").join("custom.wav");

    let status = ttsynth()
        .args(["say", "--max-len", "4", "--backend", "ndarray", "--config"])
        .arg(&config)
        .arg("--output")
        .arg(&output)
        .status()
        .expect("run say");
    assert!(status.success());

    let (samples, _) = WavIo::read_mono(&output).expect("read wav");
    // Four frames at hop 16.
    assert_eq!(samples.len(), 48);
    assert!(!dir.path().join("sample").join("test.wav").exists());
}

#[test]
fn say_fails_without_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = ttsynth()
        .args(["say", "--backend", "ndarray", "--config"])
        .arg(dir.path().join("missing.yaml"))
        .output()
        .expect("run say");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Config file not found"), "{stderr}");
}
