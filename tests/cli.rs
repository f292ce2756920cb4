use assert_cmd::Command;
use image::RgbImage;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn batchpress(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("batchpress").unwrap();
    cmd.env_remove("BATCHPRESS_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

fn write_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_fn(32, 24, |x, y| image::Rgb([x as u8 * 7, y as u8 * 9, 200]))
        .save_with_format(&path, image::ImageFormat::Png)
        .unwrap();
    path
}

fn stats_json(data_dir: &Path) -> serde_json::Value {
    let output = batchpress(data_dir).args(["stats", "--json"]).output().unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_presets_listing() {
    let dir = TempDir::new().unwrap();
    batchpress(dir.path())
        .args(["presets"])
        .assert()
        .success()
        .stdout(predicate::str::contains("web"))
        .stdout(predicate::str::contains("webp-high-quality"))
        .stdout(predicate::str::contains("jpeg-high-compression"));
}

#[test]
fn test_example_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("batchpress.toml");

    batchpress(dir.path())
        .args(["example-config", "--output"])
        .arg(&path)
        .assert()
        .success();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("[processing]"));
    assert!(content.contains("[logging]"));
}

#[test]
fn test_compress_and_record() {
    let dir = TempDir::new().unwrap();
    let inputs = dir.path().join("in");
    std::fs::create_dir_all(&inputs).unwrap();
    write_png(&inputs, "a.png");
    write_png(&inputs, "b.png");
    std::fs::write(inputs.join("notes.txt"), b"skip me").unwrap();
    let out = dir.path().join("out");
    let data = dir.path().join("data");

    let output = batchpress(&data)
        .args(["compress", "--json", "--workers", "2", "--format", "webp", "--output"])
        .arg(&out)
        .arg(&inputs)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["results"].as_array().unwrap().len(), 2);
    assert!(out.join("a_compressed.webp").exists());
    assert!(out.join("b_compressed.webp").exists());

    let stats = stats_json(&data);
    assert_eq!(stats["stats"]["totalProcessedImages"], 2);
    assert_eq!(stats["today"]["processedImages"], 2);
    assert_eq!(stats["recent"].as_array().unwrap().len(), 2);

    batchpress(&data).args(["stats", "--clear"]).assert().success();
    assert_eq!(stats_json(&data)["stats"]["totalProcessedImages"], 0);
}

#[test]
fn test_no_history() {
    let dir = TempDir::new().unwrap();
    let input = write_png(dir.path(), "photo.png");
    let data = dir.path().join("data");

    batchpress(&data)
        .args(["compress", "--quiet", "--no-history", "--output"])
        .arg(dir.path().join("out"))
        .arg(&input)
        .assert()
        .success();

    assert_eq!(stats_json(&data)["stats"]["totalProcessedImages"], 0);
}

#[test]
fn test_process_isolation() {
    let dir = TempDir::new().unwrap();
    let input = write_png(dir.path(), "photo.png");
    let bad = dir.path().join("broken.png");
    std::fs::write(&bad, b"not a png").unwrap();
    let out = dir.path().join("out");

    let output = batchpress(&dir.path().join("data"))
        .args(["compress", "--json", "--isolation", "process", "--quality", "50", "--output"])
        .arg(&out)
        .arg(&input)
        .arg(&bad)
        .output()
        .unwrap();

    // One failed file makes the run fail, but the other still completes
    assert_eq!(output.status.code(), Some(1));
    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = outcome["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results.iter().filter(|r| r["success"] == true).count(), 1);
    assert!(out.join("photo_compressed.png").exists());
}

#[test]
fn test_missing_input() {
    let dir = TempDir::new().unwrap();
    batchpress(dir.path())
        .args(["compress"])
        .arg(dir.path().join("nowhere"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_quality_out_of_range() {
    let dir = TempDir::new().unwrap();
    let input = write_png(dir.path(), "photo.png");
    batchpress(dir.path())
        .args(["compress", "--quality", "0"])
        .arg(&input)
        .assert()
        .failure();
}
