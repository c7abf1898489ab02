#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use keeldb::storage::{db_file, EngineOptions, DB_SUFFIX};
use keeldb::Database;
use tempfile::TempDir;

fn setup(name: &str) -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("keel.toml");
    fs::write(&config, "[log]\nfilter = \"warn\"\n").expect("write config");
    let path = dir.path().join(name);
    (dir, config, path)
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn create_then_drop() {
    let (_dir, config, path) = setup("plain");
    cargo_bin_cmd!("keeldb")
        .arg("--config")
        .arg(&config)
        .arg("create")
        .arg(&path)
        .assert()
        .success();
    assert!(db_file(&path, DB_SUFFIX).exists());

    let db = Database::open(&path, &EngineOptions::default()).expect("opens");
    db.close().expect("closes");

    cargo_bin_cmd!("keeldb")
        .arg("--config")
        .arg(&config)
        .arg("drop")
        .arg(&path)
        .assert()
        .success();
    assert!(!db_file(&path, DB_SUFFIX).exists());
}

#[test]
fn create_refuses_existing_database() {
    let (_dir, config, path) = setup("twice");
    Database::create(&path, &EngineOptions::default())
        .and_then(Database::close)
        .expect("seed");

    let output = cargo_bin_cmd!("keeldb")
        .arg("--config")
        .arg(&config)
        .arg("create")
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .get_output()
        .clone();
    assert!(stderr_of(&output).contains("error: file already exists"));
}

#[test]
fn path_falls_back_to_config() {
    let (dir, config, path) = setup("configured");
    fs::write(
        &config,
        format!("[database]\npath = {:?}\nmem = \"8MB\"\n", path.display().to_string()),
    )
    .expect("write config");

    cargo_bin_cmd!("keeldb")
        .arg("--config")
        .arg(&config)
        .arg("create")
        .assert()
        .success();
    assert!(db_file(&path, DB_SUFFIX).exists());
    assert!(dir.path().join("configured.bt").exists());
}

#[test]
fn bad_arguments_fail_cleanly() {
    let (_dir, config, path) = setup("bad");
    let output = cargo_bin_cmd!("keeldb")
        .arg("--config")
        .arg(&config)
        .args(["create", "--mem", "lots"])
        .arg(&path)
        .assert()
        .failure()
        .get_output()
        .clone();
    assert!(stderr_of(&output).contains("invalid memory size"));
    assert!(!db_file(&path, DB_SUFFIX).exists());

    let output = cargo_bin_cmd!("keeldb")
        .arg("--config")
        .arg(Path::new("/definitely/not/here.toml"))
        .args(["drop", "x"])
        .assert()
        .failure()
        .get_output()
        .clone();
    assert!(stderr_of(&output).contains("failed to read config"));

    let output = cargo_bin_cmd!("keeldb")
        .arg("--config")
        .arg(&config)
        .arg("drop")
        .assert()
        .failure()
        .get_output()
        .clone();
    assert!(stderr_of(&output).contains("no database path"));
}
