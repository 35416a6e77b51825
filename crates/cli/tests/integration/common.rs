//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// The program lives at `main.lua` in a temporary directory next to a copy of
/// the fixture `provider.json`, whose resources land in `cloud/`.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Copy `name` to `main.lua` in a fresh directory.
  pub fn from_fixture(name: &str) -> Self {
    let env = Self {
      temp: TempDir::new().unwrap(),
    };
    env.use_program(name);
    env.write_file("provider.json", &fixture_content("provider.json"));
    env
  }

  /// Replace `main.lua` with another fixture.
  pub fn use_program(&self, name: &str) {
    self.write_file("main.lua", &fixture_content(name));
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  pub fn state_dir(&self) -> PathBuf {
    self.temp.path().join("state")
  }

  /// Parsed state file, or `Null` when nothing has been written.
  pub fn state(&self) -> Value {
    match std::fs::read(self.state_dir().join("state.json")) {
      Ok(content) => serde_json::from_slice(&content).unwrap(),
      Err(_) => Value::Null,
    }
  }

  /// Number of resource documents held by the local provider.
  pub fn live_resources(&self) -> usize {
    match std::fs::read_dir(self.temp.path().join("cloud").join("resources")) {
      Ok(entries) => entries
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .count(),
      Err(_) => 0,
    }
  }

  /// Get a pre-configured Command for the keel binary.
  ///
  /// Runs inside the temp directory with:
  /// - `KEEL_STATE_DIR`: Isolated state directory
  /// - `XDG_DATA_HOME`: Isolated data path
  /// - `KEEL_PROVIDER_CONFIG` and `RUST_LOG` removed
  pub fn keel_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("keel");
    cmd.current_dir(self.temp.path());
    cmd.env("KEEL_STATE_DIR", self.state_dir());
    cmd.env("XDG_DATA_HOME", self.temp.path().join("data"));
    cmd.env_remove("KEEL_PROVIDER_CONFIG");
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// Run `keel apply --yes` and require success.
  pub fn apply(&self) {
    self.keel_cmd().args(["apply", "--yes"]).assert().success();
  }
}

/// Parse a command's stdout as JSON.
pub fn stdout_json(output: &std::process::Output) -> Value {
  serde_json::from_slice(&output.stdout)
    .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}", e, String::from_utf8_lossy(&output.stdout)))
}
