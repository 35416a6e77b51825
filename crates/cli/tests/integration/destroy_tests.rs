//! Destroy command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn destroy_removes_everything() {
  let env = TestEnv::from_fixture("web.lua");
  env.apply();

  env
    .keel_cmd()
    .args(["destroy", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Destroy complete!"))
    .stdout(predicate::str::contains("Deleted: 4"));

  assert_eq!(env.live_resources(), 0);
  let state = env.state();
  assert!(state["records"].as_object().is_none_or(|r| r.is_empty()));
  assert!(state["exports"].as_object().is_none_or(|e| e.is_empty()));
}

#[test]
fn destroy_with_empty_state() {
  let env = TestEnv::from_fixture("web.lua");

  env
    .keel_cmd()
    .args(["destroy", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to destroy."));
}

#[test]
fn destroy_dry_run_changes_nothing() {
  let env = TestEnv::from_fixture("web.lua");
  env.apply();

  env
    .keel_cmd()
    .args(["destroy", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("- service (aws:ecs:Service)"))
    .stdout(predicate::str::contains("4 to delete"));

  assert_eq!(env.live_resources(), 4);
}

#[test]
fn destroy_requires_confirmation_when_not_interactive() {
  let env = TestEnv::from_fixture("web.lua");
  env.apply();

  env
    .keel_cmd()
    .arg("destroy")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Use --yes"));

  assert_eq!(env.live_resources(), 4);
}

#[test]
fn destroy_then_apply_recreates() {
  let env = TestEnv::from_fixture("web.lua");
  env.apply();
  env.keel_cmd().args(["destroy", "--yes"]).assert().success();

  env
    .keel_cmd()
    .args(["apply", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Created: 4"));
  assert_eq!(env.live_resources(), 4);
}
