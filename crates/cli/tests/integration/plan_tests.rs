//! Plan command integration tests.

use predicates::prelude::*;

use super::common::{TestEnv, stdout_json};

#[test]
fn plan_lists_creations() {
  let env = TestEnv::from_fixture("web.lua");

  env
    .keel_cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("+ repo (aws:ecr:Repository)"))
    .stdout(predicate::str::contains("+ service (aws:ecs:Service)"))
    .stdout(predicate::str::contains("Plan: 4 to create, 0 to update"));

  assert_eq!(env.live_resources(), 0);
  assert!(env.state().is_null());
}

#[test]
fn plan_after_apply_is_clean() {
  let env = TestEnv::from_fixture("web.lua");
  env.apply();

  env
    .keel_cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes. 4 resource(s) up to date."));
}

#[test]
fn plan_shows_forced_replacement() {
  let env = TestEnv::from_fixture("web.lua");
  env.apply();
  env.use_program("web_moved.lua");

  env
    .keel_cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("-/+ repo"))
    .stdout(predicate::str::contains("forces replacement"))
    .stdout(predicate::str::contains("1 to replace"));
}

#[test]
fn plan_json_summary() {
  let env = TestEnv::from_fixture("web.lua");

  let output = env.keel_cmd().args(["--json", "plan"]).output().unwrap();
  assert!(output.status.success());

  let plan = stdout_json(&output);
  assert_eq!(plan["summary"]["create"], 4);
  let steps = plan["steps"].as_array().unwrap();
  assert_eq!(steps.len(), 4);
  let service = steps.iter().find(|s| s["id"] == "service").unwrap();
  let deps: Vec<&str> = service["depends_on"]
    .as_array()
    .unwrap()
    .iter()
    .filter_map(|d| d.as_str())
    .collect();
  assert_eq!(deps, vec!["cluster", "task"]);
}

#[test]
fn plan_masks_secret_inputs() {
  let env = TestEnv::from_fixture("secret.lua");

  env
    .keel_cmd()
    .args(["plan", "-c", "password=hunter2"])
    .assert()
    .success()
    .stdout(predicate::str::contains("[secret]"))
    .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn plan_missing_required_config_fails() {
  let env = TestEnv::from_fixture("secret.lua");

  env
    .keel_cmd()
    .arg("plan")
    .assert()
    .failure()
    .stderr(predicate::str::contains("missing required config value 'password'"));
}

#[test]
fn plan_rejects_cycles() {
  let env = TestEnv::from_fixture("cycle.lua");

  env
    .keel_cmd()
    .arg("plan")
    .assert()
    .failure()
    .stderr(predicate::str::contains("dependency cycle"));
}

#[test]
fn plan_reports_lua_errors() {
  let env = TestEnv::from_fixture("broken.lua");

  env
    .keel_cmd()
    .arg("plan")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to evaluate program"));
}

#[test]
fn plan_missing_program_fails() {
  let env = TestEnv::from_fixture("web.lua");

  env
    .keel_cmd()
    .args(["plan", "nope.lua"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("program file not found"));
}
