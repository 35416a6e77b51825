//! Apply command integration tests.

use predicates::prelude::*;

use super::common::{TestEnv, fixture_content, stdout_json};

#[test]
fn apply_creates_everything() {
  let env = TestEnv::from_fixture("web.lua");

  env
    .keel_cmd()
    .args(["apply", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Apply complete!"))
    .stdout(predicate::str::contains("Created: 4"))
    .stdout(predicate::str::contains("repository_url: 123456789012.dkr.ecr.us-east-1.amazonaws.com/repo-"));

  assert_eq!(env.live_resources(), 4);
  let state = env.state();
  let records = state["records"].as_object().unwrap();
  assert_eq!(records.len(), 4);
  let task_image = records["task"]["inputs"]["image"].as_str().unwrap();
  let repo_url = records["repo"]["outputs"]["repository_url"].as_str().unwrap();
  assert_eq!(task_image, format!("{}:latest", repo_url));
}

#[test]
fn apply_is_idempotent() {
  let env = TestEnv::from_fixture("web.lua");
  env.apply();

  env
    .keel_cmd()
    .args(["apply", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes. Resources are up to date."))
    .stdout(predicate::str::contains("Unchanged: 4"));

  assert_eq!(env.live_resources(), 4);
}

#[test]
fn apply_requires_confirmation_when_not_interactive() {
  let env = TestEnv::from_fixture("web.lua");

  env
    .keel_cmd()
    .arg("apply")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Use --yes"));

  assert_eq!(env.live_resources(), 0);
}

#[test]
fn apply_config_values_reach_the_program() {
  let env = TestEnv::from_fixture("web.lua");

  env
    .keel_cmd()
    .args(["apply", "--yes", "-c", "env=prod"])
    .assert()
    .success()
    .stdout(predicate::str::contains("cluster_name: web-prod"));
}

#[test]
fn apply_replaces_and_cleans_up() {
  let env = TestEnv::from_fixture("web.lua");
  env.apply();
  let old_repo = env.state()["records"]["repo"]["physical_id"].clone();
  env.use_program("web_moved.lua");

  env
    .keel_cmd()
    .args(["apply", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Replaced: 1"))
    .stdout(predicate::str::contains("dkr.ecr.eu-west-1.amazonaws.com"));

  let state = env.state();
  assert_ne!(state["records"]["repo"]["physical_id"], old_repo);
  assert!(state["pending_deletes"].as_array().is_none_or(|p| p.is_empty()));
  assert_eq!(env.live_resources(), 4);
}

#[test]
fn apply_failure_keeps_partial_progress() {
  let env = TestEnv::from_fixture("web.lua");
  let failing = fixture_content("provider.json").replacen(
    "\"root\": \"cloud\",",
    "\"root\": \"cloud\",\n  \"failures\": { \"service\": \"capacity exhausted\" },",
    1,
  );
  env.write_file("failing.json", &failing);

  env
    .keel_cmd()
    .args(["--provider-config", "failing.json", "apply", "--yes"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("1 step(s) failed"))
    .stderr(predicate::str::contains("capacity exhausted"));

  assert_eq!(env.live_resources(), 3);
  assert_eq!(env.state()["records"].as_object().unwrap().len(), 3);

  env
    .keel_cmd()
    .args(["apply", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Created: 1"))
    .stdout(predicate::str::contains("Unchanged: 3"));
  assert_eq!(env.live_resources(), 4);
}

#[test]
fn apply_json_requires_yes() {
  let env = TestEnv::from_fixture("web.lua");

  env
    .keel_cmd()
    .args(["--json", "apply"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--json apply requires --yes"));
}

#[test]
fn apply_json_report() {
  let env = TestEnv::from_fixture("web.lua");

  let output = env.keel_cmd().args(["--json", "apply", "--yes"]).output().unwrap();
  assert!(output.status.success());

  let result = stdout_json(&output);
  assert_eq!(result["report"]["success"], true);
  assert_eq!(result["report"]["outcomes"]["service"]["status"], "succeeded");
  assert_eq!(result["report"]["outcomes"]["service"]["kind"], "create");
  assert_eq!(result["exports"]["cluster_name"], "web-dev");
}

#[test]
fn status_lists_recorded_resources() {
  let env = TestEnv::from_fixture("web.lua");

  env
    .keel_cmd()
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("No resources recorded"));

  env.apply();

  env
    .keel_cmd()
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("4 resource(s) recorded"))
    .stdout(predicate::str::contains("service (aws:ecs:Service)"))
    .stdout(predicate::str::contains("Exports: cluster_name, repository_url"));
}
