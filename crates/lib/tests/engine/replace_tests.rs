//! Replacement integration tests.

use keel_lib::execute::{StepError, StepOutcome};
use keel_lib::output::Input;
use keel_lib::plan::{StepId, StepKind};
use keel_lib::provider::ErrorCode;
use keel_lib::resource::{Program, ResourceId};

use super::common::{Call, TestEnv, field, inputs, position};

fn step(name: &str) -> StepId {
  StepId::Resource(ResourceId::new(name))
}

/// `registry(region)` and `task(image = registry.url)`.
fn registry_program(region: &str) -> Program {
  let mut program = Program::new();
  let registry = program.resource("test:Registry", "registry", inputs([("region", Input::from(region))]));
  program.resource("test:Task", "task", inputs([("image", field(&registry, "url"))]));
  program
}

fn address_program(zone: &str) -> Program {
  let mut program = Program::new();
  program.resource("test:Address", "address", inputs([("zone", Input::from(zone))]));
  program
}

#[tokio::test]
async fn immutable_change_creates_before_deleting() {
  let env = TestEnv::new();
  env.apply(&registry_program("us-east-1")).await;
  let old = env.physical_id("registry");
  let task = env.physical_id("task");
  env.provider.clear_calls();

  let result = env.apply(&registry_program("eu-west-1")).await;

  assert!(result.report.is_success());
  assert_eq!(result.plan.summary().replace, 1);
  let registry_step = result.plan.step(&step("registry")).unwrap();
  assert!(registry_step.changes.iter().any(|c| c.field == "region" && c.forces_replacement));

  let calls = env.provider.mutations();
  let created = position(&calls, &Call::Create("registry".into()));
  let updated = position(&calls, &Call::Update(task.clone()));
  let deleted = position(&calls, &Call::Delete(old.clone()));
  assert!(created < updated);
  assert!(updated < deleted);

  let state = env.state();
  assert!(state.pending_deletes.is_empty());
  let new = &state.records[&ResourceId::new("registry")];
  assert_ne!(new.physical_id, old);
  assert_eq!(state.records[&ResourceId::new("task")].inputs["image"], new.outputs["url"]);
  assert_eq!(env.provider.live_names(), vec!["registry", "task"]);
}

#[tokio::test]
async fn delete_before_replace_deletes_first() {
  let env = TestEnv::new();
  env.apply(&address_program("a")).await;
  let old = env.physical_id("address");
  env.provider.clear_calls();

  let result = env.apply(&address_program("b")).await;

  assert!(result.report.is_success());
  let calls = env.provider.mutations();
  assert_eq!(calls, vec![Call::Delete(old.clone()), Call::Create("address".into())]);
  assert_ne!(env.physical_id("address"), old);
  assert_eq!(env.provider.live_names(), vec!["address"]);
}

#[tokio::test]
async fn type_change_deletes_old_type_before_creating_new_one() {
  let env = TestEnv::new();
  env.apply(&address_program("a")).await;
  let old = env.physical_id("address");
  env.provider.clear_calls();

  let mut program = Program::new();
  program.resource("test:Endpoint", "address", inputs([("zone", Input::from("a"))]));
  let result = env.apply(&program).await;

  assert!(result.report.is_success());
  assert_eq!(result.plan.summary().replace, 1);
  assert_eq!(
    env.provider.mutations(),
    vec![Call::Delete(old), Call::Create("address".into())]
  );
  assert_eq!(
    env.provider.live_types(),
    vec![("address".to_string(), "test:Endpoint".to_string())]
  );

  let record = &env.state().records[&ResourceId::new("address")];
  assert_eq!(record.type_token, "test:Endpoint");
  assert!(record.outputs["arn"].as_str().unwrap().starts_with("arn:test:test:Endpoint/"));
}

#[tokio::test]
async fn name_collision_keeps_old_resource() {
  let env = TestEnv::new();
  env.apply(&registry_program("us-east-1")).await;
  let old = env.physical_id("registry");
  env.provider.collide("registry");

  let result = env.apply(&registry_program("eu-west-1")).await;

  match &result.report.outcomes[&step("registry")] {
    StepOutcome::Failed {
      kind: StepKind::Replace,
      error:
        StepError::ReplaceFailure {
          old_physical_id,
          old_deleted,
          source,
        },
    } => {
      assert_eq!(old_physical_id, &old);
      assert!(!old_deleted);
      assert_eq!(source.code, ErrorCode::AlreadyExists);
    }
    other => panic!("unexpected outcome: {:?}", other),
  }
  assert!(matches!(result.report.outcomes[&step("task")], StepOutcome::Skipped { .. }));
  assert_eq!(env.physical_id("registry"), old);
  assert!(env.provider.live_ids().contains(&old));
}

#[tokio::test]
async fn failed_create_after_delete_drops_the_record() {
  let env = TestEnv::new();
  env.apply(&address_program("a")).await;
  let old = env.physical_id("address");
  env.provider.collide("address");

  let result = env.apply(&address_program("b")).await;

  match &result.report.outcomes[&step("address")] {
    StepOutcome::Failed {
      error: StepError::ReplaceFailure {
        old_physical_id,
        old_deleted,
        ..
      },
      ..
    } => {
      assert_eq!(old_physical_id, &old);
      assert!(old_deleted);
    }
    other => panic!("unexpected outcome: {:?}", other),
  }
  assert!(env.state().records.is_empty());
  assert!(env.provider.live_ids().is_empty());

  // once the collision clears, the next pass simply creates it
  env.provider.clear_collision("address");
  let result = env.apply(&address_program("b")).await;
  assert_eq!(result.plan.summary().create, 1);
  assert_eq!(env.provider.live_names(), vec!["address"]);
}

#[tokio::test]
async fn old_resource_waits_for_failed_dependents() {
  let env = TestEnv::new();
  env.apply(&registry_program("us-east-1")).await;
  let old = env.physical_id("registry");
  env.provider.fail("task", "image pull failed");

  let result = env.apply(&registry_program("eu-west-1")).await;

  assert!(!result.report.is_success());
  let retired = StepId::Retired {
    name: ResourceId::new("registry"),
    physical_id: old.clone(),
  };
  assert!(result.report.retained.contains(&retired));
  assert!(!env.provider.calls().contains(&Call::Delete(old.clone())));
  let state = env.state();
  assert_eq!(state.pending_deletes.len(), 1);
  assert_eq!(state.pending_deletes[0].record.physical_id, old);

  env.provider.heal("task");
  env.provider.clear_calls();
  let result = env.apply(&registry_program("eu-west-1")).await;

  assert!(result.report.is_success());
  assert!(result.plan.step(&retired).is_some());
  let calls = env.provider.mutations();
  let task = env.physical_id("task");
  assert!(position(&calls, &Call::Update(task)) < position(&calls, &Call::Delete(old.clone())));
  assert!(env.state().pending_deletes.is_empty());
  assert_eq!(env.provider.live_names(), vec!["registry", "task"]);
}
