//! Apply pass integration tests.

use keel_lib::execute::{ApplyError, ApplyOptions, CancelFlag, ExecuteConfig, StepOutcome};
use keel_lib::output::{Input, Output};
use keel_lib::plan::{StepId, StepKind};
use keel_lib::resource::{Program, ResourceId};
use keel_lib::state::{LockMode, StateError};
use serde_json::json;

use super::common::{Call, TestEnv, field, inputs, position, service_program, text};

#[tokio::test]
async fn creates_in_dependency_order() {
  let env = TestEnv::new();
  let result = env.apply(&service_program(true)).await;

  assert!(result.report.is_success());
  assert_eq!(result.report.count_succeeded(StepKind::Create), 4);

  let calls = env.provider.mutations();
  assert_eq!(calls.len(), 4);
  let task = position(&calls, &Call::Create("task".into()));
  let service = position(&calls, &Call::Create("service".into()));
  assert!(position(&calls, &Call::Create("registry".into())) < task);
  assert!(position(&calls, &Call::Create("cluster".into())) < service);
  assert!(task < service);

  let state = env.state();
  assert_eq!(state.records.len(), 4);
  let registry = &state.records[&ResourceId::new("registry")];
  let task = &state.records[&ResourceId::new("task")];
  assert_eq!(task.inputs["image"], registry.outputs["url"]);
  assert!(task.dependencies.contains(&ResourceId::new("registry")));
}

#[tokio::test]
async fn second_pass_is_all_noop() {
  let env = TestEnv::new();
  let program = service_program(true);
  env.apply(&program).await;
  env.provider.clear_calls();

  let result = env.apply(&program).await;

  assert!(result.report.is_success());
  assert!(!result.plan.has_changes());
  assert_eq!(result.plan.summary().same, 4);
  assert!(env.provider.mutations().is_empty());
  // refresh reads every unchanged resource
  assert_eq!(env.provider.calls().len(), 4);
}

#[tokio::test]
async fn no_refresh_skips_reads() {
  let env = TestEnv::new();
  let program = service_program(true);
  env.apply(&program).await;
  env.provider.clear_calls();

  let options = ApplyOptions {
    execute: ExecuteConfig {
      refresh: false,
      ..TestEnv::options().execute
    },
    confirmed: None,
  };
  let result = env.apply_with(&program, &options, &CancelFlag::new()).await;

  assert!(result.report.is_success());
  assert!(env.provider.calls().is_empty());
}

#[tokio::test]
async fn removing_a_resource_deletes_it() {
  let env = TestEnv::new();
  env.apply(&service_program(true)).await;
  let service_id = env.physical_id("service");
  env.provider.clear_calls();

  let result = env.apply(&service_program(false)).await;

  let summary = result.plan.summary();
  assert_eq!(summary.delete, 1);
  assert_eq!(summary.same, 3);
  assert_eq!(env.provider.mutations(), vec![Call::Delete(service_id)]);
  assert!(!env.state().records.contains_key(&ResourceId::new("service")));
}

#[tokio::test]
async fn changed_input_updates_in_place() {
  let env = TestEnv::new();
  env.apply(&service_program(true)).await;
  let cluster_id = env.physical_id("cluster");
  env.provider.clear_calls();

  let mut program = Program::new();
  let registry = program.resource("test:Registry", "registry", inputs([("region", Input::from("us-east-1"))]));
  let cluster = program.resource("test:Cluster", "cluster", inputs([("size", Input::from(5i64))]));
  let task = program.resource(
    "test:Task",
    "task",
    inputs([("image", field(&registry, "url")), ("cpu", Input::from(256i64))]),
  );
  program.resource(
    "test:Service",
    "service",
    inputs([("task", field(&task, "arn")), ("cluster", field(&cluster, "arn"))]),
  );

  let result = env.apply(&program).await;

  assert!(result.report.is_success());
  // the service sees an unknown cluster arn at plan time and settles on no-op
  assert_eq!(result.plan.summary().update, 2);
  assert_eq!(result.report.count_succeeded(StepKind::Update), 1);
  assert_eq!(env.provider.mutations(), vec![Call::Update(cluster_id.clone())]);
  let state = env.state();
  assert_eq!(state.records[&ResourceId::new("cluster")].inputs["size"], json!(5));
  assert_eq!(state.records[&ResourceId::new("cluster")].physical_id, cluster_id);
}

#[tokio::test]
async fn exports_are_recorded() {
  let env = TestEnv::new();
  let result = env.apply(&service_program(true)).await;

  let url = &result.exports["registry_url"];
  assert!(!url.secret);
  assert_eq!(text(&url.value), format!("https://{}.example", env.physical_id("registry")));
  assert_eq!(env.state().exports, result.exports);
}

#[tokio::test]
async fn secret_outputs_stay_secret_downstream() {
  let env = TestEnv::new();
  let mut program = Program::new();
  let db = program.resource("test:Database", "db", inputs([]));
  program.resource("test:App", "app", inputs([("db_password", field(&db, "password"))]));
  program.export("password", db.output("password"));

  let result = env.apply(&program).await;

  assert!(result.report.is_success());
  assert!(result.exports["password"].secret);
  let state = env.state();
  let app = &state.records[&ResourceId::new("app")];
  assert!(app.secret_inputs.contains("db_password"));
  assert!(app.secret_outputs.contains("db_password"));
}

#[tokio::test]
async fn dependency_discovered_during_resolution() {
  let env = TestEnv::new();
  let mut program = Program::new();
  let registry = program.resource("test:Registry", "registry", inputs([("region", Input::from("eu"))]));
  let cluster = program.resource("test:Cluster", "cluster", inputs([]));
  // only registry is visible before resolution
  let late = registry
    .output("url")
    .apply_flat(move |_| Ok(cluster.output("arn")));
  program.resource("test:Task", "task", inputs([("cluster", Input::from(late))]));

  let result = env.apply(&program).await;

  assert!(result.report.is_success());
  let calls = env.provider.mutations();
  assert!(position(&calls, &Call::Create("cluster".into())) < position(&calls, &Call::Create("task".into())));
  let state = env.state();
  let task = &state.records[&ResourceId::new("task")];
  assert!(task.dependencies.contains(&ResourceId::new("cluster")));
  assert_eq!(
    task.inputs["cluster"],
    state.records[&ResourceId::new("cluster")].outputs["arn"]
  );
}

#[tokio::test]
async fn dependency_closing_a_cycle_fails_the_step() {
  let env = TestEnv::new();
  let mut program = Program::new();
  let b = program.reference("b");
  let back = Output::known(json!("seed")).apply_flat(move |_| Ok(b.output("id")));
  let a = program.resource("test:Thing", "a", inputs([("peer", Input::from(back))]));
  program.resource("test:Thing", "b", inputs([("peer", field(&a, "id"))]));

  let result = env.apply(&program).await;

  assert!(!result.report.is_success());
  let a_id = StepId::Resource(ResourceId::new("a"));
  let b_id = StepId::Resource(ResourceId::new("b"));
  assert!(matches!(result.report.outcomes[&a_id], StepOutcome::Failed { .. }));
  assert!(matches!(result.report.outcomes[&b_id], StepOutcome::Skipped { .. }));
  assert!(env.provider.calls().is_empty());
  assert!(matches!(result.check(), Err(ApplyError::Partial(_))));
}

#[tokio::test]
async fn cancelled_pass_starts_nothing() {
  let env = TestEnv::new();
  let cancel = CancelFlag::new();
  cancel.cancel();

  let result = env.apply_with(&service_program(true), &TestEnv::options(), &cancel).await;

  assert!(result.report.cancelled);
  assert!(
    result
      .report
      .outcomes
      .values()
      .all(|o| matches!(o, StepOutcome::NotStarted))
  );
  assert!(env.provider.calls().is_empty());
  assert!(env.state().records.is_empty());
}

#[tokio::test]
async fn concurrent_pass_is_rejected() {
  let env = TestEnv::new();
  let _held = env.store.lock(LockMode::Exclusive, "apply").unwrap();

  let err = keel_lib::execute::apply(
    &service_program(true),
    env.provider.clone(),
    &env.store,
    &TestEnv::options(),
    &CancelFlag::new(),
  )
  .await
  .unwrap_err();

  assert!(matches!(err, ApplyError::State(StateError::Locked(_))));
  assert!(env.provider.calls().is_empty());
}

#[test]
fn preview_does_not_touch_provider() {
  let env = TestEnv::new();
  let plan = keel_lib::execute::preview(&service_program(true), env.provider.as_ref(), &env.store).unwrap();

  assert_eq!(plan.summary().create, 4);
  assert!(env.provider.calls().is_empty());
  assert!(!env.store.path().exists());
}

#[tokio::test]
async fn confirmed_plan_is_applied() {
  let env = TestEnv::new();
  let program = service_program(true);
  let plan = keel_lib::execute::preview(&program, env.provider.as_ref(), &env.store).unwrap();

  let options = ApplyOptions {
    confirmed: Some(plan.actions()),
    ..TestEnv::options()
  };
  let result = env.apply_with(&program, &options, &CancelFlag::new()).await;

  assert!(result.report.is_success());
  assert_eq!(result.report.count_succeeded(StepKind::Create), 4);
}

#[tokio::test]
async fn plan_changed_since_confirmation_applies_nothing() {
  let env = TestEnv::new();
  let program = service_program(true);
  let confirmed = keel_lib::execute::preview(&program, env.provider.as_ref(), &env.store)
    .unwrap()
    .actions();

  // another pass lands between the preview and the apply
  env.apply(&service_program(false)).await;
  env.provider.clear_calls();

  let options = ApplyOptions {
    confirmed: Some(confirmed),
    ..TestEnv::options()
  };
  let err = keel_lib::execute::apply(&program, env.provider.clone(), &env.store, &options, &CancelFlag::new())
    .await
    .unwrap_err();

  match err {
    ApplyError::PlanChanged { current } => assert_eq!(current.create, 1),
    other => panic!("unexpected error: {other}"),
  }
  assert!(env.provider.calls().is_empty());
  assert_eq!(env.state().records.len(), 3);
}
