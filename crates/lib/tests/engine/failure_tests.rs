//! Failure isolation, graph errors and timeouts.

use std::time::Duration;

use keel_lib::execute::{ApplyOptions, CancelFlag, ExecuteConfig, StepError, StepOutcome};
use keel_lib::graph::GraphError;
use keel_lib::output::Input;
use keel_lib::plan::{StepId, StepKind};
use keel_lib::provider::ErrorCode;
use keel_lib::resource::{Program, ResourceId};

use super::common::{Call, MemoryProvider, TestEnv, field, inputs};

fn step(name: &str) -> StepId {
  StepId::Resource(ResourceId::new(name))
}

/// `a`, `b`, `c(b)`, `d(a)`.
fn branching_program() -> Program {
  let mut program = Program::new();
  let a = program.resource("test:Thing", "a", inputs([]));
  let b = program.resource("test:Thing", "b", inputs([]));
  program.resource("test:Thing", "c", inputs([("b", field(&b, "id"))]));
  program.resource("test:Thing", "d", inputs([("a", field(&a, "id"))]));
  program
}

#[tokio::test]
async fn failure_skips_dependents_only() {
  let env = TestEnv::new();
  env.provider.fail("b", "quota exceeded");

  let result = env.apply(&branching_program()).await;
  let report = &result.report;

  assert!(!report.is_success());
  match &report.outcomes[&step("b")] {
    StepOutcome::Failed {
      kind: StepKind::Create,
      error: StepError::Provider { source, .. },
    } => assert!(source.message.contains("quota exceeded")),
    other => panic!("unexpected outcome for b: {:?}", other),
  }
  match &report.outcomes[&step("c")] {
    StepOutcome::Skipped { failed_dependency } => assert_eq!(failed_dependency, &step("b")),
    other => panic!("unexpected outcome for c: {:?}", other),
  }
  assert!(matches!(report.outcomes[&step("d")], StepOutcome::Succeeded { .. }));
  assert!(!env.provider.calls().contains(&Call::Create("c".into())));

  let failure = report.aggregate().unwrap();
  assert_eq!(failure.failures.len(), 1);
  assert_eq!(failure.skipped, vec![step("c")]);
  let message = failure.to_string();
  assert!(message.contains("b (create)"));
  assert!(message.contains("skipped: c"));

  let state = env.state();
  assert_eq!(state.records.len(), 2);
  assert!(state.records.contains_key(&ResourceId::new("a")));
  assert!(state.records.contains_key(&ResourceId::new("d")));
}

#[tokio::test]
async fn rerun_after_failure_converges() {
  let env = TestEnv::new();
  env.provider.fail("b", "quota exceeded");
  env.apply(&branching_program()).await;
  env.provider.heal("b");
  env.provider.clear_calls();

  let result = env.apply(&branching_program()).await;

  assert!(result.report.is_success());
  assert_eq!(
    env.provider.mutations(),
    vec![Call::Create("b".into()), Call::Create("c".into())]
  );
  assert_eq!(env.state().records.len(), 4);
}

#[tokio::test]
async fn cycles_fail_before_any_provider_call() {
  let env = TestEnv::new();
  let mut program = Program::new();
  let b = program.reference("b");
  let a = program.resource("test:Thing", "a", inputs([("peer", field(&b, "id"))]));
  program.resource("test:Thing", "b", inputs([("peer", field(&a, "id"))]));

  let err = keel_lib::execute::apply(
    &program,
    env.provider.clone(),
    &env.store,
    &TestEnv::options(),
    &CancelFlag::new(),
  )
  .await
  .unwrap_err();

  match err {
    keel_lib::execute::ApplyError::Graph(GraphError::CyclicDependency(path)) => {
      assert_eq!(path.first(), path.last());
      assert!(path.contains(&ResourceId::new("a")));
      assert!(path.contains(&ResourceId::new("b")));
    }
    other => panic!("expected a cycle, got {:?}", other),
  }
  assert!(env.provider.calls().is_empty());
  assert!(!env.store.path().exists());
}

#[tokio::test]
async fn self_reference_is_a_cycle() {
  let env = TestEnv::new();
  let mut program = Program::new();
  let me = program.reference("me");
  program.resource("test:Thing", "me", inputs([("peer", field(&me, "id"))]));

  let err = keel_lib::execute::apply(
    &program,
    env.provider.clone(),
    &env.store,
    &TestEnv::options(),
    &CancelFlag::new(),
  )
  .await
  .unwrap_err();

  assert!(matches!(
    err,
    keel_lib::execute::ApplyError::Graph(GraphError::CyclicDependency(_))
  ));
  assert!(env.provider.calls().is_empty());
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
  let env = TestEnv::new();
  let mut program = Program::new();
  program.resource("test:Thing", "twin", inputs([]));
  program.resource("test:Other", "twin", inputs([("x", Input::from(1i64))]));

  let err = keel_lib::execute::apply(
    &program,
    env.provider.clone(),
    &env.store,
    &TestEnv::options(),
    &CancelFlag::new(),
  )
  .await
  .unwrap_err();

  assert!(matches!(
    err,
    keel_lib::execute::ApplyError::Graph(GraphError::DuplicateResource(_))
  ));
  assert!(env.provider.calls().is_empty());
}

#[tokio::test]
async fn slow_calls_time_out() {
  let env = TestEnv::with_provider(MemoryProvider::new().with_delay(Duration::from_millis(500)));
  let mut program = Program::new();
  program.resource("test:Thing", "slow", inputs([]));

  let options = ApplyOptions {
    execute: ExecuteConfig {
      parallelism: 1,
      refresh: true,
      timeout: Some(Duration::from_millis(20)),
    },
    confirmed: None,
  };
  let result = env.apply_with(&program, &options, &CancelFlag::new()).await;

  match &result.report.outcomes[&step("slow")] {
    StepOutcome::Failed {
      error: StepError::Provider { source, .. },
      ..
    } => assert_eq!(source.code, ErrorCode::Timeout),
    other => panic!("expected a timeout, got {:?}", other),
  }
  assert!(env.state().records.is_empty());
}
