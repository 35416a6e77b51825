//! Scheduling and cancellation integration tests.

use std::time::Duration;

use keel_lib::execute::{ApplyOptions, CancelFlag, ExecuteConfig, StepOutcome};
use keel_lib::plan::StepKind;

use super::common::{Call, MemoryProvider, TestEnv, sibling_program};

fn options(parallelism: usize) -> ApplyOptions {
  ApplyOptions {
    execute: ExecuteConfig {
      parallelism,
      refresh: true,
      timeout: None,
    },
    confirmed: None,
  }
}

#[tokio::test]
async fn independent_siblings_run_concurrently() {
  let env = TestEnv::with_provider(MemoryProvider::new().with_delay(Duration::from_millis(50)));

  let result = env
    .apply_with(&sibling_program(4), &options(4), &CancelFlag::new())
    .await;

  assert!(result.report.is_success());
  assert_eq!(result.report.count_succeeded(StepKind::Create), 4);
  assert!(env.provider.max_in_flight() > 1);
}

#[tokio::test]
async fn parallelism_caps_calls_in_flight() {
  let env = TestEnv::with_provider(MemoryProvider::new().with_delay(Duration::from_millis(30)));

  let result = env
    .apply_with(&sibling_program(5), &options(2), &CancelFlag::new())
    .await;

  assert!(result.report.is_success());
  assert_eq!(env.provider.live_names().len(), 5);
  assert_eq!(env.provider.max_in_flight(), 2);
}

#[tokio::test]
async fn single_worker_runs_calls_one_at_a_time() {
  let env = TestEnv::with_provider(MemoryProvider::new().with_delay(Duration::from_millis(10)));

  env
    .apply_with(&sibling_program(3), &options(1), &CancelFlag::new())
    .await;

  assert_eq!(env.provider.max_in_flight(), 1);
}

#[tokio::test]
async fn cancel_stops_queued_steps() {
  let env = TestEnv::new();
  let cancel = CancelFlag::new();
  env.provider.cancel_on_create(&cancel);

  let result = env.apply_with(&sibling_program(4), &options(1), &cancel).await;

  let creates: Vec<Call> = env
    .provider
    .calls()
    .into_iter()
    .filter(|call| matches!(call, Call::Create(_)))
    .collect();
  assert_eq!(creates, vec![Call::Create("worker-0".into())]);

  assert!(result.report.cancelled);
  assert!(!result.report.is_success());
  assert_eq!(result.report.count_succeeded(StepKind::Create), 1);
  let not_started = result
    .report
    .outcomes
    .values()
    .filter(|outcome| matches!(outcome, StepOutcome::NotStarted))
    .count();
  assert_eq!(not_started, 3);

  // the in-flight create was recorded, the rest are created next pass
  assert_eq!(env.state().records.len(), 1);
  let rerun = env.apply(&sibling_program(4)).await;
  assert!(rerun.report.is_success());
  assert_eq!(rerun.plan.summary().create, 3);
}

#[tokio::test]
async fn cancel_after_last_dispatch_is_not_a_failure() {
  let env = TestEnv::new();
  let cancel = CancelFlag::new();
  env.provider.cancel_on_create(&cancel);

  let result = env.apply_with(&sibling_program(1), &options(1), &cancel).await;

  assert!(!result.report.cancelled);
  assert!(result.report.is_success());
  assert_eq!(env.state().records.len(), 1);
}
