//! Pass orchestration for keel.
//!
//! This module ties the pieces of one pass together:
//!
//! 1. Build the resource graph (no side effects, fails fast on cycles)
//! 2. Take the state lock and load the current state
//! 3. Plan against the recorded state
//! 4. Execute the plan, persisting state after every step
//! 5. Resolve exports and persist them
//!
//! Destroy follows the same flow with a plan that deletes every record.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::graph::{GraphError, ResourceGraph};
use crate::output::Resolution;
use crate::plan::{Plan, PlanError, PlanSummary, StepId, StepKind, plan_destroy, plan_update};
use crate::provider::Provider;
use crate::resource::Program;
use crate::state::{ExportValue, LockMode, StateError, StateFile, StateStore};

use super::execute_plan;
use super::types::{AggregateFailure, CancelFlag, ExecuteConfig, ExecutionReport};

/// Errors that stop a pass, or summarize a pass that did not fully succeed.
#[derive(Debug, Error)]
pub enum ApplyError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  State(#[from] StateError),

  /// State moved between confirming a plan and taking the lock to apply it.
  #[error("the plan changed after it was confirmed (now: {current}); review it and apply again")]
  PlanChanged { current: PlanSummary },

  /// The pass ran but some steps failed, were skipped or never started.
  #[error(transparent)]
  Partial(#[from] AggregateFailure),
}

/// Options for the apply operation.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
  /// Execution configuration (parallelism, refresh, timeout)
  pub execute: ExecuteConfig,

  /// Actions the user approved. The pass stops before any provider call if
  /// the plan computed under the exclusive lock differs.
  pub confirmed: Option<Vec<(StepId, StepKind)>>,
}

/// Options for the destroy operation.
#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
  /// Execution configuration (parallelism, timeout)
  pub execute: ExecuteConfig,

  /// Dry run mode - show what would be destroyed without making changes.
  pub dry_run: bool,
}

/// Result of an apply operation.
#[derive(Debug)]
pub struct ApplyResult {
  /// The plan computed before execution.
  pub plan: Plan,

  /// Per step outcomes.
  pub report: ExecutionReport,

  /// Exports recorded after the pass.
  pub exports: BTreeMap<String, ExportValue>,
}

impl ApplyResult {
  /// Turn a partially failed pass into an error.
  pub fn check(&self) -> Result<(), ApplyError> {
    match self.report.aggregate() {
      Some(failure) => Err(ApplyError::Partial(failure)),
      None => Ok(()),
    }
  }
}

/// Result of a destroy operation.
#[derive(Debug)]
pub struct DestroyResult {
  pub plan: Plan,

  /// `None` for a dry run.
  pub report: Option<ExecutionReport>,
}

impl DestroyResult {
  pub fn check(&self) -> Result<(), ApplyError> {
    match self.report.as_ref().and_then(ExecutionReport::aggregate) {
      Some(failure) => Err(ApplyError::Partial(failure)),
      None => Ok(()),
    }
  }
}

/// Compute the plan for `program` without touching any resource.
///
/// Takes the state lock in shared mode so a concurrent apply cannot rewrite
/// the state file mid-read.
pub fn preview(program: &Program, provider: &dyn Provider, store: &StateStore) -> Result<Plan, ApplyError> {
  let graph = ResourceGraph::build(program)?;
  let _lock = store.lock(LockMode::Shared, "plan")?;
  let state = store.load()?;
  let plan = plan_update(&graph, &state, provider)?;
  info!(steps = plan.len(), summary = %plan.summary(), "plan computed");
  Ok(plan)
}

/// Apply `program`.
///
/// The graph is validated before the lock is taken or state is read, so a
/// cyclic or duplicated program never reaches the provider.
///
/// A pass where some steps fail still returns `Ok`; use
/// [`ApplyResult::check`] to turn that into an error.
pub async fn apply(
  program: &Program,
  provider: Arc<dyn Provider>,
  store: &StateStore,
  options: &ApplyOptions,
  cancel: &CancelFlag,
) -> Result<ApplyResult, ApplyError> {
  let graph = ResourceGraph::build(program)?;
  info!(resources = graph.len(), state_dir = %store.dir().display(), "starting apply");

  let _lock = store.lock(LockMode::Exclusive, "apply")?;
  let mut state = store.load()?;
  info!(records = state.records.len(), "loaded current state");

  let plan = plan_update(&graph, &state, provider.as_ref())?;
  info!(summary = %plan.summary(), "plan computed");

  if let Some(confirmed) = &options.confirmed
    && *confirmed != plan.actions()
  {
    warn!("plan differs from the confirmed one, nothing applied");
    return Err(ApplyError::PlanChanged {
      current: plan.summary(),
    });
  }

  let report = execute_plan(&graph, &plan, &mut state, store, provider, &options.execute, cancel).await;

  resolve_exports(program, &report, &mut state);
  store.save(&state)?;

  info!(
    succeeded = report.completed.len(),
    exports = state.exports.len(),
    "apply finished"
  );

  Ok(ApplyResult {
    plan,
    exports: state.exports.clone(),
    report,
  })
}

/// Delete every recorded resource in reverse dependency order.
pub async fn destroy(
  provider: Arc<dyn Provider>,
  store: &StateStore,
  options: &DestroyOptions,
  cancel: &CancelFlag,
) -> Result<DestroyResult, ApplyError> {
  let mode = if options.dry_run {
    LockMode::Shared
  } else {
    LockMode::Exclusive
  };
  let _lock = store.lock(mode, "destroy")?;
  let mut state = store.load()?;
  let plan = plan_destroy(&state)?;

  if plan.is_empty() {
    info!("nothing to destroy");
    return Ok(DestroyResult { plan, report: None });
  }
  if options.dry_run {
    info!(steps = plan.len(), "dry run, nothing deleted");
    return Ok(DestroyResult { plan, report: None });
  }

  info!(steps = plan.len(), "starting destroy");
  let graph = ResourceGraph::default();
  let report = execute_plan(&graph, &plan, &mut state, store, provider, &options.execute, cancel).await;

  if report.is_success() {
    state.exports.clear();
    store.save(&state)?;
  }

  info!(deleted = report.completed.len(), "destroy finished");
  Ok(DestroyResult {
    plan,
    report: Some(report),
  })
}

/// Resolve exports against the resources that are live after the pass.
///
/// Exports that still wait on a resource which did not finish keep their
/// previous value.
fn resolve_exports(program: &Program, report: &ExecutionReport, state: &mut StateFile) {
  let mut exports = BTreeMap::new();

  for export in program.exports() {
    match export.value.resolve(&report.resolved) {
      Ok(Resolution::Ready(resolved)) => {
        exports.insert(
          export.name.clone(),
          ExportValue {
            value: resolved.value,
            secret: resolved.secret,
          },
        );
      }
      Ok(Resolution::Pending(pending)) => {
        let waiting: Vec<String> = pending.iter().map(ToString::to_string).collect();
        warn!(export = %export.name, waiting = ?waiting, "export not resolved");
        if let Some(previous) = state.exports.get(&export.name) {
          exports.insert(export.name.clone(), previous.clone());
        }
      }
      Err(e) => {
        warn!(export = %export.name, error = %e, "export failed to resolve");
      }
    }
  }

  state.exports = exports;
}
