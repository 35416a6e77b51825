//! Types for plan execution.
//!
//! This module defines the error types, per-step outcomes and configuration
//! used while applying a plan.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::output::{OutputError, ResolvedResource};
use crate::plan::{StepId, StepKind};
use crate::provider::ProviderError;
use crate::resource::ResourceId;

/// Which provider call a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOperation {
  Create,
  Read,
  Update,
  Delete,
}

impl fmt::Display for ProviderOperation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ProviderOperation::Create => "create",
      ProviderOperation::Read => "read",
      ProviderOperation::Update => "update",
      ProviderOperation::Delete => "delete",
    };
    f.write_str(name)
  }
}

/// Why a single step failed.
#[derive(Debug, Clone, Error)]
pub enum StepError {
  #[error("{operation} failed: {source}")]
  Provider {
    operation: ProviderOperation,
    #[source]
    source: ProviderError,
  },

  #[error("could not resolve inputs: {0}")]
  Output(#[from] OutputError),

  /// A replacement that cannot be completed automatically.
  ///
  /// When `old_deleted` is set the old resource is gone and no new one exists;
  /// the record has been removed and the resource needs manual reconciliation.
  #[error("replacement of {old_physical_id} failed{}: {source}", deleted_suffix(.old_deleted))]
  ReplaceFailure {
    old_physical_id: String,
    old_deleted: bool,
    #[source]
    source: ProviderError,
  },

  #[error("inputs reference undeclared resource '{0}'")]
  UnknownResource(ResourceId),

  #[error("inputs introduce a dependency cycle: {}", format_path(.0))]
  CyclicDependency(Vec<ResourceId>),

  #[error("failed to persist state: {0}")]
  State(String),

  #[error("provider task panicked: {0}")]
  Panicked(String),
}

fn deleted_suffix(old_deleted: &bool) -> &'static str {
  if *old_deleted { " after the old resource was deleted" } else { "" }
}

fn format_path(path: &[ResourceId]) -> String {
  path.iter().map(ResourceId::as_str).collect::<Vec<_>>().join(" -> ")
}

impl StepError {
  pub fn provider(operation: ProviderOperation, source: ProviderError) -> Self {
    StepError::Provider { operation, source }
  }
}

/// Lifecycle of a step inside the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
  Pending,
  ResolvingInputs,
  CallingProvider,
  Succeeded,
  Failed,
  Skipped,
}

impl StepState {
  pub fn is_terminal(self) -> bool {
    matches!(self, StepState::Succeeded | StepState::Failed | StepState::Skipped)
  }
}

/// Final result of one step.
#[derive(Debug, Clone)]
pub enum StepOutcome {
  /// `kind` is the action actually taken, which may differ from the plan
  /// once real input values are known.
  Succeeded { kind: StepKind },
  Failed { kind: StepKind, error: StepError },
  Skipped { failed_dependency: StepId },
  /// Never dispatched because the pass was cancelled.
  NotStarted,
}

/// Outcome of executing a whole plan.
#[derive(Debug, Default)]
pub struct ExecutionReport {
  pub outcomes: BTreeMap<StepId, StepOutcome>,
  /// Steps in the order they finished successfully.
  pub completed: Vec<StepId>,
  /// Outputs of every program resource that is live after the pass.
  pub resolved: BTreeMap<ResourceId, ResolvedResource>,
  /// Old physical ids kept for a later pass because a dependent did not finish.
  pub retained: BTreeSet<StepId>,
  pub cancelled: bool,
}

impl ExecutionReport {
  pub fn is_success(&self) -> bool {
    !self.cancelled
      && self
        .outcomes
        .values()
        .all(|outcome| matches!(outcome, StepOutcome::Succeeded { .. }))
  }

  pub fn count_succeeded(&self, kind: StepKind) -> usize {
    self
      .outcomes
      .values()
      .filter(|outcome| matches!(outcome, StepOutcome::Succeeded { kind: k } if *k == kind))
      .count()
  }

  pub fn failures(&self) -> impl Iterator<Item = (&StepId, StepKind, &StepError)> {
    self.outcomes.iter().filter_map(|(id, outcome)| match outcome {
      StepOutcome::Failed { kind, error } => Some((id, *kind, error)),
      _ => None,
    })
  }

  pub fn skipped(&self) -> impl Iterator<Item = (&StepId, &StepId)> {
    self.outcomes.iter().filter_map(|(id, outcome)| match outcome {
      StepOutcome::Skipped { failed_dependency } => Some((id, failed_dependency)),
      _ => None,
    })
  }

  /// All failures of the pass, or `None` when it succeeded.
  pub fn aggregate(&self) -> Option<AggregateFailure> {
    if self.is_success() {
      return None;
    }
    Some(AggregateFailure {
      failures: self
        .failures()
        .map(|(id, kind, error)| NodeFailure {
          step: id.clone(),
          kind,
          error: error.clone(),
        })
        .collect(),
      skipped: self.skipped().map(|(id, _)| id.clone()).collect(),
      not_started: self
        .outcomes
        .iter()
        .filter(|(_, outcome)| matches!(outcome, StepOutcome::NotStarted))
        .map(|(id, _)| id.clone())
        .collect(),
      cancelled: self.cancelled,
    })
  }
}

#[derive(Debug, Clone)]
pub struct NodeFailure {
  pub step: StepId,
  pub kind: StepKind,
  pub error: StepError,
}

/// Every failed, skipped and unstarted step of a pass.
#[derive(Debug, Clone)]
pub struct AggregateFailure {
  pub failures: Vec<NodeFailure>,
  pub skipped: Vec<StepId>,
  pub not_started: Vec<StepId>,
  pub cancelled: bool,
}

impl fmt::Display for AggregateFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.cancelled {
      write!(f, "pass cancelled")?;
    } else {
      write!(f, "{} step(s) failed", self.failures.len())?;
    }
    for failure in &self.failures {
      write!(f, "\n  {} ({}): {}", failure.step, failure.kind, failure.error)?;
    }
    if !self.skipped.is_empty() {
      let names: Vec<String> = self.skipped.iter().map(ToString::to_string).collect();
      write!(f, "\n  skipped: {}", names.join(", "))?;
    }
    if !self.not_started.is_empty() {
      let names: Vec<String> = self.not_started.iter().map(ToString::to_string).collect();
      write!(f, "\n  not started: {}", names.join(", "))?;
    }
    Ok(())
  }
}

impl std::error::Error for AggregateFailure {}

/// Shared flag that stops the executor from dispatching new steps.
///
/// Steps already talking to a provider are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Configuration for plan execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of provider calls in flight.
  pub parallelism: usize,

  /// Read live outputs for unchanged resources instead of reusing recorded ones.
  pub refresh: bool,

  /// Per provider call limit.
  pub timeout: Option<Duration>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      refresh: true,
      timeout: None,
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
