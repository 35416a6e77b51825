//! Reconciliation plans.
//!
//! A [`Plan`] holds exactly one [`PlanStep`] per program resource plus one
//! `Delete` step per state record the program no longer declares. Steps are
//! stored in an order where every step follows the steps it depends on.

mod diff;
mod planner;

pub use diff::{FieldChange, PlannedInputs, PlannedValue, creation_changes, diff_inputs};
pub use planner::{plan_destroy, plan_update};
pub(crate) use planner::{classify, effective_schema};

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::resource::ResourceId;
use crate::state::StateRecord;
use crate::value::display_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
  Create,
  Update,
  Replace,
  Delete,
  NoOp,
}

impl StepKind {
  pub fn symbol(self) -> &'static str {
    match self {
      StepKind::Create => "+",
      StepKind::Update => "~",
      StepKind::Replace => "-/+",
      StepKind::Delete => "-",
      StepKind::NoOp => " ",
    }
  }

  pub fn is_change(self) -> bool {
    self != StepKind::NoOp
  }
}

impl fmt::Display for StepKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      StepKind::Create => "create",
      StepKind::Update => "update",
      StepKind::Replace => "replace",
      StepKind::Delete => "delete",
      StepKind::NoOp => "same",
    };
    f.write_str(name)
  }
}

/// Identifies a step.
///
/// Program resources and orphaned records are keyed by logical name. Old
/// physical resources left over from a replacement are keyed by name and
/// physical id, since they can coexist with a live resource of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepId {
  Resource(ResourceId),
  Retired { name: ResourceId, physical_id: String },
}

impl StepId {
  pub fn name(&self) -> &ResourceId {
    match self {
      StepId::Resource(name) => name,
      StepId::Retired { name, .. } => name,
    }
  }
}

impl fmt::Display for StepId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StepId::Resource(name) => write!(f, "{}", name),
      StepId::Retired { name, physical_id } => write!(f, "{} (old {})", name, physical_id),
    }
  }
}

impl Serialize for StepId {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
  pub id: StepId,
  pub kind: StepKind,
  pub type_token: String,
  #[serde(skip)]
  pub prior: Option<StateRecord>,
  /// Desired inputs; empty for deletes.
  pub desired: PlannedInputs,
  pub changes: Vec<FieldChange>,
  pub depends_on: BTreeSet<StepId>,
  pub delete_before_replace: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
  pub create: usize,
  pub update: usize,
  pub replace: usize,
  pub delete: usize,
  pub same: usize,
}

impl PlanSummary {
  pub fn changes(&self) -> usize {
    self.create + self.update + self.replace + self.delete
  }
}

impl fmt::Display for PlanSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
      self.create, self.update, self.replace, self.delete, self.same
    )
  }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
  #[error("recorded dependencies form a cycle among: {}", .0.join(", "))]
  RecordedCycle(Vec<String>),
}

/// The ordered set of steps for one pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
  steps: Vec<PlanStep>,
  #[serde(skip)]
  index: HashMap<StepId, usize>,
}

impl Plan {
  /// Build a plan from steps that are already dependency ordered.
  fn from_ordered(steps: Vec<PlanStep>) -> Self {
    let index = steps.iter().enumerate().map(|(i, step)| (step.id.clone(), i)).collect();
    Self { steps, index }
  }

  pub fn steps(&self) -> &[PlanStep] {
    &self.steps
  }

  pub fn step(&self, id: &StepId) -> Option<&PlanStep> {
    self.index.get(id).map(|&i| &self.steps[i])
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn summary(&self) -> PlanSummary {
    let mut summary = PlanSummary::default();
    for step in &self.steps {
      match step.kind {
        StepKind::Create => summary.create += 1,
        StepKind::Update => summary.update += 1,
        StepKind::Replace => summary.replace += 1,
        StepKind::Delete => summary.delete += 1,
        StepKind::NoOp => summary.same += 1,
      }
    }
    summary
  }

  pub fn has_changes(&self) -> bool {
    self.steps.iter().any(|step| step.kind.is_change())
  }

  /// The changing steps and what each will do.
  pub fn actions(&self) -> Vec<(StepId, StepKind)> {
    self
      .steps
      .iter()
      .filter(|step| step.kind.is_change())
      .map(|step| (step.id.clone(), step.kind))
      .collect()
  }
}

impl fmt::Display for Plan {
  /// Human readable diff of every changing step.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for step in self.steps.iter().filter(|s| s.kind.is_change()) {
      writeln!(f, "{:>3} {} ({}) {}", step.kind.symbol(), step.id, step.type_token, step.kind)?;
      if step.kind == StepKind::Delete {
        continue;
      }
      for change in &step.changes {
        writeln!(f, "      {}", format_change(change))?;
      }
    }
    write!(f, "Plan: {}.", self.summary())
  }
}

/// One line describing a field change, with secrets masked.
pub fn format_change(change: &FieldChange) -> String {
  let after = match &change.after {
    Some(PlannedValue::Known { value, .. }) => display_value(value, change.secret),
    Some(PlannedValue::Unknown) => "(known after apply)".to_string(),
    None => "(removed)".to_string(),
  };
  let line = match &change.before {
    Some(before) => format!("{}: {} => {}", change.field, display_value(before, change.secret), after),
    None => format!("{}: {}", change.field, after),
  };
  if change.forces_replacement {
    format!("{} (forces replacement)", line)
  } else {
    line
  }
}
