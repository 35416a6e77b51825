use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info};

use super::diff::{PlannedInputs, PlannedValue, creation_changes, diff_inputs};
use super::{Plan, PlanError, PlanStep, StepId, StepKind};
use crate::graph::{ResourceGraph, ResourceNode};
use crate::output::{Resolution, ResolvedResource};
use crate::provider::{Provider, ResourceSchema};
use crate::resource::ResourceId;
use crate::state::{StateFile, StateRecord};

/// Schema for a node, with the program's own replacement override applied.
pub(crate) fn effective_schema(provider: &dyn Provider, node: &ResourceNode) -> ResourceSchema {
  let mut schema = provider.schema(&node.declaration.type_token);
  schema.delete_before_replace |= node.declaration.options.delete_before_replace;
  schema
}

/// Decide the step kind for a program resource given its prior record.
pub(crate) fn classify(
  node: &ResourceNode,
  prior: Option<&StateRecord>,
  desired: &PlannedInputs,
  schema: &ResourceSchema,
) -> (StepKind, Vec<super::FieldChange>) {
  let Some(prior) = prior else {
    return (StepKind::Create, creation_changes(desired));
  };

  let changes = diff_inputs(prior, desired, schema);
  if prior.type_token != node.declaration.type_token {
    return (StepKind::Replace, changes);
  }
  if changes.is_empty() {
    (StepKind::NoOp, changes)
  } else if changes.iter().any(|c| c.forces_replacement) {
    (StepKind::Replace, changes)
  } else {
    (StepKind::Update, changes)
  }
}

/// Plan a pass that brings the live resources in line with `graph`.
///
/// Resources are visited in dependency order. Inputs that reference a
/// resource which is itself unchanged resolve from its recorded outputs;
/// references to resources that will change are unknown until apply.
pub fn plan_update(graph: &ResourceGraph, state: &StateFile, provider: &dyn Provider) -> Result<Plan, PlanError> {
  let mut preview: BTreeMap<ResourceId, ResolvedResource> = BTreeMap::new();
  let mut steps = Vec::new();

  for id in graph.topological_order() {
    let Some(node) = graph.node(&id) else { continue };
    let prior = state.records.get(&id);
    let schema = effective_schema(provider, node);

    let desired: PlannedInputs = node
      .declaration
      .inputs
      .iter()
      .map(|(field, input)| {
        let planned = match input.resolve(&preview) {
          Ok(Resolution::Ready(resolved)) => PlannedValue::Known {
            value: resolved.value,
            secret: resolved.secret,
          },
          Ok(Resolution::Pending(_)) | Err(_) => PlannedValue::Unknown,
        };
        (field.clone(), planned)
      })
      .collect();

    let (kind, changes) = classify(node, prior, &desired, &schema);
    if kind == StepKind::NoOp
      && let Some(prior) = prior
    {
      preview.insert(id.clone(), prior.resolved());
    }

    debug!(resource = %id, kind = %kind, changes = changes.len(), "planned resource");

    steps.push(PlanStep {
      id: StepId::Resource(id.clone()),
      kind,
      type_token: node.declaration.type_token.clone(),
      prior: prior.cloned(),
      desired,
      changes,
      depends_on: graph.dependencies(&id).into_iter().map(StepId::Resource).collect(),
      delete_before_replace: schema.delete_before_replace,
    });
  }

  for (name, record) in &state.records {
    if !graph.contains(name) {
      steps.push(delete_step(StepId::Resource(name.clone()), record));
    }
  }
  append_retired(&mut steps, state);
  order_deletes(&mut steps, state);

  let plan = Plan::from_ordered(sort_steps(steps)?);
  info!(summary = %plan.summary(), "plan computed");
  Ok(plan)
}

/// Plan the deletion of everything recorded in `state`.
pub fn plan_destroy(state: &StateFile) -> Result<Plan, PlanError> {
  let mut steps: Vec<PlanStep> = state
    .records
    .iter()
    .map(|(name, record)| delete_step(StepId::Resource(name.clone()), record))
    .collect();
  append_retired(&mut steps, state);
  order_deletes(&mut steps, state);

  let plan = Plan::from_ordered(sort_steps(steps)?);
  info!(summary = %plan.summary(), "destroy plan computed");
  Ok(plan)
}

fn delete_step(id: StepId, record: &StateRecord) -> PlanStep {
  PlanStep {
    id,
    kind: StepKind::Delete,
    type_token: record.type_token.clone(),
    prior: Some(record.clone()),
    desired: PlannedInputs::new(),
    changes: Vec::new(),
    depends_on: BTreeSet::new(),
    delete_before_replace: false,
  }
}

fn append_retired(steps: &mut Vec<PlanStep>, state: &StateFile) {
  for pending in &state.pending_deletes {
    let id = StepId::Retired {
      name: pending.name.clone(),
      physical_id: pending.record.physical_id.clone(),
    };
    steps.push(delete_step(id, &pending.record));
  }
}

/// A delete of X waits for every step of a resource recorded as depending on
/// X, and a retired resource also waits for its live successor.
fn order_deletes(steps: &mut [PlanStep], state: &StateFile) {
  let present: BTreeSet<StepId> = steps.iter().map(|s| s.id.clone()).collect();

  // (dependent step, recorded dependencies)
  let mut recorded: Vec<(StepId, &BTreeSet<ResourceId>)> = state
    .records
    .iter()
    .map(|(name, record)| (StepId::Resource(name.clone()), &record.dependencies))
    .collect();
  recorded.extend(state.pending_deletes.iter().map(|pending| {
    (
      StepId::Retired {
        name: pending.name.clone(),
        physical_id: pending.record.physical_id.clone(),
      },
      &pending.record.dependencies,
    )
  }));

  for step in steps.iter_mut().filter(|s| s.kind == StepKind::Delete) {
    let name = step.id.name().clone();
    for (dependent, deps) in &recorded {
      if *dependent != step.id && deps.contains(&name) && present.contains(dependent) {
        step.depends_on.insert(dependent.clone());
      }
    }
    if let StepId::Retired { name, .. } = &step.id {
      let successor = StepId::Resource(name.clone());
      if present.contains(&successor) {
        step.depends_on.insert(successor);
      }
    }
  }
}

/// Kahn's algorithm over step dependencies, keeping input order among ready steps.
fn sort_steps(steps: Vec<PlanStep>) -> Result<Vec<PlanStep>, PlanError> {
  let position: HashMap<StepId, usize> = steps.iter().enumerate().map(|(i, s)| (s.id.clone(), i)).collect();
  let mut remaining: Vec<usize> = steps
    .iter()
    .map(|s| s.depends_on.iter().filter(|d| position.contains_key(d)).count())
    .collect();
  let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
  for (i, step) in steps.iter().enumerate() {
    for dep in &step.depends_on {
      if let Some(&d) = position.get(dep) {
        dependents[d].push(i);
      }
    }
  }

  let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&i| remaining[i] == 0).collect();
  let mut order = Vec::with_capacity(steps.len());
  while let Some(i) = ready.pop_first() {
    order.push(i);
    for &dependent in &dependents[i] {
      remaining[dependent] -= 1;
      if remaining[dependent] == 0 {
        ready.insert(dependent);
      }
    }
  }

  if order.len() != steps.len() {
    let stuck = (0..steps.len())
      .filter(|i| !order.contains(i))
      .map(|i| steps[i].id.to_string())
      .collect();
    return Err(PlanError::RecordedCycle(stuck));
  }

  let mut slots: Vec<Option<PlanStep>> = steps.into_iter().map(Some).collect();
  Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}
