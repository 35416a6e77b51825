//! Plan execution.
//!
//! This module applies a [`Plan`] against a provider. It handles:
//! - Dependency ordering with a ready queue instead of fixed waves
//! - Parallel provider calls bounded by a semaphore
//! - Failure propagation and skip tracking
//! - Dependencies that only show up once outputs are resolved
//! - Incremental, durable state writes after every successful step
//! - Deferred teardown of resources replaced create-before-delete

pub mod apply;
mod task;
pub mod types;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::graph::ResourceGraph;
use crate::output::{Resolution, ResolvedInputs};
use crate::plan::{Plan, PlanStep, PlannedInputs, PlannedValue, StepId, StepKind, classify, effective_schema};
use crate::provider::{Provider, ResourceSchema};
use crate::resource::ResourceId;
use crate::state::{PendingDelete, StateFile, StateRecord, StateStore, now_unix};
use crate::value::PropertyMap;

use task::{Work, WorkOutput};

pub use apply::{ApplyError, ApplyOptions, ApplyResult, DestroyOptions, DestroyResult, apply, destroy, preview};
pub use types::{
  AggregateFailure, CancelFlag, ExecuteConfig, ExecutionReport, NodeFailure, ProviderOperation, StepError, StepOutcome,
  StepState,
};

/// A program step whose inputs were resolved and whose action is fixed.
struct Prepared {
  kind: StepKind,
  inputs: ResolvedInputs,
  schema: ResourceSchema,
}

/// An old physical resource waiting for the replacement's dependents.
struct Retirement {
  owner: StepId,
  id: StepId,
  record: StateRecord,
}

struct Finished {
  id: StepId,
  result: Result<WorkOutput, StepError>,
}

/// Execute every step of `plan`.
///
/// Program steps resolve their inputs against resources finished earlier in
/// the pass, re-check the planned action against the real values, and call
/// the provider. Each success is written to `store` before any dependent
/// starts. A failure marks every transitive dependent as skipped while
/// independent branches keep going.
///
/// # Arguments
///
/// * `graph` - The program's resource graph (empty for destroy)
/// * `plan` - Steps to execute
/// * `state` - Current state, updated in place
/// * `store` - Where state is persisted after each step
/// * `provider` - The provider to call
/// * `config` - Execution configuration
/// * `cancel` - Stops new dispatches when set
pub async fn execute_plan(
  graph: &ResourceGraph,
  plan: &Plan,
  state: &mut StateFile,
  store: &StateStore,
  provider: Arc<dyn Provider>,
  config: &ExecuteConfig,
  cancel: &CancelFlag,
) -> ExecutionReport {
  Coordinator::new(graph, plan, state, store, provider, config, cancel).run().await
}

struct Coordinator<'a> {
  graph: &'a ResourceGraph,
  plan: &'a Plan,
  state: &'a mut StateFile,
  store: &'a StateStore,
  provider: Arc<dyn Provider>,
  config: &'a ExecuteConfig,
  cancel: &'a CancelFlag,

  states: HashMap<StepId, StepState>,
  waiting_on: HashMap<StepId, BTreeSet<StepId>>,
  dependents: HashMap<StepId, BTreeSet<StepId>>,
  ready: VecDeque<StepId>,
  prepared: HashMap<StepId, Prepared>,

  retirements: Vec<Retirement>,
  retire_ready: Vec<Retirement>,
  retiring: HashSet<StepId>,

  tasks: JoinSet<Finished>,
  semaphore: Arc<Semaphore>,
  halted: bool,
  report: ExecutionReport,
}

impl<'a> Coordinator<'a> {
  fn new(
    graph: &'a ResourceGraph,
    plan: &'a Plan,
    state: &'a mut StateFile,
    store: &'a StateStore,
    provider: Arc<dyn Provider>,
    config: &'a ExecuteConfig,
    cancel: &'a CancelFlag,
  ) -> Self {
    let mut states = HashMap::new();
    let mut waiting_on: HashMap<StepId, BTreeSet<StepId>> = HashMap::new();
    let mut dependents: HashMap<StepId, BTreeSet<StepId>> = HashMap::new();
    let mut ready = VecDeque::new();

    for step in plan.steps() {
      states.insert(step.id.clone(), StepState::Pending);
      let deps: BTreeSet<StepId> = step
        .depends_on
        .iter()
        .filter(|dep| plan.step(dep).is_some())
        .cloned()
        .collect();
      for dep in &deps {
        dependents.entry(dep.clone()).or_default().insert(step.id.clone());
      }
      if deps.is_empty() {
        ready.push_back(step.id.clone());
      }
      waiting_on.insert(step.id.clone(), deps);
    }

    Self {
      graph,
      plan,
      state,
      store,
      provider,
      config,
      cancel,
      states,
      waiting_on,
      dependents,
      ready,
      prepared: HashMap::new(),
      retirements: Vec::new(),
      retire_ready: Vec::new(),
      retiring: HashSet::new(),
      tasks: JoinSet::new(),
      semaphore: Arc::new(Semaphore::new(config.parallelism.max(1))),
      halted: false,
      report: ExecutionReport::default(),
    }
  }

  fn stopping(&self) -> bool {
    self.halted || self.cancel.is_cancelled()
  }

  async fn run(mut self) -> ExecutionReport {
    info!(
      steps = self.plan.len(),
      parallelism = self.config.parallelism,
      "starting plan execution"
    );

    loop {
      self.dispatch();

      match self.tasks.join_next().await {
        None => break,
        Some(Ok(finished)) => self.finish(finished),
        Some(Err(e)) => error!(error = %e, "executor task failed"),
      }
    }

    self.finalize()
  }

  fn state_of(&self, id: &StepId) -> StepState {
    self.states.get(id).copied().unwrap_or(StepState::Pending)
  }

  fn set_state(&mut self, id: &StepId, state: StepState) {
    debug!(step = %id, state = ?state, "step state");
    self.states.insert(id.clone(), state);
  }

  /// Start ready steps while worker slots are free. Steps left in the queue
  /// are never started once the pass is cancelled.
  fn dispatch(&mut self) {
    while !self.stopping() && !self.ready.is_empty() {
      let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
        return;
      };
      if let Some(id) = self.ready.pop_front() {
        self.start(id, permit);
      }
    }
    if !self.stopping() {
      self.dispatch_retirements();
    }
  }

  fn start(&mut self, id: StepId, permit: OwnedSemaphorePermit) {
    if self.state_of(&id) != StepState::Pending {
      return;
    }
    let Some(step) = self.plan.step(&id) else { return };

    match &step.id {
      StepId::Resource(name) if step.kind != StepKind::Delete => self.start_resource(step, name, permit),
      _ => self.start_delete(step, permit),
    }
  }

  fn start_delete(&mut self, step: &'a PlanStep, permit: OwnedSemaphorePermit) {
    let Some(prior) = &step.prior else {
      self.succeed_without_call(&step.id, StepKind::Delete);
      return;
    };
    self.prepared.insert(
      step.id.clone(),
      Prepared {
        kind: StepKind::Delete,
        inputs: ResolvedInputs::default(),
        schema: ResourceSchema::default(),
      },
    );
    self.spawn(
      step.id.clone(),
      Work::Delete {
        type_token: prior.type_token.clone(),
        physical_id: prior.physical_id.clone(),
      },
      permit,
    );
  }

  fn start_resource(&mut self, step: &'a PlanStep, name: &ResourceId, permit: OwnedSemaphorePermit) {
    let id = &step.id;
    self.set_state(id, StepState::ResolvingInputs);

    let Some(node) = self.graph.node(name) else {
      self.fail(id, step.kind, StepError::UnknownResource(name.clone()));
      return;
    };

    let inputs = match ResolvedInputs::resolve(&node.declaration.inputs, &self.report.resolved) {
      Ok(Resolution::Ready(resolved)) => resolved.value,
      Ok(Resolution::Pending(pending)) => {
        self.park(step, name, pending);
        return;
      }
      Err(e) => {
        self.fail(id, step.kind, StepError::Output(e));
        return;
      }
    };

    let schema = effective_schema(self.provider.as_ref(), node);
    let desired: PlannedInputs = inputs
      .values
      .iter()
      .map(|(field, value)| {
        let planned = PlannedValue::Known {
          value: value.clone(),
          secret: inputs.secret_fields.contains(field),
        };
        (field.clone(), planned)
      })
      .collect();
    let prior = self.state.records.get(name).cloned();
    let (kind, _) = classify(node, prior.as_ref(), &desired, &schema);
    if kind != step.kind {
      debug!(step = %id, planned = %step.kind, actual = %kind, "action refined with resolved inputs");
    }

    let type_token = node.declaration.type_token.clone();
    let work = match (kind, prior) {
      (StepKind::Update, Some(prior)) => Work::Update {
        type_token,
        physical_id: prior.physical_id,
        inputs: inputs.values.clone(),
      },
      (StepKind::Replace, Some(prior)) if schema.delete_before_replace => Work::ReplaceDeleteFirst {
        old_type_token: prior.type_token,
        type_token,
        name: name.to_string(),
        old_physical_id: prior.physical_id,
        inputs: inputs.values.clone(),
      },
      (StepKind::Replace, Some(prior)) => Work::Create {
        type_token,
        name: name.to_string(),
        inputs: inputs.values.clone(),
        replacing: Some(prior.physical_id),
      },
      (StepKind::NoOp | StepKind::Delete, Some(prior)) => {
        if !self.config.refresh {
          self.prepared.insert(id.clone(), Prepared { kind, inputs, schema });
          self.complete_resource(id, name, None);
          return;
        }
        Work::Read {
          type_token: prior.type_token,
          physical_id: prior.physical_id,
        }
      }
      _ => Work::Create {
        type_token,
        name: name.to_string(),
        inputs: inputs.values.clone(),
        replacing: None,
      },
    };

    self.prepared.insert(id.clone(), Prepared { kind, inputs, schema });
    self.spawn(id.clone(), work, permit);
  }

  /// Wait for resources discovered while resolving outputs.
  fn park(&mut self, step: &PlanStep, name: &ResourceId, pending: BTreeSet<ResourceId>) {
    let id = &step.id;
    let mut added = false;

    for dep in pending {
      if !self.graph.contains(&dep) {
        self.fail(id, step.kind, StepError::UnknownResource(dep));
        return;
      }
      let dep_id = StepId::Resource(dep.clone());
      match self.state_of(&dep_id) {
        StepState::Failed | StepState::Skipped => {
          self.skip(id, &dep_id);
          return;
        }
        StepState::Succeeded => continue,
        _ => {}
      }
      if dep_id == *id || self.graph.depends_transitively(&dep, name) || self.reaches(id, &dep_id) {
        let path = vec![name.clone(), dep, name.clone()];
        self.fail(id, step.kind, StepError::CyclicDependency(path));
        return;
      }
      self.waiting_on.entry(id.clone()).or_default().insert(dep_id.clone());
      self.dependents.entry(dep_id).or_default().insert(id.clone());
      added = true;
    }

    if !added {
      let error = crate::output::OutputError::Transform("inputs stayed unresolved".to_string());
      self.fail(id, step.kind, StepError::Output(error));
      return;
    }

    debug!(step = %id, "parked on dependencies discovered during resolution");
    self.set_state(id, StepState::Pending);
  }

  /// True if `target` transitively waits on `from`.
  fn reaches(&self, from: &StepId, target: &StepId) -> bool {
    let mut stack = vec![from.clone()];
    let mut seen = HashSet::new();
    while let Some(current) = stack.pop() {
      if &current == target {
        return true;
      }
      if !seen.insert(current.clone()) {
        continue;
      }
      if let Some(next) = self.dependents.get(&current) {
        stack.extend(next.iter().cloned());
      }
    }
    false
  }

  fn spawn(&mut self, id: StepId, work: Work, permit: OwnedSemaphorePermit) {
    self.set_state(&id, StepState::CallingProvider);

    let provider = self.provider.clone();
    let timeout = self.config.timeout;

    self.tasks.spawn(async move {
      let _permit = permit;
      let result = match tokio::spawn(task::run(provider, work, timeout)).await {
        Ok(result) => result,
        Err(e) => Err(StepError::Panicked(e.to_string())),
      };
      Finished { id, result }
    });
  }

  fn finish(&mut self, finished: Finished) {
    let Finished { id, result } = finished;

    if self.retiring.remove(&id) {
      self.finish_retirement(&id, result);
      return;
    }

    match result {
      Ok(output) => match &id {
        StepId::Resource(name) if self.prepared.get(&id).is_some_and(|p| p.kind != StepKind::Delete) => {
          let name = name.clone();
          self.complete_resource(&id, &name, Some(output));
        }
        _ => self.complete_delete(&id),
      },
      Err(error) => {
        let kind = self.prepared.remove(&id).map(|p| p.kind).unwrap_or(StepKind::Delete);
        if let (StepError::ReplaceFailure { old_deleted: true, .. }, StepId::Resource(name)) = (&error, &id) {
          self.state.records.remove(name);
          if let Err(e) = self.persist() {
            error!(error = %e, "failed to record deleted resource");
          }
        }
        self.fail(&id, kind, error);
      }
    }

    self.check_retirements();
  }

  fn complete_resource(&mut self, id: &StepId, name: &ResourceId, output: Option<WorkOutput>) {
    let Some(prepared) = self.prepared.remove(id) else { return };
    let prior = self.state.records.get(name).cloned();
    let called = output.is_some();

    let record = match (output, prior) {
      (Some(WorkOutput::Created(created)), prior) => {
        let record = self.build_record(name, &prepared, created.physical_id, created.outputs);
        let replaced = self.state.records.insert(name.clone(), record.clone());
        if prepared.kind == StepKind::Replace
          && !prepared.schema.delete_before_replace
          && let Some(old) = replaced.or(prior)
          && old.physical_id != record.physical_id
        {
          self.track_retirement(id, name, old);
        }
        record
      }
      (Some(WorkOutput::Outputs(outputs)), Some(prior)) if prepared.kind == StepKind::Update => {
        let record = self.build_record(name, &prepared, prior.physical_id, outputs);
        self.state.records.insert(name.clone(), record.clone());
        record
      }
      (Some(WorkOutput::Outputs(outputs)), Some(mut prior)) => {
        prior.outputs = outputs;
        self.state.records.insert(name.clone(), prior.clone());
        prior
      }
      (_, Some(prior)) => prior,
      (_, None) => {
        self.fail(
          id,
          prepared.kind,
          StepError::State(format!("no state record for '{}'", name)),
        );
        return;
      }
    };

    if called
      && let Err(e) = self.persist()
    {
      self.halted = true;
      self.fail(id, prepared.kind, e);
      return;
    }

    info!(step = %id, kind = %prepared.kind, physical_id = %record.physical_id, "step succeeded");
    self.report.resolved.insert(name.clone(), record.resolved());
    self.mark_succeeded(id, prepared.kind);
  }

  fn complete_delete(&mut self, id: &StepId) {
    self.prepared.remove(id);
    match id {
      StepId::Resource(name) => {
        self.state.records.remove(name);
      }
      StepId::Retired { physical_id, .. } => {
        self.state.remove_pending_delete(physical_id);
      }
    }

    if let Err(e) = self.persist() {
      self.halted = true;
      self.fail(id, StepKind::Delete, e);
      return;
    }

    info!(step = %id, "resource deleted");
    self.mark_succeeded(id, StepKind::Delete);
  }

  fn succeed_without_call(&mut self, id: &StepId, kind: StepKind) {
    self.mark_succeeded(id, kind);
  }

  fn mark_succeeded(&mut self, id: &StepId, kind: StepKind) {
    self.set_state(id, StepState::Succeeded);
    self.report.outcomes.insert(id.clone(), StepOutcome::Succeeded { kind });
    self.report.completed.push(id.clone());
    self.release(id);
  }

  fn release(&mut self, id: &StepId) {
    let dependents: Vec<StepId> = self
      .dependents
      .get(id)
      .map(|d| d.iter().cloned().collect())
      .unwrap_or_default();

    for dependent in dependents {
      let now_ready = match self.waiting_on.get_mut(&dependent) {
        Some(waiting) => {
          waiting.remove(id);
          waiting.is_empty()
        }
        None => true,
      };
      if now_ready && self.state_of(&dependent) == StepState::Pending {
        self.ready.push_back(dependent);
      }
    }
  }

  fn fail(&mut self, id: &StepId, kind: StepKind, error: StepError) {
    error!(step = %id, kind = %kind, error = %error, "step failed");
    self.set_state(id, StepState::Failed);
    self
      .report
      .outcomes
      .insert(id.clone(), StepOutcome::Failed { kind, error });
    self.skip_dependents(id, id);
  }

  fn skip(&mut self, id: &StepId, failed: &StepId) {
    warn!(step = %id, failed_dep = %failed, "skipping step due to failed dependency");
    self.set_state(id, StepState::Skipped);
    self.report.outcomes.insert(
      id.clone(),
      StepOutcome::Skipped {
        failed_dependency: failed.clone(),
      },
    );
    self.skip_dependents(id, failed);
  }

  fn skip_dependents(&mut self, id: &StepId, root: &StepId) {
    let dependents: Vec<StepId> = self
      .dependents
      .get(id)
      .map(|d| d.iter().cloned().collect())
      .unwrap_or_default();

    for dependent in dependents {
      if matches!(
        self.state_of(&dependent),
        StepState::Pending | StepState::ResolvingInputs
      ) {
        self.skip(&dependent, root);
      }
    }
  }

  fn build_record(
    &self,
    name: &ResourceId,
    prepared: &Prepared,
    physical_id: String,
    outputs: PropertyMap,
  ) -> StateRecord {
    let mut secret_outputs = prepared.schema.secret_outputs.clone();
    secret_outputs.extend(
      prepared
        .inputs
        .secret_fields
        .iter()
        .filter(|field| outputs.contains_key(*field))
        .cloned(),
    );

    let mut dependencies = self.graph.dependencies(name);
    dependencies.extend(prepared.inputs.deps.iter().cloned());
    dependencies.remove(name);

    let type_token = self
      .graph
      .node(name)
      .map(|node| node.declaration.type_token.clone())
      .unwrap_or_default();

    StateRecord {
      type_token,
      physical_id,
      inputs: prepared.inputs.values.clone(),
      outputs,
      secret_inputs: prepared.inputs.secret_fields.clone(),
      secret_outputs,
      dependencies,
      updated_at: now_unix(),
    }
  }

  fn persist(&mut self) -> Result<(), StepError> {
    self
      .store
      .save(self.state)
      .map_err(|e| StepError::State(e.to_string()))
  }

  /// Keep the old resource recorded until every dependent of its successor
  /// has moved on.
  fn track_retirement(&mut self, owner: &StepId, name: &ResourceId, old: StateRecord) {
    let id = StepId::Retired {
      name: name.clone(),
      physical_id: old.physical_id.clone(),
    };
    self.state.pending_deletes.push(PendingDelete {
      name: name.clone(),
      record: old.clone(),
    });
    debug!(step = %id, "old resource waiting for dependents of its replacement");
    self.retirements.push(Retirement {
      owner: owner.clone(),
      id,
      record: old,
    });
  }

  fn check_retirements(&mut self) {
    let mut i = 0;
    while i < self.retirements.len() {
      let dependents: Vec<StepId> = self
        .dependents
        .get(&self.retirements[i].owner)
        .map(|d| d.iter().cloned().collect())
        .unwrap_or_default();

      if !dependents.iter().all(|d| self.state_of(d).is_terminal()) {
        i += 1;
        continue;
      }

      let retirement = self.retirements.remove(i);
      if dependents.iter().all(|d| self.state_of(d) == StepState::Succeeded) {
        self.retire_ready.push(retirement);
      } else {
        warn!(
          step = %retirement.id,
          "dependents of the replacement did not all succeed, keeping old resource for a later pass"
        );
        self.report.retained.insert(retirement.id);
      }
    }
  }

  fn dispatch_retirements(&mut self) {
    self.check_retirements();
    while !self.retire_ready.is_empty() {
      let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
        return;
      };
      let retirement = self.retire_ready.remove(0);
      self.retiring.insert(retirement.id.clone());
      self.spawn(
        retirement.id,
        Work::Delete {
          type_token: retirement.record.type_token,
          physical_id: retirement.record.physical_id,
        },
        permit,
      );
    }
  }

  fn finish_retirement(&mut self, id: &StepId, result: Result<WorkOutput, StepError>) {
    match result {
      Ok(_) => {
        if let StepId::Retired { physical_id, .. } = id {
          self.state.remove_pending_delete(physical_id);
        }
        match self.persist() {
          Ok(()) => {
            info!(step = %id, "old resource deleted after replacement");
            self.set_state(id, StepState::Succeeded);
            self.report.outcomes.insert(
              id.clone(),
              StepOutcome::Succeeded {
                kind: StepKind::Delete,
              },
            );
            self.report.completed.push(id.clone());
          }
          Err(e) => {
            self.halted = true;
            self.fail(id, StepKind::Delete, e);
          }
        }
      }
      Err(error) => {
        self.report.retained.insert(id.clone());
        self.fail(id, StepKind::Delete, error);
      }
    }
  }

  fn finalize(mut self) -> ExecutionReport {
    for retirement in self.retirements.drain(..).chain(self.retire_ready.drain(..)) {
      self.report.retained.insert(retirement.id);
    }
    let mut not_started = 0;
    for step in self.plan.steps() {
      if !self.report.outcomes.contains_key(&step.id) {
        self.report.outcomes.insert(step.id.clone(), StepOutcome::NotStarted);
        not_started += 1;
      }
    }
    // A cancel that arrived after the last dispatch changed nothing.
    self.report.cancelled = self.cancel.is_cancelled() && not_started > 0;

    let failed = self.report.failures().count();
    let skipped = self.report.skipped().count();
    info!(
      succeeded = self.report.completed.len(),
      failed,
      skipped,
      cancelled = self.report.cancelled,
      "plan execution complete"
    );

    self.report
  }
}
