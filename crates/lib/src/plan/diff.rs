//! Field-by-field comparison of desired inputs against a state record.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::provider::ResourceSchema;
use crate::state::StateRecord;
use crate::value::{Value, values_equal};

/// A desired input value as far as it is known at planning time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PlannedValue {
  Known { value: Value, secret: bool },
  /// Depends on an output that will only exist after apply.
  Unknown,
}

impl PlannedValue {
  pub fn known(value: Value) -> Self {
    PlannedValue::Known { value, secret: false }
  }

  pub fn is_secret(&self) -> bool {
    matches!(self, PlannedValue::Known { secret: true, .. })
  }
}

/// Desired inputs of one resource.
pub type PlannedInputs = BTreeMap<String, PlannedValue>;

/// One changed input field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
  pub field: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub before: Option<Value>,
  /// `None` when the field is removed.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub after: Option<PlannedValue>,
  pub secret: bool,
  pub forces_replacement: bool,
}

/// Compare desired inputs with the inputs recorded in `prior`.
///
/// Unknown values always count as a change since they may differ once known.
pub fn diff_inputs(prior: &StateRecord, desired: &PlannedInputs, schema: &ResourceSchema) -> Vec<FieldChange> {
  let mut changes = Vec::new();

  for (field, planned) in desired {
    let before = prior.inputs.get(field);
    let as_set = schema.set_fields.contains(field);
    let changed = match (before, planned) {
      (_, PlannedValue::Unknown) => true,
      (None, PlannedValue::Known { .. }) => true,
      (Some(old), PlannedValue::Known { value, .. }) => !values_equal(old, value, as_set),
    };
    if changed {
      changes.push(FieldChange {
        field: field.clone(),
        before: before.cloned(),
        after: Some(planned.clone()),
        secret: planned.is_secret() || prior.secret_inputs.contains(field),
        forces_replacement: schema.immutable_fields.contains(field),
      });
    }
  }

  for (field, old) in &prior.inputs {
    if !desired.contains_key(field) {
      changes.push(FieldChange {
        field: field.clone(),
        before: Some(old.clone()),
        after: None,
        secret: prior.secret_inputs.contains(field),
        forces_replacement: schema.immutable_fields.contains(field),
      });
    }
  }

  changes.sort_by(|a, b| a.field.cmp(&b.field));
  changes
}

/// Every field of a resource that does not exist yet.
pub fn creation_changes(desired: &PlannedInputs) -> Vec<FieldChange> {
  desired
    .iter()
    .map(|(field, planned)| FieldChange {
      field: field.clone(),
      before: None,
      after: Some(planned.clone()),
      secret: planned.is_secret(),
      forces_replacement: false,
    })
    .collect()
}
