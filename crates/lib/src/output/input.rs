//! Input property trees mixing literals and outputs.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Map;

use super::{Output, OutputError, OutputSource, Resolution, Resolved};
use crate::resource::ResourceId;
use crate::value::{PropertyMap, Value};

/// One input property: a literal, a nested structure, or a deferred output.
#[derive(Debug, Clone)]
pub enum Input {
  Value(Value),
  Array(Vec<Input>),
  Object(BTreeMap<String, Input>),
  Output(Output<Value>),
}

/// Top level input fields of a resource.
pub type InputMap = BTreeMap<String, Input>;

impl Input {
  /// Resources referenced anywhere in this tree.
  pub fn dependencies(&self) -> BTreeSet<ResourceId> {
    let mut deps = BTreeSet::new();
    self.collect_dependencies(&mut deps);
    deps
  }

  fn collect_dependencies(&self, deps: &mut BTreeSet<ResourceId>) {
    match self {
      Input::Value(_) => {}
      Input::Array(items) => items.iter().for_each(|item| item.collect_dependencies(deps)),
      Input::Object(fields) => fields.values().for_each(|field| field.collect_dependencies(deps)),
      Input::Output(output) => deps.extend(output.dependencies().iter().cloned()),
    }
  }

  /// Resolve the whole tree into a plain value.
  pub fn resolve(&self, source: &dyn OutputSource) -> Result<Resolution<Value>, OutputError> {
    match self {
      Input::Value(value) => Ok(Resolution::Ready(Resolved {
        value: value.clone(),
        secret: false,
        deps: BTreeSet::new(),
      })),
      Input::Output(output) => output.resolve(source),
      Input::Array(items) => {
        let resolved = resolve_all(items.iter(), source)?;
        Ok(resolved.map(Value::Array))
      }
      Input::Object(fields) => {
        let resolved = resolve_all(fields.values(), source)?;
        Ok(resolved.map(|parts| {
          let map: Map<String, Value> = fields.keys().cloned().zip(parts).collect();
          Value::Object(map)
        }))
      }
    }
  }

  /// View the tree as a single output.
  pub fn into_output(self) -> Output<Value> {
    match self {
      Input::Output(output) => output,
      Input::Value(value) => Output::known(value),
      tree => {
        let deps = tree.dependencies();
        Output::from_fn(deps, move |source| tree.resolve(source))
      }
    }
  }
}

fn resolve_all<'a>(
  items: impl Iterator<Item = &'a Input>,
  source: &dyn OutputSource,
) -> Result<Resolution<Vec<Value>>, OutputError> {
  let mut parts = Vec::new();
  let mut secret = false;
  let mut deps = BTreeSet::new();
  let mut pending = BTreeSet::new();
  for item in items {
    match item.resolve(source)? {
      Resolution::Pending(p) => pending.extend(p),
      Resolution::Ready(resolved) => {
        secret |= resolved.secret;
        deps.extend(resolved.deps);
        parts.push(resolved.value);
      }
    }
  }
  if !pending.is_empty() {
    return Ok(Resolution::Pending(pending));
  }
  Ok(Resolution::Ready(Resolved {
    value: parts,
    secret,
    deps,
  }))
}

impl From<Value> for Input {
  fn from(value: Value) -> Self {
    Input::Value(value)
  }
}

impl From<&str> for Input {
  fn from(value: &str) -> Self {
    Input::Value(Value::String(value.to_string()))
  }
}

impl From<String> for Input {
  fn from(value: String) -> Self {
    Input::Value(Value::String(value))
  }
}

impl From<bool> for Input {
  fn from(value: bool) -> Self {
    Input::Value(Value::Bool(value))
  }
}

impl From<i64> for Input {
  fn from(value: i64) -> Self {
    Input::Value(Value::from(value))
  }
}

impl From<Output<Value>> for Input {
  fn from(output: Output<Value>) -> Self {
    Input::Output(output)
  }
}

impl From<Vec<Input>> for Input {
  fn from(items: Vec<Input>) -> Self {
    Input::Array(items)
  }
}

/// The fully resolved top level inputs of one resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
  pub values: PropertyMap,
  pub secret_fields: BTreeSet<String>,
  pub deps: BTreeSet<ResourceId>,
}

impl ResolvedInputs {
  /// Resolve every field of `inputs`.
  ///
  /// Returns the union of pending resources when any field is still waiting.
  pub fn resolve(inputs: &InputMap, source: &dyn OutputSource) -> Result<Resolution<ResolvedInputs>, OutputError> {
    let mut resolved = ResolvedInputs::default();
    let mut pending = BTreeSet::new();
    for (field, input) in inputs {
      match input.resolve(source)? {
        Resolution::Pending(p) => pending.extend(p),
        Resolution::Ready(r) => {
          if r.secret {
            resolved.secret_fields.insert(field.clone());
          }
          resolved.deps.extend(r.deps);
          resolved.values.insert(field.clone(), r.value);
        }
      }
    }
    if !pending.is_empty() {
      return Ok(Resolution::Pending(pending));
    }
    Ok(Resolution::Ready(Resolved {
      value: resolved,
      secret: false,
      deps: BTreeSet::new(),
    }))
  }
}
