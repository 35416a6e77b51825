//! Deferred values produced by providers.
//!
//! An [`Output`] stands for a value that may not exist until some resource has
//! been created. Outputs carry the set of resources they were derived from, so
//! declaring `task.output("arn")` inside another resource's inputs is enough to
//! record the dependency. Transformations with [`Output::apply`] and
//! [`Output::apply_flat`] compose lazily; nothing is evaluated until the
//! executor asks for a value through an [`OutputSource`].

mod input;

pub use input::{Input, InputMap, ResolvedInputs};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::resource::ResourceId;
use crate::value::{PropertyMap, Value};

/// Errors raised while resolving an output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutputError {
  /// The referenced resource finished but has no such output field.
  #[error("resource '{resource}' has no output named '{field}'")]
  MissingField { resource: ResourceId, field: String },

  /// A user supplied transformation failed.
  #[error("output transformation failed: {0}")]
  Transform(String),

  /// A value could not be converted to the requested shape.
  #[error("cannot convert output value: {0}")]
  Conversion(String),
}

/// A resource whose outputs are available for resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource {
  pub physical_id: String,
  pub outputs: PropertyMap,
  pub secret_outputs: BTreeSet<String>,
}

impl ResolvedResource {
  /// Look up an output field. The field `id` falls back to the physical id.
  pub fn field(&self, name: &str) -> Option<Value> {
    match self.outputs.get(name) {
      Some(value) => Some(value.clone()),
      None if name == "id" => Some(Value::String(self.physical_id.clone())),
      None => None,
    }
  }
}

/// Read access to resources that have already been resolved in this pass.
pub trait OutputSource {
  fn resource(&self, id: &ResourceId) -> Option<&ResolvedResource>;
}

impl OutputSource for std::collections::BTreeMap<ResourceId, ResolvedResource> {
  fn resource(&self, id: &ResourceId) -> Option<&ResolvedResource> {
    self.get(id)
  }
}

impl OutputSource for std::collections::HashMap<ResourceId, ResolvedResource> {
  fn resource(&self, id: &ResourceId) -> Option<&ResolvedResource> {
    self.get(id)
  }
}

/// A resolved output value.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
  pub value: T,
  pub secret: bool,
  /// Every resource that contributed to the value, including ones reached
  /// through nested outputs.
  pub deps: BTreeSet<ResourceId>,
}

/// State of an output with respect to a particular source.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
  /// Waiting on the listed resources.
  Pending(BTreeSet<ResourceId>),
  Ready(Resolved<T>),
}

impl<T> Resolution<T> {
  pub fn is_ready(&self) -> bool {
    matches!(self, Resolution::Ready(_))
  }

  pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Resolution<U> {
    match self {
      Resolution::Pending(pending) => Resolution::Pending(pending),
      Resolution::Ready(resolved) => Resolution::Ready(Resolved {
        value: f(resolved.value),
        secret: resolved.secret,
        deps: resolved.deps,
      }),
    }
  }

  pub fn ready(self) -> Option<Resolved<T>> {
    match self {
      Resolution::Ready(resolved) => Some(resolved),
      Resolution::Pending(_) => None,
    }
  }
}

type EvalFn<T> = dyn Fn(&dyn OutputSource) -> Result<Resolution<T>, OutputError> + Send + Sync;

/// A deferred value of type `T`.
///
/// Cloning is cheap; clones share the same evaluation chain.
pub struct Output<T> {
  deps: Arc<BTreeSet<ResourceId>>,
  eval: Arc<EvalFn<T>>,
}

impl<T> Clone for Output<T> {
  fn clone(&self) -> Self {
    Self {
      deps: self.deps.clone(),
      eval: self.eval.clone(),
    }
  }
}

impl<T> fmt::Debug for Output<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Output").field("deps", &self.deps).finish_non_exhaustive()
  }
}

impl<T> Output<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn from_fn<F>(deps: BTreeSet<ResourceId>, eval: F) -> Self
  where
    F: Fn(&dyn OutputSource) -> Result<Resolution<T>, OutputError> + Send + Sync + 'static,
  {
    Self {
      deps: Arc::new(deps),
      eval: Arc::new(eval),
    }
  }

  fn constant(value: T, secret: bool) -> Self {
    Self::from_fn(BTreeSet::new(), move |_| {
      Ok(Resolution::Ready(Resolved {
        value: value.clone(),
        secret,
        deps: BTreeSet::new(),
      }))
    })
  }

  /// An output that is already known.
  pub fn known(value: T) -> Self {
    Self::constant(value, false)
  }

  /// A known value marked secret.
  pub fn secret(value: T) -> Self {
    Self::constant(value, true)
  }

  /// Resources this output is known to depend on before evaluation.
  ///
  /// Outputs created inside an [`apply_flat`](Self::apply_flat) callback are
  /// only discovered during resolution and show up in [`Resolved::deps`].
  pub fn dependencies(&self) -> &BTreeSet<ResourceId> {
    &self.deps
  }

  pub fn resolve(&self, source: &dyn OutputSource) -> Result<Resolution<T>, OutputError> {
    (self.eval)(source)
  }

  /// Transform the value once it is available.
  pub fn apply<U, F>(&self, f: F) -> Output<U>
  where
    U: Clone + Send + Sync + 'static,
    F: Fn(T) -> Result<U, OutputError> + Send + Sync + 'static,
  {
    let source_output = self.clone();
    Output::from_fn((*self.deps).clone(), move |source| {
      Ok(match source_output.resolve(source)? {
        Resolution::Pending(pending) => Resolution::Pending(pending),
        Resolution::Ready(resolved) => Resolution::Ready(Resolved {
          value: f(resolved.value)?,
          secret: resolved.secret,
          deps: resolved.deps,
        }),
      })
    })
  }

  /// Transform the value with a function that returns another output.
  ///
  /// The result is flattened: its dependency set is the union of this output's
  /// and the returned output's, and it is secret if either is.
  pub fn apply_flat<U, F>(&self, f: F) -> Output<U>
  where
    U: Clone + Send + Sync + 'static,
    F: Fn(T) -> Result<Output<U>, OutputError> + Send + Sync + 'static,
  {
    let source_output = self.clone();
    Output::from_fn((*self.deps).clone(), move |source| {
      let outer = match source_output.resolve(source)? {
        Resolution::Pending(pending) => return Ok(Resolution::Pending(pending)),
        Resolution::Ready(resolved) => resolved,
      };
      let inner_output = f(outer.value)?;
      Ok(match inner_output.resolve(source)? {
        Resolution::Pending(pending) => Resolution::Pending(pending),
        Resolution::Ready(inner) => {
          let mut deps = outer.deps;
          deps.extend(inner.deps);
          Resolution::Ready(Resolved {
            value: inner.value,
            secret: outer.secret || inner.secret,
            deps,
          })
        }
      })
    })
  }

  /// Mark the output secret regardless of its inputs.
  pub fn make_secret(&self) -> Output<T> {
    let source_output = self.clone();
    Output::from_fn((*self.deps).clone(), move |source| {
      Ok(match source_output.resolve(source)? {
        Resolution::Ready(resolved) => Resolution::Ready(Resolved {
          secret: true,
          ..resolved
        }),
        pending => pending,
      })
    })
  }

  /// Combine several outputs into one that resolves when all of them have.
  pub fn all(outputs: Vec<Output<T>>) -> Output<Vec<T>> {
    let deps = outputs.iter().flat_map(|o| o.deps.iter().cloned()).collect();
    Output::from_fn(deps, move |source| {
      let mut pending = BTreeSet::new();
      let mut values = Vec::with_capacity(outputs.len());
      let mut secret = false;
      let mut deps = BTreeSet::new();
      for output in &outputs {
        match output.resolve(source)? {
          Resolution::Pending(p) => pending.extend(p),
          Resolution::Ready(resolved) => {
            secret |= resolved.secret;
            deps.extend(resolved.deps);
            values.push(resolved.value);
          }
        }
      }
      if !pending.is_empty() {
        return Ok(Resolution::Pending(pending));
      }
      Ok(Resolution::Ready(Resolved {
        value: values,
        secret,
        deps,
      }))
    })
  }

  /// Pair two outputs of different types.
  pub fn tuple<U>(&self, other: &Output<U>) -> Output<(T, U)>
  where
    U: Clone + Send + Sync + 'static,
  {
    let deps = self.deps.union(&other.deps).cloned().collect();
    let left = self.clone();
    let right = other.clone();
    Output::from_fn(deps, move |source| {
      let (l, r) = (left.resolve(source)?, right.resolve(source)?);
      Ok(match (l, r) {
        (Resolution::Ready(l), Resolution::Ready(r)) => {
          let mut deps = l.deps;
          deps.extend(r.deps);
          Resolution::Ready(Resolved {
            value: (l.value, r.value),
            secret: l.secret || r.secret,
            deps,
          })
        }
        (Resolution::Pending(mut a), Resolution::Pending(b)) => {
          a.extend(b);
          Resolution::Pending(a)
        }
        (Resolution::Pending(p), _) | (_, Resolution::Pending(p)) => Resolution::Pending(p),
      })
    })
  }
}

impl Output<Value> {
  /// An output field of a declared resource.
  pub fn from_resource(id: ResourceId, field: impl Into<String>) -> Self {
    let field = field.into();
    let deps = BTreeSet::from([id.clone()]);
    Self::from_fn(deps, move |source| {
      let Some(resource) = source.resource(&id) else {
        return Ok(Resolution::Pending(BTreeSet::from([id.clone()])));
      };
      let value = resource.field(&field).ok_or_else(|| OutputError::MissingField {
        resource: id.clone(),
        field: field.clone(),
      })?;
      Ok(Resolution::Ready(Resolved {
        value,
        secret: resource.secret_outputs.contains(&field),
        deps: BTreeSet::from([id.clone()]),
      }))
    })
  }

  /// Render the value as a string. Strings are used as-is, anything else is
  /// serialized as JSON.
  pub fn to_text(&self) -> Output<String> {
    self.apply(|value| Ok(value_to_text(&value)))
  }
}

/// Text form of a value used for concatenation.
pub fn value_to_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}
