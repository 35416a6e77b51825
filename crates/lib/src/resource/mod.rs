//! Resource declarations and the program that collects them.

mod program;

pub use program::{Export, Program};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::output::{InputMap, Output};
use crate::value::Value;

/// Logical name of a resource, unique within a program.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ResourceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ResourceId {
  fn from(name: &str) -> Self {
    Self::new(name)
  }
}

/// Per-resource options that are not provider inputs.
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
  /// Extra ordering edges without data flow.
  pub depends_on: Vec<ResourceId>,
  /// Force delete-then-create when this resource must be replaced.
  pub delete_before_replace: bool,
}

/// A single resource as written in a program.
#[derive(Debug, Clone)]
pub struct Declaration {
  pub id: ResourceId,
  pub type_token: String,
  pub inputs: InputMap,
  pub options: ResourceOptions,
}

/// Handle to a declared (or forward-referenced) resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
  id: ResourceId,
}

impl ResourceRef {
  pub fn new(id: ResourceId) -> Self {
    Self { id }
  }

  pub fn id(&self) -> &ResourceId {
    &self.id
  }

  /// A deferred output property of this resource.
  pub fn output(&self, field: &str) -> Output<Value> {
    Output::from_resource(self.id.clone(), field)
  }

  /// The provider-assigned physical id.
  pub fn physical_id(&self) -> Output<Value> {
    self.output("id")
  }
}
