use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::{Declaration, ResourceId, ResourceOptions, ResourceRef};
use crate::output::{InputMap, Output};
use crate::value::Value;

/// A named value published by a program after a pass.
#[derive(Debug, Clone)]
pub struct Export {
  pub name: String,
  pub value: Output<Value>,
}

/// The declarations and exports produced by evaluating a program.
///
/// Building a program never talks to a provider; it only records what the
/// user asked for, in declaration order.
#[derive(Default)]
pub struct Program {
  declarations: Vec<Declaration>,
  exports: Vec<Export>,
  _runtime: Option<Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Program {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Program")
      .field("declarations", &self.declarations)
      .field("exports", &self.exports)
      .finish_non_exhaustive()
  }
}

impl Program {
  pub fn new() -> Self {
    Self::default()
  }

  /// Declare a resource with default options.
  pub fn resource(&mut self, type_token: &str, name: &str, inputs: InputMap) -> ResourceRef {
    self.resource_with(type_token, name, inputs, ResourceOptions::default())
  }

  pub fn resource_with(
    &mut self,
    type_token: &str,
    name: &str,
    inputs: InputMap,
    options: ResourceOptions,
  ) -> ResourceRef {
    let id = ResourceId::new(name);
    self.declarations.push(Declaration {
      id: id.clone(),
      type_token: type_token.to_string(),
      inputs,
      options,
    });
    ResourceRef::new(id)
  }

  /// Reference a resource by name, whether or not it has been declared yet.
  pub fn reference(&self, name: &str) -> ResourceRef {
    ResourceRef::new(ResourceId::new(name))
  }

  pub fn export(&mut self, name: &str, value: Output<Value>) {
    self.exports.retain(|export| export.name != name);
    self.exports.push(Export {
      name: name.to_string(),
      value,
    });
  }

  pub fn declarations(&self) -> &[Declaration] {
    &self.declarations
  }

  pub fn exports(&self) -> &[Export] {
    &self.exports
  }

  pub fn is_empty(&self) -> bool {
    self.declarations.is_empty()
  }

  /// Keep an evaluation runtime alive for as long as the program's outputs
  /// may call back into it.
  pub fn retain_runtime(&mut self, runtime: Arc<dyn Any + Send + Sync>) {
    self._runtime = Some(runtime);
  }
}
