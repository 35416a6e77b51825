//! The capability the engine uses to manipulate real resources.
//!
//! A [`Provider`] is opaque to the engine: it receives resolved inputs and
//! returns a physical id plus computed outputs. Replacement rules live in the
//! provider's [`ResourceSchema`] so the planner never hard-codes cloud
//! semantics.

pub mod local;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::PropertyMap;

pub use local::{LocalProvider, ProviderConfig, TypeSpec};

/// Machine readable provider failure category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
  /// A resource with the same external name already exists.
  AlreadyExists,
  NotFound,
  InvalidInput,
  Timeout,
  Internal,
  Other(String),
}

impl fmt::Display for ErrorCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ErrorCode::AlreadyExists => f.write_str("AlreadyExists"),
      ErrorCode::NotFound => f.write_str("NotFound"),
      ErrorCode::InvalidInput => f.write_str("InvalidInput"),
      ErrorCode::Timeout => f.write_str("Timeout"),
      ErrorCode::Internal => f.write_str("Internal"),
      ErrorCode::Other(code) => f.write_str(code),
    }
  }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ProviderError {
  pub code: ErrorCode,
  pub message: String,
}

impl ProviderError {
  pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
    }
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(ErrorCode::NotFound, message)
  }

  pub fn already_exists(message: impl Into<String>) -> Self {
    Self::new(ErrorCode::AlreadyExists, message)
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::new(ErrorCode::Internal, message)
  }
}

/// Provider metadata for one resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSchema {
  /// Fields whose change forces replacement.
  pub immutable_fields: BTreeSet<String>,
  /// Array fields compared without regard to order.
  pub set_fields: BTreeSet<String>,
  /// Output fields the provider considers sensitive.
  pub secret_outputs: BTreeSet<String>,
  /// Replace by deleting first, for types that cannot coexist with their replacement.
  pub delete_before_replace: bool,
}

/// What a successful create returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
  pub physical_id: String,
  pub outputs: PropertyMap,
}

/// Create, read, update and delete typed resources.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
  /// Replacement and diff metadata for a type token.
  fn schema(&self, type_token: &str) -> ResourceSchema;

  /// Create a resource. `name` is the logical name, usable for auto-naming.
  async fn create(&self, type_token: &str, name: &str, inputs: &PropertyMap) -> Result<Created, ProviderError>;

  /// Current outputs of an existing resource.
  async fn read(&self, type_token: &str, physical_id: &str) -> Result<PropertyMap, ProviderError>;

  /// Update a resource in place and return its new outputs.
  async fn update(
    &self,
    type_token: &str,
    physical_id: &str,
    inputs: &PropertyMap,
  ) -> Result<PropertyMap, ProviderError>;

  async fn delete(&self, type_token: &str, physical_id: &str) -> Result<(), ProviderError>;
}
