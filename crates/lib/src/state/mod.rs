//! Durable record of what the engine last applied.
//!
//! # Storage Layout
//!
//! ```text
//! {state_dir}/
//! ├── state.json   # StateFile: records keyed by logical name
//! └── .lock        # advisory lock held for the duration of a pass
//! ```

pub mod lock;
mod store;

pub use lock::{LockMode, StateLock, StateLockError};
pub use store::StateStore;

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::STATE_VERSION;
use crate::output::ResolvedResource;
use crate::resource::ResourceId;
use crate::value::{PropertyMap, Value};

/// Last known state of one live resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
  pub type_token: String,
  pub physical_id: String,
  pub inputs: PropertyMap,
  pub outputs: PropertyMap,
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub secret_inputs: BTreeSet<String>,
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub secret_outputs: BTreeSet<String>,
  /// Resources this one depended on when it was applied. Drives delete order.
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub dependencies: BTreeSet<ResourceId>,
  pub updated_at: u64,
}

impl StateRecord {
  pub fn resolved(&self) -> ResolvedResource {
    ResolvedResource {
      physical_id: self.physical_id.clone(),
      outputs: self.outputs.clone(),
      secret_outputs: self.secret_outputs.clone(),
    }
  }
}

/// A physical resource left behind by a replacement, still to be deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelete {
  pub name: ResourceId,
  pub record: StateRecord,
}

/// An exported program value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportValue {
  pub value: Value,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub secret: bool,
}

/// Whole contents of the state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
  pub version: u32,
  #[serde(default)]
  pub records: BTreeMap<ResourceId, StateRecord>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub pending_deletes: Vec<PendingDelete>,
  #[serde(default)]
  pub exports: BTreeMap<String, ExportValue>,
}

impl Default for StateFile {
  fn default() -> Self {
    Self {
      version: STATE_VERSION,
      records: BTreeMap::new(),
      pending_deletes: Vec::new(),
      exports: BTreeMap::new(),
    }
  }
}

impl StateFile {
  pub fn is_empty(&self) -> bool {
    self.records.is_empty() && self.pending_deletes.is_empty()
  }

  /// Remove a pending delete by physical id.
  pub fn remove_pending_delete(&mut self, physical_id: &str) -> Option<PendingDelete> {
    let position = self
      .pending_deletes
      .iter()
      .position(|pending| pending.record.physical_id == physical_id)?;
    Some(self.pending_deletes.remove(position))
  }
}

#[derive(Debug, Error)]
pub enum StateError {
  #[error("state file {path} is corrupt: {reason}")]
  Corrupt { path: PathBuf, reason: String },

  #[error("failed to read state file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write state file {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error(transparent)]
  Locked(#[from] StateLockError),
}

/// Seconds since the Unix epoch.
pub fn now_unix() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}
