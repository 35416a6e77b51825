use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::lock::{LockMode, StateLock};
use super::{StateError, StateFile};
use crate::consts::{STATE_FILENAME, STATE_VERSION};

/// Reads and writes the state file of one state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
  dir: PathBuf,
}

impl StateStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn path(&self) -> PathBuf {
    self.dir.join(STATE_FILENAME)
  }

  /// Take the pass lock for this state directory.
  pub fn lock(&self, mode: LockMode, command: &str) -> Result<StateLock, StateError> {
    Ok(StateLock::acquire(&self.dir, mode, command)?)
  }

  /// Load the state file.
  ///
  /// A missing file is an empty state. Anything unparseable, or written by a
  /// newer version, is reported as corrupt.
  pub fn load(&self) -> Result<StateFile, StateError> {
    let path = self.path();
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no state file, starting empty");
        return Ok(StateFile::default());
      }
      Err(source) => return Err(StateError::Read { path, source }),
    };

    let state: StateFile = serde_json::from_str(&content).map_err(|e| StateError::Corrupt {
      path: path.clone(),
      reason: e.to_string(),
    })?;

    if state.version > STATE_VERSION {
      return Err(StateError::Corrupt {
        path,
        reason: format!(
          "written by state version {} but this build understands up to {}",
          state.version, STATE_VERSION
        ),
      });
    }

    debug!(records = state.records.len(), "loaded state");
    Ok(state)
  }

  /// Replace the state file atomically.
  ///
  /// The new content is written to a temporary file in the same directory,
  /// flushed to disk, then renamed over the old file.
  pub fn save(&self, state: &StateFile) -> Result<(), StateError> {
    let path = self.path();
    fs::create_dir_all(&self.dir).map_err(|source| StateError::Write {
      path: self.dir.clone(),
      source,
    })?;

    let content = serde_json::to_vec_pretty(state).map_err(StateError::Serialize)?;
    let write_err = |source: io::Error| StateError::Write {
      path: path.clone(),
      source,
    };

    let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(write_err)?;
    tmp.write_all(&content).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;

    info!(path = %path.display(), records = state.records.len(), "state saved");
    Ok(())
  }
}
