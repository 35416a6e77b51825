//! Advisory lock guarding a state directory against concurrent passes.
//!
//! `plan` holds the lock shared, `apply` and `destroy` hold it exclusively.
//! An exclusive holder writes who it is into the lock file so a blocked pass
//! can say what it is waiting on.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::LOCK_FILENAME;

use super::now_unix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  /// Read-only passes such as `plan`.
  Shared,
  /// Passes that call providers or write state.
  Exclusive,
}

/// The pass holding an exclusive lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub command: String,
  pub pid: u32,
  pub started_at_unix: u64,
}

impl fmt::Display for LockHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let age = now_unix().saturating_sub(self.started_at_unix);
    write!(f, "`keel {}` (pid {}, running for {}s)", self.command, self.pid, age)
  }
}

fn describe(holder: &Option<LockHolder>) -> String {
  match holder {
    Some(holder) => holder.to_string(),
    None => "another keel pass".to_string(),
  }
}

#[derive(Debug, Error)]
pub enum StateLockError {
  #[error(
    "state in {} is in use by {}; remove {} if that process is gone",
    .dir.display(),
    describe(.holder),
    .dir.join(LOCK_FILENAME).display()
  )]
  Busy { dir: PathBuf, holder: Option<LockHolder> },

  #[error("cannot lock state in {}: {source}", .dir.display())]
  Io {
    dir: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Held for the lifetime of a pass; released on drop.
#[derive(Debug)]
pub struct StateLock {
  file: File,
  mode: LockMode,
}

impl StateLock {
  pub fn acquire(state_dir: &Path, mode: LockMode, command: &str) -> Result<Self, StateLockError> {
    let io_err = |source| StateLockError::Io {
      dir: state_dir.to_path_buf(),
      source,
    };
    let lock_path = state_dir.join(LOCK_FILENAME);

    std::fs::create_dir_all(state_dir).map_err(io_err)?;
    let mut file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(io_err)?;

    match try_lock(&file, mode) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        return Err(StateLockError::Busy {
          dir: state_dir.to_path_buf(),
          holder: read_holder(&lock_path),
        });
      }
      Err(e) => return Err(io_err(e)),
    }

    if mode == LockMode::Exclusive {
      let holder = LockHolder {
        command: command.to_string(),
        pid: std::process::id(),
        started_at_unix: now_unix(),
      };
      let line = serde_json::to_string(&holder).map_err(|e| io_err(io::Error::other(e)))?;
      file.set_len(0).map_err(io_err)?;
      file.write_all(line.as_bytes()).map_err(io_err)?;
    }

    Ok(StateLock { file, mode })
  }
}

impl Drop for StateLock {
  fn drop(&mut self) {
    // clear the holder so later contention is not blamed on a finished pass
    if self.mode == LockMode::Exclusive {
      let _ = self.file.set_len(0);
    }
  }
}

/// Best effort: the holder may be mid-write or may be a shared lock.
fn read_holder(lock_path: &Path) -> Option<LockHolder> {
  let contents = std::fs::read_to_string(lock_path).ok()?;
  serde_json::from_str(contents.trim()).ok()
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: a zeroed OVERLAPPED is valid and the handle belongs to a live File.
  let locked = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if locked == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
