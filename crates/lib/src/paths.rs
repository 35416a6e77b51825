//! Default locations for state and provider data.

use std::path::{Path, PathBuf};

use crate::consts::{APP_NAME, LOCAL_PROVIDER_DIRNAME, STATE_DIR_ENV};

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> Option<PathBuf> {
  std::env::var_os("APPDATA").map(|appdata| PathBuf::from(appdata).join(APP_NAME))
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> Option<PathBuf> {
  let data_home = std::env::var_os("XDG_DATA_HOME")
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|home| home.join(".local").join("share")))?;
  Some(data_home.join(APP_NAME))
}

/// The state directory: `explicit` if given, then `KEEL_STATE_DIR`, then
/// `<data dir>/state`, falling back to `.keel/state` under the working
/// directory when no home is known.
pub fn state_dir(explicit: Option<&Path>) -> PathBuf {
  if let Some(dir) = explicit {
    return dir.to_path_buf();
  }
  if let Some(dir) = std::env::var_os(STATE_DIR_ENV).filter(|v| !v.is_empty()) {
    return PathBuf::from(dir);
  }
  data_dir()
    .map(|dir| dir.join("state"))
    .unwrap_or_else(|| PathBuf::from(format!(".{}", APP_NAME)).join("state"))
}

/// Default root of the local provider's documents.
pub fn local_provider_root(state_dir: &Path) -> PathBuf {
  state_dir.join(LOCAL_PROVIDER_DIRNAME)
}
