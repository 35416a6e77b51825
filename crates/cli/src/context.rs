//! Paths and collaborators shared by every command.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::debug;

use keel_lib::consts::{PROVIDER_CONFIG_ENV, PROVIDER_CONFIG_FILENAME};
use keel_lib::eval::evaluate_program;
use keel_lib::execute::{CancelFlag, ExecuteConfig};
use keel_lib::paths;
use keel_lib::provider::{LocalProvider, ProviderConfig};
use keel_lib::resource::Program;
use keel_lib::state::StateStore;

use crate::cmd::ExecFlags;
use crate::output::print_warning;

pub struct Context {
  pub state_dir: PathBuf,
  pub json: bool,
  provider_config: Option<PathBuf>,
}

impl Context {
  pub fn new(state_dir: Option<PathBuf>, provider_config: Option<PathBuf>, json: bool) -> Self {
    Self {
      state_dir: paths::state_dir(state_dir.as_deref()),
      json,
      provider_config,
    }
  }

  pub fn store(&self) -> StateStore {
    StateStore::new(&self.state_dir)
  }

  /// Find the provider config: the flag, then `KEEL_PROVIDER_CONFIG`, then
  /// `provider.json` in `program_dir` (or the working directory).
  fn provider_config_path(&self, program_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = &self.provider_config {
      return Some(path.clone());
    }
    if let Some(path) = std::env::var_os(PROVIDER_CONFIG_ENV).filter(|v| !v.is_empty()) {
      return Some(PathBuf::from(path));
    }
    let candidate = program_dir.unwrap_or(Path::new(".")).join(PROVIDER_CONFIG_FILENAME);
    candidate.exists().then_some(candidate)
  }

  /// Build the local provider. A relative `root` in the config is resolved
  /// against the config file's directory.
  pub fn provider(&self, program: Option<&Path>) -> Result<Arc<LocalProvider>> {
    let program_dir = program.and_then(Path::parent).map(|dir| {
      if dir.as_os_str().is_empty() {
        Path::new(".")
      } else {
        dir
      }
    });

    let config = match self.provider_config_path(program_dir) {
      Some(path) => {
        debug!(path = %path.display(), "loading provider config");
        let mut config = ProviderConfig::load(&path)?;
        if let Some(root) = &config.root
          && root.is_relative()
        {
          let base = path.parent().unwrap_or(Path::new("."));
          config.root = Some(base.join(root));
        }
        config
      }
      None => ProviderConfig::default(),
    };

    let default_root = paths::local_provider_root(&self.state_dir);
    Ok(Arc::new(LocalProvider::new(config, &default_root)))
  }

  pub fn load_program(&self, file: &Path, config: Vec<(String, String)>) -> Result<Program> {
    let config: BTreeMap<String, String> = config.into_iter().collect();
    let program =
      evaluate_program(file, &config).with_context(|| format!("Failed to evaluate program: {}", file.display()))?;
    if program.is_empty() {
      print_warning(&format!("{} declares no resources", file.display()));
    }
    Ok(program)
  }
}

impl ExecFlags {
  pub fn to_config(&self) -> ExecuteConfig {
    let defaults = ExecuteConfig::default();
    ExecuteConfig {
      parallelism: self.parallelism.unwrap_or(defaults.parallelism).max(1),
      refresh: self.refresh,
      timeout: self.timeout,
    }
  }
}

/// Cancel the pass on Ctrl-C. Provider calls already running are allowed to
/// finish and their results are recorded.
pub fn cancel_on_interrupt(cancel: &CancelFlag) {
  let cancel = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      print_warning("Interrupted, waiting for in-flight operations to finish");
      cancel.cancel();
    }
  });
}
