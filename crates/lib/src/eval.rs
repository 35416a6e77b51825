//! Program evaluation.
//!
//! This module provides [`evaluate_program`], which runs a Lua program and
//! returns the [`Program`] it declared. Evaluation has no side effects beyond
//! reading the file: outputs stay deferred until the executor resolves them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use mlua::prelude::*;
use tracing::info;

use crate::lua::globals::ProgramCell;
use crate::lua::runtime;
use crate::resource::Program;

/// Errors that can occur during program evaluation.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
  /// Lua evaluation error.
  #[error("lua error: {0}")]
  Lua(#[from] LuaError),

  /// Program file not found.
  #[error("program file not found: {0}")]
  NotFound(PathBuf),

  /// The collector was left in an unusable state.
  #[error("program collection failed")]
  Collector,
}

/// Evaluate a Lua program and return its declarations.
///
/// # Arguments
/// * `path` - Path to the Lua program
/// * `config` - Values exposed to the program as `keel.config`
///
/// The returned program keeps the Lua runtime alive, since `out:apply`
/// callbacks run during planning and execution.
///
/// # Example
/// ```ignore
/// use std::collections::BTreeMap;
/// use std::path::Path;
/// use keel_lib::eval::evaluate_program;
///
/// let program = evaluate_program(Path::new("main.lua"), &BTreeMap::new())?;
/// println!("Resources: {}", program.declarations().len());
/// ```
pub fn evaluate_program(path: &Path, config: &BTreeMap<String, String>) -> Result<Program, EvalError> {
  if !path.exists() {
    return Err(EvalError::NotFound(path.to_path_buf()));
  }

  let cell: ProgramCell = Arc::new(Mutex::new(Some(Program::new())));
  let lua = runtime::create_runtime(cell.clone(), config.clone())?;
  runtime::load_file(&lua, path)?;

  let mut program = cell
    .lock()
    .map_err(|_| EvalError::Collector)?
    .take()
    .ok_or(EvalError::Collector)?;
  program.retain_runtime(Arc::new(lua));

  info!(
    path = %path.display(),
    resources = program.declarations().len(),
    exports = program.exports().len(),
    "evaluated program"
  );

  Ok(program)
}
