//! Implementation of the `keel plan` command.
//!
//! Evaluates a program and prints the steps an apply would take, without
//! calling the provider's mutating operations.

use std::path::Path;

use anyhow::{Context as _, Result};

use keel_lib::execute::preview;

use crate::context::Context;
use crate::output::{plan_json, print_info, print_json, print_plan};

pub fn cmd_plan(ctx: &Context, file: &Path, config: Vec<(String, String)>) -> Result<()> {
  let program = ctx.load_program(file, config)?;
  let provider = ctx.provider(Some(file))?;
  let store = ctx.store();

  let plan = preview(&program, provider.as_ref(), &store).context("Failed to compute plan")?;

  if ctx.json {
    return print_json(&plan_json(&plan));
  }

  if !plan.has_changes() {
    print_info(&format!("No changes. {} resource(s) up to date.", plan.summary().same));
    return Ok(());
  }

  print_plan(&plan);
  Ok(())
}
