//! Status command implementation.
//!
//! Displays the recorded resources, pending deletions and exports.

use anyhow::Result;
use serde_json::json;

use keel_lib::state::LockMode;
use keel_lib::value::mask_secrets;

use crate::context::Context;
use crate::output::{print_info, print_json, print_stat, print_success, print_warning, symbols};

pub fn cmd_status(ctx: &Context) -> Result<()> {
  let store = ctx.store();
  let _lock = store.lock(LockMode::Shared, "status")?;
  let state = store.load()?;

  if ctx.json {
    let resources: Vec<_> = state
      .records
      .iter()
      .map(|(name, record)| {
        json!({
          "name": name,
          "type": record.type_token,
          "physical_id": record.physical_id,
          "outputs": mask_secrets(&record.outputs, &record.secret_outputs),
          "dependencies": record.dependencies,
          "updated_at": record.updated_at,
        })
      })
      .collect();
    let pending: Vec<_> = state
      .pending_deletes
      .iter()
      .map(|p| json!({ "name": p.name, "physical_id": p.record.physical_id }))
      .collect();
    return print_json(&json!({
      "state_dir": store.dir(),
      "resources": resources,
      "pending_deletes": pending,
      "exports": state.exports.keys().collect::<Vec<_>>(),
    }));
  }

  if state.is_empty() {
    print_info("No resources recorded. Run 'keel apply' to create some.");
    return Ok(());
  }

  print_success(&format!("{} resource(s) recorded", state.records.len()));
  print_stat("State", &store.path().display().to_string());
  println!();
  for (name, record) in &state.records {
    println!("  {} {} ({}) {}", symbols::INFO, name, record.type_token, record.physical_id);
  }

  if !state.pending_deletes.is_empty() {
    println!();
    print_warning(&format!(
      "{} replaced resource(s) waiting for deletion",
      state.pending_deletes.len()
    ));
    for pending in &state.pending_deletes {
      println!("  {} {} {}", symbols::INFO, pending.name, pending.record.physical_id);
    }
  }

  if !state.exports.is_empty() {
    println!();
    print_stat("Exports", &state.exports.keys().cloned().collect::<Vec<_>>().join(", "));
  }

  Ok(())
}
