//! Implementation of the `keel apply` command.
//!
//! Evaluates a program, shows the plan, and converges the live resources.
//! State is written after every successful step, so an interrupted or
//! partially failed apply can simply be run again.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context as _, Result, bail};
use serde_json::json;
use tracing::info;

use keel_lib::execute::{ApplyOptions, CancelFlag, apply, preview};

use super::ExecFlags;
use crate::context::{Context, cancel_on_interrupt};
use crate::output::{
  export_text, format_duration, plan_json, print_info, print_json, print_plan, print_report, print_stat, print_success,
  report_json,
};
use crate::prompts::confirm;

pub fn cmd_apply(ctx: &Context, file: &Path, config: Vec<(String, String)>, flags: ExecFlags, yes: bool) -> Result<()> {
  let program = ctx.load_program(file, config)?;
  let provider = ctx.provider(Some(file))?;
  let store = ctx.store();

  // the preview runs under a shared lock; apply re-plans under the exclusive
  // lock and refuses to run if the approved actions no longer match
  let mut confirmed = None;
  if !ctx.json {
    let plan = preview(&program, provider.as_ref(), &store).context("Failed to compute plan")?;
    confirmed = Some(plan.actions());
    if plan.has_changes() {
      print_plan(&plan);
      println!();
      if !confirm("Apply these changes?", yes)? {
        print_info("Apply cancelled.");
        return Ok(());
      }
    }
  } else if !yes {
    bail!("--json apply requires --yes");
  }

  let options = ApplyOptions {
    execute: flags.to_config(),
    confirmed,
  };
  let cancel = CancelFlag::new();
  let started = Instant::now();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt.block_on(async {
    cancel_on_interrupt(&cancel);
    apply(&program, provider.clone(), &store, &options, &cancel).await
  })?;
  info!(elapsed = ?started.elapsed(), "apply command finished");

  if ctx.json {
    let exports: serde_json::Map<String, serde_json::Value> = result
      .exports
      .iter()
      .map(|(name, export)| (name.clone(), json!(export_text(&export.value, export.secret, false))))
      .collect();
    print_json(&json!({
      "plan": plan_json(&result.plan),
      "report": report_json(&result.report),
      "exports": exports,
    }))?;
    result.check()?;
    return Ok(());
  }

  print_report(&result.report);
  result.check()?;

  let summary = result.plan.summary();
  if summary.changes() == 0 {
    print_success("No changes. Resources are up to date.");
  } else {
    print_success("Apply complete!");
  }
  print_stat("Created", &summary.create.to_string());
  print_stat("Updated", &summary.update.to_string());
  print_stat("Replaced", &summary.replace.to_string());
  print_stat("Deleted", &summary.delete.to_string());
  print_stat("Unchanged", &summary.same.to_string());
  print_stat("Duration", &format_duration(started.elapsed()));

  if !result.exports.is_empty() {
    println!();
    println!("Exports:");
    for (name, export) in &result.exports {
      print_stat(name, &export_text(&export.value, export.secret, false));
    }
  }

  Ok(())
}
