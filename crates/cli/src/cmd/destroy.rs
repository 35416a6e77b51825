//! Implementation of the `keel destroy` command.
//!
//! Deletes every recorded resource in reverse dependency order. Resources
//! still referenced by a failed deletion are left in place.

use anyhow::{Context as _, Result, bail};
use serde_json::json;

use keel_lib::execute::{CancelFlag, DestroyOptions, destroy};

use super::ExecFlags;
use crate::context::{Context, cancel_on_interrupt};
use crate::output::{plan_json, print_info, print_json, print_plan, print_report, print_stat, print_success, report_json};
use crate::prompts::confirm;

pub fn cmd_destroy(ctx: &Context, flags: ExecFlags, dry_run: bool, yes: bool) -> Result<()> {
  let provider = ctx.provider(None)?;
  let store = ctx.store();
  let cancel = CancelFlag::new();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  let preview_options = DestroyOptions {
    execute: flags.to_config(),
    dry_run: true,
  };
  let preview = rt
    .block_on(destroy(provider.clone(), &store, &preview_options, &cancel))
    .context("Failed to compute destroy plan")?;

  if preview.plan.is_empty() {
    if ctx.json {
      return print_json(&json!({ "plan": plan_json(&preview.plan) }));
    }
    print_info("Nothing to destroy.");
    return Ok(());
  }

  if dry_run {
    if ctx.json {
      return print_json(&json!({ "plan": plan_json(&preview.plan) }));
    }
    print_plan(&preview.plan);
    return Ok(());
  }

  if ctx.json {
    if !yes {
      bail!("--json destroy requires --yes");
    }
  } else {
    print_plan(&preview.plan);
    println!();
    if !confirm("Destroy all of these resources?", yes)? {
      print_info("Destroy cancelled.");
      return Ok(());
    }
  }

  let options = DestroyOptions {
    execute: flags.to_config(),
    dry_run: false,
  };
  let result = rt.block_on(async {
    cancel_on_interrupt(&cancel);
    destroy(provider.clone(), &store, &options, &cancel).await
  })?;

  if ctx.json {
    let report = result.report.as_ref().map(report_json);
    print_json(&json!({ "plan": plan_json(&result.plan), "report": report }))?;
    result.check()?;
    return Ok(());
  }

  if let Some(report) = &result.report {
    print_report(report);
  }
  result.check()?;

  print_success("Destroy complete!");
  print_stat("Deleted", &result.plan.len().to_string());
  Ok(())
}
