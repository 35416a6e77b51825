//! Implementation of the `keel export` command.

use anyhow::{Result, bail};
use serde_json::json;

use keel_lib::state::LockMode;

use crate::context::Context;
use crate::output::{export_text, print_info, print_json};

pub fn cmd_export(ctx: &Context, name: Option<&str>, show_secrets: bool) -> Result<()> {
  let store = ctx.store();
  let _lock = store.lock(LockMode::Shared, "export")?;
  let state = store.load()?;

  match name {
    Some(name) => {
      let Some(export) = state.exports.get(name) else {
        bail!("No export named '{}'", name);
      };
      let text = export_text(&export.value, export.secret, show_secrets);
      if ctx.json {
        print_json(&json!({ "name": name, "value": text, "secret": export.secret }))?;
      } else {
        println!("{}", text);
      }
    }
    None if ctx.json => {
      let exports: serde_json::Map<String, serde_json::Value> = state
        .exports
        .iter()
        .map(|(name, export)| (name.clone(), json!(export_text(&export.value, export.secret, show_secrets))))
        .collect();
      print_json(&exports)?;
    }
    None if state.exports.is_empty() => print_info("No exports recorded. Run 'keel apply' first."),
    None => {
      for (name, export) in &state.exports {
        println!("{} = {}", name, export_text(&export.value, export.secret, show_secrets));
      }
    }
  }

  Ok(())
}
