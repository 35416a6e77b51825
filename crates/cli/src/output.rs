//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, plan diffs, pass reports and JSON rendering.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};
use serde_json::json;

use keel_lib::consts::SECRET_MASK;
use keel_lib::execute::{ExecutionReport, StepOutcome};
use keel_lib::plan::{FieldChange, Plan, PlanStep, PlannedValue, StepKind, format_change};
use keel_lib::value::{Value, display_value};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const SKIPPED: &str = "↷";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

fn colored_symbol(kind: StepKind) -> String {
  let symbol = kind.symbol();
  match kind {
    StepKind::Create => symbol.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    StepKind::Update => symbol.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    StepKind::Replace => symbol.if_supports_color(Stream::Stdout, |s| s.magenta()).to_string(),
    StepKind::Delete => symbol.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    StepKind::NoOp => symbol.to_string(),
  }
}

/// Print every changing step with its field diff, then the summary line.
pub fn print_plan(plan: &Plan) {
  for step in plan.steps().iter().filter(|s| s.kind.is_change()) {
    println!(
      "{:>3} {} {}",
      colored_symbol(step.kind),
      step.id,
      format!("({})", step.type_token).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
    if step.kind == StepKind::Delete {
      continue;
    }
    for change in &step.changes {
      println!("      {}", format_change(change));
    }
  }
  println!();
  println!("Plan: {}.", plan.summary());
}

fn masked(value: &Value, secret: bool) -> Value {
  if secret {
    Value::String(SECRET_MASK.to_string())
  } else {
    value.clone()
  }
}

fn change_json(change: &FieldChange) -> Value {
  let after = match &change.after {
    Some(PlannedValue::Known { value, .. }) => json!({ "known": masked(value, change.secret) }),
    Some(PlannedValue::Unknown) => json!("unknown"),
    None => Value::Null,
  };
  json!({
    "field": change.field,
    "before": change.before.as_ref().map(|v| masked(v, change.secret)),
    "after": after,
    "secret": change.secret,
    "forces_replacement": change.forces_replacement,
  })
}

fn step_json(step: &PlanStep) -> Value {
  let depends_on: Vec<String> = step.depends_on.iter().map(ToString::to_string).collect();
  json!({
    "id": step.id.to_string(),
    "kind": step.kind,
    "type": step.type_token,
    "changes": step.changes.iter().map(change_json).collect::<Vec<_>>(),
    "depends_on": depends_on,
  })
}

/// JSON rendering of a plan with secrets masked.
pub fn plan_json(plan: &Plan) -> Value {
  json!({
    "steps": plan.steps().iter().map(step_json).collect::<Vec<_>>(),
    "summary": plan.summary(),
  })
}

fn outcome_json(outcome: &StepOutcome) -> Value {
  match outcome {
    StepOutcome::Succeeded { kind } => json!({ "status": "succeeded", "kind": kind }),
    StepOutcome::Failed { kind, error } => json!({ "status": "failed", "kind": kind, "error": error.to_string() }),
    StepOutcome::Skipped { failed_dependency } => {
      json!({ "status": "skipped", "failed_dependency": failed_dependency.to_string() })
    }
    StepOutcome::NotStarted => json!({ "status": "not_started" }),
  }
}

pub fn report_json(report: &ExecutionReport) -> Value {
  let outcomes: serde_json::Map<String, Value> = report
    .outcomes
    .iter()
    .map(|(id, outcome)| (id.to_string(), outcome_json(outcome)))
    .collect();
  json!({
    "success": report.is_success(),
    "cancelled": report.cancelled,
    "outcomes": outcomes,
    "retained": report.retained.iter().map(ToString::to_string).collect::<Vec<_>>(),
  })
}

/// Print one line per step that changed something or went wrong.
pub fn print_report(report: &ExecutionReport) {
  for (id, outcome) in &report.outcomes {
    match outcome {
      StepOutcome::Succeeded { kind } if kind.is_change() => {
        println!(
          "{:>3} {} {}",
          colored_symbol(*kind),
          id,
          symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green())
        );
      }
      StepOutcome::Succeeded { .. } => {}
      StepOutcome::Failed { kind, error } => {
        println!(
          "{:>3} {} {} {}",
          colored_symbol(*kind),
          id,
          symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()),
          error
        );
      }
      StepOutcome::Skipped { failed_dependency } => {
        println!(
          "    {} {} {}",
          id,
          symbols::SKIPPED.if_supports_color(Stream::Stdout, |s| s.yellow()),
          format!("skipped, {} failed", failed_dependency).if_supports_color(Stream::Stdout, |s| s.dimmed())
        );
      }
      StepOutcome::NotStarted => {
        println!(
          "    {} {}",
          id,
          "not started".if_supports_color(Stream::Stdout, |s| s.dimmed())
        );
      }
    }
  }
  for id in &report.retained {
    print_warning(&format!("{} kept for a later pass", id));
  }
}

/// Text form of an exported value.
pub fn export_text(value: &Value, secret: bool, show_secrets: bool) -> String {
  match value {
    Value::String(s) if !secret || show_secrets => s.clone(),
    _ if show_secrets => value.to_string(),
    _ => display_value(value, secret),
  }
}
