mod cmd;
mod context;
mod output;
mod prompts;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::context::Context;
use crate::output::print_error;

/// keel - Declarative resource reconciliation
#[derive(Parser)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log output (-v info, -vv debug)
  #[arg(short, long, global = true, action = ArgAction::Count)]
  verbose: u8,

  /// Print machine readable JSON
  #[arg(long, global = true)]
  json: bool,

  /// State directory (default: $KEEL_STATE_DIR or $XDG_DATA_HOME/keel/state)
  #[arg(long, global = true, value_name = "DIR")]
  state_dir: Option<PathBuf>,

  /// Provider config file (default: $KEEL_PROVIDER_CONFIG or provider.json next to the program)
  #[arg(long, global = true, value_name = "FILE")]
  provider_config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Args)]
struct ProgramArgs {
  /// Path to the program
  #[arg(default_value = "main.lua")]
  file: PathBuf,

  /// Program config value exposed as keel.config (repeatable)
  #[arg(short = 'c', long = "config", value_name = "KEY=VALUE", value_parser = parse_key_value)]
  config: Vec<(String, String)>,
}

#[derive(Args)]
struct ExecArgs {
  /// Maximum number of provider calls in flight
  #[arg(long, short = 'p')]
  parallelism: Option<usize>,

  /// Limit for each provider call (e.g. "30s", "2m")
  #[arg(long, value_parser = humantime::parse_duration)]
  timeout: Option<Duration>,
}

#[derive(Subcommand)]
enum Commands {
  /// Show what an apply would change
  Plan {
    #[command(flatten)]
    program: ProgramArgs,
  },

  /// Converge live resources with the program
  Apply {
    #[command(flatten)]
    program: ProgramArgs,

    #[command(flatten)]
    exec: ExecArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,

    /// Reuse recorded outputs for unchanged resources instead of reading them
    #[arg(long)]
    no_refresh: bool,
  },

  /// Delete every resource recorded in state
  Destroy {
    #[command(flatten)]
    exec: ExecArgs,

    /// Show what would be deleted without deleting anything
    #[arg(long)]
    dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,
  },

  /// Print exported values (all of them when no name is given)
  Export {
    name: Option<String>,

    /// Print secret values instead of masking them
    #[arg(long)]
    show_secrets: bool,
  },

  /// Show the recorded resources
  Status,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
  match raw.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
    _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
  }
}

fn init_logging(verbose: u8) {
  let default_level = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  let ctx = Context::new(cli.state_dir, cli.provider_config, cli.json);

  let result = match cli.command {
    Commands::Plan { program } => cmd::cmd_plan(&ctx, &program.file, program.config),
    Commands::Apply {
      program,
      exec,
      yes,
      no_refresh,
    } => cmd::cmd_apply(
      &ctx,
      &program.file,
      program.config,
      cmd::ExecFlags {
        parallelism: exec.parallelism,
        timeout: exec.timeout,
        refresh: !no_refresh,
      },
      yes,
    ),
    Commands::Destroy { exec, dry_run, yes } => cmd::cmd_destroy(
      &ctx,
      cmd::ExecFlags {
        parallelism: exec.parallelism,
        timeout: exec.timeout,
        refresh: false,
      },
      dry_run,
      yes,
    ),
    Commands::Export { name, show_secrets } => cmd::cmd_export(&ctx, name.as_deref(), show_secrets),
    Commands::Status => cmd::cmd_status(&ctx),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}
