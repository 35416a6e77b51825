mod apply;
mod destroy;
mod export;
mod plan;
mod status;

use std::time::Duration;

pub use apply::cmd_apply;
pub use destroy::cmd_destroy;
pub use export::cmd_export;
pub use plan::cmd_plan;
pub use status::cmd_status;

/// Execution flags shared by `apply` and `destroy`.
#[derive(Debug, Clone, Copy)]
pub struct ExecFlags {
  pub parallelism: Option<usize>,
  pub timeout: Option<Duration>,
  pub refresh: bool,
}
