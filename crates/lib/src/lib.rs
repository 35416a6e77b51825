//! keel-lib: declarative resource reconciliation.
//!
//! A program declares resources and the data that flows between them. keel
//! turns that into a dependency graph, diffs it against recorded state and
//! drives a provider to converge the live resources:
//! - `resource`: declarations and the in-memory [`resource::Program`]
//! - `output`: deferred values that carry their dependencies
//! - `graph`: dependency graph with cycle detection
//! - `plan`: per-resource create/update/replace/delete decisions
//! - `execute`: concurrent plan execution and pass orchestration
//! - `state`: durable, locked record of managed resources
//! - `provider`: the provider interface and a file-backed local provider
//! - `lua`/`eval`: Lua programs

pub mod consts;
pub mod eval;
pub mod execute;
pub mod graph;
pub mod lua;
pub mod output;
pub mod paths;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod state;
pub mod value;
