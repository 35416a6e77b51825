//! Lua runtime for keel programs.
//!
//! A program is a Lua file that declares resources through the `keel` global.
//! Evaluation only collects declarations; nothing talks to a provider here.
//!
//! # Submodules
//!
//! - [`globals`] - The `keel` table (`keel.resource`, `keel.export`, ...)
//! - [`output`] - Userdata for deferred values and resource references
//! - [`runtime`] - Lua VM setup and file loading

mod convert;
pub mod globals;
pub mod output;
pub mod runtime;
