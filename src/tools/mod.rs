//! Tools the agent can call during a run.
//!
//! Tools receive the session state mutably, so whatever they change is
//! written back with the session once the run finishes.

pub mod builtin;

mod registry;
mod tool;

pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext, ToolOutput, require_str};
