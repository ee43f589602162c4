//! Session persistence layer.
//!
//! Stores agent sessions (conversation runs and session state) in
//! PostgreSQL so a conversation survives process restarts.

mod session;
mod store;

pub use session::{AgentSession, SessionData};
pub use store::PostgresAgentStorage;
