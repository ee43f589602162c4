//! Per-session conversation context.
//!
//! Holds the runs an agent has completed for a session, which are both the
//! source of chat history for new requests and the payload persisted by
//! session storage.

mod memory;

pub use memory::{AgentMemory, AgentRun, StoredMessage};
