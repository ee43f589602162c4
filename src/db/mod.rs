//! Session storage abstraction.
//!
//! The agent only needs to load a session, write it back, and (for the
//! administrative CLI) enumerate or delete sessions. Postgres is the real
//! backend; the in-memory backend serves tests and storage-less runs.

mod memory;

pub use memory::InMemoryAgentStorage;

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::history::AgentSession;

/// Storage capability handed to an agent.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Human-readable location, e.g. `ai.agent_sessions`.
    fn describe(&self) -> String;

    /// Create the backing table if it does not exist.
    async fn create(&self) -> Result<(), DatabaseError>;

    /// Whether the backing table exists.
    async fn table_exists(&self) -> Result<bool, DatabaseError>;

    /// Load a session, optionally restricted to one user.
    async fn read(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<AgentSession>, DatabaseError>;

    /// Insert or update a session by id, returning the stored record.
    ///
    /// `created_at` of an existing record is preserved.
    async fn upsert(&self, session: &AgentSession) -> Result<AgentSession, DatabaseError>;

    /// Delete a session. Returns whether a record was removed.
    async fn delete_session(&self, session_id: &str) -> Result<bool, DatabaseError>;

    /// Session ids, newest first.
    async fn get_all_session_ids(
        &self,
        user_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<Vec<String>, DatabaseError>;

    /// Sessions, newest first.
    async fn get_all_sessions(
        &self,
        user_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<Vec<AgentSession>, DatabaseError>;

    /// Drop the backing table if it exists.
    async fn drop_table(&self) -> Result<(), DatabaseError>;
}
