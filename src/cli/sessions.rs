//! Session administration commands.
//!
//! Inspect and clean up the stored agent sessions.

use std::fmt::Write;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Subcommand;

use crate::db::SessionStorage;
use crate::history::AgentSession;

#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommand {
    /// List stored sessions, newest first
    List {
        /// Only sessions belonging to this user
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Show one session's state and conversation
    Show {
        /// Session id (e.g. "shopping_list_demo")
        session_id: String,
    },

    /// Delete a stored session
    Delete {
        /// Session id to delete
        session_id: String,
    },

    /// Report whether the sessions table exists and how many rows it holds
    Check,
}

/// Run a sessions command and print its output.
pub async fn run_sessions_command(
    cmd: SessionsCommand,
    storage: &dyn SessionStorage,
) -> anyhow::Result<()> {
    let output = match cmd {
        SessionsCommand::List { user_id } => list_sessions(storage, user_id.as_deref()).await?,
        SessionsCommand::Show { session_id } => show_session(storage, &session_id).await?,
        SessionsCommand::Delete { session_id } => delete_session(storage, &session_id).await?,
        SessionsCommand::Check => check_storage(storage).await?,
    };
    print!("{output}");
    Ok(())
}

fn format_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

async fn list_sessions(storage: &dyn SessionStorage, user_id: Option<&str>) -> anyhow::Result<String> {
    let sessions = storage
        .get_all_sessions(user_id, None)
        .await
        .context("failed to list sessions")?;

    let mut out = String::new();
    if sessions.is_empty() {
        writeln!(out, "No sessions in {}", storage.describe())?;
        return Ok(out);
    }

    let width = sessions.iter().map(|s| s.session_id.len()).max().unwrap_or(0);
    for session in &sessions {
        writeln!(
            out,
            "{:<width$}  runs: {:>3}  messages: {:>4}  created: {}",
            session.session_id,
            session.memory.runs().len(),
            session.message_count(),
            format_ts(session.created_at),
        )?;
    }
    writeln!(out, "\n{} session(s)", sessions.len())?;
    Ok(out)
}

fn render_session(session: &AgentSession) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "Session:  {}", session.session_id)?;
    if let Some(ref user_id) = session.user_id {
        writeln!(out, "User:     {user_id}")?;
    }
    writeln!(out, "Created:  {}", format_ts(session.created_at))?;
    if let Some(updated) = session.updated_at {
        writeln!(out, "Updated:  {}", format_ts(updated))?;
    }
    writeln!(
        out,
        "State:    {}",
        serde_json::to_string(&session.session_data.session_state)?
    )?;

    for (i, run) in session.memory.runs().iter().enumerate() {
        writeln!(out, "\n--- run {} ({}) ---", i + 1, format_ts(run.created_at))?;
        for msg in &run.messages {
            let content = if msg.content.is_empty() {
                match msg.tool_calls {
                    Some(ref calls) => calls
                        .iter()
                        .map(|c| format!("{}({})", c.name, c.arguments))
                        .collect::<Vec<_>>()
                        .join(", "),
                    None => String::new(),
                }
            } else {
                msg.content.clone()
            };
            writeln!(out, "[{}] {}", msg.role.as_str(), content)?;
        }
    }
    Ok(out)
}

async fn show_session(storage: &dyn SessionStorage, session_id: &str) -> anyhow::Result<String> {
    let session = storage
        .read(session_id, None)
        .await
        .with_context(|| format!("failed to read session {session_id}"))?
        .with_context(|| format!("no session named {session_id}"))?;
    render_session(&session)
}

async fn delete_session(storage: &dyn SessionStorage, session_id: &str) -> anyhow::Result<String> {
    let removed = storage
        .delete_session(session_id)
        .await
        .with_context(|| format!("failed to delete session {session_id}"))?;
    Ok(if removed {
        format!("Deleted session {session_id}\n")
    } else {
        format!("No session named {session_id}\n")
    })
}

async fn check_storage(storage: &dyn SessionStorage) -> anyhow::Result<String> {
    let location = storage.describe();
    if !storage.table_exists().await.context("failed to query table")? {
        return Ok(format!("Table {location} does not exist\n"));
    }
    let count = storage.get_all_session_ids(None, None).await?.len();
    Ok(format!("Table {location} exists with {count} session(s)\n"))
}
