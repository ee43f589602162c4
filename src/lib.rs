//! pgchat: a chat agent whose conversations live in Postgres.
//!
//! A script (see [`bootstrap::Script`]) builds an [`agent::Agent`] for each
//! chat. The agent calls the configured model, runs tools against the
//! session state, and writes every run back through a
//! [`db::SessionStorage`], so a conversation survives restarts.

pub mod agent;
pub mod bootstrap;
pub mod channels;
pub mod chat;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod history;
pub mod llm;
pub mod scripts;
pub mod tools;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};
