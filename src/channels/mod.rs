//! Chat front-ends.
//!
//! Each channel turns its input into [`IncomingMessage`]s and delivers the
//! replies:
//! - `repl`: interactive terminal
//! - `http`: JSON endpoint for programmatic clients
//!
//! The [`ChannelManager`] merges their streams for the chat runner.

mod channel;
mod http;
mod manager;
mod repl;

pub use channel::{Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate};
pub use http::HttpChannel;
pub use manager::ChannelManager;
pub use repl::ReplChannel;
