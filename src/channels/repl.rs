//! Terminal chat channel.
//!
//! Lines are read with rustyline on a dedicated thread. After each message
//! the thread waits until the reply has been printed, so the prompt never
//! interleaves with streamed output.

use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;

use async_trait::async_trait;
use crossterm::style::Stylize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate};
use crate::error::ChannelError;

const CHANNEL_NAME: &str = "repl";
const PROMPT: &str = ">> ";

/// Terminal REPL channel.
pub struct ReplChannel {
    user_id: String,
    banner: String,
    history_path: Option<PathBuf>,
    /// Wakes the input thread once a reply is printed.
    ack_tx: Mutex<Option<std_mpsc::Sender<()>>>,
    /// Text already printed for the current reply.
    streamed: Mutex<String>,
}

/// What to do with one line of input.
#[derive(Debug, PartialEq, Eq)]
enum LineAction {
    Skip,
    Quit,
    Send(String),
}

fn classify(line: &str) -> LineAction {
    let line = line.trim();
    match line {
        "" => LineAction::Skip,
        "/quit" | "/exit" => LineAction::Quit,
        _ => LineAction::Send(line.to_string()),
    }
}

/// What remains to print once `streamed` is already on screen.
///
/// `None` means the reply diverged from the streamed text and must be
/// printed in full.
fn unprinted_tail<'a>(streamed: &str, content: &'a str) -> Option<&'a str> {
    if streamed.is_empty() {
        return None;
    }
    content.strip_prefix(streamed)
}

impl ReplChannel {
    pub fn new(user_id: impl Into<String>, banner: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            banner: banner.into(),
            history_path: dirs::home_dir().map(|home| home.join(".pgchat").join("repl_history")),
            ack_tx: Mutex::new(None),
            streamed: Mutex::new(String::new()),
        }
    }

    fn write_out(&self, text: &str) -> Result<(), ChannelError> {
        let mut out = std::io::stdout().lock();
        out.write_all(text.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| ChannelError::SendFailed {
                name: CHANNEL_NAME.to_string(),
                reason: e.to_string(),
            })
    }
}

fn read_loop(
    user_id: String,
    history_path: Option<PathBuf>,
    tx: mpsc::Sender<IncomingMessage>,
    ack_rx: std_mpsc::Receiver<()>,
) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            tracing::error!("Failed to initialise terminal input: {}", e);
            return;
        }
    };
    if let Some(ref path) = history_path {
        let _ = editor.load_history(path);
    }

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => match classify(&line) {
                LineAction::Skip => continue,
                LineAction::Quit => break,
                LineAction::Send(content) => {
                    let _ = editor.add_history_entry(content.as_str());
                    let msg = IncomingMessage::new(CHANNEL_NAME, &user_id, content);
                    if tx.blocking_send(msg).is_err() || ack_rx.recv().is_err() {
                        break;
                    }
                }
            },
            Err(ReadlineError::Interrupted) => {
                println!("{}", "(type /quit or press Ctrl-D to exit)".dim());
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                tracing::error!("Terminal input error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = history_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = editor.save_history(&path) {
            tracing::debug!("Could not save REPL history to {}: {}", path.display(), e);
        }
    }
    tracing::debug!("REPL input closed");
}

#[async_trait]
impl Channel for ReplChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = std_mpsc::channel();
        *self.ack_tx.lock().await = Some(ack_tx);

        self.write_out(&format!(
            "{}\n{}\n\n",
            self.banner.as_str().bold().cyan(),
            "Type /quit or press Ctrl-D to exit.".dim()
        ))?;

        let user_id = self.user_id.clone();
        let history_path = self.history_path.clone();
        std::thread::Builder::new()
            .name("repl-input".to_string())
            .spawn(move || read_loop(user_id, history_path, tx, ack_rx))
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let streamed = std::mem::take(&mut *self.streamed.lock().await);
        let result = match unprinted_tail(&streamed, &response.content) {
            Some(rest) => self.write_out(&format!("{rest}\n\n")),
            None => {
                let lead = if streamed.is_empty() { "" } else { "\n" };
                let body = if response.content.starts_with("Error:") {
                    response.content.as_str().red().to_string()
                } else {
                    response.content.clone()
                };
                self.write_out(&format!("{lead}{body}\n\n"))
            }
        };

        if let Some(ref ack) = *self.ack_tx.lock().await {
            let _ = ack.send(());
        }
        result
    }

    async fn send_status(
        &self,
        _msg: &IncomingMessage,
        status: StatusUpdate,
    ) -> Result<(), ChannelError> {
        match status {
            StatusUpdate::StreamChunk(chunk) => {
                self.streamed.lock().await.push_str(&chunk);
                self.write_out(&chunk)
            }
            StatusUpdate::Status(text) => self.write_out(&format!("{}\n", text.dim())),
            StatusUpdate::Thinking(_) => Ok(()),
        }
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        // Dropping the ack sender ends the input thread after its next line.
        self.ack_tx.lock().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_lines() {
        assert_eq!(classify("   "), LineAction::Skip);
        assert_eq!(classify("/quit"), LineAction::Quit);
        assert_eq!(classify(" /exit "), LineAction::Quit);
        assert_eq!(classify(" add milk "), LineAction::Send("add milk".into()));
    }

    #[test]
    fn prints_only_the_unstreamed_tail() {
        assert_eq!(unprinted_tail("Hello", "Hello world"), Some(" world"));
        assert_eq!(unprinted_tail("Hello world", "Hello world"), Some(""));
        assert_eq!(unprinted_tail("", "Hello"), None);
        assert_eq!(unprinted_tail("Hel", "Error: boom"), None);
    }

    #[tokio::test]
    async fn respond_acknowledges_input_thread() {
        let channel = ReplChannel::new("local", "test");
        let (ack_tx, ack_rx) = std_mpsc::channel();
        *channel.ack_tx.lock().await = Some(ack_tx);

        let msg = IncomingMessage::new(CHANNEL_NAME, "local", "hi");
        channel
            .send_status(&msg, StatusUpdate::StreamChunk("he".into()))
            .await
            .unwrap();
        channel
            .respond(&msg, OutgoingResponse::text("hey"))
            .await
            .unwrap();

        assert!(ack_rx.try_recv().is_ok());
        assert!(channel.streamed.lock().await.is_empty());
    }
}
