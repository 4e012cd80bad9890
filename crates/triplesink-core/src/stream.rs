//! Stream source contract.
//!
//! The transport (gRPC, auth handshake, block decoding) lives outside this
//! crate. A [`StreamSource`] only has to deliver ordered batches tagged
//! with a cursor and report re-organizations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::error::SinkError;

/// One entry published to a space: an action document plus its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    /// Address of the space the entry was published to.
    pub space: String,
    #[serde(default)]
    pub author: String,
    /// The action document, either inline JSON or a JSON-encoded string.
    pub payload: serde_json::Value,
}

/// All entries of one stream position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamBatch {
    pub position: Cursor,
    #[serde(default)]
    pub entries: Vec<RawEntry>,
}

/// What a source can deliver next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamMessage {
    Batch(StreamBatch),
    /// Everything after `last_valid` is no longer canonical.
    Undo { last_valid: Cursor },
}

impl StreamMessage {
    pub fn block_number(&self) -> u64 {
        match self {
            Self::Batch(b) => b.position.block_number,
            Self::Undo { last_valid } => last_valid.block_number,
        }
    }
}

/// Credentials handed to the stream transport.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Long-lived key, exchanged for a bearer token by the transport.
    ApiKey(String),
    /// Bearer token used as is.
    Token(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => write!(f, "ApiKey(***)"),
            Self::Token(_) => write!(f, "Token(***)"),
        }
    }
}

/// An ordered, resumable source of stream messages.
#[async_trait]
pub trait StreamSource: Send {
    /// Restart delivery strictly after `after`.
    async fn seek(&mut self, after: &Cursor) -> Result<(), SinkError>;

    /// The next message, or `None` once the stream is exhausted.
    async fn next(&mut self) -> Result<Option<StreamMessage>, SinkError>;
}

/// A scripted in-memory source.
///
/// Seeking rewinds to the first batch past the cursor, so re-delivery
/// after a failed commit behaves like a real source resuming from a cursor.
#[derive(Debug, Default, Clone)]
pub struct VecSource {
    messages: Vec<StreamMessage>,
    next: usize,
}

impl VecSource {
    pub fn new(messages: Vec<StreamMessage>) -> Self {
        Self { messages, next: 0 }
    }
}

#[async_trait]
impl StreamSource for VecSource {
    async fn seek(&mut self, after: &Cursor) -> Result<(), SinkError> {
        self.next = if after.is_start() {
            0
        } else {
            self.messages
                .iter()
                .position(|m| matches!(m, StreamMessage::Batch(b) if b.position.block_number > after.block_number))
                .unwrap_or(self.messages.len())
        };
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<StreamMessage>, SinkError> {
        let message = self.messages.get(self.next).cloned();
        if message.is_some() {
            self.next += 1;
        }
        Ok(message)
    }
}
