//! Newline-delimited JSON stream source.
//!
//! Each line is one [`StreamMessage`]:
//!
//! ```text
//! {"kind":"batch","position":{"token":"c1","block_number":1},"entries":[...]}
//! {"kind":"undo","last_valid":{"token":"c1","block_number":1}}
//! ```
//!
//! Seeking resumes after the *last* line carrying the cursor's token. After
//! an undo, the cursor token is the one on the undo line, so a restart
//! continues on the canonical branch instead of re-reading orphaned lines.
//!
//! In follow mode the source polls for appended lines at end of file
//! instead of ending the stream.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cursor::Cursor;
use crate::error::SinkError;
use crate::stream::{StreamMessage, StreamSource};

pub struct JsonLinesSource {
    path: PathBuf,
    follow: bool,
    poll_interval: Duration,
    reader: Option<BufReader<File>>,
    /// Lines consumed from the current reader.
    line_no: usize,
    /// Lines at or below this index are skipped after a seek.
    resume_after_line: Option<usize>,
    /// Fallback when the cursor token is not in the file.
    resume_after_block: Option<u64>,
    /// Block of the last message handed out, or of the seek cursor.
    last_block: Option<u64>,
    partial: String,
}

impl JsonLinesSource {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            follow: false,
            poll_interval: Duration::from_millis(2000),
            reader: None,
            line_no: 0,
            resume_after_line: None,
            resume_after_block: None,
            last_block: None,
            partial: String::new(),
        }
    }

    /// Keep polling for appended lines at end of file.
    pub fn follow(mut self, poll_interval: Duration) -> Self {
        self.follow = true;
        self.poll_interval = poll_interval;
        self
    }

    async fn open_reader(&self) -> Result<BufReader<File>, SinkError> {
        let file = File::open(&self.path).await.map_err(|e| {
            SinkError::Stream(format!("cannot open {}: {e}", self.path.display()))
        })?;
        Ok(BufReader::new(file))
    }

    /// Index of the last line whose position token equals `token`.
    async fn find_token(&self, token: &str) -> Result<Option<usize>, SinkError> {
        let mut reader = self.open_reader().await?;
        let mut found = None;
        let mut buf = String::new();
        let mut index = 0;
        loop {
            buf.clear();
            let n = reader
                .read_line(&mut buf)
                .await
                .map_err(|e| SinkError::Stream(e.to_string()))?;
            if n == 0 || !buf.ends_with('\n') {
                break;
            }
            if let Ok(message) = serde_json::from_str::<StreamMessage>(buf.trim()) {
                let line_token = match &message {
                    StreamMessage::Batch(b) => &b.position.token,
                    StreamMessage::Undo { last_valid } => &last_valid.token,
                };
                if line_token == token {
                    found = Some(index);
                }
            }
            index += 1;
        }
        Ok(found)
    }

    /// Read one complete line, waiting for more data in follow mode.
    async fn read_line(&mut self) -> Result<Option<String>, SinkError> {
        loop {
            if self.reader.is_none() {
                self.reader = Some(self.open_reader().await?);
                self.line_no = 0;
            }
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            let n = reader
                .read_line(&mut self.partial)
                .await
                .map_err(|e| SinkError::Stream(e.to_string()))?;
            if self.partial.ends_with('\n') {
                let line = std::mem::take(&mut self.partial);
                return Ok(Some(line));
            }
            if n == 0 {
                if !self.follow {
                    if self.partial.trim().is_empty() {
                        return Ok(None);
                    }
                    // Last line without a trailing newline.
                    return Ok(Some(std::mem::take(&mut self.partial)));
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}

/// Block number a line claims for itself, when it is JSON but not a valid
/// message.
fn declared_block(line: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    ["position", "last_valid"]
        .iter()
        .find_map(|key| value.get(key)?.get("block_number")?.as_u64())
}

#[async_trait]
impl StreamSource for JsonLinesSource {
    async fn seek(&mut self, after: &Cursor) -> Result<(), SinkError> {
        self.reader = None;
        self.partial.clear();
        self.resume_after_line = None;
        self.resume_after_block = None;
        self.last_block = None;
        if after.is_start() {
            return Ok(());
        }
        self.last_block = Some(after.block_number);
        match self.find_token(&after.token).await? {
            Some(line) => self.resume_after_line = Some(line),
            None => {
                tracing::warn!(
                    cursor = %after,
                    path = %self.path.display(),
                    "cursor token not found in stream file, resuming by block number"
                );
                self.resume_after_block = Some(after.block_number);
            }
        }
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<StreamMessage>, SinkError> {
        loop {
            let Some(line) = self.read_line().await? else {
                return Ok(None);
            };
            let index = self.line_no;
            self.line_no += 1;

            if self.resume_after_line.is_some_and(|skip| index <= skip) {
                continue;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let message: StreamMessage =
                serde_json::from_str(trimmed).map_err(|e| SinkError::Decode {
                    position: declared_block(trimmed).unwrap_or_else(|| {
                        self.last_block.map_or(0, |block| block.saturating_add(1))
                    }),
                    reason: format!("{} line {}: {e}", self.path.display(), index + 1),
                })?;
            if let (Some(block), StreamMessage::Batch(b)) = (self.resume_after_block, &message) {
                if b.position.block_number <= block {
                    continue;
                }
            }
            self.last_block = Some(message.block_number());
            return Ok(Some(message));
        }
    }
}
