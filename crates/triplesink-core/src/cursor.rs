//! Stream cursor: the position of the last batch durably applied.

use serde::{Deserialize, Serialize};

/// A position in the change stream.
///
/// The token is opaque and handed back to the stream source on resume.
/// Ordering between positions is by `block_number`. An empty token is the
/// start of the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    /// Opaque resume token issued by the stream source.
    pub token: String,
    /// Block number the token points at.
    pub block_number: u64,
}

impl Cursor {
    pub fn new(token: impl Into<String>, block_number: u64) -> Self {
        Self {
            token: token.into(),
            block_number,
        }
    }

    /// The cursor before anything has been applied.
    pub fn start() -> Self {
        Self::default()
    }

    pub fn is_start(&self) -> bool {
        self.token.is_empty()
    }

    /// Returns `true` if a batch at `block_number` is already reflected in
    /// the store, i.e. delivering it again must be a no-op.
    pub fn covers(&self, block_number: u64) -> bool {
        !self.is_start() && block_number <= self.block_number
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_start() {
            write!(f, "<start>")
        } else {
            write!(f, "#{} ({})", self.block_number, self.token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_covers_nothing() {
        let cursor = Cursor::start();
        assert!(cursor.is_start());
        assert!(!cursor.covers(0));
        assert!(!cursor.covers(1));
    }

    #[test]
    fn covers_up_to_and_including_position() {
        let cursor = Cursor::new("100", 100);
        assert!(cursor.covers(99));
        assert!(cursor.covers(100));
        assert!(!cursor.covers(101));
    }

    #[test]
    fn display() {
        assert_eq!(Cursor::start().to_string(), "<start>");
        assert_eq!(Cursor::new("abc", 5).to_string(), "#5 (abc)");
    }
}
