use serde::{Deserialize, Serialize};

/// Number of hex digits shown for an abbreviated commit id
pub const SHORT_ID_LEN: usize = 7;

/// Git commit information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    pub author: Author,
    pub message: String,
    pub timestamp: Timestamp,
}

impl Commit {
    /// Abbreviated commit id
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(SHORT_ID_LEN)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }

    /// First line of the commit message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// Commit author information
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

/// Commit timestamp (Unix timestamp with timezone offset in minutes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub offset_minutes: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, offset_minutes: i32) -> Self {
        Self {
            seconds,
            offset_minutes,
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.seconds)
    }
}
