use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::engine::SessionState;

/// Snapshot of a conversation's state for the UI layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current lifecycle state
    pub state: SessionState,

    /// Identifier of the current (or most recent) conversation
    pub conversation_id: Option<String>,

    /// When the conversation started
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since the conversation started
    pub duration_secs: f64,

    /// Finalized transcript entries so far
    pub transcript_entries: usize,

    /// Most recent conversation-level error, if any
    pub last_error: Option<String>,
}
