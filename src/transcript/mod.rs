//! Transcript assembly
//!
//! The live transport reports transcripts as incremental fragments for both
//! directions of the conversation, bounded by a turn-complete marker. The
//! assembler accumulates fragments per speaker and flushes finalized entries
//! when a turn completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Model,
}

/// One finalized transcript line. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Accumulates partial transcripts for the current turn.
///
/// Reused across turns within one conversation; both accumulators are
/// cleared atomically when a turn completes.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    user: String,
    model: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user_fragment(&mut self, text: &str) {
        self.user.push_str(text);
    }

    pub fn append_model_fragment(&mut self, text: &str) {
        self.model.push_str(text);
    }

    /// Flush the current turn.
    ///
    /// Yields at most one entry per speaker, in the fixed order
    /// [user, model]. An empty or whitespace-only accumulator yields no
    /// entry for that speaker.
    pub fn complete_turn(&mut self) -> Vec<TranscriptEntry> {
        let user = std::mem::take(&mut self.user);
        let model = std::mem::take(&mut self.model);

        let mut entries = Vec::with_capacity(2);
        for (speaker, text) in [(Speaker::User, user), (Speaker::Model, model)] {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                entries.push(TranscriptEntry {
                    speaker,
                    text: trimmed.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        entries
    }
}
