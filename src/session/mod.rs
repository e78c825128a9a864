//! Conversation lifecycle management
//!
//! This module provides the `ConversationEngine` abstraction that manages:
//! - Microphone and output context acquisition
//! - The remote live session handle and its event stream
//! - Capture forwarding and playback scheduling
//! - Transcript collection and session statistics
//!
//! The engine guarantees ordered, exactly-once teardown of every owned
//! resource, no matter which party ends the conversation.

mod config;
mod engine;
mod stats;

pub use config::ConversationConfig;
pub use engine::{ConversationEngine, SessionState};
pub use stats::SessionStats;
