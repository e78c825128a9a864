use std::sync::Arc;

use crate::session::ConversationEngine;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single conversation engine behind the UI
    pub engine: Arc<ConversationEngine>,
}

impl AppState {
    pub fn new(engine: Arc<ConversationEngine>) -> Self {
        Self { engine }
    }
}
