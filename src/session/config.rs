use serde::{Deserialize, Serialize};

/// Configuration for a live voice conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Capture sample rate sent to the model (the service expects 16kHz)
    pub input_sample_rate: u32,

    /// Sample rate of synthesized audio received from the model (24kHz)
    pub output_sample_rate: u32,

    /// Samples per capture window handed to the session
    pub capture_window: usize,

    /// Synthesized voice identifier
    pub voice: String,

    /// System preamble framing the assistant's role
    pub system_preamble: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            capture_window: 4096,
            voice: "aria".to_string(),
            system_preamble: "You are a helpful reading assistant for a low-vision user. \
                              Answer questions about the currently loaded document clearly \
                              and concisely."
                .to_string(),
        }
    }
}
