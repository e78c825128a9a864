use serde::{Deserialize, Serialize};

/// Message sent to the live session service
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message on the wire; fixes the session parameters
    Setup {
        input_sample_rate: u32,
        output_sample_rate: u32,
        voice: String,
        system_preamble: String,
        transcribe_input: bool,
        transcribe_output: bool,
    },
    /// One capture window of base64-encoded PCM16
    Audio {
        data: String,
        sample_rate: u32,
        channels: u16,
    },
}

/// Message received from the live session service
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWireMessage {
    /// Handshake acknowledgement for the setup message
    SetupComplete,
    /// Partial transcript of the user's speech
    InputTranscript { text: String },
    /// Partial transcript of the assistant's speech
    OutputTranscript { text: String },
    /// Both sides of the current turn are final
    TurnComplete,
    /// Synthesized audio, base64-encoded PCM16
    Audio {
        data: String,
        sample_rate: u32,
        channels: u16,
    },
    /// Service-reported runtime error
    Error { message: String },
}
