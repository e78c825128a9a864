//! Live session transport
//!
//! The conversation engine talks to the remote speech-to-speech service
//! through the `LiveTransport`/`LiveSession` traits. Inbound notifications
//! arrive as a single channel of tagged `SessionEvent` variants consumed by
//! one dispatch loop, which keeps ordering and teardown easy to reason
//! about and lets tests substitute a fake transport.

pub mod messages;
pub mod ws;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

pub use messages::{ClientMessage, ServerWireMessage};
pub use ws::WsTransport;

/// Session parameters fixed at open time.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Capture sample rate the service expects (Hz)
    pub input_sample_rate: u32,
    /// Sample rate of synthesized audio the service returns (Hz)
    pub output_sample_rate: u32,
    /// Synthesized voice identifier
    pub voice: String,
    /// System preamble framing the assistant's role
    pub system_preamble: String,
    /// Report partial transcripts of the user's speech
    pub transcribe_input: bool,
    /// Report partial transcripts of the assistant's speech
    pub transcribe_output: bool,
}

/// One inbound audio message, still transport-encoded.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    /// Base64-encoded PCM16 bytes
    pub data: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Content notifications delivered while the session is open.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Partial transcript fragment of the user's speech
    UserTranscript(String),
    /// Partial transcript fragment of the assistant's speech
    ModelTranscript(String),
    /// The current turn is finished on both sides
    TurnComplete,
    /// Synthesized audio for playback
    Audio(AudioPayload),
}

/// Everything the remote session can tell us, in delivery order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Handshake confirmed; streaming may begin
    Opened,
    Message(ServerMessage),
    /// Remote-reported runtime error; terminates the session
    Error(String),
    /// Remote closed the session
    Closed,
}

/// An open session plus its event stream.
pub struct LiveConnection {
    pub session: Arc<dyn LiveSession>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Handle to one open streaming session.
#[async_trait::async_trait]
pub trait LiveSession: Send + Sync {
    /// Forward one transport-encoded capture window. Fire-and-forget: must
    /// not block; a failure means the window is dropped by the caller.
    fn send_input(&self, encoded_pcm: String) -> Result<()>;

    /// Close the session. Best effort; ends the event stream.
    async fn close(&self);
}

/// Capability: "can open a streaming session".
#[async_trait::async_trait]
pub trait LiveTransport: Send + Sync {
    async fn open(&self, config: &LiveConfig) -> Result<LiveConnection>;
}
