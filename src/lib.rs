pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod transcript;
pub mod transport;

pub use audio::{
    AudioChunk, AudioInput, AudioOutput, CaptureBridge, CaptureWindow, CpalAudioInput,
    CpalAudioOutput, InputSpec, InputStream, OutputContext, PlaybackScheduler, SourceId,
};
pub use config::Config;
pub use error::{DecodeError, DeviceError, PlaybackError, SessionError};
pub use http::{create_router, AppState};
pub use session::{ConversationConfig, ConversationEngine, SessionState, SessionStats};
pub use transcript::{Speaker, TranscriptAssembler, TranscriptEntry};
pub use transport::{
    AudioPayload, LiveConfig, LiveConnection, LiveSession, LiveTransport, ServerMessage,
    SessionEvent, WsTransport,
};
