use thiserror::Error;

/// Microphone or speaker acquisition failure.
///
/// Fatal to starting a conversation, never fatal to the application.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no input device available")]
    NoInputDevice,

    #[error("no output device available")]
    NoOutputDevice,

    #[error("microphone access denied or unavailable: {0}")]
    InputUnavailable(String),

    #[error("output device unavailable: {0}")]
    OutputUnavailable(String),
}

/// Malformed inbound audio payload. The offending chunk is dropped and the
/// conversation continues.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("PCM byte length {len} is not a multiple of {stride} (2 bytes x {channels} channels)")]
    Misaligned {
        len: usize,
        stride: usize,
        channels: u16,
    },

    #[error("invalid transport text: {0}")]
    Transport(#[from] base64::DecodeError),
}

/// Output device rejected a chunk. The chunk is dropped and the
/// conversation continues.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("output context is closed")]
    ContextClosed,

    #[error("output device rejected chunk: {0}")]
    Device(String),
}

/// Failures surfaced by `ConversationEngine::start`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a conversation is already active")]
    AlreadyActive,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to open live session: {0}")]
    Open(String),
}
