use anyhow::Result;
use tokio::sync::mpsc;

use super::codec::AudioChunk;
use crate::error::{DeviceError, PlaybackError};

/// One fixed-size block of captured microphone samples (mono, normalized).
#[derive(Debug, Clone)]
pub struct CaptureWindow {
    pub samples: Vec<f32>,
}

/// Capture format requested when acquiring the microphone.
#[derive(Debug, Clone)]
pub struct InputSpec {
    /// Sample rate the stream must deliver (Hz)
    pub sample_rate: u32,
    /// Samples per delivered window
    pub window: usize,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window: 4096,
        }
    }
}

/// Capability: "can create an input stream".
///
/// Implementations wrap a platform audio host (cpal in production, a fake
/// in tests). Acquisition is the only point where a `DeviceError` for the
/// microphone can surface.
#[async_trait::async_trait]
pub trait AudioInput: Send + Sync {
    async fn acquire(&self, spec: InputSpec) -> Result<Box<dyn InputStream>, DeviceError>;
}

/// A live microphone stream. Owned exclusively by the conversation engine.
pub trait InputStream: Send {
    /// Take the window receiver. Yields `None` after the first call; the
    /// stream delivers windows in capture order until closed.
    fn windows(&mut self) -> Option<mpsc::Receiver<CaptureWindow>>;

    /// Stop the underlying tracks and release the device. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Capability: "can schedule a buffer for playback at time T".
#[async_trait::async_trait]
pub trait AudioOutput: Send + Sync {
    async fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputContext>, DeviceError>;
}

/// Handle to one scheduled playback source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

/// An output-rate audio context with its own monotonic clock.
///
/// `clock()` is seconds since the context opened; `begin` schedules a chunk
/// to start at an absolute clock time, past times meaning "immediately".
pub trait OutputContext: Send {
    fn clock(&self) -> f64;

    fn begin(&mut self, chunk: &AudioChunk, start_at: f64) -> Result<SourceId, PlaybackError>;

    /// Force-stop one source. Unknown ids are ignored.
    fn stop_source(&mut self, id: SourceId);

    /// Drain the ids of sources that finished playing naturally since the
    /// last call.
    fn finished(&mut self) -> Vec<SourceId>;

    /// Release the device. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}
