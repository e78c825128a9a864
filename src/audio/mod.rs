pub mod capture;
pub mod codec;
pub mod cpal_backend;
pub mod device;
pub mod playback;

pub use capture::CaptureBridge;
pub use codec::{
    decode_from_transport, encode_for_transport, samples_to_transport_bytes,
    transport_bytes_to_samples, AudioChunk,
};
pub use cpal_backend::{CpalAudioInput, CpalAudioOutput};
pub use device::{
    AudioInput, AudioOutput, CaptureWindow, InputSpec, InputStream, OutputContext, SourceId,
};
pub use playback::PlaybackScheduler;
