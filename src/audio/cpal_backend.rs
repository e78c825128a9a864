// cpal-backed audio devices
//
// cpal streams are not Send, so each context runs on a dedicated thread
// that owns the stream and parks until asked to stop. The handles returned
// to the engine are plain Send values that communicate through shared
// state and channels.
//
// Capture: the device's native format is downmixed to mono and resampled
// (linear interpolation) to the requested rate, then delivered in
// fixed-size windows. If the consumer falls behind, windows are dropped;
// capture never blocks the audio thread.
//
// Playback: a mixer keeps every scheduled source with its absolute start
// frame; the output callback sums whatever is due at the current frame.
// The mixer's frame counter doubles as the context clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::codec::AudioChunk;
use super::device::{
    AudioInput, AudioOutput, CaptureWindow, InputSpec, InputStream, OutputContext, SourceId,
};
use crate::error::{DeviceError, PlaybackError};

/// Buffered capture windows before the device starts dropping.
const WINDOW_QUEUE: usize = 32;

// ============================================================================
// Input
// ============================================================================

pub struct CpalAudioInput;

impl CpalAudioInput {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalAudioInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AudioInput for CpalAudioInput {
    async fn acquire(&self, spec: InputSpec) -> Result<Box<dyn InputStream>, DeviceError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (window_tx, window_rx) = mpsc::channel(WINDOW_QUEUE);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);

        std::thread::Builder::new()
            .name("doctalk-mic".into())
            .spawn(move || run_input_thread(spec, window_tx, stop_thread, ready_tx))
            .map_err(|e| DeviceError::InputUnavailable(e.to_string()))?;

        ready_rx
            .await
            .map_err(|_| DeviceError::InputUnavailable("capture thread exited".into()))??;

        Ok(Box::new(CpalInputStream {
            windows: Some(window_rx),
            stop,
            closed: false,
        }))
    }
}

struct CpalInputStream {
    windows: Option<mpsc::Receiver<CaptureWindow>>,
    stop: Arc<AtomicBool>,
    closed: bool,
}

impl InputStream for CpalInputStream {
    fn windows(&mut self) -> Option<mpsc::Receiver<CaptureWindow>> {
        self.windows.take()
    }

    fn close(&mut self) {
        if !self.closed {
            self.stop.store(true, Ordering::SeqCst);
            self.closed = true;
            info!("Microphone released");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_input_thread(
    spec: InputSpec,
    window_tx: mpsc::Sender<CaptureWindow>,
    stop: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<(), DeviceError>>,
) {
    let build = move || -> Result<cpal::Stream, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(DeviceError::NoInputDevice)?;
        let supported = device
            .default_input_config()
            .map_err(|e| DeviceError::InputUnavailable(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let channels = config.channels as usize;
        let native_rate = config.sample_rate.0;

        info!(
            "Microphone acquired: {}Hz {}ch ({:?}), delivering {}-sample windows at {}Hz",
            native_rate, channels, sample_format, spec.window, spec.sample_rate
        );

        let mut agg = WindowAggregator::new(
            channels,
            native_rate,
            spec.sample_rate,
            spec.window,
            window_tx,
        );
        let err_fn = |e| warn!("Input stream error: {}", e);

        let stream = match sample_format {
            SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| agg.push(data),
                    err_fn,
                    None,
                )
                .map_err(|e| DeviceError::InputUnavailable(e.to_string()))?,
            SampleFormat::I16 => device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let converted: Vec<f32> =
                            data.iter().map(|&s| s as f32 / 32768.0).collect();
                        agg.push(&converted);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| DeviceError::InputUnavailable(e.to_string()))?,
            other => {
                return Err(DeviceError::InputUnavailable(format!(
                    "unsupported input sample format {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| DeviceError::InputUnavailable(e.to_string()))?;
        Ok(stream)
    };

    match build() {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

/// Downmixes, resamples, and windows the raw capture callback data.
struct WindowAggregator {
    channels: usize,
    /// Native samples consumed per emitted sample
    ratio: f64,
    /// Mono samples at the native rate, not yet consumed
    pending: Vec<f32>,
    /// Fractional read position into `pending`
    pos: f64,
    window: Vec<f32>,
    window_len: usize,
    tx: mpsc::Sender<CaptureWindow>,
    dropped: u64,
}

impl WindowAggregator {
    fn new(
        channels: usize,
        native_rate: u32,
        target_rate: u32,
        window_len: usize,
        tx: mpsc::Sender<CaptureWindow>,
    ) -> Self {
        Self {
            channels: channels.max(1),
            ratio: native_rate as f64 / target_rate as f64,
            pending: Vec::new(),
            pos: 0.0,
            window: Vec::with_capacity(window_len),
            window_len,
            tx,
            dropped: 0,
        }
    }

    fn push(&mut self, interleaved: &[f32]) {
        for frame in interleaved.chunks_exact(self.channels) {
            let sum: f32 = frame.iter().sum();
            self.pending.push(sum / self.channels as f32);
        }

        while (self.pos.floor() as usize) + 1 < self.pending.len() {
            let base = self.pos.floor() as usize;
            let frac = (self.pos - base as f64) as f32;
            let sample = self.pending[base] * (1.0 - frac) + self.pending[base + 1] * frac;
            self.pos += self.ratio;

            self.window.push(sample);
            if self.window.len() >= self.window_len {
                let samples =
                    std::mem::replace(&mut self.window, Vec::with_capacity(self.window_len));
                if self.tx.try_send(CaptureWindow { samples }).is_err() {
                    // Consumer is behind or gone; drop the window rather
                    // than block the audio thread.
                    self.dropped += 1;
                }
            }
        }

        let consumed = self.pos.floor() as usize;
        if consumed > 0 {
            self.pending.drain(..consumed);
            self.pos -= consumed as f64;
        }
    }
}

// ============================================================================
// Output
// ============================================================================

pub struct CpalAudioOutput;

impl CpalAudioOutput {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalAudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AudioOutput for CpalAudioOutput {
    async fn open(&self, _sample_rate: u32) -> Result<Box<dyn OutputContext>, DeviceError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = Arc::new(Mutex::new(MixerState::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let shared_thread = Arc::clone(&shared);
        let stop_thread = Arc::clone(&stop);

        std::thread::Builder::new()
            .name("doctalk-speaker".into())
            .spawn(move || run_output_thread(shared_thread, stop_thread, ready_tx))
            .map_err(|e| DeviceError::OutputUnavailable(e.to_string()))?;

        let device_rate = ready_rx
            .await
            .map_err(|_| DeviceError::OutputUnavailable("playback thread exited".into()))??;

        Ok(Box::new(CpalOutputContext {
            shared,
            stop,
            device_rate,
            closed: false,
        }))
    }
}

#[derive(Default)]
struct MixerState {
    /// Frames written since the context opened; the context clock
    frames: u64,
    next_id: u64,
    sources: Vec<OutSource>,
    finished: Vec<SourceId>,
}

struct OutSource {
    id: u64,
    start_frame: u64,
    samples: Vec<f32>,
    pos: usize,
}

fn mix_frame(state: &mut MixerState) -> f32 {
    let frame = state.frames;
    let mut acc = 0.0f32;
    let mut i = 0;
    while i < state.sources.len() {
        let src = &mut state.sources[i];
        if frame >= src.start_frame {
            if let Some(&sample) = src.samples.get(src.pos) {
                acc += sample;
                src.pos += 1;
            }
            if src.pos >= src.samples.len() {
                let done = state.sources.swap_remove(i);
                state.finished.push(SourceId(done.id));
                continue;
            }
        }
        i += 1;
    }
    state.frames += 1;
    acc.clamp(-1.0, 1.0)
}

fn run_output_thread(
    shared: Arc<Mutex<MixerState>>,
    stop: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<u32, DeviceError>>,
) {
    let build = move || -> Result<(cpal::Stream, u32), DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(DeviceError::NoOutputDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| DeviceError::OutputUnavailable(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let channels = config.channels as usize;
        let device_rate = config.sample_rate.0;

        info!(
            "Output context opened: {}Hz {}ch ({:?})",
            device_rate, channels, sample_format
        );

        let err_fn = |e| warn!("Output stream error: {}", e);
        let mixer = shared;

        let stream = match sample_format {
            SampleFormat::F32 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        if let Ok(mut state) = mixer.lock() {
                            for frame in data.chunks_mut(channels) {
                                let v = mix_frame(&mut state);
                                frame.fill(v);
                            }
                        } else {
                            data.fill(0.0);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| DeviceError::OutputUnavailable(e.to_string()))?,
            SampleFormat::I16 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        if let Ok(mut state) = mixer.lock() {
                            for frame in data.chunks_mut(channels) {
                                let v = (mix_frame(&mut state) * 32767.0) as i16;
                                frame.fill(v);
                            }
                        } else {
                            data.fill(0);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| DeviceError::OutputUnavailable(e.to_string()))?,
            other => {
                return Err(DeviceError::OutputUnavailable(format!(
                    "unsupported output sample format {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| DeviceError::OutputUnavailable(e.to_string()))?;
        Ok((stream, device_rate))
    };

    match build() {
        Ok((stream, device_rate)) => {
            let _ = ready.send(Ok(device_rate));
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

struct CpalOutputContext {
    shared: Arc<Mutex<MixerState>>,
    stop: Arc<AtomicBool>,
    device_rate: u32,
    closed: bool,
}

impl OutputContext for CpalOutputContext {
    fn clock(&self) -> f64 {
        self.shared
            .lock()
            .map(|s| s.frames as f64 / self.device_rate as f64)
            .unwrap_or(0.0)
    }

    fn begin(&mut self, chunk: &AudioChunk, start_at: f64) -> Result<SourceId, PlaybackError> {
        if self.closed {
            return Err(PlaybackError::ContextClosed);
        }

        let mono = downmix(chunk);
        let samples = resample_linear(&mono, chunk.sample_rate, self.device_rate);
        let start_frame = (start_at * self.device_rate as f64).round() as u64;

        let mut state = self
            .shared
            .lock()
            .map_err(|_| PlaybackError::Device("output mixer poisoned".into()))?;
        let id = state.next_id;
        state.next_id += 1;
        state.sources.push(OutSource {
            id,
            start_frame,
            samples,
            pos: 0,
        });
        Ok(SourceId(id))
    }

    fn stop_source(&mut self, id: SourceId) {
        if let Ok(mut state) = self.shared.lock() {
            state.sources.retain(|s| s.id != id.0);
        }
    }

    fn finished(&mut self) -> Vec<SourceId> {
        self.shared
            .lock()
            .map(|mut s| std::mem::take(&mut s.finished))
            .unwrap_or_default()
    }

    fn close(&mut self) {
        if !self.closed {
            self.stop.store(true, Ordering::SeqCst);
            self.closed = true;
            info!("Output context closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for CpalOutputContext {
    fn drop(&mut self) {
        self.close();
    }
}

/// Average all channels down to mono.
fn downmix(chunk: &AudioChunk) -> Vec<f32> {
    let frames = chunk.frames();
    let n = chunk.channels.len().max(1);
    (0..frames)
        .map(|i| chunk.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
        .collect()
}

/// Linear-interpolation resampler for whole buffers.
fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from as f64 / to as f64;
    let out_len = (samples.len() as u64 * to as u64 / from as u64) as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let base = pos.floor() as usize;
            let frac = (pos - base as f64) as f32;
            let a = samples[base.min(samples.len() - 1)];
            let b = samples[(base + 1).min(samples.len() - 1)];
            a * (1.0 - frac) + b * frac
        })
        .collect()
}
