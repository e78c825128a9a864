// Capture bridge: microphone windows -> live session
//
// Consumes the fixed-size window stream tapped from the input device,
// transport-encodes each window, and hands it to the session. Send failures
// drop the window and keep the pipeline running; the bridge must never
// stall capture.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::codec;
use super::device::CaptureWindow;
use crate::transport::LiveSession;

/// Owns the attachment between the input window stream and the session.
/// Does not own the input stream itself; that belongs to the engine.
pub struct CaptureBridge {
    task: Option<JoinHandle<()>>,
}

impl CaptureBridge {
    /// Attach the window consumer and begin forwarding.
    pub fn attach(mut windows: mpsc::Receiver<CaptureWindow>, sink: Arc<dyn LiveSession>) -> Self {
        let task = tokio::spawn(async move {
            debug!("capture bridge attached");
            let mut forwarded: u64 = 0;
            let mut dropped: u64 = 0;

            while let Some(window) = windows.recv().await {
                let pcm = codec::samples_to_transport_bytes(&window.samples);
                let payload = codec::encode_for_transport(&pcm);
                match sink.send_input(payload) {
                    Ok(()) => forwarded += 1,
                    Err(e) => {
                        dropped += 1;
                        warn!("Dropping capture window: {}", e);
                    }
                }
            }

            debug!(
                "capture window stream ended (forwarded={}, dropped={})",
                forwarded, dropped
            );
        });

        Self { task: Some(task) }
    }

    /// Detach the consumer. Idempotent; a detached bridge stays detached.
    pub fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("capture bridge detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for CaptureBridge {
    fn drop(&mut self) {
        self.detach();
    }
}
