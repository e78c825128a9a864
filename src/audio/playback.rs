// Gapless playback scheduling
//
// Audio chunks arrive asynchronously and decode at different rates; the
// scheduler keeps a running "next start time" cursor so chunks play
// back-to-back with no overlap and no jitter-induced gaps. Chunks are never
// reordered: the transport delivers them in playback order, and the
// scheduler appends to the cursor tail in arrival order.

use std::collections::HashSet;

use tracing::debug;

use super::codec::AudioChunk;
use super::device::{OutputContext, SourceId};
use crate::error::PlaybackError;

pub struct PlaybackScheduler {
    ctx: Box<dyn OutputContext>,
    /// Next available start time on the output clock, in seconds.
    /// Monotonically non-decreasing until `stop_all` resets it.
    cursor: f64,
    active: HashSet<SourceId>,
}

impl PlaybackScheduler {
    pub fn new(ctx: Box<dyn OutputContext>) -> Self {
        Self {
            ctx,
            cursor: 0.0,
            active: HashSet::new(),
        }
    }

    /// Schedule a chunk at the tail of the cursor.
    ///
    /// After teardown has closed the output context, a late-arriving chunk
    /// (a decode continuation racing `stop_all`) is dropped as a no-op.
    pub fn enqueue(&mut self, chunk: &AudioChunk) -> Result<(), PlaybackError> {
        if self.ctx.is_closed() {
            debug!("Dropping audio chunk scheduled after teardown");
            return Ok(());
        }

        for id in self.ctx.finished() {
            self.active.remove(&id);
        }

        let now = self.ctx.clock();
        let start_at = self.cursor.max(now);
        let id = self.ctx.begin(chunk, start_at)?;
        self.cursor = start_at + chunk.duration();
        self.active.insert(id);

        Ok(())
    }

    /// Force-stop everything currently playing and reset the cursor for a
    /// future conversation. Idempotent.
    pub fn stop_all(&mut self) {
        for id in self.active.drain() {
            self.ctx.stop_source(id);
        }
        self.cursor = 0.0;
    }

    /// Close the owned output context if the platform has not already.
    pub fn close(&mut self) {
        if !self.ctx.is_closed() {
            self.ctx.close();
        }
    }

    /// Number of sources currently registered as playing.
    pub fn active_sources(&mut self) -> usize {
        for id in self.ctx.finished() {
            self.active.remove(&id);
        }
        self.active.len()
    }
}
