use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::config::ConversationConfig;
use super::stats::SessionStats;
use crate::audio::capture::CaptureBridge;
use crate::audio::codec;
use crate::audio::device::{AudioInput, AudioOutput, CaptureWindow, InputSpec, InputStream};
use crate::audio::playback::PlaybackScheduler;
use crate::error::SessionError;
use crate::transcript::{TranscriptAssembler, TranscriptEntry};
use crate::transport::{LiveConfig, LiveSession, LiveTransport, ServerMessage, SessionEvent};

/// Lifecycle of the single live conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
}

/// Owns the live session handle and every device resource it depends on.
///
/// At most one conversation exists at a time. `start` is valid only from
/// `Idle`; `stop` is callable from any state, idempotent, and never fails.
/// Ownership of the acquired resources lives in a single slot that `stop`
/// takes out atomically, so re-entrant calls and continuations resuming
/// after a suspension point see "nothing to do".
pub struct ConversationEngine {
    config: ConversationConfig,
    input: Arc<dyn AudioInput>,
    output: Arc<dyn AudioOutput>,
    transport: Arc<dyn LiveTransport>,
    inner: Arc<Mutex<EngineInner>>,
    state_tx: watch::Sender<SessionState>,
}

struct EngineInner {
    state: SessionState,
    /// Bumped on every start; continuations check it before touching the
    /// resource slot
    epoch: u64,
    active: Option<ActiveConversation>,
    conversation_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    /// Set at teardown; freezes the reported duration while idle
    ended_at: Option<DateTime<Utc>>,
    transcript: Vec<TranscriptEntry>,
    last_error: Option<String>,
}

/// Every resource owned by one live conversation.
struct ActiveConversation {
    epoch: u64,
    /// None while the remote open is still in flight
    session: Option<Arc<dyn LiveSession>>,
    input_stream: Box<dyn InputStream>,
    /// Held until the session confirms open, then moved into the bridge
    windows: Option<mpsc::Receiver<CaptureWindow>>,
    bridge: Option<CaptureBridge>,
    playback: PlaybackScheduler,
    assembler: TranscriptAssembler,
    dispatch: Option<JoinHandle<()>>,
}

impl ConversationEngine {
    pub fn new(
        config: ConversationConfig,
        input: Arc<dyn AudioInput>,
        output: Arc<dyn AudioOutput>,
        transport: Arc<dyn LiveTransport>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            input,
            output,
            transport,
            inner: Arc::new(Mutex::new(EngineInner {
                state: SessionState::Idle,
                epoch: 0,
                active: None,
                conversation_id: None,
                started_at: None,
                ended_at: None,
                transcript: Vec::new(),
                last_error: None,
            })),
            state_tx,
        }
    }

    /// Start a conversation. Valid only from `Idle`.
    pub async fn start(self: Arc<Self>) -> Result<(), SessionError> {
        let epoch = {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Idle {
                return Err(SessionError::AlreadyActive);
            }
            inner.state = SessionState::Connecting;
            inner.epoch += 1;
            inner.last_error = None;
            inner.epoch
        };
        self.publish_state(SessionState::Connecting);

        let conversation_id = format!("conv-{}", Uuid::new_v4());
        info!("Starting conversation: {}", conversation_id);

        // Microphone first. Nothing is allocated yet, so a failure here
        // needs no teardown.
        let spec = InputSpec {
            sample_rate: self.config.input_sample_rate,
            window: self.config.capture_window,
        };
        let mut input_stream = match self.input.acquire(spec).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Microphone acquisition failed: {}", e);
                self.abandon_connect(epoch, Some(e.to_string())).await;
                return Err(SessionError::Device(e));
            }
        };
        let windows = input_stream.windows();

        let ctx = match self.output.open(self.config.output_sample_rate).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!("Output context open failed: {}", e);
                input_stream.close();
                self.abandon_connect(epoch, Some(e.to_string())).await;
                return Err(SessionError::Device(e));
            }
        };

        // Park the devices in the shared slot before awaiting the remote
        // open, so a concurrent stop() can release them.
        {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Connecting || inner.epoch != epoch {
                info!("Conversation cancelled before connect; releasing devices");
                input_stream.close();
                let mut playback = PlaybackScheduler::new(ctx);
                playback.close();
                return Ok(());
            }
            inner.active = Some(ActiveConversation {
                epoch,
                session: None,
                input_stream,
                windows,
                bridge: None,
                playback: PlaybackScheduler::new(ctx),
                assembler: TranscriptAssembler::new(),
                dispatch: None,
            });
            inner.conversation_id = Some(conversation_id);
            inner.started_at = Some(Utc::now());
            inner.ended_at = None;
            inner.transcript.clear();
        }

        let connection = match self.transport.open(&self.live_config()).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Live session open failed: {}", e);
                // Releases the microphone and contexts parked above, but
                // only if this start still owns them; a stop() during the
                // open already released everything, and a newer
                // conversation may own the slot by now.
                if !self.stop_if_owner(epoch).await {
                    info!("Conversation stopped during connect; discarding stale open failure");
                    return Ok(());
                }
                let message = e.to_string();
                self.inner.lock().await.last_error = Some(message.clone());
                return Err(SessionError::Open(message));
            }
        };

        // Re-check ownership: stop() may have run while the open was in
        // flight. In that case the teardown is already complete and the
        // fresh handle is the only thing left to release.
        {
            let mut inner = self.inner.lock().await;
            let owned = matches!(&inner.active, Some(a) if a.epoch == epoch);
            if !owned {
                drop(inner);
                info!("Conversation stopped during connect; closing fresh session handle");
                connection.session.close().await;
                return Ok(());
            }

            let dispatch = tokio::spawn(Self::dispatch_loop(
                Arc::clone(&self),
                epoch,
                connection.events,
            ));
            if let Some(active) = inner.active.as_mut() {
                active.session = Some(Arc::clone(&connection.session));
                active.dispatch = Some(dispatch);
            }
        }

        info!("Live session opened; waiting for ready confirmation");
        Ok(())
    }

    /// Stop the conversation and release every owned resource.
    ///
    /// Callable from any state; repeated and concurrent calls are no-ops.
    /// Teardown failures are logged, never surfaced.
    pub async fn stop(&self) {
        let taken = {
            let mut inner = self.inner.lock().await;
            match inner.active.take() {
                Some(active) => {
                    inner.state = SessionState::Closing;
                    active
                }
                None => {
                    // Covers stop-before-start and a stop racing an
                    // in-flight connect that has not parked its devices
                    // yet; flipping the state makes the start continuation
                    // cancel itself.
                    if inner.state == SessionState::Connecting {
                        inner.state = SessionState::Idle;
                        drop(inner);
                        self.publish_state(SessionState::Idle);
                    }
                    return;
                }
            }
        };
        self.teardown(taken).await;
    }

    /// Stop only if the conversation started with `epoch` still owns the
    /// resource slot.
    ///
    /// Continuations resuming after a suspension point use this instead of
    /// `stop`, so a stale failure or late event cannot tear down a newer
    /// conversation. Returns whether a teardown happened.
    async fn stop_if_owner(&self, epoch: u64) -> bool {
        let taken = {
            let mut inner = self.inner.lock().await;
            match &inner.active {
                Some(active) if active.epoch == epoch => {
                    inner.state = SessionState::Closing;
                    inner.active.take()
                }
                _ => None,
            }
        };
        match taken {
            Some(taken) => {
                self.teardown(taken).await;
                true
            }
            None => false,
        }
    }

    async fn teardown(&self, taken: ActiveConversation) {
        self.publish_state(SessionState::Closing);
        info!("Stopping conversation");

        let ActiveConversation {
            session,
            mut input_stream,
            windows,
            bridge,
            mut playback,
            dispatch,
            ..
        } = taken;

        drop(windows);
        if let Some(session) = session {
            session.close().await;
        }
        input_stream.close();
        if let Some(mut bridge) = bridge {
            bridge.detach();
        }
        playback.stop_all();
        playback.close();

        {
            let mut inner = self.inner.lock().await;
            inner.state = SessionState::Idle;
            inner.ended_at = Some(Utc::now());
        }
        self.publish_state(SessionState::Idle);
        info!("Conversation stopped");

        // Last: the dispatch task may be the caller of this function, so
        // everything above must already be done when it is cancelled.
        if let Some(dispatch) = dispatch {
            dispatch.abort();
        }
    }

    /// Start if idle, stop otherwise.
    pub async fn toggle(self: Arc<Self>) -> Result<(), SessionError> {
        if self.state() == SessionState::Idle {
            self.start().await
        } else {
            self.stop().await;
            Ok(())
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Live state view for UI code that wants change notifications.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Finalized transcript gathered so far; survives `stop`.
    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.inner.lock().await.transcript.clone()
    }

    pub async fn stats(&self) -> SessionStats {
        let inner = self.inner.lock().await;
        let duration_secs = match (inner.started_at, inner.ended_at) {
            (Some(start), Some(end)) => {
                end.signed_duration_since(start).num_milliseconds() as f64 / 1000.0
            }
            (Some(start), None) => {
                Utc::now().signed_duration_since(start).num_milliseconds() as f64 / 1000.0
            }
            _ => 0.0,
        };
        SessionStats {
            state: inner.state,
            conversation_id: inner.conversation_id.clone(),
            started_at: inner.started_at,
            duration_secs,
            transcript_entries: inner.transcript.len(),
            last_error: inner.last_error.clone(),
        }
    }

    fn live_config(&self) -> LiveConfig {
        LiveConfig {
            input_sample_rate: self.config.input_sample_rate,
            output_sample_rate: self.config.output_sample_rate,
            voice: self.config.voice.clone(),
            system_preamble: self.config.system_preamble.clone(),
            transcribe_input: true,
            transcribe_output: true,
        }
    }

    fn publish_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    /// Roll back a `Connecting` state that never parked resources.
    async fn abandon_connect(&self, epoch: u64, error: Option<String>) {
        let mut inner = self.inner.lock().await;
        if inner.epoch == epoch && inner.state == SessionState::Connecting && inner.active.is_none()
        {
            inner.state = SessionState::Idle;
            if error.is_some() {
                inner.last_error = error;
            }
            drop(inner);
            self.publish_state(SessionState::Idle);
        }
    }

    /// Single consumer of the session's event stream.
    async fn dispatch_loop(
        engine: Arc<ConversationEngine>,
        epoch: u64,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Opened => {
                    let mut inner = engine.inner.lock().await;
                    let Some(active) = inner.active.as_mut().filter(|a| a.epoch == epoch) else {
                        break;
                    };
                    if active.bridge.is_none() {
                        if let (Some(windows), Some(session)) =
                            (active.windows.take(), active.session.clone())
                        {
                            active.bridge = Some(CaptureBridge::attach(windows, session));
                        }
                    }
                    inner.state = SessionState::Active;
                    drop(inner);
                    engine.publish_state(SessionState::Active);
                    info!("Conversation active");
                }

                SessionEvent::Message(message) => {
                    let mut inner = engine.inner.lock().await;
                    let Some(active) = inner.active.as_mut().filter(|a| a.epoch == epoch) else {
                        break;
                    };
                    match message {
                        ServerMessage::UserTranscript(text) => {
                            active.assembler.append_user_fragment(&text);
                        }
                        ServerMessage::ModelTranscript(text) => {
                            active.assembler.append_model_fragment(&text);
                        }
                        ServerMessage::TurnComplete => {
                            let entries = active.assembler.complete_turn();
                            if !entries.is_empty() {
                                info!("Turn complete: {} transcript entries", entries.len());
                            }
                            inner.transcript.extend(entries);
                        }
                        ServerMessage::Audio(payload) => {
                            let decoded = codec::decode_from_transport(&payload.data).and_then(
                                |bytes| {
                                    codec::transport_bytes_to_samples(
                                        &bytes,
                                        payload.sample_rate,
                                        payload.channels,
                                    )
                                },
                            );
                            match decoded {
                                Ok(chunk) => {
                                    if let Err(e) = active.playback.enqueue(&chunk) {
                                        warn!("Dropping audio chunk: {}", e);
                                    }
                                }
                                Err(e) => {
                                    warn!("Dropping malformed audio chunk: {}", e);
                                }
                            }
                        }
                    }
                }

                SessionEvent::Error(message) => {
                    warn!("Live session error: {}", message);
                    {
                        let mut inner = engine.inner.lock().await;
                        if !matches!(&inner.active, Some(a) if a.epoch == epoch) {
                            break;
                        }
                        inner.last_error = Some(message);
                    }
                    engine.stop_if_owner(epoch).await;
                    break;
                }

                SessionEvent::Closed => {
                    info!("Live session closed by remote");
                    engine.stop_if_owner(epoch).await;
                    break;
                }
            }
        }
    }
}
