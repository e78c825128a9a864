// Integration tests for the conversation engine lifecycle
//
// Fake device and transport implementations stand in for cpal and the
// WebSocket service so lifecycle ordering, cancellation, and teardown can
// be exercised deterministically.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::sleep;

use doctalk::audio::{
    encode_for_transport, samples_to_transport_bytes, AudioChunk, AudioInput, AudioOutput,
    CaptureWindow, InputSpec, InputStream, OutputContext, SourceId,
};
use doctalk::error::{DeviceError, PlaybackError, SessionError};
use doctalk::transport::{
    AudioPayload, LiveConfig, LiveConnection, LiveSession, LiveTransport, ServerMessage,
    SessionEvent,
};
use doctalk::{ConversationConfig, ConversationEngine, SessionState, Speaker};

// ============================================================================
// Fakes
// ============================================================================

struct FakeInput {
    fail: bool,
    mic_closed: Arc<AtomicBool>,
    window_tx: Arc<Mutex<Option<mpsc::Sender<CaptureWindow>>>>,
}

#[async_trait::async_trait]
impl AudioInput for FakeInput {
    async fn acquire(&self, _spec: InputSpec) -> Result<Box<dyn InputStream>, DeviceError> {
        if self.fail {
            return Err(DeviceError::NoInputDevice);
        }
        let (tx, rx) = mpsc::channel(8);
        *self.window_tx.lock().unwrap() = Some(tx.clone());
        self.mic_closed.store(false, Ordering::SeqCst);
        Ok(Box::new(FakeInputStream {
            windows: Some(rx),
            keepalive: Some(tx),
            closed: Arc::clone(&self.mic_closed),
        }))
    }
}

struct FakeInputStream {
    windows: Option<mpsc::Receiver<CaptureWindow>>,
    keepalive: Option<mpsc::Sender<CaptureWindow>>,
    closed: Arc<AtomicBool>,
}

impl InputStream for FakeInputStream {
    fn windows(&mut self) -> Option<mpsc::Receiver<CaptureWindow>> {
        self.windows.take()
    }

    fn close(&mut self) {
        self.keepalive = None;
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeOutput {
    ctx_closed: Arc<AtomicBool>,
    begun: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl AudioOutput for FakeOutput {
    async fn open(&self, _sample_rate: u32) -> Result<Box<dyn OutputContext>, DeviceError> {
        self.ctx_closed.store(false, Ordering::SeqCst);
        Ok(Box::new(FakeOutputContext {
            closed: Arc::clone(&self.ctx_closed),
            begun: Arc::clone(&self.begun),
            next_id: 0,
        }))
    }
}

struct FakeOutputContext {
    closed: Arc<AtomicBool>,
    begun: Arc<AtomicUsize>,
    next_id: u64,
}

impl OutputContext for FakeOutputContext {
    fn clock(&self) -> f64 {
        0.0
    }

    fn begin(&mut self, _chunk: &AudioChunk, _start_at: f64) -> Result<SourceId, PlaybackError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlaybackError::ContextClosed);
        }
        self.begun.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id;
        self.next_id += 1;
        Ok(SourceId(id))
    }

    fn stop_source(&mut self, _id: SourceId) {}

    fn finished(&mut self) -> Vec<SourceId> {
        Vec::new()
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    closed: AtomicBool,
    inputs: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl LiveSession for FakeSession {
    fn send_input(&self, encoded_pcm: String) -> anyhow::Result<()> {
        self.inputs.lock().unwrap().push(encoded_pcm);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FakeTransport {
    /// Blocks the first open until notified; later opens pass through
    gate: Option<Arc<Notify>>,
    fail: bool,
    /// The gated first open resolves with an error instead of a session
    gated_open_fails: bool,
    opens: AtomicUsize,
    session: Mutex<Option<Arc<FakeSession>>>,
    events: Mutex<Option<mpsc::Sender<SessionEvent>>>,
}

impl FakeTransport {
    fn auto() -> Self {
        Self {
            gate: None,
            fail: false,
            gated_open_fails: false,
            opens: AtomicUsize::new(0),
            session: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::auto()
        }
    }

    fn gated_failing(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            gated_open_fails: true,
            ..Self::auto()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::auto()
        }
    }

    fn event_sender(&self) -> mpsc::Sender<SessionEvent> {
        self.events
            .lock()
            .unwrap()
            .clone()
            .expect("transport was never opened")
    }

    fn last_session(&self) -> Option<Arc<FakeSession>> {
        self.session.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LiveTransport for FakeTransport {
    async fn open(&self, _config: &LiveConfig) -> anyhow::Result<LiveConnection> {
        if self.fail {
            anyhow::bail!("connection refused");
        }
        if self.opens.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Some(gate) = &self.gate {
                gate.notified().await;
                if self.gated_open_fails {
                    anyhow::bail!("upstream rejected session");
                }
            }
        }

        let (tx, rx) = mpsc::channel(32);
        let session = Arc::new(FakeSession {
            closed: AtomicBool::new(false),
            inputs: Mutex::new(Vec::new()),
        });
        *self.session.lock().unwrap() = Some(Arc::clone(&session));
        *self.events.lock().unwrap() = Some(tx.clone());

        // Handshake confirmation
        let _ = tx.send(SessionEvent::Opened).await;

        Ok(LiveConnection {
            session,
            events: rx,
        })
    }
}

// ============================================================================
// Fixture & helpers
// ============================================================================

struct Fixture {
    engine: Arc<ConversationEngine>,
    transport: Arc<FakeTransport>,
    mic_closed: Arc<AtomicBool>,
    ctx_closed: Arc<AtomicBool>,
    chunks_begun: Arc<AtomicUsize>,
    window_tx: Arc<Mutex<Option<mpsc::Sender<CaptureWindow>>>>,
}

fn fixture(transport: FakeTransport, mic_fail: bool) -> Fixture {
    let mic_closed = Arc::new(AtomicBool::new(true));
    let ctx_closed = Arc::new(AtomicBool::new(true));
    let chunks_begun = Arc::new(AtomicUsize::new(0));
    let window_tx = Arc::new(Mutex::new(None));
    let transport = Arc::new(transport);

    let input = Arc::new(FakeInput {
        fail: mic_fail,
        mic_closed: Arc::clone(&mic_closed),
        window_tx: Arc::clone(&window_tx),
    });
    let output = Arc::new(FakeOutput {
        ctx_closed: Arc::clone(&ctx_closed),
        begun: Arc::clone(&chunks_begun),
    });

    let engine = Arc::new(ConversationEngine::new(
        ConversationConfig::default(),
        input,
        output,
        Arc::clone(&transport) as Arc<dyn LiveTransport>,
    ));

    Fixture {
        engine,
        transport,
        mic_closed,
        ctx_closed,
        chunks_begun,
        window_tx,
    }
}

async fn wait_for_state(engine: &Arc<ConversationEngine>, state: SessionState) {
    for _ in 0..200 {
        if engine.state() == state {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "engine did not reach {:?} (currently {:?})",
        state,
        engine.state()
    );
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_stop_is_idempotent_even_before_start() {
    let fx = fixture(FakeTransport::auto(), false);

    fx.engine.stop().await;
    fx.engine.stop().await;

    assert_eq!(fx.engine.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_start_then_stop_releases_all_resources() {
    let fx = fixture(FakeTransport::auto(), false);

    fx.engine.clone().start().await.unwrap();
    wait_for_state(&fx.engine, SessionState::Active).await;

    fx.engine.stop().await;

    assert_eq!(fx.engine.state(), SessionState::Idle);
    assert!(fx.mic_closed.load(Ordering::SeqCst), "microphone not released");
    assert!(fx.ctx_closed.load(Ordering::SeqCst), "output context not closed");
    let session = fx.transport.last_session().expect("session was opened");
    assert!(session.closed.load(Ordering::SeqCst), "session not closed");

    // Second stop is a no-op
    fx.engine.stop().await;
    assert_eq!(fx.engine.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_second_start_rejected_while_active() {
    let fx = fixture(FakeTransport::auto(), false);

    fx.engine.clone().start().await.unwrap();
    wait_for_state(&fx.engine, SessionState::Active).await;

    let result = fx.engine.clone().start().await;
    assert!(matches!(result, Err(SessionError::AlreadyActive)));

    fx.engine.stop().await;
}

#[tokio::test]
async fn test_microphone_failure_surfaces_device_error() {
    let fx = fixture(FakeTransport::auto(), true);

    let result = fx.engine.clone().start().await;
    assert!(matches!(result, Err(SessionError::Device(_))));
    assert_eq!(fx.engine.state(), SessionState::Idle);
    // Nothing was opened, so nothing to release
    assert!(fx.transport.last_session().is_none());
}

#[tokio::test]
async fn test_open_failure_releases_acquired_devices() {
    let fx = fixture(FakeTransport::failing(), false);

    let result = fx.engine.clone().start().await;
    assert!(matches!(result, Err(SessionError::Open(_))));
    assert_eq!(fx.engine.state(), SessionState::Idle);
    assert!(fx.mic_closed.load(Ordering::SeqCst), "microphone not released");
    assert!(fx.ctx_closed.load(Ordering::SeqCst), "output context not closed");
}

#[tokio::test]
async fn test_stop_during_connect_cancels_cleanly() {
    let gate = Arc::new(Notify::new());
    let fx = fixture(FakeTransport::gated(Arc::clone(&gate)), false);

    let handle = tokio::spawn(fx.engine.clone().start());

    // Let start() acquire devices and block on the pending open
    wait_until("devices acquired", || {
        fx.window_tx.lock().unwrap().is_some()
    })
    .await;
    sleep(Duration::from_millis(20)).await;
    assert_eq!(fx.engine.state(), SessionState::Connecting);

    fx.engine.stop().await;
    assert_eq!(fx.engine.state(), SessionState::Idle);
    assert!(fx.mic_closed.load(Ordering::SeqCst), "microphone not released");
    assert!(fx.ctx_closed.load(Ordering::SeqCst), "output context not closed");

    // Release the in-flight open; its continuation must only close the
    // fresh handle
    gate.notify_one();
    handle.await.unwrap().unwrap();

    if let Some(session) = fx.transport.last_session() {
        wait_until("fresh session handle closed", || {
            session.closed.load(Ordering::SeqCst)
        })
        .await;
        assert!(
            session.inputs.lock().unwrap().is_empty(),
            "capture must never attach to a cancelled session"
        );
    }
    assert_eq!(fx.engine.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_stale_failed_open_leaves_new_conversation_untouched() {
    let gate = Arc::new(Notify::new());
    let fx = fixture(FakeTransport::gated_failing(Arc::clone(&gate)), false);

    let first = tokio::spawn(fx.engine.clone().start());
    wait_until("devices acquired", || {
        fx.window_tx.lock().unwrap().is_some()
    })
    .await;
    sleep(Duration::from_millis(20)).await;
    assert_eq!(fx.engine.state(), SessionState::Connecting);

    fx.engine.stop().await;
    assert_eq!(fx.engine.state(), SessionState::Idle);

    // Second conversation; its open passes straight through
    fx.engine.clone().start().await.unwrap();
    wait_for_state(&fx.engine, SessionState::Active).await;

    // The first open now resolves with an error. Its continuation owns
    // nothing anymore and must leave the second conversation alone.
    gate.notify_one();
    let result = first.await.unwrap();
    assert!(result.is_ok(), "cancelled start must return quietly");

    sleep(Duration::from_millis(50)).await;
    assert_eq!(
        fx.engine.state(),
        SessionState::Active,
        "stale failed open must not change the new conversation's state"
    );
    assert!(
        !fx.mic_closed.load(Ordering::SeqCst),
        "microphone must stay open"
    );
    assert!(
        !fx.ctx_closed.load(Ordering::SeqCst),
        "output context must stay open"
    );
    assert!(fx.engine.stats().await.last_error.is_none());

    fx.engine.stop().await;
}

#[tokio::test]
async fn test_late_events_for_a_stopped_conversation_go_nowhere() {
    let fx = fixture(FakeTransport::auto(), false);

    fx.engine.clone().start().await.unwrap();
    wait_for_state(&fx.engine, SessionState::Active).await;
    let old_events = fx.transport.event_sender();

    fx.engine.stop().await;
    wait_until("old event channel disconnected", || old_events.is_closed()).await;

    fx.engine.clone().start().await.unwrap();
    wait_for_state(&fx.engine, SessionState::Active).await;

    // The stopped conversation's dispatch task is gone; its events are
    // undeliverable and the new conversation never sees them
    assert!(old_events
        .send(SessionEvent::Error("stale".to_string()))
        .await
        .is_err());

    sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.engine.state(), SessionState::Active);
    assert!(!fx.mic_closed.load(Ordering::SeqCst));
    assert!(fx.engine.stats().await.last_error.is_none());

    fx.engine.stop().await;
}

#[tokio::test]
async fn test_error_event_tears_down_session() {
    let fx = fixture(FakeTransport::auto(), false);

    fx.engine.clone().start().await.unwrap();
    wait_for_state(&fx.engine, SessionState::Active).await;

    fx.transport
        .event_sender()
        .send(SessionEvent::Error("quota exceeded".to_string()))
        .await
        .unwrap();

    wait_for_state(&fx.engine, SessionState::Idle).await;
    assert!(fx.mic_closed.load(Ordering::SeqCst), "microphone not released");
    assert!(fx.ctx_closed.load(Ordering::SeqCst), "output context not closed");

    let stats = fx.engine.stats().await;
    assert!(stats
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("quota exceeded"));
}

#[tokio::test]
async fn test_closed_event_stops_session() {
    let fx = fixture(FakeTransport::auto(), false);

    fx.engine.clone().start().await.unwrap();
    wait_for_state(&fx.engine, SessionState::Active).await;

    fx.transport
        .event_sender()
        .send(SessionEvent::Closed)
        .await
        .unwrap();

    wait_for_state(&fx.engine, SessionState::Idle).await;
    assert!(fx.mic_closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_transcript_assembled_and_preserved_after_teardown() {
    let fx = fixture(FakeTransport::auto(), false);

    fx.engine.clone().start().await.unwrap();
    wait_for_state(&fx.engine, SessionState::Active).await;

    let events = fx.transport.event_sender();
    for message in [
        ServerMessage::UserTranscript("Hel".to_string()),
        ServerMessage::UserTranscript("lo".to_string()),
        ServerMessage::ModelTranscript("Hi".to_string()),
        ServerMessage::TurnComplete,
    ] {
        events.send(SessionEvent::Message(message)).await.unwrap();
    }

    let mut transcript = Vec::new();
    for _ in 0..200 {
        transcript = fx.engine.transcript().await;
        if transcript.len() == 2 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].speaker, Speaker::User);
    assert_eq!(transcript[0].text, "Hello");
    assert_eq!(transcript[1].speaker, Speaker::Model);
    assert_eq!(transcript[1].text, "Hi");

    // Mid-conversation failure keeps the transcript gathered so far
    events
        .send(SessionEvent::Error("boom".to_string()))
        .await
        .unwrap();
    wait_for_state(&fx.engine, SessionState::Idle).await;

    let preserved = fx.engine.transcript().await;
    assert_eq!(preserved.len(), 2);
}

#[tokio::test]
async fn test_audio_messages_reach_playback() {
    let fx = fixture(FakeTransport::auto(), false);

    fx.engine.clone().start().await.unwrap();
    wait_for_state(&fx.engine, SessionState::Active).await;

    let bytes = samples_to_transport_bytes(&vec![0.1; 2400]);
    let payload = AudioPayload {
        data: encode_for_transport(&bytes),
        sample_rate: 24_000,
        channels: 1,
    };
    fx.transport
        .event_sender()
        .send(SessionEvent::Message(ServerMessage::Audio(payload)))
        .await
        .unwrap();

    let begun = Arc::clone(&fx.chunks_begun);
    wait_until("chunk scheduled", || begun.load(Ordering::SeqCst) == 1).await;

    // A malformed payload is dropped without ending the conversation
    fx.transport
        .event_sender()
        .send(SessionEvent::Message(ServerMessage::Audio(AudioPayload {
            data: "***".to_string(),
            sample_rate: 24_000,
            channels: 1,
        })))
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.engine.state(), SessionState::Active);
    assert_eq!(fx.chunks_begun.load(Ordering::SeqCst), 1);

    fx.engine.stop().await;
}

#[tokio::test]
async fn test_capture_windows_reach_session() {
    let fx = fixture(FakeTransport::auto(), false);

    fx.engine.clone().start().await.unwrap();
    wait_for_state(&fx.engine, SessionState::Active).await;

    let tx = fx
        .window_tx
        .lock()
        .unwrap()
        .clone()
        .expect("microphone acquired");
    tx.send(CaptureWindow {
        samples: vec![0.25; 8],
    })
    .await
    .unwrap();

    let session = fx.transport.last_session().expect("session was opened");
    let session_probe = Arc::clone(&session);
    wait_until("window forwarded", || {
        !session_probe.inputs.lock().unwrap().is_empty()
    })
    .await;

    let forwarded = session.inputs.lock().unwrap()[0].clone();
    let decoded = doctalk::audio::decode_from_transport(&forwarded).unwrap();
    assert_eq!(decoded.len(), 16, "8 samples = 16 PCM16 bytes");

    fx.engine.stop().await;
}

#[tokio::test]
async fn test_stats_duration_freezes_after_stop() {
    let fx = fixture(FakeTransport::auto(), false);

    fx.engine.clone().start().await.unwrap();
    wait_for_state(&fx.engine, SessionState::Active).await;
    sleep(Duration::from_millis(30)).await;
    fx.engine.stop().await;

    let first = fx.engine.stats().await.duration_secs;
    sleep(Duration::from_millis(50)).await;
    let second = fx.engine.stats().await.duration_secs;
    assert!(first >= 0.0);
    assert_eq!(first, second, "duration must not grow while idle");
}

#[tokio::test]
async fn test_toggle_starts_and_stops() {
    let fx = fixture(FakeTransport::auto(), false);

    fx.engine.clone().toggle().await.unwrap();
    wait_for_state(&fx.engine, SessionState::Active).await;

    fx.engine.clone().toggle().await.unwrap();
    assert_eq!(fx.engine.state(), SessionState::Idle);
}
