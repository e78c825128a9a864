// WebSocket implementation of the live session transport
//
// JSON messages both ways, audio carried as base64 PCM16. A reader task
// translates wire messages into `SessionEvent`s; a writer task drains the
// outbound queue so `send_input` never blocks the capture path.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::messages::{ClientMessage, ServerWireMessage};
use super::{AudioPayload, LiveConfig, LiveConnection, LiveSession, LiveTransport, ServerMessage, SessionEvent};

/// Outbound queue depth. Roughly eight seconds of capture windows; if the
/// socket falls that far behind, windows are dropped rather than buffered.
const OUTBOUND_QUEUE: usize = 32;

pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait::async_trait]
impl LiveTransport for WsTransport {
    async fn open(&self, config: &LiveConfig) -> Result<LiveConnection> {
        info!("Opening live session: {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .context("WebSocket connect failed")?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let setup = ClientMessage::Setup {
            input_sample_rate: config.input_sample_rate,
            output_sample_rate: config.output_sample_rate,
            voice: config.voice.clone(),
            system_preamble: config.system_preamble.clone(),
            transcribe_input: config.transcribe_input,
            transcribe_output: config.transcribe_output,
        };
        let setup_json = serde_json::to_string(&setup)?;
        ws_tx
            .send(Message::Text(setup_json.into()))
            .await
            .context("Failed to send setup message")?;

        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(64);
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if ws_tx.send(msg).await.is_err() || is_close {
                    break;
                }
            }
            let _ = ws_tx.close().await;
            debug!("live session writer task finished");
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(frame)) => {
                        debug!("live session closed by server: {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = event_tx.send(SessionEvent::Error(e.to_string())).await;
                        return;
                    }
                };

                let event = match serde_json::from_str::<ServerWireMessage>(&text) {
                    Ok(ServerWireMessage::SetupComplete) => SessionEvent::Opened,
                    Ok(ServerWireMessage::InputTranscript { text }) => {
                        SessionEvent::Message(ServerMessage::UserTranscript(text))
                    }
                    Ok(ServerWireMessage::OutputTranscript { text }) => {
                        SessionEvent::Message(ServerMessage::ModelTranscript(text))
                    }
                    Ok(ServerWireMessage::TurnComplete) => {
                        SessionEvent::Message(ServerMessage::TurnComplete)
                    }
                    Ok(ServerWireMessage::Audio {
                        data,
                        sample_rate,
                        channels,
                    }) => SessionEvent::Message(ServerMessage::Audio(AudioPayload {
                        data,
                        sample_rate,
                        channels,
                    })),
                    Ok(ServerWireMessage::Error { message }) => SessionEvent::Error(message),
                    Err(e) => {
                        warn!("Ignoring unparseable server message: {}", e);
                        continue;
                    }
                };

                if event_tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = event_tx.send(SessionEvent::Closed).await;
        });

        let session = Arc::new(WsSession {
            out_tx,
            input_sample_rate: config.input_sample_rate,
            tasks: std::sync::Mutex::new(Some((reader, writer))),
        });

        Ok(LiveConnection {
            session,
            events: event_rx,
        })
    }
}

struct WsSession {
    out_tx: mpsc::Sender<Message>,
    input_sample_rate: u32,
    tasks: std::sync::Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

#[async_trait::async_trait]
impl LiveSession for WsSession {
    fn send_input(&self, encoded_pcm: String) -> Result<()> {
        let msg = ClientMessage::Audio {
            data: encoded_pcm,
            sample_rate: self.input_sample_rate,
            channels: 1,
        };
        let json = serde_json::to_string(&msg)?;
        self.out_tx
            .try_send(Message::Text(json.into()))
            .context("Outbound queue full or session closed")?;
        Ok(())
    }

    async fn close(&self) {
        // Best effort; the writer closes the socket when the queue drains.
        let close_queued = self.out_tx.try_send(Message::Close(None)).is_ok();

        let tasks = self.tasks.lock().ok().and_then(|mut guard| guard.take());
        if let Some((reader, writer)) = tasks {
            // Ending the reader drops the event sender, which terminates
            // the dispatch loop's channel.
            reader.abort();
            if !close_queued {
                debug!("live session outbound queue unavailable; aborting writer");
                writer.abort();
                return;
            }
            if let Err(e) = writer.await {
                if !e.is_cancelled() {
                    warn!("live session writer task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.tasks.lock() {
            if let Some((reader, writer)) = guard.take() {
                reader.abort();
                writer.abort();
            }
        }
    }
}
