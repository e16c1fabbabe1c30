//! Owns the single WebSocket connection: frame reassembly, the send
//! mutex, the inbound reader task, and the socket state machine.

mod state;

pub(crate) use state::SocketState;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, protocol::CloseFrame};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::BidiError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;

/// How often `stop` polls socket state while waiting for the peer's close
/// handshake to complete.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct ReaderHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Owns a single WebSocket. Serializes outbound frames under a mutex,
/// runs a dedicated inbound reader, and emits each whole message on the
/// `received` channel handed back by [`Transport::new`].
pub struct Transport {
    config: Config,
    sink: Arc<AsyncMutex<Option<WsSink>>>,
    state: Arc<StdMutex<SocketState>>,
    reader: StdMutex<Option<ReaderHandle>>,
    received_tx: mpsc::Sender<String>,
}

impl Transport {
    /// Builds a transport and the receiving half of its `received(text)`
    /// signal. The caller (the [`crate::Dispatcher`]'s inbound loop) owns
    /// the returned receiver exclusively.
    pub fn new(config: Config) -> (Self, mpsc::Receiver<String>) {
        let (received_tx, received_rx) = mpsc::channel(1024);
        (
            Self {
                config,
                sink: Arc::new(AsyncMutex::new(None)),
                state: Arc::new(StdMutex::new(SocketState::None)),
                reader: StdMutex::new(None),
                received_tx,
            },
            received_rx,
        )
    }

    fn state(&self) -> SocketState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, new: SocketState) {
        *self.state.lock().unwrap() = new;
    }

    /// Opens a client WebSocket to `url`, retrying "server not ready"
    /// style failures on a fixed backoff until `startup_timeout` elapses.
    pub async fn start(&self, url: &str) -> Result<(), BidiError> {
        if self.state().is_active() {
            return Err(BidiError::AlreadyStarted);
        }
        // A socket previously driven to Closed/Aborted is replaced below
        // by simply overwriting `self.sink`/`self.state` on success —
        // there is no separate "reset" step to perform first.

        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            match tokio_tungstenite::connect_async(url).await {
                Ok((ws, _response)) => {
                    let (sink, stream) = ws.split();
                    *self.sink.lock().await = Some(sink);
                    self.set_state(SocketState::Open);

                    let cancel = CancellationToken::new();
                    let join = spawn_reader(
                        stream,
                        Arc::clone(&self.sink),
                        Arc::clone(&self.state),
                        self.received_tx.clone(),
                        cancel.clone(),
                    );
                    *self.reader.lock().unwrap() =
                        Some(ReaderHandle { cancel, join });

                    tracing::debug!(url, "transport started");
                    return Ok(());
                }
                Err(e) if is_retryable(&e) && Instant::now() < deadline => {
                    tracing::debug!(
                        error = %e,
                        "remote end not ready yet, retrying"
                    );
                    tokio::time::sleep(self.config.startup_retry_interval)
                        .await;
                }
                Err(e) if Instant::now() >= deadline => {
                    tracing::warn!(
                        error = %e,
                        "startup timeout exceeded"
                    );
                    return Err(BidiError::StartupTimeout);
                }
                Err(e) => {
                    return Err(BidiError::ConnectionAborted(e.to_string()));
                }
            }
        }
    }

    /// Sends one complete text frame. At most one send is ever in flight.
    pub async fn send(&self, text: String) -> Result<(), BidiError> {
        let mut guard =
            match tokio::time::timeout(self.config.data_timeout, self.sink.lock())
                .await
            {
                Ok(guard) => guard,
                Err(_) => return Err(BidiError::SendContention),
            };
        let Some(sink) = guard.as_mut() else {
            return Err(BidiError::NotStarted);
        };
        sink.send(tungstenite::Message::text(text))
            .await
            .map_err(|e| BidiError::ConnectionAborted(e.to_string()))
    }

    /// Initiates a graceful close (if the socket is open), waits for the
    /// peer's close handshake up to `shutdown_timeout`, then cancels and
    /// joins the inbound reader. Idempotent: never fails.
    pub async fn stop(&self) {
        if self.state().can_close() {
            if let Ok(mut guard) = tokio::time::timeout(
                self.config.data_timeout,
                self.sink.lock(),
            )
            .await
            {
                if let Some(sink) = guard.as_mut() {
                    if let Err(e) = sink.send(tungstenite::Message::Close(None)).await
                    {
                        tracing::warn!(error = %e, "failed to send close frame");
                    }
                }
            }
            self.set_state(SocketState::CloseSent);

            let deadline = Instant::now() + self.config.shutdown_timeout;
            while Instant::now() < deadline {
                if matches!(
                    self.state(),
                    SocketState::Closed | SocketState::Aborted
                ) {
                    break;
                }
                tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
            }
            if self.state().can_close() {
                tracing::warn!(
                    "peer did not complete close handshake within shutdown_timeout"
                );
            }
        } else {
            tracing::debug!("stop called on an already-closed transport");
        }

        let handle = self.reader.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.join.await {
                tracing::warn!(error = %e, "inbound reader task panicked");
            }
        }

        *self.sink.lock().await = None;
        self.set_state(SocketState::Closed);
    }
}

fn spawn_reader(
    mut stream: futures_util::stream::SplitStream<WsStream>,
    sink: Arc<AsyncMutex<Option<WsSink>>>,
    state: Arc<StdMutex<SocketState>>,
    received_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("inbound reader cancelled");
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    let text = text.to_string();
                    if !text.is_empty() {
                        if received_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(tungstenite::Message::Binary(bytes))) => {
                    match String::from_utf8(bytes.to_vec()) {
                        Ok(text) if !text.is_empty() => {
                            if received_tx.send(text).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                "inbound binary frame was not valid UTF-8, dropping"
                            );
                        }
                    }
                }
                Some(Ok(tungstenite::Message::Ping(_)))
                | Some(Ok(tungstenite::Message::Pong(_)))
                | Some(Ok(tungstenite::Message::Frame(_))) => continue,
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    *state.lock().unwrap() = SocketState::CloseReceived;
                    acknowledge_close(&sink, frame).await;
                    *state.lock().unwrap() = SocketState::Closed;
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "transport read error");
                    *state.lock().unwrap() = SocketState::Aborted;
                    break;
                }
                None => {
                    *state.lock().unwrap() = SocketState::Closed;
                    break;
                }
            }
        }
    })
}

async fn acknowledge_close(
    sink: &Arc<AsyncMutex<Option<WsSink>>>,
    frame: Option<CloseFrame>,
) {
    let mut guard = sink.lock().await;
    if let Some(sink) = guard.as_mut() {
        if let Err(e) = sink.send(tungstenite::Message::Close(frame)).await {
            tracing::debug!(error = %e, "failed to acknowledge peer close");
        }
    }
}

fn is_retryable(e: &tungstenite::Error) -> bool {
    match e {
        tungstenite::Error::Io(io) => matches!(
            io.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::NotConnected
        ),
        tungstenite::Error::Http(response) => {
            matches!(response.status().as_u16(), 502 | 503 | 504)
        }
        _ => false,
    }
}
