#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of the shared helpers"
)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt as _, StreamExt as _};
use inbox_bridge::Result;
use inbox_bridge::config::ConnectionParams;
use inbox_bridge::error::Error;
use inbox_bridge::session::{Session, Turn};
use inbox_bridge::ws::config::Config;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;

pub const TOKEN: &str = "am_test_token";
pub const INBOX_ID: &str = "inbox_1";

/// How long tests wait for something that should happen promptly.
pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
enum Command {
    Send(String),
    Close,
    /// Drop the TCP connection without a closing handshake
    Abort,
}

/// Mock notification server.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast commands to ALL connected clients
    command_tx: broadcast::Sender<Command>,
    /// Receives text frames sent by clients (the subscribe messages)
    subscription_rx: mpsc::UnboundedReceiver<String>,
    /// One item per client connection that has gone away
    closed_rx: mpsc::UnboundedReceiver<()>,
    /// Authorization headers seen on upgrade requests
    auth_headers: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
    stop: CancellationToken,
}

impl MockWsServer {
    /// Start a server that reads client frames (and so answers PINGs).
    pub async fn start() -> Self {
        Self::start_with(false).await
    }

    /// Start a server that never reads from its clients.
    pub async fn start_silent() -> Self {
        Self::start_with(true).await
    }

    async fn start_with(silent: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<Command>(100);
        let (subscription_tx, subscription_rx) = mpsc::unbounded_channel::<String>();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel::<()>();
        let auth_headers = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let stop = CancellationToken::new();

        let stopped = stop.clone();
        let commands = command_tx.clone();
        let headers = Arc::clone(&auth_headers);
        let accepted_count = Arc::clone(&accepted);

        tokio::spawn(async move {
            loop {
                let incoming = tokio::select! {
                    biased;
                    () = stopped.cancelled() => break,
                    incoming = listener.accept() => incoming,
                };
                let Ok((stream, _)) = incoming else {
                    break;
                };

                let headers = Arc::clone(&headers);
                let callback = move |request: &Request, response: Response| {
                    let auth = request
                        .headers()
                        .get(AUTHORIZATION)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default()
                        .to_owned();
                    headers
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(auth.clone());

                    if auth == format!("Bearer {TOKEN}") {
                        Ok(response)
                    } else {
                        let mut rejection = ErrorResponse::new(Some("unauthorized".to_owned()));
                        *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                        Err(rejection)
                    }
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };
                accepted_count.fetch_add(1, Ordering::SeqCst);

                let (mut write, mut read) = ws_stream.split();
                let sub_tx = subscription_tx.clone();
                let closed = closed_tx.clone();
                let mut command_rx = commands.subscribe();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next(), if !silent => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(sub_tx.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            command = command_rx.recv() => {
                                match command {
                                    Ok(Command::Send(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Command::Close) => {
                                        drop(write.send(Message::Close(None)).await);
                                        break;
                                    }
                                    Ok(Command::Abort) => break,
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                    drop(closed.send(()));
                });
            }
        });

        Self {
            addr,
            command_tx,
            subscription_rx,
            closed_rx,
            auth_headers,
            accepted,
            stop,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/v0", self.addr)
    }

    /// Send a text frame to all connected clients.
    pub fn send(&self, message: &str) {
        drop(self.command_tx.send(Command::Send(message.to_owned())));
    }

    pub fn send_json(&self, value: &Value) {
        self.send(&value.to_string());
    }

    /// Close every connected client from the server side.
    pub fn close_all(&self) {
        drop(self.command_tx.send(Command::Close));
    }

    /// Drop every client connection without a closing handshake.
    pub fn abort_all(&self) {
        drop(self.command_tx.send(Command::Abort));
    }

    /// Close every client and stop accepting new connections.
    pub fn shutdown(&self) {
        self.stop.cancel();
        self.close_all();
    }

    /// Receive the next subscribe message as JSON.
    pub async fn recv_subscription(&mut self) -> Option<Value> {
        let text = timeout(WAIT, self.subscription_rx.recv())
            .await
            .ok()
            .flatten()?;
        serde_json::from_str(&text).ok()
    }

    /// Whether another subscribe message arrives within `within`.
    pub async fn has_pending_subscription(&mut self, within: Duration) -> bool {
        timeout(within, self.subscription_rx.recv())
            .await
            .ok()
            .flatten()
            .is_some()
    }

    /// Wait until a client connection goes away.
    pub async fn recv_closed(&mut self) -> Option<()> {
        timeout(WAIT, self.closed_rx.recv()).await.ok().flatten()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn auth_headers(&self) -> Vec<String> {
        self.auth_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub fn params(server: &MockWsServer, inbox_ids: &[&str]) -> ConnectionParams {
    ConnectionParams::builder()
        .endpoint(server.ws_url())
        .token(TOKEN)
        .inbox_ids(inbox_ids.iter().copied())
        .build()
        .unwrap()
}

/// Heartbeats off so tests never race a PING.
pub fn config() -> Config {
    Config::default().with_heartbeat(None, Duration::from_secs(60))
}

/// Fast heartbeats: PING every 50 ms, dead after 200 ms without an answer.
pub fn heartbeat_config() -> Config {
    Config::default().with_heartbeat(Some(Duration::from_millis(50)), Duration::from_millis(200))
}

/// Example payloads from the notification service.
pub mod payloads {
    use serde_json::{Value, json};

    #[must_use]
    pub fn message_received(id: &str) -> Value {
        json!({
            "type": "event",
            "event_type": "message.received",
            "message": { "id": id }
        })
    }

    #[must_use]
    pub fn full_message_received() -> Value {
        json!({
            "type": "event",
            "event_type": "message.received",
            "message": {
                "inbox_id": "inbox_1",
                "thread_id": "t_42",
                "message_id": "m_42",
                "from": "Ada <ada@example.com>",
                "subject": "Lunch tomorrow?",
                "text": "Are you free at noon?"
            }
        })
    }

    #[must_use]
    pub fn thread_updated() -> Value {
        json!({
            "type": "event",
            "event_type": "thread.updated",
            "message": {}
        })
    }

    #[must_use]
    pub fn subscribed() -> Value {
        json!({ "type": "subscribed", "inbox_ids": ["inbox_1"] })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Interrupt,
    GenerateReply {
        instructions: String,
        context: String,
    },
}

impl Call {
    pub fn reply_context(&self) -> Option<Value> {
        match self {
            Self::GenerateReply { context, .. } => serde_json::from_str(context).ok(),
            Self::Interrupt => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplyMode {
    /// Complete immediately
    #[default]
    Complete,
    /// Complete after a delay
    Delay(Duration),
    /// Never complete; only cancellation ends the turn
    Hold,
    /// Fail with a session error
    Fail,
}

/// A [`Session`] that records every call it receives.
#[derive(Debug, Default)]
pub struct RecordingSession {
    mode: ReplyMode,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    cancelled: AtomicUsize,
    completed: AtomicUsize,
}

impl RecordingSession {
    pub fn new(mode: ReplyMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            ..Self::default()
        })
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Poll until at least `count` calls are recorded.
    pub async fn wait_for_calls(&self, count: usize) -> Vec<Call> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let calls = self.calls();
            if calls.len() >= count || tokio::time::Instant::now() >= deadline {
                return calls;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Tracks a reply future; counts it as cancelled if dropped before finishing.
struct InFlight<'session> {
    session: &'session RecordingSession,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.session.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.finished {
            self.session.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.session.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Session for RecordingSession {
    async fn interrupt(&self) -> Result<()> {
        self.record(Call::Interrupt);
        Ok(())
    }

    async fn generate_reply(&self, instructions: &str, context: &str) -> Result<Turn> {
        self.record(Call::GenerateReply {
            instructions: instructions.to_owned(),
            context: context.to_owned(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let mut in_flight = InFlight {
            session: self,
            finished: false,
        };

        match self.mode {
            ReplyMode::Complete => {}
            ReplyMode::Delay(delay) => sleep(delay).await,
            ReplyMode::Hold => std::future::pending::<()>().await,
            ReplyMode::Fail => {
                in_flight.finished = true;
                return Err(Error::session("speech synthesis unavailable"));
            }
        }

        in_flight.finished = true;
        Ok(Turn::builder().transcript("You have a new message.").build())
    }
}

pub fn expected_reply(instructions: &str, payload: &Value) -> Call {
    Call::GenerateReply {
        instructions: instructions.to_owned(),
        context: payload.to_string(),
    }
}

pub fn subscribe_message(inbox_ids: &[&str]) -> Value {
    json!({ "type": "subscribe", "inbox_ids": inbox_ids })
}
