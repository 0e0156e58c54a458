#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::time::Duration;

use async_stream::stream;
use futures::{SinkExt as _, Stream, StreamExt as _};
use secrecy::ExposeSecret as _;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::config::Config;
use super::error::WsError;
use super::frame::RawFrame;
use crate::Result;
use crate::config::ConnectionParams;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the closing handshake when the caller cancels.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection state tracking.
///
/// `Disconnected -> Connecting -> Subscribed -> Closing -> Disconnected`
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport is open
    Disconnected,
    /// Upgrade and subscribe handshake in progress
    Connecting,
    /// Subscribe message delivered, frames flowing
    Subscribed {
        /// When the subscription was established
        since: std::time::Instant,
    },
    /// Transport is being released
    Closing,
}

impl ConnectionState {
    /// Check if the connection is currently delivering frames.
    #[must_use]
    pub const fn is_subscribed(self) -> bool {
        matches!(self, Self::Subscribed { .. })
    }
}

/// Opens notification connections and publishes their state.
///
/// A [`ConnectionManager`] performs the handshake; the resulting [`Connection`] owns the
/// transport exclusively. The manager never retries on its own: reconnect policy lives with
/// the caller (see [`Config::reconnect`]).
///
/// # Example
///
/// ```no_run
/// use inbox_bridge::config::ConnectionParams;
/// use inbox_bridge::ws::ConnectionManager;
/// use inbox_bridge::ws::config::Config;
///
/// # async fn example() -> inbox_bridge::Result<()> {
/// let params = ConnectionParams::from_env(["support@agentmail.to"])?;
/// let manager = ConnectionManager::new(Config::default());
///
/// let mut connection = manager.connect(&params).await?;
/// while let Some(frame) = connection.next_frame().await {
///     println!("{} bytes", frame.len());
/// }
/// connection.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    config: Config,
    /// Watch channel sender for state changes
    state_tx: watch::Sender<ConnectionState>,
    /// Kept so the channel never closes while the manager is alive
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            state_tx,
            state_rx,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Establish the transport and send the subscribe control message.
    ///
    /// Fails with a [`Kind::WebSocket`](crate::error::Kind::WebSocket) error before any frame
    /// is yielded if the endpoint is unreachable, the token is rejected, or the handshake
    /// exceeds [`Config::connect_timeout`].
    pub async fn connect(&self, params: &ConnectionParams) -> Result<Connection> {
        self.state_tx.send_replace(ConnectionState::Connecting);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            endpoint = %params.endpoint(),
            inbox_count = params.subscription().len(),
            "Connecting to notification service"
        );

        let mut pending = Pending {
            state_tx: &self.state_tx,
            done: false,
        };

        let ws = match timeout(self.config.connect_timeout, Self::handshake(params)).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => return Err(e),
            Err(_elapsed) => return Err(WsError::Timeout(self.config.connect_timeout).into()),
        };

        pending.done = true;
        self.state_tx.send_replace(ConnectionState::Subscribed {
            since: std::time::Instant::now(),
        });

        let heartbeat = self.config.heartbeat_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        Ok(Connection {
            ws,
            state_tx: self.state_tx.clone(),
            heartbeat,
            heartbeat_timeout: self.config.heartbeat_timeout,
            last_seen: Instant::now(),
            ping_sent: None,
            end: None,
            released: false,
        })
    }

    async fn handshake(params: &ConnectionParams) -> Result<WsStream> {
        let mut request = params.endpoint().as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", params.token().expose_secret()))
            .map_err(|_e| WsError::InvalidCredential)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (mut ws, _) = connect_async(request).await?;

        let subscribe = serde_json::to_string(&params.subscription().request())?;
        if let Err(e) = ws.send(Message::Text(subscribe.into())).await {
            return Err(WsError::SubscriptionFailed(e.to_string()).into());
        }

        Ok(ws)
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

/// Publishes `Disconnected` if a handshake fails or its future is dropped part way.
struct Pending<'state> {
    state_tx: &'state watch::Sender<ConnectionState>,
    done: bool,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
    }
}

enum Wake {
    Frame(Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Heartbeat,
}

/// A live, subscribed notification transport.
///
/// Frames are pulled with [`Connection::next_frame`]. The transport is released exactly once:
/// by [`Connection::close`], or on drop if the owner is torn down without closing.
pub struct Connection {
    ws: WsStream,
    state_tx: watch::Sender<ConnectionState>,
    heartbeat: Option<Interval>,
    heartbeat_timeout: Duration,
    /// Last time anything arrived from the server
    last_seen: Instant,
    /// When the unanswered PING went out
    ping_sent: Option<Instant>,
    /// Why the frame sequence ended; `None` while frames can still arrive
    end: Option<WsError>,
    released: bool,
}

impl Connection {
    /// Wait for the next data frame.
    ///
    /// Returns `None` once the transport has closed, failed, or missed its heartbeat; every
    /// later call also returns `None` and [`Connection::end_reason`] says why. Cancel-safe:
    /// dropping the returned future loses no frame.
    ///
    /// Liveness is measured from the last PING this connection sent, so a caller that stops
    /// polling for a while does not make a healthy server look dead.
    pub async fn next_frame(&mut self) -> Option<RawFrame> {
        while self.end.is_none() {
            let wake = tokio::select! {
                biased;
                msg = self.ws.next() => Wake::Frame(msg),
                () = tick(&mut self.heartbeat) => Wake::Heartbeat,
            };

            match wake {
                Wake::Frame(Some(Ok(message))) => {
                    self.last_seen = Instant::now();
                    match message {
                        Message::Text(text) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(len = text.len(), "Received text frame");
                            return Some(RawFrame::Text(text.as_str().to_owned()));
                        }
                        Message::Binary(bytes) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(len = bytes.len(), "Received binary frame");
                            return Some(RawFrame::Binary(bytes.to_vec()));
                        }
                        Message::Close(frame) => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!(?frame, "Notification server closed the connection");
                            self.end = Some(WsError::ConnectionClosed {
                                code: frame.as_ref().map(|frame| u16::from(frame.code)),
                                reason: frame
                                    .map(|frame| frame.reason.as_str().to_owned())
                                    .unwrap_or_default(),
                            });
                        }
                        // PING is answered by tungstenite on the next read/write.
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                    }
                }
                Wake::Frame(Some(Err(e))) => {
                    let error = WsError::Connection(e);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %error, "Notification transport failed");
                    self.end = Some(error);
                }
                Wake::Frame(None) => {
                    self.end = Some(WsError::ConnectionClosed {
                        code: None,
                        reason: String::new(),
                    });
                }
                Wake::Heartbeat => match self.ping_sent {
                    Some(sent) if self.last_seen < sent => {
                        if sent.elapsed() > self.heartbeat_timeout {
                            let error = WsError::HeartbeatTimeout(self.heartbeat_timeout);
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %error, "Notification connection went silent");
                            self.end = Some(error);
                        }
                    }
                    _ => {
                        if let Err(e) = self.ws.send(Message::Ping(Vec::<u8>::new().into())).await
                        {
                            self.end = Some(WsError::Connection(e));
                        } else {
                            self.ping_sent = Some(Instant::now());
                        }
                    }
                },
            }
        }

        None
    }

    /// Whether the frame sequence has ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.end.is_some()
    }

    /// Why the frame sequence ended, once it has.
    ///
    /// [`WsError::ConnectionClosed`] is an orderly close by the server; every other variant is
    /// a transport failure.
    #[must_use]
    pub fn end_reason(&self) -> Option<&WsError> {
        self.end.as_ref()
    }

    /// Release the transport, attempting a closing handshake if the peer is still there.
    pub async fn close(mut self) {
        self.state_tx.send_replace(ConnectionState::Closing);

        if self.end.is_none() {
            match timeout(CLOSE_TIMEOUT, self.ws.close(None)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = %e, "Closing handshake failed");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
                Err(_elapsed) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Closing handshake timed out");
                }
            }
        }

        self.release();
    }

    /// Consume the connection as a lazy frame stream.
    ///
    /// The stream ends when the transport does; dropping it early releases the transport.
    pub fn into_stream(self) -> impl Stream<Item = RawFrame> {
        let mut connection = self;
        stream! {
            while let Some(frame) = connection.next_frame().await {
                yield frame;
            }
            connection.close().await;
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.state_tx.send_replace(ConnectionState::Disconnected);

        #[cfg(feature = "tracing")]
        tracing::debug!("Notification connection released");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.released {
            self.state_tx.send_replace(ConnectionState::Closing);
        }
        self.release();
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
