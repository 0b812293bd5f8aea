//! Connection session driver.
//!
//! A single tokio task owns the socket. It connects, authenticates,
//! identifies the client, then multiplexes reads, outbound frames from the
//! [`OperationManager`] and a timer that drives heartbeats and operation
//! timeouts. A lost connection is retried with backoff until the reconnect
//! budget runs out or the client disconnects.

use std::fmt::{self, Display};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, info, trace, warn};
use tributary_wire::{
    CLIENT_VERSION, Credentials, Frame, IdentifyClient, TcpCommand, WireError, WireResult,
};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::operation::OperationManager;

/// Longest period between timer ticks.
const MAX_TICK: Duration = Duration::from_millis(100);

/// Connection lifecycle as observed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// Opening the TCP connection.
    Connecting,
    /// Waiting for the server to accept the credentials.
    Authenticating,
    /// Ready for operations.
    Connected,
    /// Waiting before the next connection attempt.
    Reconnecting { attempt: u32 },
    /// Disconnected for good; a new `connect` call is needed.
    Closed,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Authenticating => write!(f, "authenticating"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Resolved once with the outcome of the first connection attempt cycle.
pub(crate) type ReadySignal = oneshot::Sender<ClientResult<()>>;

enum Served {
    Shutdown,
    Lost(String),
}

// ============================================================================
// Connection
// ============================================================================

struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    max_frame_size: u32,
    last_received: Instant,
}

impl Connection {
    fn new(stream: TcpStream, max_frame_size: u32) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(64 * 1024),
            max_frame_size,
            last_received: Instant::now(),
        }
    }

    async fn write_frame(&mut self, frame: &Frame) -> ClientResult<()> {
        let bytes = frame.encode_to_bytes()?;
        self.write_bytes(&bytes).await
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> ClientResult<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    fn decode_frame(&mut self) -> WireResult<Option<Frame>> {
        Frame::decode(&mut self.read_buf, self.max_frame_size)
    }

    /// Reads more bytes into the buffer. Cancel safe.
    async fn fill(&mut self) -> ClientResult<()> {
        let n = self.stream.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Err(ClientError::closed("server closed the connection"));
        }
        self.last_received = Instant::now();
        Ok(())
    }

    async fn read_frame(&mut self) -> ClientResult<Frame> {
        loop {
            if let Some(frame) = self.decode_frame()? {
                return Ok(frame);
            }
            self.fill().await?;
        }
    }
}

// ============================================================================
// Session
// ============================================================================

pub(crate) struct Session {
    config: Arc<ClientConfig>,
    manager: Arc<OperationManager>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Session {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        manager: Arc<OperationManager>,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        Self {
            config,
            manager,
            state,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(endpoint = %self.config.endpoint, from = %previous, to = %state, "connection state changed");
        }
    }

    /// Runs until the client disconnects or reconnection gives up.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>, ready: ReadySignal) {
        let mut ready = Some(ready);
        let mut backoff = Backoff::new(&self.config.reconnect);
        let mut attempts: u32 = 0;

        let outcome = loop {
            let established = tokio::select! {
                biased;
                _ = shutdown.changed() => break ClientError::closed("client disconnected"),
                result = self.establish() => result,
            };

            match established {
                Ok(connection) => {
                    attempts = 0;
                    backoff.reset();
                    match self.serve(connection, &mut shutdown, &mut ready).await {
                        Served::Shutdown => break ClientError::closed("client disconnected"),
                        Served::Lost(reason) => {
                            warn!(endpoint = %self.config.endpoint, reason = %reason, "connection lost");
                            self.manager.on_connection_lost();
                        }
                    }
                }
                Err(ClientError::NotAuthenticated(message)) => {
                    warn!(endpoint = %self.config.endpoint, "authentication rejected");
                    break ClientError::NotAuthenticated(message);
                }
                Err(e) => {
                    warn!(
                        endpoint = %self.config.endpoint,
                        attempt = attempts + 1,
                        error = %e,
                        "connection attempt failed"
                    );
                }
            }

            attempts += 1;
            if let Some(max) = self.config.reconnect.max_reconnections {
                if attempts > max {
                    break ClientError::closed(format!(
                        "gave up after {attempts} connection attempts to {}",
                        self.config.endpoint
                    ));
                }
            }

            self.manager.check_timeouts(Instant::now());
            self.set_state(ConnectionState::Reconnecting { attempt: attempts });
            let delay = backoff.next_delay();
            debug!(endpoint = %self.config.endpoint, delay_ms = delay.as_millis() as u64, "waiting before reconnecting");
            tokio::select! {
                biased;
                _ = shutdown.changed() => break ClientError::closed("client disconnected"),
                () = sleep(delay) => {}
            }
        };

        let reason = match &outcome {
            ClientError::ConnectionClosed(reason) => reason.clone(),
            other => other.to_string(),
        };
        self.manager.close(&reason);
        self.set_state(ConnectionState::Closed);
        info!(endpoint = %self.config.endpoint, reason = %reason, "session closed");
        if let Some(ready) = ready.take() {
            let _ = ready.send(Err(outcome));
        }
    }

    /// Opens the socket, authenticates and identifies the client.
    async fn establish(&self) -> ClientResult<Connection> {
        let config = &self.config;
        self.set_state(ConnectionState::Connecting);
        debug!(endpoint = %config.endpoint, "connecting");

        let stream = timeout(config.connect_timeout, TcpStream::connect(config.endpoint.as_str()))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to {} timed out", config.endpoint),
                )
            })??;
        stream.set_nodelay(true)?;
        let mut connection = Connection::new(stream, config.max_frame_size);

        if let Some(credentials) = &config.credentials {
            self.set_state(ConnectionState::Authenticating);
            timeout(
                config.connect_timeout,
                authenticate(&mut connection, credentials),
            )
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "authentication timed out"))??;
        }

        let identify = Frame::with_message(
            TcpCommand::IdentifyClient,
            Uuid::new_v4(),
            None,
            &IdentifyClient {
                version: CLIENT_VERSION,
                connection_name: Some(config.client_id.clone()),
            },
        );
        connection.write_frame(&identify).await?;
        Ok(connection)
    }

    fn tick_period(&self) -> Duration {
        let shortest = self
            .config
            .heartbeat_interval
            .min(self.config.heartbeat_timeout)
            .min(self.config.operation_timeout)
            .min(MAX_TICK);
        (shortest / 2).max(Duration::from_millis(5))
    }

    async fn serve(
        &self,
        mut connection: Connection,
        shutdown: &mut watch::Receiver<bool>,
        ready: &mut Option<ReadySignal>,
    ) -> Served {
        let (link, mut outbound) = mpsc::unbounded_channel::<Bytes>();
        let replayed = self.manager.attach(link);
        self.set_state(ConnectionState::Connected);
        info!(endpoint = %self.config.endpoint, replayed, "connected");
        if let Some(ready) = ready.take() {
            let _ = ready.send(Ok(()));
        }

        let mut ticker = interval(self.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_sent_at: Option<Instant> = None;

        loop {
            loop {
                match connection.decode_frame() {
                    Ok(Some(frame)) => {
                        if let Err(e) = self.dispatch(&mut connection, frame).await {
                            return Served::Lost(e.to_string());
                        }
                    }
                    Ok(None) => break,
                    Err(WireError::UnknownCommand {
                        code,
                        correlation_id,
                    }) => {
                        warn!(correlation_id = %correlation_id, code, "unknown command from server");
                        self.manager.fail(
                            correlation_id,
                            ClientError::Protocol(format!("unknown command 0x{code:02x}")),
                        );
                    }
                    Err(WireError::MalformedBody {
                        correlation_id,
                        reason,
                    }) => {
                        warn!(correlation_id = %correlation_id, reason = %reason, "malformed frame from server");
                        self.manager.fail(
                            correlation_id,
                            ClientError::Protocol(format!("malformed frame: {reason}")),
                        );
                    }
                    Err(e @ (WireError::FrameTooLarge { .. } | WireError::Truncated { .. })) => {
                        return Served::Lost(format!("unreadable frame: {e}"));
                    }
                    Err(e) => {
                        warn!(error = %e, "decode error, skipping frame");
                    }
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => return Served::Shutdown,
                _ = ticker.tick() => {
                    let now = Instant::now();
                    self.manager.check_timeouts(now);
                    match heartbeat_sent_at {
                        Some(sent_at) => {
                            if now.saturating_duration_since(sent_at) >= self.config.heartbeat_timeout {
                                return Served::Lost("heartbeat timed out".to_string());
                            }
                        }
                        None => {
                            let quiet = now.saturating_duration_since(connection.last_received);
                            if quiet >= self.config.heartbeat_interval {
                                let request = Frame::new(
                                    TcpCommand::HeartbeatRequest,
                                    Uuid::new_v4(),
                                    Bytes::new(),
                                );
                                trace!(correlation_id = %request.correlation_id, "sending heartbeat");
                                if let Err(e) = connection.write_frame(&request).await {
                                    return Served::Lost(e.to_string());
                                }
                                heartbeat_sent_at = Some(now);
                            }
                        }
                    }
                }
                read = connection.fill() => {
                    if let Err(e) = read {
                        return Served::Lost(e.to_string());
                    }
                    heartbeat_sent_at = None;
                }
                Some(bytes) = outbound.recv() => {
                    if let Err(e) = connection.write_bytes(&bytes).await {
                        return Served::Lost(e.to_string());
                    }
                }
            }
        }
    }

    async fn dispatch(&self, connection: &mut Connection, frame: Frame) -> ClientResult<()> {
        match frame.command {
            TcpCommand::HeartbeatRequest => {
                trace!(correlation_id = %frame.correlation_id, "answering heartbeat");
                let response = Frame::new(
                    TcpCommand::HeartbeatResponse,
                    frame.correlation_id,
                    Bytes::new(),
                );
                connection.write_frame(&response).await
            }
            TcpCommand::Ping => {
                let pong = Frame::new(TcpCommand::Pong, frame.correlation_id, frame.payload);
                connection.write_frame(&pong).await
            }
            TcpCommand::HeartbeatResponse | TcpCommand::ClientIdentified => Ok(()),
            _ => {
                self.manager.on_reply(frame);
                Ok(())
            }
        }
    }
}

/// Performs the credentials exchange on a fresh connection.
async fn authenticate(connection: &mut Connection, credentials: &Credentials) -> ClientResult<()> {
    let correlation_id = Uuid::new_v4();
    connection
        .write_frame(&Frame::authenticated(
            TcpCommand::Authenticate,
            correlation_id,
            credentials.clone(),
            Bytes::new(),
        ))
        .await?;

    loop {
        let frame = connection.read_frame().await?;
        match frame.command {
            TcpCommand::HeartbeatRequest => {
                let response = Frame::new(
                    TcpCommand::HeartbeatResponse,
                    frame.correlation_id,
                    Bytes::new(),
                );
                connection.write_frame(&response).await?;
            }
            TcpCommand::Authenticated if frame.correlation_id == correlation_id => {
                debug!(username = %credentials.username, "authenticated");
                return Ok(());
            }
            TcpCommand::NotAuthenticated if frame.correlation_id == correlation_id => {
                let reason = String::from_utf8_lossy(&frame.payload);
                return Err(ClientError::NotAuthenticated(if reason.is_empty() {
                    format!("credentials for {} rejected", credentials.username)
                } else {
                    reason.into_owned()
                }));
            }
            other => {
                debug!(command = %other, "ignoring frame during authentication");
            }
        }
    }
}
