//! Client handle for `Tributary`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::operation::{Operation, OperationManager};
use crate::session::{ConnectionState, Session};
use crate::stream::StreamReader;

/// Async client for the `Tributary` event store.
///
/// The client keeps one TCP connection, driven by a background task that
/// reconnects with backoff when the connection drops. Operations issued
/// while disconnected are queued and sent once a connection is available.
/// Cloning is cheap; clones share the connection.
///
/// # Example
///
/// ```ignore
/// use tributary_client::{Client, ClientConfig, ReadSliceOptions, StreamPosition};
///
/// let client = Client::new(ClientConfig::new("127.0.0.1:1113"))?;
/// client.connect().await?;
///
/// let slice = client
///     .stream("orders-1")?
///     .read_slice_forward(StreamPosition::START, ReadSliceOptions::default())
///     .await?;
/// for event in slice {
///     println!("{} #{:?}", event.name(), event.event_number());
/// }
///
/// client.disconnect().await;
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Arc<ClientConfig>,
    manager: Arc<OperationManager>,
    state: Arc<watch::Sender<ConnectionState>>,
    driver: Mutex<Option<Driver>>,
}

struct Driver {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Client {
    /// Creates a client. No connection is made until [`Client::connect`].
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let manager = Arc::new(OperationManager::new(&config));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            inner: Arc::new(ClientInner {
                config: Arc::new(config),
                manager,
                state: Arc::new(state),
                driver: Mutex::new(None),
            }),
        })
    }

    fn driver(&self) -> MutexGuard<'_, Option<Driver>> {
        self.inner
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Connects to the server.
    ///
    /// Resolves once the connection is ready, or with the error that ended
    /// the connection attempts. Calling it while already connected is a
    /// no-op.
    pub async fn connect(&self) -> ClientResult<()> {
        let ready = {
            let mut driver = self.driver();
            let running = driver.as_ref().is_some_and(|d| !d.task.is_finished());
            if running {
                None
            } else {
                self.inner.manager.reopen();
                // Published before the task runs so concurrent callers never
                // observe the previous session's `Closed`.
                self.inner.state.send_replace(ConnectionState::Connecting);
                let (shutdown, shutdown_rx) = watch::channel(false);
                let (ready_tx, ready_rx) = oneshot::channel();
                let session = Session::new(
                    Arc::clone(&self.inner.config),
                    Arc::clone(&self.inner.manager),
                    Arc::clone(&self.inner.state),
                );
                let task = tokio::spawn(session.run(shutdown_rx, ready_tx));
                *driver = Some(Driver { shutdown, task });
                debug!(endpoint = %self.inner.config.endpoint, "session started");
                Some(ready_rx)
            }
        };

        match ready {
            Some(ready) => ready
                .await
                .map_err(|_| ClientError::closed("session ended before connecting"))?,
            None => {
                let mut state = self.inner.state.subscribe();
                let reached = *state
                    .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed))
                    .await
                    .map_err(|_| ClientError::closed("session ended before connecting"))?;
                match reached {
                    ConnectionState::Connected => Ok(()),
                    _ => Err(ClientError::closed("connection attempts failed")),
                }
            }
        }
    }

    /// Closes the connection and fails every pending operation with a
    /// connection-closed error. The client does not reconnect afterwards.
    pub async fn disconnect(&self) {
        let driver = self.driver().take();
        match driver {
            Some(driver) => {
                let _ = driver.shutdown.send(true);
                if let Err(e) = driver.task.await {
                    warn!(error = %e, "session task failed");
                }
            }
            None => {
                self.inner.manager.close("client disconnected");
                self.inner.state.send_replace(ConnectionState::Closed);
            }
        }
    }

    /// Returns a handle for reading from and appending to a stream.
    pub fn stream(&self, stream_id: impl Into<String>) -> ClientResult<StreamReader> {
        let stream_id = stream_id.into();
        if stream_id.is_empty() {
            return Err(ClientError::validation("stream id must not be empty"));
        }
        Ok(StreamReader::new(self.clone(), stream_id))
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribes to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Number of operations awaiting a reply or a connection.
    pub fn pending_operations(&self) -> usize {
        self.inner.manager.pending_count()
    }

    pub(crate) async fn execute<O: Operation>(&self, operation: O) -> ClientResult<O::Output> {
        self.inner.manager.submit(operation)?.wait().await
    }
}
