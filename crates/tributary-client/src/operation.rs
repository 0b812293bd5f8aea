//! Pending operation tracking.
//!
//! Every request is an [`Operation`]: it knows its request command, its
//! payload and how to turn the matching reply into a typed result. The
//! [`OperationManager`] assigns correlation ids, transmits requests over the
//! current connection link, matches replies, and handles timeouts, retries
//! and replay after a reconnect.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──send──▶ Sent ──reply──▶ completed
//!    ▲               │
//!    │ conn lost     │ timeout / NotHandled
//!    └───────────────┤
//!                    ▼
//!                Retrying ──resend──▶ Sent
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use tributary_wire::{Credentials, Frame, NotHandled, NotHandledReason, TcpCommand};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Outbound channel to the connection driver, carrying encoded frames.
pub(crate) type Link = mpsc::UnboundedSender<Bytes>;

type Completion = Box<dyn FnOnce(ClientResult<Frame>) + Send>;

/// A request/reply exchange with the server.
pub(crate) trait Operation: Send + 'static {
    type Output: Send + 'static;

    /// Command of the request frame.
    fn command(&self) -> TcpCommand;

    /// Command of the reply that completes this operation.
    fn reply_command(&self) -> TcpCommand;

    /// Encoded request payload.
    fn payload(&self) -> Bytes;

    /// Converts the reply into the operation's result. Only called with a
    /// frame whose command is [`Operation::reply_command`].
    fn complete(self, reply: Frame) -> ClientResult<Self::Output>;
}

/// Where an operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperationState {
    /// Waiting for a connection.
    Created,
    /// Written to the connection, awaiting a reply.
    Sent,
    /// Scheduled for retransmission.
    Retrying,
}

/// Handle to a submitted operation's eventual result.
#[derive(Debug)]
pub(crate) struct Submitted<T> {
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) correlation_id: Uuid,
    reply: oneshot::Receiver<ClientResult<T>>,
}

impl<T> Submitted<T> {
    /// Waits for the result.
    pub(crate) async fn wait(self) -> ClientResult<T> {
        self.reply
            .await
            .map_err(|_| ClientError::closed("operation dropped without a result"))?
    }

    #[cfg(test)]
    pub(crate) fn try_result(&mut self) -> Option<ClientResult<T>> {
        self.reply.try_recv().ok()
    }
}

struct PendingOperation {
    correlation_id: Uuid,
    command: TcpCommand,
    frame: Bytes,
    complete: Completion,
    state: OperationState,
    retries: u32,
    max_retries: u32,
    timeout: Duration,
    enqueued_at: Instant,
    last_sent_at: Option<Instant>,
    seq: u64,
}

impl PendingOperation {
    /// Writes the frame to `link`, if there is one.
    fn transmit(&mut self, link: Option<&Link>, now: Instant) -> bool {
        match link {
            Some(link) if link.send(self.frame.clone()).is_ok() => {
                self.state = OperationState::Sent;
                self.last_sent_at = Some(now);
                true
            }
            _ => {
                self.state = OperationState::Created;
                false
            }
        }
    }
}

struct Inner {
    pending: HashMap<Uuid, PendingOperation>,
    next_seq: u64,
    link: Option<Link>,
    closed: bool,
}

/// Tracks in-flight operations by correlation id.
pub(crate) struct OperationManager {
    inner: Mutex<Inner>,
    credentials: Option<Credentials>,
    operation_timeout: Duration,
    max_retries: u32,
    max_queue_size: usize,
    max_queue_time: Duration,
}

impl OperationManager {
    pub(crate) fn new(config: &ClientConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: HashMap::new(),
                next_seq: 0,
                link: None,
                closed: false,
            }),
            credentials: config.credentials.clone(),
            operation_timeout: config.operation_timeout,
            max_retries: config.max_retries,
            max_queue_size: config.max_queue_size,
            max_queue_time: config.max_queue_time,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submits an operation under a fresh correlation id.
    pub(crate) fn submit<O: Operation>(&self, operation: O) -> ClientResult<Submitted<O::Output>> {
        self.enqueue(Uuid::new_v4(), operation)
    }

    /// Submits an operation under the given correlation id.
    ///
    /// The request is sent immediately when a connection is attached and
    /// queued otherwise.
    pub(crate) fn enqueue<O: Operation>(
        &self,
        correlation_id: Uuid,
        operation: O,
    ) -> ClientResult<Submitted<O::Output>> {
        let command = operation.command();
        let expected = operation.reply_command();
        let frame = match &self.credentials {
            Some(credentials) => Frame::authenticated(
                command,
                correlation_id,
                credentials.clone(),
                operation.payload(),
            ),
            None => Frame::new(command, correlation_id, operation.payload()),
        }
        .encode_to_bytes()?;

        let (tx, rx) = oneshot::channel();
        let complete: Completion = Box::new(move |reply| {
            let result = reply.and_then(|frame| {
                check_reply(&frame, expected)?;
                operation.complete(frame)
            });
            // The caller may have stopped waiting.
            let _ = tx.send(result);
        });

        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.closed {
            return Err(ClientError::closed("client is disconnected"));
        }
        if inner.pending.len() >= self.max_queue_size {
            return Err(ClientError::QueueFull(inner.pending.len()));
        }
        if inner.pending.contains_key(&correlation_id) {
            return Err(ClientError::Operation(format!(
                "correlation id {correlation_id} is already in flight"
            )));
        }

        let now = Instant::now();
        let mut pending = PendingOperation {
            correlation_id,
            command,
            frame,
            complete,
            state: OperationState::Created,
            retries: 0,
            max_retries: self.max_retries,
            timeout: self.operation_timeout,
            enqueued_at: now,
            last_sent_at: None,
            seq: inner.next_seq,
        };
        inner.next_seq += 1;
        let sent = pending.transmit(inner.link.as_ref(), now);
        debug!(correlation_id = %correlation_id, command = %command, sent, "operation enqueued");
        inner.pending.insert(correlation_id, pending);

        Ok(Submitted {
            correlation_id,
            reply: rx,
        })
    }

    /// Routes a reply to its pending operation.
    ///
    /// Returns `false` when no operation has this correlation id; such
    /// replies are discarded.
    pub(crate) fn on_reply(&self, frame: Frame) -> bool {
        let correlation_id = frame.correlation_id;
        let mut inner = self.lock();
        let Some(pending) = inner.pending.get_mut(&correlation_id) else {
            debug!(
                correlation_id = %correlation_id,
                command = %frame.command,
                "discarding reply for unknown operation"
            );
            return false;
        };

        if frame.command == TcpCommand::NotHandled {
            let reason = frame
                .message::<NotHandled>()
                .ok()
                .and_then(|m| NotHandledReason::try_from(m.reason).ok());
            let retryable = matches!(
                reason,
                Some(NotHandledReason::NotReady | NotHandledReason::TooBusy)
            );
            if retryable && pending.retries < pending.max_retries {
                pending.retries += 1;
                pending.state = OperationState::Retrying;
                debug!(
                    correlation_id = %correlation_id,
                    reason = ?reason,
                    retries = pending.retries,
                    "request not handled, will retry"
                );
                return true;
            }
            let Some(pending) = inner.pending.remove(&correlation_id) else {
                return true;
            };
            drop(inner);
            let reason = reason.map_or_else(|| "unknown".to_string(), |r| format!("{r:?}"));
            (pending.complete)(Err(ClientError::NotHandled(reason)));
            return true;
        }

        let Some(pending) = inner.pending.remove(&correlation_id) else {
            return false;
        };
        drop(inner);
        debug!(correlation_id = %correlation_id, command = %frame.command, "operation completed");
        (pending.complete)(Ok(frame));
        true
    }

    /// Fails one pending operation.
    pub(crate) fn fail(&self, correlation_id: Uuid, error: ClientError) -> bool {
        let pending = self.lock().pending.remove(&correlation_id);
        match pending {
            Some(pending) => {
                (pending.complete)(Err(error));
                true
            }
            None => false,
        }
    }

    /// Resends timed-out and retrying operations, and fails those that ran
    /// out of retries or waited too long for a connection.
    pub(crate) fn check_timeouts(&self, now: Instant) {
        let mut expired = Vec::new();
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let link = inner.link.as_ref();
            for op in inner.pending.values_mut() {
                match op.state {
                    OperationState::Created => {
                        if now.saturating_duration_since(op.enqueued_at) > self.max_queue_time {
                            expired.push((
                                op.correlation_id,
                                ClientError::closed("operation queued too long without a connection"),
                            ));
                        }
                    }
                    OperationState::Retrying => {
                        op.transmit(link, now);
                    }
                    OperationState::Sent => {
                        let sent_at = op.last_sent_at.unwrap_or(op.enqueued_at);
                        if now.saturating_duration_since(sent_at) < op.timeout {
                            continue;
                        }
                        if op.retries < op.max_retries {
                            op.retries += 1;
                            op.state = OperationState::Retrying;
                            warn!(
                                correlation_id = %op.correlation_id,
                                command = %op.command,
                                retries = op.retries,
                                "operation timed out, retrying"
                            );
                            op.transmit(link, now);
                        } else {
                            expired.push((
                                op.correlation_id,
                                ClientError::Timeout {
                                    correlation_id: op.correlation_id,
                                    retries: op.retries,
                                },
                            ));
                        }
                    }
                }
            }
        }
        self.fail_each(expired);
    }

    /// Marks every in-flight operation for replay on the next connection.
    pub(crate) fn on_connection_lost(&self) {
        let mut inner = self.lock();
        inner.link = None;
        for op in inner.pending.values_mut() {
            if op.state != OperationState::Created {
                op.retries += 1;
                op.state = OperationState::Created;
            }
        }
        debug!(pending = inner.pending.len(), "connection lost, operations requeued");
    }

    /// Installs a new connection link and replays queued operations in
    /// submission order. Returns how many were sent.
    pub(crate) fn attach(&self, link: Link) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut replayed = 0;
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let mut queued: Vec<&mut PendingOperation> = inner
                .pending
                .values_mut()
                .filter(|op| op.state == OperationState::Created)
                .collect();
            queued.sort_by_key(|op| op.seq);

            for op in queued {
                let too_old =
                    now.saturating_duration_since(op.enqueued_at) > self.max_queue_time;
                if too_old || op.retries > op.max_retries {
                    expired.push((
                        op.correlation_id,
                        ClientError::closed("operation exceeded its retry or queue budget"),
                    ));
                } else if op.transmit(Some(&link), now) {
                    replayed += 1;
                }
            }
            inner.link = Some(link);
        }
        self.fail_each(expired);
        replayed
    }

    /// Fails every pending operation and rejects new ones until
    /// [`OperationManager::reopen`].
    pub(crate) fn close(&self, reason: &str) {
        let drained: Vec<PendingOperation> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.link = None;
            inner.pending.drain().map(|(_, op)| op).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), reason, "failing pending operations");
        }
        for op in drained {
            (op.complete)(Err(ClientError::closed(reason)));
        }
    }

    /// Accepts operations again after [`OperationManager::close`].
    pub(crate) fn reopen(&self) {
        self.lock().closed = false;
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    #[cfg(test)]
    pub(crate) fn state_of(&self, correlation_id: Uuid) -> Option<(OperationState, u32)> {
        self.lock()
            .pending
            .get(&correlation_id)
            .map(|op| (op.state, op.retries))
    }

    fn fail_each(&self, expired: Vec<(Uuid, ClientError)>) {
        for (correlation_id, error) in expired {
            warn!(correlation_id = %correlation_id, error = %error, "operation failed");
            self.fail(correlation_id, error);
        }
    }
}

/// Maps replies that are not the expected completion to errors.
fn check_reply(frame: &Frame, expected: TcpCommand) -> ClientResult<()> {
    match frame.command {
        command if command == expected => Ok(()),
        TcpCommand::BadRequest => Err(ClientError::Server(format!(
            "bad request: {}",
            String::from_utf8_lossy(&frame.payload)
        ))),
        TcpCommand::NotAuthenticated => Err(ClientError::NotAuthenticated(
            String::from_utf8_lossy(&frame.payload).into_owned(),
        )),
        other => Err(ClientError::UnexpectedResponse {
            expected: expected.to_string(),
            actual: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod operation_tests {
    use bytes::BytesMut;
    use tributary_wire::DEFAULT_MAX_FRAME_SIZE;

    use super::*;

    struct Echo;

    impl Operation for Echo {
        type Output = Bytes;

        fn command(&self) -> TcpCommand {
            TcpCommand::Ping
        }

        fn reply_command(&self) -> TcpCommand {
            TcpCommand::Pong
        }

        fn payload(&self) -> Bytes {
            Bytes::from_static(b"echo")
        }

        fn complete(self, reply: Frame) -> ClientResult<Bytes> {
            Ok(reply.payload)
        }
    }

    fn manager(config: ClientConfig) -> OperationManager {
        OperationManager::new(&config)
    }

    fn decode(bytes: Bytes) -> Frame {
        let mut buf = BytesMut::from(&bytes[..]);
        Frame::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap()
    }

    fn pong(correlation_id: Uuid) -> Frame {
        Frame::new(TcpCommand::Pong, correlation_id, Bytes::from_static(b"pong"))
    }

    #[test]
    fn test_queued_operations_replay_in_order() {
        let manager = manager(ClientConfig::default());
        let ids: Vec<Uuid> = (0..3)
            .map(|_| manager.submit(Echo).unwrap().correlation_id)
            .collect();
        for id in &ids {
            assert_eq!(manager.state_of(*id), Some((OperationState::Created, 0)));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(manager.attach(tx), 3);

        for id in &ids {
            let frame = decode(rx.try_recv().unwrap());
            assert_eq!(frame.correlation_id, *id);
            assert_eq!(frame.command, TcpCommand::Ping);
            assert_eq!(manager.state_of(*id), Some((OperationState::Sent, 0)));
        }
    }

    #[test]
    fn test_reply_completes_operation() {
        let manager = manager(ClientConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        manager.attach(tx);

        let mut submitted = manager.submit(Echo).unwrap();
        assert!(manager.on_reply(pong(submitted.correlation_id)));
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(
            submitted.try_result().unwrap().unwrap(),
            Bytes::from_static(b"pong")
        );
    }

    #[test]
    fn test_unmatched_reply_is_discarded() {
        let manager = manager(ClientConfig::default());
        let submitted = manager.submit(Echo).unwrap();

        assert!(!manager.on_reply(pong(Uuid::new_v4())));
        assert_eq!(manager.pending_count(), 1);
        assert!(manager.state_of(submitted.correlation_id).is_some());
    }

    #[test]
    fn test_correlation_id_collision() {
        let manager = manager(ClientConfig::default());
        let id = Uuid::new_v4();
        manager.enqueue(id, Echo).unwrap();
        assert!(matches!(
            manager.enqueue(id, Echo),
            Err(ClientError::Operation(_))
        ));
    }

    #[test]
    fn test_queue_full() {
        let manager = manager(ClientConfig::default().with_max_queue_size(2));
        manager.submit(Echo).unwrap();
        manager.submit(Echo).unwrap();
        assert!(matches!(manager.submit(Echo), Err(ClientError::QueueFull(2))));
    }

    #[test]
    fn test_wrong_reply_command() {
        let manager = manager(ClientConfig::default());
        let mut submitted = manager.submit(Echo).unwrap();
        let reply = Frame::new(
            TcpCommand::HeartbeatResponse,
            submitted.correlation_id,
            Bytes::new(),
        );
        manager.on_reply(reply);
        assert!(matches!(
            submitted.try_result().unwrap(),
            Err(ClientError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn test_not_authenticated_reply() {
        let manager = manager(ClientConfig::default());
        let mut submitted = manager.submit(Echo).unwrap();
        let reply = Frame::new(
            TcpCommand::NotAuthenticated,
            submitted.correlation_id,
            Bytes::from_static(b"bad password"),
        );
        manager.on_reply(reply);
        match submitted.try_result().unwrap() {
            Err(ClientError::NotAuthenticated(message)) => assert_eq!(message, "bad password"),
            other => panic!("expected not authenticated, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout_retries_with_same_id_then_fails() {
        let timeout = Duration::from_millis(10);
        let manager = manager(
            ClientConfig::default()
                .with_operation_timeout(timeout)
                .with_max_retries(1),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);

        let mut submitted = manager.submit(Echo).unwrap();
        let id = submitted.correlation_id;
        assert_eq!(decode(rx.try_recv().unwrap()).correlation_id, id);

        let later = Instant::now() + timeout * 2;
        manager.check_timeouts(later);
        assert_eq!(decode(rx.try_recv().unwrap()).correlation_id, id);
        assert_eq!(manager.state_of(id), Some((OperationState::Sent, 1)));

        manager.check_timeouts(later + timeout * 2);
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            submitted.try_result().unwrap(),
            Err(ClientError::Timeout { retries: 1, .. })
        ));
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_not_handled_retries() {
        let manager = manager(ClientConfig::default().with_max_retries(1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);
        let mut submitted = manager.submit(Echo).unwrap();
        let id = submitted.correlation_id;
        rx.try_recv().unwrap();

        let busy = Frame::with_message(
            TcpCommand::NotHandled,
            id,
            None,
            &NotHandled {
                reason: NotHandledReason::TooBusy as i32,
                additional_info: None,
            },
        );
        assert!(manager.on_reply(busy.clone()));
        assert_eq!(manager.state_of(id), Some((OperationState::Retrying, 1)));

        manager.check_timeouts(Instant::now());
        assert_eq!(decode(rx.try_recv().unwrap()).correlation_id, id);
        assert_eq!(manager.state_of(id), Some((OperationState::Sent, 1)));

        // Retry budget spent.
        manager.on_reply(busy);
        assert!(matches!(
            submitted.try_result().unwrap(),
            Err(ClientError::NotHandled(_))
        ));
    }

    #[test]
    fn test_connection_lost_requeues_and_replays() {
        let manager = manager(ClientConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);
        let first = manager.submit(Echo).unwrap().correlation_id;
        let second = manager.submit(Echo).unwrap().correlation_id;
        rx.try_recv().unwrap();
        rx.try_recv().unwrap();

        manager.on_connection_lost();
        assert_eq!(manager.state_of(first), Some((OperationState::Created, 1)));

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(manager.attach(tx), 2);
        assert_eq!(decode(rx.try_recv().unwrap()).correlation_id, first);
        assert_eq!(decode(rx.try_recv().unwrap()).correlation_id, second);
    }

    #[test]
    fn test_replay_fails_operations_over_retry_budget() {
        let manager = manager(ClientConfig::default().with_max_retries(0));
        let (tx, _rx) = mpsc::unbounded_channel();
        manager.attach(tx);
        let mut submitted = manager.submit(Echo).unwrap();

        manager.on_connection_lost();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(manager.attach(tx), 0);
        assert!(matches!(
            submitted.try_result().unwrap(),
            Err(ClientError::ConnectionClosed(_))
        ));
    }

    #[test]
    fn test_queued_operation_expires() {
        let max_queue_time = Duration::from_millis(5);
        let manager = manager(ClientConfig::default().with_max_queue_time(max_queue_time));
        let mut submitted = manager.submit(Echo).unwrap();

        manager.check_timeouts(Instant::now() + max_queue_time * 4);
        assert!(matches!(
            submitted.try_result().unwrap(),
            Err(ClientError::ConnectionClosed(_))
        ));
    }

    #[test]
    fn test_close_fails_everything_and_rejects_new_work() {
        let manager = manager(ClientConfig::default());
        let mut a = manager.submit(Echo).unwrap();
        let mut b = manager.submit(Echo).unwrap();

        manager.close("client disconnected");
        assert!(matches!(a.try_result().unwrap(), Err(ClientError::ConnectionClosed(_))));
        assert!(matches!(b.try_result().unwrap(), Err(ClientError::ConnectionClosed(_))));
        assert!(matches!(
            manager.submit(Echo),
            Err(ClientError::ConnectionClosed(_))
        ));

        manager.reopen();
        assert!(manager.submit(Echo).is_ok());
    }

    #[test]
    fn test_credentials_attached_to_requests() {
        let manager = manager(ClientConfig::default().with_credentials("admin", "changeit"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach(tx);
        manager.submit(Echo).unwrap();

        let frame = decode(rx.try_recv().unwrap());
        assert_eq!(frame.credentials, Some(Credentials::new("admin", "changeit")));
    }

    #[tokio::test]
    async fn test_wait_resolves_after_reply() {
        let manager = std::sync::Arc::new(manager(ClientConfig::default()));
        let submitted = manager.submit(Echo).unwrap();
        let id = submitted.correlation_id;

        let replier = std::sync::Arc::clone(&manager);
        tokio::spawn(async move {
            replier.on_reply(pong(id));
        });

        assert_eq!(submitted.wait().await.unwrap(), Bytes::from_static(b"pong"));
    }
}
