//! Stream reads and appends.

use bytes::Bytes;
use prost::Message;
use tracing::debug;
use tributary_types::{Event, ExpectedVersion, ReadDirection, StreamPosition};
use tributary_wire::{
    EventRecord, Frame, NewEvent, OperationResult, ReadEvent, ReadEventCompleted, ReadEventResult,
    ReadStreamEvents, ReadStreamEventsCompleted, ReadStreamResult, ResolvedIndexedEvent,
    TcpCommand, WriteEvents, WriteEventsCompleted,
};

use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::operation::Operation;

// ============================================================================
// Results
// ============================================================================

/// Per-read overrides of the configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSliceOptions {
    /// Maximum number of events; defaults to `default_batch_size`.
    pub max_count: Option<u32>,
    /// Whether link events are resolved to their targets.
    pub resolve_links: Option<bool>,
    pub require_master: Option<bool>,
}

impl ReadSliceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_count(mut self, max_count: u32) -> Self {
        self.max_count = Some(max_count);
        self
    }

    pub fn with_resolve_links(mut self, resolve: bool) -> Self {
        self.resolve_links = Some(resolve);
        self
    }

    pub fn with_require_master(mut self, require: bool) -> Self {
        self.require_master = Some(require);
        self
    }
}

/// A contiguous run of events read from a stream.
#[derive(Debug, Clone)]
pub struct Slice {
    pub stream_id: String,
    pub direction: ReadDirection,
    /// Where the read started.
    pub from_event_number: i64,
    /// Events in read order.
    pub events: Vec<Event>,
    /// Where the next read in the same direction should start.
    pub next_event_number: i64,
    /// Number of the stream's last event.
    pub last_event_number: i64,
    pub is_end_of_stream: bool,
}

impl Slice {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Position to pass to the next read in the same direction.
    pub fn next_position(&self) -> StreamPosition {
        StreamPosition::new(self.next_event_number)
    }
}

impl IntoIterator for Slice {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

/// Outcome of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub first_event_number: i64,
    pub last_event_number: i64,
    pub prepare_position: Option<i64>,
    pub commit_position: Option<i64>,
}

// ============================================================================
// Stream Reader
// ============================================================================

/// Handle bound to one stream, obtained from [`Client::stream`].
#[derive(Clone)]
pub struct StreamReader {
    client: Client,
    stream_id: String,
}

impl StreamReader {
    pub(crate) fn new(client: Client, stream_id: String) -> Self {
        Self { client, stream_id }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Reads events with numbers `>= start` in ascending order.
    pub async fn read_slice_forward(
        &self,
        start: impl Into<StreamPosition>,
        options: ReadSliceOptions,
    ) -> ClientResult<Slice> {
        self.read_slice(ReadDirection::Forward, start.into(), options)
            .await
    }

    /// Reads events with numbers `<= start` in descending order.
    /// [`StreamPosition::END`] starts at the last event.
    pub async fn read_slice_backward(
        &self,
        start: impl Into<StreamPosition>,
        options: ReadSliceOptions,
    ) -> ClientResult<Slice> {
        self.read_slice(ReadDirection::Backward, start.into(), options)
            .await
    }

    async fn read_slice(
        &self,
        direction: ReadDirection,
        start: StreamPosition,
        options: ReadSliceOptions,
    ) -> ClientResult<Slice> {
        let config = self.client.config();
        let max_count = options.max_count.unwrap_or(config.default_batch_size);
        validate_slice(direction, start, max_count, config.max_batch_size)?;

        debug!(
            stream = %self.stream_id,
            direction = %direction,
            from = %start,
            max_count,
            "reading slice"
        );
        self.client
            .execute(ReadSlice {
                stream_id: self.stream_id.clone(),
                direction,
                from_event_number: start.as_i64(),
                max_count,
                resolve_links: options.resolve_links.unwrap_or(config.resolve_links),
                require_master: options.require_master.unwrap_or(config.require_master),
            })
            .await
    }

    /// Reads a single event. [`StreamPosition::END`] reads the last event.
    pub async fn read_event(&self, event_number: impl Into<StreamPosition>) -> ClientResult<Event> {
        let position = event_number.into();
        if position.as_i64() < StreamPosition::END.as_i64() {
            return Err(ClientError::validation(format!(
                "invalid event number {}",
                position.as_i64()
            )));
        }
        let config = self.client.config();
        self.client
            .execute(ReadSingle {
                stream_id: self.stream_id.clone(),
                event_number: position.as_i64(),
                resolve_links: config.resolve_links,
                require_master: config.require_master,
            })
            .await
    }

    /// Appends events to the stream.
    ///
    /// The events must be new; on success they are frozen, since they now
    /// mirror persisted records.
    pub async fn append_to_stream(
        &self,
        expected_version: ExpectedVersion,
        events: &mut [Event],
    ) -> ClientResult<WriteResult> {
        if events.is_empty() {
            return Err(ClientError::validation("no events to append"));
        }
        if let Some(persisted) = events.iter().find(|e| !e.is_new()) {
            return Err(ClientError::validation(format!(
                "event {} is already persisted",
                persisted.id()
            )));
        }
        if let ExpectedVersion::Exact(version) = expected_version {
            if version < 0 {
                return Err(ClientError::validation(format!(
                    "expected version {version} is negative"
                )));
            }
        }
        let new_events = events
            .iter()
            .map(NewEvent::from_event)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            stream = %self.stream_id,
            count = new_events.len(),
            expected = %expected_version,
            "appending events"
        );
        let result = self
            .client
            .execute(Append {
                stream_id: self.stream_id.clone(),
                expected_version,
                events: new_events,
                require_master: self.client.config().require_master,
            })
            .await?;

        for event in events.iter_mut() {
            event.freeze();
        }
        Ok(result)
    }
}

fn validate_slice(
    direction: ReadDirection,
    start: StreamPosition,
    max_count: u32,
    max_batch_size: u32,
) -> ClientResult<()> {
    if max_count == 0 {
        return Err(ClientError::validation("max_count must be positive"));
    }
    if max_count > max_batch_size {
        return Err(ClientError::validation(format!(
            "max_count {max_count} exceeds the maximum batch size {max_batch_size}"
        )));
    }
    let start = start.as_i64();
    match direction {
        ReadDirection::Forward if start < 0 => Err(ClientError::validation(format!(
            "forward reads start at a non-negative event number, got {start}"
        ))),
        ReadDirection::Backward if start < StreamPosition::END.as_i64() => {
            Err(ClientError::validation(format!(
                "backward reads start at an event number or the stream end, got {start}"
            )))
        }
        _ => Ok(()),
    }
}

fn to_event(resolved: &ResolvedIndexedEvent) -> ClientResult<Event> {
    let raw = resolved.record().map(EventRecord::to_raw).transpose()?;
    Ok(Event::from_raw(raw.as_ref())?)
}

// ============================================================================
// Operations
// ============================================================================

struct ReadSlice {
    stream_id: String,
    direction: ReadDirection,
    from_event_number: i64,
    max_count: u32,
    resolve_links: bool,
    require_master: bool,
}

impl Operation for ReadSlice {
    type Output = Slice;

    fn command(&self) -> TcpCommand {
        match self.direction {
            ReadDirection::Forward => TcpCommand::ReadStreamEventsForward,
            ReadDirection::Backward => TcpCommand::ReadStreamEventsBackward,
        }
    }

    fn reply_command(&self) -> TcpCommand {
        match self.direction {
            ReadDirection::Forward => TcpCommand::ReadStreamEventsForwardCompleted,
            ReadDirection::Backward => TcpCommand::ReadStreamEventsBackwardCompleted,
        }
    }

    fn payload(&self) -> Bytes {
        ReadStreamEvents {
            event_stream_id: self.stream_id.clone(),
            from_event_number: self.from_event_number,
            // Bounded by max_batch_size, which is validated to fit.
            max_count: self.max_count.min(i32::MAX as u32) as i32,
            resolve_link_tos: self.resolve_links,
            require_master: self.require_master,
        }
        .encode_to_vec()
        .into()
    }

    fn complete(self, reply: Frame) -> ClientResult<Slice> {
        let completed: ReadStreamEventsCompleted = reply.message()?;
        match ReadStreamResult::try_from(completed.result) {
            Ok(ReadStreamResult::Success | ReadStreamResult::NotModified) => {}
            Ok(ReadStreamResult::NoStream) => {
                return Err(ClientError::StreamNotFound(self.stream_id));
            }
            Ok(ReadStreamResult::StreamDeleted) => {
                return Err(ClientError::StreamDeleted(self.stream_id));
            }
            Ok(ReadStreamResult::AccessDenied) => {
                return Err(ClientError::AccessDenied(self.stream_id));
            }
            Ok(ReadStreamResult::Error) => {
                return Err(ClientError::Server(
                    completed
                        .error
                        .unwrap_or_else(|| format!("reading {} failed", self.stream_id)),
                ));
            }
            Err(_) => {
                return Err(ClientError::Protocol(format!(
                    "unknown read result {}",
                    completed.result
                )));
            }
        }

        let events = completed
            .events
            .iter()
            .map(to_event)
            .collect::<ClientResult<Vec<_>>>()?;

        Ok(Slice {
            stream_id: self.stream_id,
            direction: self.direction,
            from_event_number: self.from_event_number,
            events,
            next_event_number: completed.next_event_number,
            last_event_number: completed.last_event_number,
            is_end_of_stream: completed.is_end_of_stream,
        })
    }
}

struct ReadSingle {
    stream_id: String,
    event_number: i64,
    resolve_links: bool,
    require_master: bool,
}

impl Operation for ReadSingle {
    type Output = Event;

    fn command(&self) -> TcpCommand {
        TcpCommand::ReadEvent
    }

    fn reply_command(&self) -> TcpCommand {
        TcpCommand::ReadEventCompleted
    }

    fn payload(&self) -> Bytes {
        ReadEvent {
            event_stream_id: self.stream_id.clone(),
            event_number: self.event_number,
            resolve_link_tos: self.resolve_links,
            require_master: self.require_master,
        }
        .encode_to_vec()
        .into()
    }

    fn complete(self, reply: Frame) -> ClientResult<Event> {
        let completed: ReadEventCompleted = reply.message()?;
        match ReadEventResult::try_from(completed.result) {
            Ok(ReadEventResult::Success) => match &completed.event {
                Some(resolved) => to_event(resolved),
                None => Err(ClientError::Protocol(
                    "read succeeded without an event".to_string(),
                )),
            },
            Ok(ReadEventResult::NotFound) => Err(ClientError::EventNotFound {
                stream: self.stream_id,
                event_number: self.event_number,
            }),
            Ok(ReadEventResult::NoStream) => Err(ClientError::StreamNotFound(self.stream_id)),
            Ok(ReadEventResult::StreamDeleted) => Err(ClientError::StreamDeleted(self.stream_id)),
            Ok(ReadEventResult::AccessDenied) => Err(ClientError::AccessDenied(self.stream_id)),
            Ok(ReadEventResult::Error) => Err(ClientError::Server(
                completed
                    .error
                    .unwrap_or_else(|| format!("reading {} failed", self.stream_id)),
            )),
            Err(_) => Err(ClientError::Protocol(format!(
                "unknown read result {}",
                completed.result
            ))),
        }
    }
}

struct Append {
    stream_id: String,
    expected_version: ExpectedVersion,
    events: Vec<NewEvent>,
    require_master: bool,
}

impl Operation for Append {
    type Output = WriteResult;

    fn command(&self) -> TcpCommand {
        TcpCommand::WriteEvents
    }

    fn reply_command(&self) -> TcpCommand {
        TcpCommand::WriteEventsCompleted
    }

    fn payload(&self) -> Bytes {
        WriteEvents {
            event_stream_id: self.stream_id.clone(),
            expected_version: self.expected_version.as_i64(),
            events: self.events.clone(),
            require_master: self.require_master,
        }
        .encode_to_vec()
        .into()
    }

    fn complete(self, reply: Frame) -> ClientResult<WriteResult> {
        let completed: WriteEventsCompleted = reply.message()?;
        match OperationResult::try_from(completed.result) {
            Ok(OperationResult::Success) => Ok(WriteResult {
                first_event_number: completed.first_event_number,
                last_event_number: completed.last_event_number,
                prepare_position: completed.prepare_position,
                commit_position: completed.commit_position,
            }),
            Ok(OperationResult::WrongExpectedVersion) => Err(ClientError::WrongExpectedVersion {
                stream: self.stream_id,
                expected: self.expected_version.to_string(),
                current: completed.current_version,
            }),
            Ok(OperationResult::StreamDeleted) => Err(ClientError::StreamDeleted(self.stream_id)),
            Ok(OperationResult::AccessDenied) => Err(ClientError::AccessDenied(self.stream_id)),
            Ok(
                result @ (OperationResult::PrepareTimeout
                | OperationResult::CommitTimeout
                | OperationResult::ForwardTimeout
                | OperationResult::InvalidTransaction),
            ) => Err(ClientError::Server(
                completed
                    .message
                    .unwrap_or_else(|| format!("write to {} failed: {result:?}", self.stream_id)),
            )),
            Err(_) => Err(ClientError::Protocol(format!(
                "unknown write result {}",
                completed.result
            ))),
        }
    }
}

#[cfg(test)]
mod stream_tests {
    use super::*;

    #[test]
    fn test_validate_slice() {
        let forward = ReadDirection::Forward;
        let backward = ReadDirection::Backward;

        assert!(validate_slice(forward, StreamPosition::START, 10, 100).is_ok());
        assert!(validate_slice(forward, StreamPosition::END, 10, 100).is_err());
        assert!(validate_slice(forward, StreamPosition::new(5), 0, 100).is_err());
        assert!(validate_slice(forward, StreamPosition::new(5), 101, 100).is_err());
        assert!(validate_slice(forward, StreamPosition::new(5), 100, 100).is_ok());

        assert!(validate_slice(backward, StreamPosition::END, 10, 100).is_ok());
        assert!(validate_slice(backward, StreamPosition::new(3), 10, 100).is_ok());
        assert!(matches!(
            validate_slice(backward, StreamPosition::new(-2), 10, 100),
            Err(ClientError::Validation(_))
        ));
    }

    fn slice_reply(result: ReadStreamResult, events: Vec<ResolvedIndexedEvent>) -> Frame {
        Frame::with_message(
            TcpCommand::ReadStreamEventsForwardCompleted,
            uuid::Uuid::new_v4(),
            None,
            &ReadStreamEventsCompleted {
                events,
                result: result as i32,
                next_event_number: 1,
                last_event_number: 0,
                is_end_of_stream: true,
                last_commit_position: 0,
                error: None,
            },
        )
    }

    fn read_slice() -> ReadSlice {
        ReadSlice {
            stream_id: "orders-1".to_string(),
            direction: ReadDirection::Forward,
            from_event_number: 0,
            max_count: 10,
            resolve_links: true,
            require_master: false,
        }
    }

    #[test]
    fn test_read_slice_result_mapping() {
        assert!(matches!(
            read_slice().complete(slice_reply(ReadStreamResult::NoStream, vec![])),
            Err(ClientError::StreamNotFound(_))
        ));
        assert!(matches!(
            read_slice().complete(slice_reply(ReadStreamResult::StreamDeleted, vec![])),
            Err(ClientError::StreamDeleted(_))
        ));
        assert!(matches!(
            read_slice().complete(slice_reply(ReadStreamResult::AccessDenied, vec![])),
            Err(ClientError::AccessDenied(_))
        ));
        assert!(matches!(
            read_slice().complete(slice_reply(ReadStreamResult::Error, vec![])),
            Err(ClientError::Server(_))
        ));

        let empty = read_slice()
            .complete(slice_reply(ReadStreamResult::Success, vec![]))
            .unwrap();
        assert!(empty.is_empty());
        assert!(empty.is_end_of_stream);
    }

    #[test]
    fn test_read_slice_rejects_empty_slot() {
        let reply = slice_reply(
            ReadStreamResult::Success,
            vec![ResolvedIndexedEvent::default()],
        );
        let err = read_slice().complete(reply).unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_read_slice_payload() {
        let op = ReadSlice {
            direction: ReadDirection::Backward,
            from_event_number: -1,
            ..read_slice()
        };
        assert_eq!(op.command(), TcpCommand::ReadStreamEventsBackward);
        let request = ReadStreamEvents::decode(op.payload()).unwrap();
        assert_eq!(request.from_event_number, -1);
        assert_eq!(request.max_count, 10);
        assert!(request.resolve_link_tos);
    }

    #[test]
    fn test_append_wrong_expected_version() {
        let op = Append {
            stream_id: "orders-1".to_string(),
            expected_version: ExpectedVersion::Exact(3),
            events: vec![],
            require_master: false,
        };
        let reply = Frame::with_message(
            TcpCommand::WriteEventsCompleted,
            uuid::Uuid::new_v4(),
            None,
            &WriteEventsCompleted {
                result: OperationResult::WrongExpectedVersion as i32,
                message: None,
                first_event_number: -1,
                last_event_number: -1,
                prepare_position: None,
                commit_position: None,
                current_version: Some(7),
            },
        );
        match op.complete(reply) {
            Err(ClientError::WrongExpectedVersion {
                expected, current, ..
            }) => {
                assert_eq!(expected, "3");
                assert_eq!(current, Some(7));
            }
            other => panic!("expected wrong expected version, got {other:?}"),
        }
    }
}
