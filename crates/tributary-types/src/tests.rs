//! Unit tests for tributary-types

use bytes::Bytes;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    CORRELATION_ID_KEY, ContentType, Event, EventData, EventError, EventMetadata, ExpectedVersion,
    Metadata,
    RawEventRecord, StreamPosition, uuid_codec,
};

fn test_data() -> Value {
    json!({
        "someString": "some text",
        "someNumber": 100,
        "someBoolean": true,
        "someObject": {
            "moreText": "something more",
            "otherNumber": 200,
            "otherBoolean": false
        }
    })
}

fn metadata_with_correlation(id: Uuid) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(CORRELATION_ID_KEY.to_string(), json!(id.to_string()));
    metadata
}

fn frozen_event() -> Event {
    let mut event = Event::with_payload(
        "EventWasHappened",
        test_data(),
        Some(metadata_with_correlation(Uuid::new_v4())),
    )
    .unwrap();
    event.freeze();
    event
}

fn raw_record(metadata: Option<Bytes>) -> RawEventRecord {
    RawEventRecord {
        event_type: "SomethingWasHappened".to_string(),
        event_stream_id: "stream-1".to_string(),
        event_number: 1,
        event_id: Bytes::copy_from_slice(&uuid_codec::uuid_to_bytes(Uuid::new_v4())),
        data_content_type: ContentType::Structured,
        metadata_content_type: ContentType::Structured,
        data: Bytes::from(r#"{"someField":"someValue","someNumber":100}"#),
        metadata,
        created: Some(638_000_000_000_000_000),
        created_epoch: Some(1_700_000_000_000),
    }
}

// ============================================================================
// New Event Tests
// ============================================================================

#[test]
fn new_event_is_new_and_mutable() {
    let event = Event::new("SomethingWasHappened").unwrap();
    assert!(event.is_new());
    assert!(!event.is_frozen());
    assert!(event.metadata().is_none());
    assert!(event.stream_id().is_none());
    assert!(event.event_number().is_none());
}

#[test]
fn new_event_rejects_empty_name() {
    let result = Event::new("");
    assert!(matches!(result, Err(EventError::Validation(_))));
}

#[test]
fn new_events_get_distinct_ids() {
    let a = Event::new("A").unwrap();
    let b = Event::new("A").unwrap();
    assert_ne!(a.id(), b.id());
}

#[test]
fn with_id_replaces_generated_id() {
    let id = Uuid::new_v4();
    let event = Event::new("A").unwrap().with_id(id).unwrap();
    assert_eq!(event.id(), id);
}

#[test]
fn set_name_validates() {
    let mut event = Event::new("A").unwrap();
    assert!(matches!(event.set_name(""), Err(EventError::Validation(_))));
    assert_eq!(event.name(), "A");
}

// ============================================================================
// Frozen Event Tests
// ============================================================================

#[test]
fn frozen_event_is_not_new() {
    assert!(!frozen_event().is_new());
}

#[test]
fn freeze_is_idempotent() {
    let mut event = frozen_event();
    event.freeze();
    assert!(event.is_frozen());
}

#[test]
fn frozen_event_rejects_name_change() {
    let mut event = frozen_event();
    let err = event.set_name("EventRenamed").unwrap_err();
    assert_eq!(err, EventError::Frozen { field: "name" });
    assert!(err.is_operation_error());
    assert_eq!(event.name(), "EventWasHappened");
}

#[test]
fn frozen_event_rejects_id_change() {
    let mut event = frozen_event();
    let before = event.id();
    assert!(event.set_id(Uuid::new_v4()).unwrap_err().is_operation_error());
    assert_eq!(event.id(), before);
}

#[test]
fn frozen_event_rejects_data_change() {
    let mut event = frozen_event();
    let mut changed = test_data();
    changed["someString"] = json!("I was changed");
    assert!(event.set_data(changed).unwrap_err().is_operation_error());
    assert_eq!(event.data(), &EventData::Json(test_data()));
}

#[test]
fn frozen_event_rejects_metadata_change() {
    let mut event = frozen_event();
    let before = event.metadata().cloned();
    let mut replacement = Metadata::new();
    replacement.insert("somethingNew".to_string(), json!(Uuid::new_v4().to_string()));
    assert!(
        event
            .set_metadata(Some(replacement.into()))
            .unwrap_err()
            .is_operation_error()
    );
    assert_eq!(event.metadata().cloned(), before);
}

#[test]
fn frozen_event_rejects_correlation_id_change() {
    let mut event = frozen_event();
    let before = event.correlation_id();
    assert!(before.is_some());
    assert!(
        event
            .set_correlation_id(Some(Uuid::new_v4()))
            .unwrap_err()
            .is_operation_error()
    );
    assert!(event.set_correlation_id(None).unwrap_err().is_operation_error());
    assert_eq!(event.correlation_id(), before);
}

// ============================================================================
// Correlation Id Tests
// ============================================================================

#[test]
fn setting_correlation_id_creates_metadata() {
    let mut event = Event::new("SomethingWasHappened").unwrap();
    let id = Uuid::new_v4();
    event.set_correlation_id(Some(id)).unwrap();

    assert_eq!(event.correlation_id(), Some(id));
    assert_eq!(
        event.metadata().and_then(EventMetadata::as_json),
        Some(&metadata_with_correlation(id))
    );
}

#[test]
fn clearing_correlation_id_leaves_empty_metadata() {
    let id = Uuid::new_v4();
    let mut event =
        Event::with_payload("SomethingWasHappened", json!({}), Some(metadata_with_correlation(id)))
            .unwrap();
    event.set_correlation_id(None).unwrap();

    assert_eq!(event.correlation_id(), None);
    assert_eq!(
        event.metadata().and_then(EventMetadata::as_json),
        Some(&Metadata::new())
    );
}

#[test]
fn clearing_correlation_id_on_empty_metadata() {
    let mut event =
        Event::with_payload("SomethingWasHappened", json!({}), Some(Metadata::new())).unwrap();
    event.set_correlation_id(None).unwrap();

    assert_eq!(event.correlation_id(), None);
    assert_eq!(
        event.metadata().and_then(EventMetadata::as_json),
        Some(&Metadata::new())
    );
}

#[test]
fn clearing_correlation_id_keeps_other_keys() {
    let id = Uuid::new_v4();
    let mut metadata = metadata_with_correlation(id);
    metadata.insert("user".to_string(), json!("alice"));
    let mut event = Event::with_payload("A", json!({}), Some(metadata)).unwrap();

    event.set_correlation_id(None).unwrap();

    let metadata = event.metadata().and_then(EventMetadata::as_json).unwrap();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata.get("user"), Some(&json!("alice")));
}

#[test]
fn malformed_correlation_id_reads_as_absent() {
    let mut metadata = Metadata::new();
    metadata.insert(CORRELATION_ID_KEY.to_string(), json!(42));
    let event = Event::with_payload("A", json!({}), Some(metadata)).unwrap();
    assert_eq!(event.correlation_id(), None);
}

// ============================================================================
// From Raw Tests
// ============================================================================

#[test]
fn from_raw_with_metadata() {
    let correlation_id = Uuid::new_v4();
    let metadata = serde_json::to_vec(&metadata_with_correlation(correlation_id)).unwrap();
    let record = raw_record(Some(Bytes::from(metadata)));

    let event = Event::from_raw(Some(&record)).unwrap();

    assert_eq!(event.name(), "SomethingWasHappened");
    assert_eq!(event.stream_id(), Some("stream-1"));
    assert_eq!(event.event_number(), Some(1));
    assert_eq!(
        event.data(),
        &EventData::Json(json!({"someField": "someValue", "someNumber": 100}))
    );
    assert_eq!(event.correlation_id(), Some(correlation_id));
    assert_eq!(
        event.id(),
        uuid_codec::uuid_from_bytes(&record.event_id).unwrap()
    );
    assert!(event.is_frozen());
    assert!(!event.is_new());
}

#[test]
fn from_raw_without_metadata() {
    let mut record = raw_record(None);
    record.created = None;
    record.created_epoch = None;

    let event = Event::from_raw(Some(&record)).unwrap();

    assert!(event.metadata().is_none());
    assert!(event.correlation_id().is_none());
    assert!(event.created().is_none());
    assert!(event.created_at().is_none());
}

#[test]
fn from_raw_with_empty_metadata_bytes() {
    let record = raw_record(Some(Bytes::new()));
    let event = Event::from_raw(Some(&record)).unwrap();

    assert_eq!(
        event.metadata().and_then(EventMetadata::as_json),
        Some(&Metadata::new())
    );
    assert!(event.correlation_id().is_none());
}

#[test]
fn from_raw_keeps_creation_time() {
    let event = Event::from_raw(Some(&raw_record(None))).unwrap();
    assert_eq!(event.created_epoch(), Some(1_700_000_000_000));
    assert_eq!(
        event.created_at().map(|t| t.timestamp_millis()),
        Some(1_700_000_000_000)
    );
}

#[test]
fn from_raw_missing_record_is_protocol_error() {
    let result = Event::from_raw(None);
    assert!(matches!(result, Err(EventError::Protocol(_))));
}

#[test]
fn from_raw_binary_data() {
    let mut record = raw_record(None);
    record.data_content_type = ContentType::Raw;
    record.data = Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]);

    let event = Event::try_from(&record).unwrap();
    assert_eq!(
        event.data().as_binary(),
        Some(&Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]))
    );
}

#[test]
fn from_raw_rejects_invalid_json_data() {
    let mut record = raw_record(None);
    record.data = Bytes::from_static(b"{not json");
    assert!(matches!(
        Event::from_raw(Some(&record)),
        Err(EventError::Protocol(_))
    ));
}

#[test]
fn from_raw_rejects_non_object_metadata() {
    let record = raw_record(Some(Bytes::from_static(b"[1,2,3]")));
    assert!(matches!(
        Event::from_raw(Some(&record)),
        Err(EventError::Protocol(_))
    ));
}

#[test]
fn from_raw_binary_metadata() {
    let mut record = raw_record(Some(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef])));
    record.metadata_content_type = ContentType::Raw;

    let event = Event::from_raw(Some(&record)).unwrap();

    assert_eq!(
        event.metadata().and_then(EventMetadata::as_binary),
        Some(&Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]))
    );
    assert_eq!(event.metadata_content_type(), ContentType::Raw);
    assert!(event.correlation_id().is_none());
}

#[test]
fn from_raw_binary_metadata_that_looks_like_json() {
    let mut record = raw_record(Some(Bytes::from_static(br#"{"$correlationId":"x"}"#)));
    record.metadata_content_type = ContentType::Raw;

    let event = Event::from_raw(Some(&record)).unwrap();
    assert!(event.metadata().and_then(EventMetadata::as_json).is_none());
    assert!(event.correlation_id().is_none());
}

#[test]
fn binary_metadata_round_trips_to_wire_bytes() {
    let event = Event::new("A")
        .unwrap()
        .with_metadata(Bytes::from_static(b"\x01\x02"))
        .unwrap();
    assert_eq!(event.metadata_content_type(), ContentType::Raw);
    assert_eq!(
        event.metadata_bytes().unwrap(),
        Some(Bytes::from_static(b"\x01\x02"))
    );
}

#[test]
fn correlation_id_rejected_on_binary_metadata() {
    let mut event = Event::new("A")
        .unwrap()
        .with_metadata(vec![1u8, 2, 3])
        .unwrap();
    let err = event.set_correlation_id(Some(Uuid::new_v4())).unwrap_err();
    assert!(matches!(err, EventError::Validation(_)));
    assert_eq!(
        event.metadata().and_then(EventMetadata::as_binary),
        Some(&Bytes::from_static(&[1, 2, 3]))
    );
}

#[test]
fn structured_metadata_content_type() {
    let event = Event::new("A").unwrap();
    assert_eq!(event.metadata_content_type(), ContentType::Structured);
    let event = event.with_metadata(Metadata::new()).unwrap();
    assert_eq!(event.metadata_content_type(), ContentType::Structured);
}

#[test]
fn from_raw_rejects_short_identifier() {
    let mut record = raw_record(None);
    record.event_id = Bytes::from_static(&[1, 2, 3]);
    assert!(matches!(
        Event::from_raw(Some(&record)),
        Err(EventError::Protocol(_))
    ));
}

#[test]
fn data_as_deserializes_structured_payload() {
    #[derive(serde::Deserialize)]
    struct Counter {
        count: u32,
    }

    let event = Event::with_payload("Counted", json!({"count": 7}), None).unwrap();
    let counter: Counter = event.data_as().unwrap();
    assert_eq!(counter.count, 7);
}

// ============================================================================
// Position Tests
// ============================================================================

#[test]
fn stream_position_sentinels() {
    assert_eq!(StreamPosition::START.as_i64(), 0);
    assert!(StreamPosition::END.is_end());
    assert_eq!(StreamPosition::END.to_string(), "end");
    assert_eq!(StreamPosition::from(12).to_string(), "12");
}

#[test]
fn expected_version_wire_values() {
    assert_eq!(ExpectedVersion::Any.as_i64(), -2);
    assert_eq!(ExpectedVersion::NoStream.as_i64(), -1);
    assert_eq!(ExpectedVersion::StreamExists.as_i64(), -4);
    assert_eq!(ExpectedVersion::Exact(9).as_i64(), 9);
}

#[test]
fn content_type_from_wire() {
    assert_eq!(ContentType::try_from(0).unwrap(), ContentType::Raw);
    assert_eq!(ContentType::try_from(1).unwrap(), ContentType::Structured);
    assert!(ContentType::try_from(7).is_err());
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn uuid_text_roundtrip(raw in any::<[u8; 16]>()) {
            let text = Uuid::from_bytes(raw).hyphenated().to_string();
            let bytes = uuid_codec::to_bytes(&text).unwrap();
            prop_assert_eq!(uuid_codec::to_text(&bytes).unwrap(), text);
        }

        #[test]
        fn uuid_bytes_roundtrip(raw in any::<[u8; 16]>()) {
            let uuid = uuid_codec::uuid_from_bytes(&raw).unwrap();
            prop_assert_eq!(uuid_codec::uuid_to_bytes(uuid), raw);
        }

        #[test]
        fn correlation_id_set_then_get(raw in any::<[u8; 16]>()) {
            let id = Uuid::from_bytes(raw);
            let mut event = Event::new("Tested").unwrap();
            event.set_correlation_id(Some(id)).unwrap();
            prop_assert_eq!(event.correlation_id(), Some(id));
        }
    }
}
