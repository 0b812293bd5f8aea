//! The event domain model.
//!
//! An [`Event`] is mutable until it is frozen. Events decoded from the wire
//! are frozen from the start. Every mutator checks the frozen flag and fails
//! with [`EventError::Frozen`] without touching any field.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{EventError, EventResult};
use crate::raw::{ContentType, RawEventRecord};
use crate::uuid_codec;

/// Metadata key holding the event's correlation id.
pub const CORRELATION_ID_KEY: &str = "$correlationId";

/// Structured event metadata: a JSON object.
pub type Metadata = Map<String, Value>;

// ============================================================================
// Event Data
// ============================================================================

/// An event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    /// Structured (JSON) payload.
    Json(Value),
    /// Opaque bytes.
    Binary(Bytes),
}

impl Default for EventData {
    fn default() -> Self {
        Self::Json(Value::Object(Map::new()))
    }
}

impl EventData {
    /// Returns the wire content type for this payload.
    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Json(_) => ContentType::Structured,
            Self::Binary(_) => ContentType::Raw,
        }
    }

    /// Returns the JSON value, if this is a structured payload.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Binary(_) => None,
        }
    }

    /// Returns the raw bytes, if this is a binary payload.
    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            Self::Json(_) => None,
        }
    }

    /// Serializes the payload to the bytes sent on the wire.
    pub fn to_bytes(&self) -> EventResult<Bytes> {
        match self {
            Self::Json(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| EventError::validation(format!("unserializable event data: {e}"))),
            Self::Binary(bytes) => Ok(bytes.clone()),
        }
    }

    fn decode(content_type: ContentType, bytes: &Bytes) -> EventResult<Self> {
        match content_type {
            ContentType::Raw => Ok(Self::Binary(bytes.clone())),
            ContentType::Structured if bytes.is_empty() => Ok(Self::Json(Value::Null)),
            ContentType::Structured => serde_json::from_slice(bytes)
                .map(Self::Json)
                .map_err(|e| EventError::protocol(format!("event data is not valid JSON: {e}"))),
        }
    }
}

impl From<Value> for EventData {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for EventData {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for EventData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

// ============================================================================
// Event Metadata
// ============================================================================

/// Event metadata, encoded like [`EventData`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventMetadata {
    /// Structured (JSON object) metadata.
    Json(Metadata),
    /// Opaque bytes.
    Binary(Bytes),
}

impl EventMetadata {
    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Json(_) => ContentType::Structured,
            Self::Binary(_) => ContentType::Raw,
        }
    }

    pub fn as_json(&self) -> Option<&Metadata> {
        match self {
            Self::Json(map) => Some(map),
            Self::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            Self::Json(_) => None,
        }
    }

    /// Serializes the metadata to the bytes sent on the wire.
    pub fn to_bytes(&self) -> EventResult<Bytes> {
        match self {
            Self::Json(map) => serde_json::to_vec(map)
                .map(Bytes::from)
                .map_err(|e| EventError::validation(format!("unserializable metadata: {e}"))),
            Self::Binary(bytes) => Ok(bytes.clone()),
        }
    }

    // Present but empty structured bytes decode to an empty object.
    fn decode(content_type: ContentType, bytes: &Bytes) -> EventResult<Self> {
        match content_type {
            ContentType::Raw => Ok(Self::Binary(bytes.clone())),
            ContentType::Structured if bytes.is_empty() => Ok(Self::Json(Metadata::new())),
            ContentType::Structured => match serde_json::from_slice(bytes) {
                Ok(Value::Object(map)) => Ok(Self::Json(map)),
                Ok(other) => Err(EventError::protocol(format!(
                    "event metadata must be a JSON object, got {other}"
                ))),
                Err(e) => Err(EventError::protocol(format!(
                    "event metadata is not valid JSON: {e}"
                ))),
            },
        }
    }
}

impl From<Metadata> for EventMetadata {
    fn from(map: Metadata) -> Self {
        Self::Json(map)
    }
}

impl From<Bytes> for EventMetadata {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for EventMetadata {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

// ============================================================================
// Event
// ============================================================================

/// A domain event, either about to be written or read back from a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    id: Uuid,
    data: EventData,
    metadata: Option<EventMetadata>,
    stream_id: Option<String>,
    event_number: Option<i64>,
    created: Option<i64>,
    created_epoch: Option<i64>,
    frozen: bool,
}

impl Event {
    /// Creates a new event with an empty JSON object as data and no metadata.
    pub fn new(name: impl Into<String>) -> EventResult<Self> {
        Self::with_payload(name, EventData::default(), None)
    }

    /// Creates a new event with the given data and structured metadata.
    pub fn with_payload(
        name: impl Into<String>,
        data: impl Into<EventData>,
        metadata: Option<Metadata>,
    ) -> EventResult<Self> {
        let name = name.into();
        validate_name(&name)?;

        Ok(Self {
            name,
            id: Uuid::new_v4(),
            data: data.into(),
            metadata: metadata.map(EventMetadata::Json),
            stream_id: None,
            event_number: None,
            created: None,
            created_epoch: None,
            frozen: false,
        })
    }

    /// Replaces the generated identifier.
    pub fn with_id(mut self, id: Uuid) -> EventResult<Self> {
        self.set_id(id)?;
        Ok(self)
    }

    /// Replaces the metadata, which may be binary.
    pub fn with_metadata(mut self, metadata: impl Into<EventMetadata>) -> EventResult<Self> {
        self.set_metadata(Some(metadata.into()))?;
        Ok(self)
    }

    /// Decodes an event from a wire record.
    ///
    /// A missing record (an unresolved link, or an empty slot in a read
    /// reply) is a protocol error. The returned event is frozen.
    pub fn from_raw(record: Option<&RawEventRecord>) -> EventResult<Self> {
        let record =
            record.ok_or_else(|| EventError::protocol("missing raw event or link record"))?;

        let id = uuid_codec::uuid_from_bytes(&record.event_id)?;
        let data = EventData::decode(record.data_content_type, &record.data)?;
        let metadata = record
            .metadata
            .as_ref()
            .map(|bytes| EventMetadata::decode(record.metadata_content_type, bytes))
            .transpose()?;

        Ok(Self {
            name: record.event_type.clone(),
            id,
            data,
            metadata,
            stream_id: Some(record.event_stream_id.clone()),
            event_number: Some(record.event_number),
            created: record.created,
            created_epoch: record.created_epoch,
            frozen: true,
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    /// Deserializes the event data into `T`.
    ///
    /// Binary payloads are parsed as JSON.
    pub fn data_as<T: DeserializeOwned>(&self) -> EventResult<T> {
        let result = match &self.data {
            EventData::Json(value) => T::deserialize(value),
            EventData::Binary(bytes) => serde_json::from_slice(bytes),
        };
        result.map_err(|e| EventError::protocol(format!("cannot decode event data: {e}")))
    }

    pub fn metadata(&self) -> Option<&EventMetadata> {
        self.metadata.as_ref()
    }

    /// Wire content type of the metadata. Absent metadata is sent as structured.
    pub fn metadata_content_type(&self) -> ContentType {
        self.metadata
            .as_ref()
            .map_or(ContentType::Structured, EventMetadata::content_type)
    }

    /// Serializes the metadata to the bytes sent on the wire.
    pub fn metadata_bytes(&self) -> EventResult<Option<Bytes>> {
        self.metadata.as_ref().map(EventMetadata::to_bytes).transpose()
    }

    /// Returns the correlation id stored under [`CORRELATION_ID_KEY`].
    ///
    /// A value that is not a valid UUID string reads as absent, and binary
    /// metadata never carries one.
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.metadata
            .as_ref()?
            .as_json()?
            .get(CORRELATION_ID_KEY)?
            .as_str()
            .and_then(|text| Uuid::parse_str(text).ok())
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn event_number(&self) -> Option<i64> {
        self.event_number
    }

    /// Creation time in server ticks.
    pub fn created(&self) -> Option<i64> {
        self.created
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn created_epoch(&self) -> Option<i64> {
        self.created_epoch
    }

    /// Creation time as a UTC timestamp.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_epoch.and_then(DateTime::from_timestamp_millis)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Returns true for events that have not been persisted or read back.
    pub fn is_new(&self) -> bool {
        !self.frozen
    }

    // ------------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------------

    /// Makes the event permanently immutable. Idempotent.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> EventResult<()> {
        self.ensure_mutable("name")?;
        let name = name.into();
        validate_name(&name)?;
        self.name = name;
        Ok(())
    }

    pub fn set_id(&mut self, id: Uuid) -> EventResult<()> {
        self.ensure_mutable("id")?;
        self.id = id;
        Ok(())
    }

    pub fn set_data(&mut self, data: impl Into<EventData>) -> EventResult<()> {
        self.ensure_mutable("data")?;
        self.data = data.into();
        Ok(())
    }

    pub fn set_metadata(&mut self, metadata: Option<EventMetadata>) -> EventResult<()> {
        self.ensure_mutable("metadata")?;
        self.metadata = metadata;
        Ok(())
    }

    /// Writes or removes the correlation id key in the metadata.
    ///
    /// After this call the metadata is always present: removing the last key
    /// leaves an empty object. Binary metadata has no keys and is rejected.
    pub fn set_correlation_id(&mut self, correlation_id: Option<Uuid>) -> EventResult<()> {
        self.ensure_mutable("correlationId")?;
        let metadata = match self
            .metadata
            .get_or_insert_with(|| EventMetadata::Json(Metadata::new()))
        {
            EventMetadata::Json(map) => map,
            EventMetadata::Binary(_) => {
                return Err(EventError::validation(
                    "binary metadata cannot carry a correlation id",
                ));
            }
        };
        match correlation_id {
            Some(id) => {
                metadata.insert(
                    CORRELATION_ID_KEY.to_string(),
                    Value::String(id.hyphenated().to_string()),
                );
            }
            None => {
                metadata.remove(CORRELATION_ID_KEY);
            }
        }
        Ok(())
    }

    fn ensure_mutable(&self, field: &'static str) -> EventResult<()> {
        if self.frozen {
            return Err(EventError::Frozen { field });
        }
        Ok(())
    }
}

impl TryFrom<&RawEventRecord> for Event {
    type Error = EventError;

    fn try_from(record: &RawEventRecord) -> EventResult<Self> {
        Self::from_raw(Some(record))
    }
}

fn validate_name(name: &str) -> EventResult<()> {
    if name.is_empty() {
        return Err(EventError::validation("event name must not be empty"));
    }
    Ok(())
}
