//! # tributary-client: Async TCP client for `Tributary`
//!
//! This crate provides a tokio-based client for the `Tributary` event store,
//! speaking the binary protocol defined in `tributary-wire`.
//!
//! ## Usage
//!
//! ```ignore
//! use tributary_client::{Client, ClientConfig, ExpectedVersion, ReadSliceOptions, StreamPosition};
//! use tributary_types::Event;
//!
//! let client = Client::new(ClientConfig::new("127.0.0.1:1113").with_credentials("admin", "changeit"))?;
//! client.connect().await?;
//!
//! let orders = client.stream("orders-1")?;
//!
//! // Append
//! let mut events = vec![Event::with_payload("OrderPlaced", serde_json::json!({"total": 12}), None)?];
//! orders.append_to_stream(ExpectedVersion::Any, &mut events).await?;
//!
//! // Read the latest twenty events, newest first
//! let slice = orders
//!     .read_slice_backward(StreamPosition::END, ReadSliceOptions::new().with_max_count(20))
//!     .await?;
//! ```
//!
//! ## Connection management
//!
//! The connection is owned by a background task. Lost connections are
//! re-established with exponential backoff; operations in flight are replayed
//! on the new connection under their original correlation ids. Heartbeats
//! detect dead connections that the operating system has not noticed yet.
//!
//! ## Configuration
//!
//! [`ClientConfig`] can be built in code, or loaded from a YAML file and
//! `TRIBUTARY_*` environment variables with [`ClientConfig::from_env_or_yaml`].

mod backoff;
mod client;
mod config;
mod error;
mod operation;
mod session;
mod stream;


pub use client::Client;
pub use config::{CONFIG_PATH_ENV, ClientConfig, ReconnectConfig};
pub use error::{ClientError, ClientResult};
pub use session::ConnectionState;
pub use stream::{ReadSliceOptions, Slice, StreamReader, WriteResult};

// Re-export useful types from dependencies
pub use tributary_types::{
    Event, EventData, EventMetadata, ExpectedVersion, Metadata, ReadDirection, StreamPosition,
};
pub use tributary_wire::Credentials;
