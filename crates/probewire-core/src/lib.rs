//! # Probewire Core
//!
//! Request engine and paging streamer for the table API of a network
//! monitoring server.
//!
//! ## Overview
//!
//! - **Request engine** executes one logical request with linear-backoff
//!   retries on transient transport failures, response validation and
//!   server-version caching
//! - **Paging streamer** turns a table query into a single lazy stream of
//!   typed rows, fetching pages in parallel for small result sets and
//!   serially for large ones
//! - **Fan-in merger** drains concurrently dispatched pages in completion order
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | `MonitorClient` facade and pass-hash bootstrap |
//! | [`config`] | Client tunables and environment loading |
//! | [`connection`] | Server address, credentials and URL building |
//! | [`engine`] | Request execution with retry and validation |
//! | [`error`] | Error taxonomy |
//! | [`events`] | Retry and diagnostic notifications |
//! | [`fan_in`] | Completion-order merge of page fetches |
//! | [`filter`] | Server-side search filters |
//! | [`http_client`] | Transport abstraction and reqwest transport |
//! | [`paging`] | Page planning and strategy selection |
//! | [`request`] | Endpoint kinds, parameters and request descriptors |
//! | [`response`] | Typed responses and deserializers |
//! | [`retry`] | Retry configuration |
//! | [`streamer`] | Paged streaming of table queries |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  MonitorClient  │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐  count probe   ┌──────────────────┐
//! │ PagingStreamer  │───────────────▶│  RequestEngine   │
//! └────────┬────────┘                │ (retry/validate) │
//!   parallel│   serial               └────────┬─────────┘
//!          ▼                                  ▼
//! ┌─────────────────┐                ┌──────────────────┐
//! │  FanInMerger    │  page fetches  │   HttpClient     │
//! │  (JoinSet)      │───────────────▶│   (reqwest)      │
//! └─────────────────┘                └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use probewire_core::{ClientError, ErrorKind};
//!
//! fn describe(error: &ClientError) -> &'static str {
//!     match error.kind() {
//!         ErrorKind::Transport => "server unreachable after retries",
//!         ErrorKind::Authentication => "check username and pass-hash",
//!         _ => "request failed",
//!     }
//! }
//! ```
//!
//! ## Logging
//!
//! The crate emits `tracing` events and never installs a subscriber.

pub mod client;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod events;
pub mod fan_in;
pub mod filter;
pub mod http_client;
pub mod paging;
pub mod request;
pub mod response;
pub mod retry;
pub mod streamer;

pub use client::MonitorClient;
pub use config::ClientConfig;
pub use connection::{ConnectionSettings, Credential, Scheme};
pub use engine::RequestEngine;
pub use error::{ClientError, ErrorKind, TransportError, ValidationError};
pub use events::{ClientEvent, EventBus};
pub use fan_in::FanInMerger;
pub use filter::{FilterOperator, SearchFilter};
pub use http_client::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient, TransportFuture,
};
pub use paging::{
    plan_pages, select_strategy, PageCursor, Strategy, StreamSession, DEFAULT_PAGE_SIZE,
    DEFAULT_SERIAL_THRESHOLD,
};
pub use request::{
    Content, EndpointKind, ParameterValue, Parameters, RequestDescriptor, ResponseValidator,
};
pub use response::{JsonTableDeserializer, ResponseDeserializer, ServerStatus, TypedResponse};
pub use retry::{Backoff, RetryConfig};
pub use streamer::{PagingStreamer, RecordStream, TableQuery};
