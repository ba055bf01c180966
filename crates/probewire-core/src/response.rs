//! Typed responses and the deserializer contract.
//!
//! The engine never interprets payloads itself. Anything that can turn a raw
//! body into `(items, total_count, version)` plugs in through
//! [`ResponseDeserializer`]; [`JsonTableDeserializer`] covers the server's
//! `table.json` envelope:
//!
//! ```text
//! {"prtg-version": "23.1.82.2175", "treesize": 1234, "sensors": [ {...}, ... ]}
//! ```

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ClientError;
use crate::request::Content;

const VERSION_KEY: &str = "prtg-version";
const TOTAL_KEY: &str = "treesize";

/// One page of deserialized rows plus the server's envelope metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedResponse<T> {
    pub items: Vec<T>,
    /// Row count advertised by the server for the whole query.
    pub total_count: usize,
    pub version: Option<String>,
}

impl<T> TypedResponse<T> {
    pub fn new(items: Vec<T>, total_count: usize, version: Option<String>) -> Self {
        Self {
            items,
            total_count,
            version,
        }
    }
}

/// Maps a raw response body to typed rows.
pub trait ResponseDeserializer<T>: Send + Sync {
    fn deserialize(&self, raw: &str) -> Result<TypedResponse<T>, ClientError>;
}

impl<T, F> ResponseDeserializer<T> for F
where
    F: Fn(&str) -> Result<TypedResponse<T>, ClientError> + Send + Sync,
{
    fn deserialize(&self, raw: &str) -> Result<TypedResponse<T>, ClientError> {
        self(raw)
    }
}

/// Deserializer for `table.json` responses of one content kind.
#[derive(Debug, Clone, Copy)]
pub struct JsonTableDeserializer<T> {
    content: Content,
    _rows: PhantomData<fn() -> T>,
}

impl<T> JsonTableDeserializer<T> {
    pub fn new(content: Content) -> Self {
        Self {
            content,
            _rows: PhantomData,
        }
    }

    pub fn content(&self) -> Content {
        self.content
    }
}

impl<T: DeserializeOwned> ResponseDeserializer<T> for JsonTableDeserializer<T> {
    fn deserialize(&self, raw: &str) -> Result<TypedResponse<T>, ClientError> {
        let mut envelope: Map<String, Value> = serde_json::from_str(raw)?;

        let version = match envelope.remove(VERSION_KEY) {
            Some(Value::String(version)) if !version.is_empty() => Some(version),
            _ => None,
        };

        let total_count = match envelope.remove(TOTAL_KEY) {
            Some(value) => parse_count(&value)?,
            None => {
                return Err(ClientError::Deserialization(format!(
                    "response is missing '{TOTAL_KEY}'"
                )))
            }
        };

        let items = match envelope.remove(self.content.as_str()) {
            Some(Value::Null) | None => Vec::new(),
            Some(rows) => serde_json::from_value(rows)?,
        };

        Ok(TypedResponse::new(items, total_count, version))
    }
}

fn parse_count(value: &Value) -> Result<usize, ClientError> {
    let parsed = match value {
        Value::Number(number) => number.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(text) => text.trim().replace(',', "").parse::<usize>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        ClientError::Deserialization(format!("'{TOTAL_KEY}' is not a row count: {value}"))
    })
}

/// Summary returned by the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServerStatus {
    pub version: String,
    pub alarms: String,
    pub ack_alarms: String,
    pub new_alarms: String,
    pub new_messages: String,
    pub clock: String,
    #[serde(rename = "PRTGUpdateAvailable")]
    pub update_available: String,
}

impl ServerStatus {
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        Ok(serde_json::from_str(raw)?)
    }
}
