//! Request descriptors: what a single logical API call asks the server for.
//!
//! | Endpoint | Path | Method |
//! |----------|------|--------|
//! | [`EndpointKind::TableData`] | `api/table.json` | GET |
//! | [`EndpointKind::HistoricData`] | `api/historicdata.json` | GET |
//! | [`EndpointKind::Status`] | `api/getstatus.htm` | GET |
//! | [`EndpointKind::TreeNodeStats`] | `api/gettreenodestats.xml` | GET |
//! | [`EndpointKind::Action`] | `api/<name>.htm` | GET |
//! | [`EndpointKind::GetObjectProperty`] | `api/getobjectproperty.htm` | GET |
//! | [`EndpointKind::SetObjectProperty`] | `api/setobjectproperty.htm` | GET |
//! | [`EndpointKind::SettingsPage`] | `controls/objectdata.htm` | GET |
//! | [`EndpointKind::EditSettings`] | `editsettings` | POST |
//! | [`EndpointKind::PassHash`] | `api/getpasshash.htm` | GET |

use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ValidationError};
use crate::http_client::HttpMethod;
use crate::paging::PageCursor;

/// Well-known query parameter names.
pub mod keys {
    pub const CONTENT: &str = "content";
    pub const COLUMNS: &str = "columns";
    pub const COUNT: &str = "count";
    pub const START: &str = "start";
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const VALUE: &str = "value";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const PASSHASH: &str = "passhash";
}

/// Endpoint family a request is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    TableData,
    HistoricData,
    Status,
    TreeNodeStats,
    /// Generic command page such as `pause` or `scannow`.
    Action(String),
    GetObjectProperty,
    SetObjectProperty,
    /// HTML settings page scraped for raw property values.
    SettingsPage,
    EditSettings,
    PassHash,
}

impl EndpointKind {
    /// Builds an action endpoint, rejecting names that are not plain page names.
    pub fn action(name: impl Into<String>) -> Result<Self, ClientError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !valid {
            return Err(ClientError::InvalidRequest(format!(
                "action name '{name}' must be a non-empty alphanumeric page name"
            )));
        }
        Ok(Self::Action(name))
    }

    pub fn path(&self) -> String {
        match self {
            Self::TableData => String::from("api/table.json"),
            Self::HistoricData => String::from("api/historicdata.json"),
            Self::Status => String::from("api/getstatus.htm"),
            Self::TreeNodeStats => String::from("api/gettreenodestats.xml"),
            Self::Action(name) => format!("api/{name}.htm"),
            Self::GetObjectProperty => String::from("api/getobjectproperty.htm"),
            Self::SetObjectProperty => String::from("api/setobjectproperty.htm"),
            Self::SettingsPage => String::from("controls/objectdata.htm"),
            Self::EditSettings => String::from("editsettings"),
            Self::PassHash => String::from("api/getpasshash.htm"),
        }
    }

    pub const fn method(&self) -> HttpMethod {
        match self {
            Self::EditSettings => HttpMethod::Post,
            _ => HttpMethod::Get,
        }
    }
}

impl Display for EndpointKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// Table being queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Content {
    Sensors,
    Devices,
    Groups,
    Probes,
    Logs,
    Notifications,
    Schedules,
    Channels,
}

impl Content {
    /// Value of the `content` parameter, also the JSON key of the row array.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sensors => "sensors",
            Self::Devices => "devices",
            Self::Groups => "groups",
            Self::Probes => "probenode",
            Self::Logs => "messages",
            Self::Notifications => "notifications",
            Self::Schedules => "schedules",
            Self::Channels => "channels",
        }
    }
}

impl Display for Content {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parameter value. `Multi` is sent as one query pair per element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    Single(String),
    Multi(Vec<String>),
}

impl ParameterValue {
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::Multi(values) => values,
        };
        slice.iter().map(String::as_str)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<usize> for ParameterValue {
    fn from(value: usize) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<Vec<String>> for ParameterValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

/// Parameter bag with unique keys.
///
/// Cloning is the only way to derive a per-page variant; a bag captured by a
/// dispatched request is never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    entries: BTreeMap<String, ParameterValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParameterValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Appends to a multi-valued key, promoting an existing single value.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let slot = self
            .entries
            .entry(key.into())
            .or_insert_with(|| ParameterValue::Multi(Vec::new()));
        match slot {
            ParameterValue::Multi(values) => values.push(value),
            ParameterValue::Single(existing) => {
                let first = std::mem::take(existing);
                *slot = ParameterValue::Multi(vec![first, value]);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ParameterValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of this bag addressing one page.
    pub fn for_page(&self, cursor: PageCursor) -> Self {
        self.clone()
            .with(keys::START, cursor.offset)
            .with(keys::COUNT, cursor.size)
    }

    /// Flattened `(key, value)` pairs in key order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(key, value)| value.values().map(move |v| (key.as_str(), v)))
    }

    /// `application/x-www-form-urlencoded` rendering.
    pub fn encode(&self) -> String {
        self.pairs()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

type ValidatorFn = dyn Fn(String) -> Result<String, ValidationError> + Send + Sync;

/// Post-processing hook run on a successful raw response.
///
/// A validator may rewrite the body or reject it; rejections are fatal and
/// never retried.
#[derive(Clone)]
pub struct ResponseValidator(Arc<ValidatorFn>);

impl ResponseValidator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(String) -> Result<String, ValidationError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Rejects bodies that do not contain `marker`.
    pub fn require_marker(marker: impl Into<String>) -> Self {
        let marker = marker.into();
        Self::new(move |body| {
            if body.contains(marker.as_str()) {
                Ok(body)
            } else {
                Err(ValidationError::MissingMarker {
                    marker: marker.clone(),
                })
            }
        })
    }

    pub fn apply(&self, body: String) -> Result<String, ValidationError> {
        (self.0)(body)
    }
}

impl Debug for ResponseValidator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResponseValidator(..)")
    }
}

/// One logical request. Built once, then only borrowed by the engine.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    endpoint: EndpointKind,
    parameters: Parameters,
    validator: Option<ResponseValidator>,
}

impl RequestDescriptor {
    pub fn new(endpoint: EndpointKind, parameters: Parameters) -> Self {
        Self {
            endpoint,
            parameters,
            validator: None,
        }
    }

    /// Table request for `content` with extra filter/column parameters.
    pub fn table(content: Content, parameters: Parameters) -> Self {
        Self::new(
            EndpointKind::TableData,
            parameters.with(keys::CONTENT, content.as_str()),
        )
    }

    pub fn with_validator(mut self, validator: ResponseValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn endpoint(&self) -> &EndpointKind {
        &self.endpoint
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn validator(&self) -> Option<&ResponseValidator> {
        self.validator.as_ref()
    }
}
