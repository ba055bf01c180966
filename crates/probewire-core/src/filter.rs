use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::request::Parameters;

/// Comparison applied by the server to a filtered property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
}

impl FilterOperator {
    const fn prefix(self) -> Option<&'static str> {
        match self {
            Self::Equals => None,
            Self::NotEquals => Some("@neq"),
            Self::GreaterThan => Some("@above"),
            Self::LessThan => Some("@below"),
            Self::Contains => Some("@sub"),
        }
    }
}

/// A `property operator value` predicate sent as a `filter_<property>` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    property: String,
    operator: FilterOperator,
    value: String,
}

impl SearchFilter {
    pub fn new(
        property: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let property = property.into();
        if property.is_empty()
            || !property
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            return Err(ClientError::InvalidRequest(format!(
                "filter property '{property}' must be a non-empty identifier"
            )));
        }
        Ok(Self {
            property,
            operator,
            value: value.into(),
        })
    }

    pub fn equals(
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Self::new(property, FilterOperator::Equals, value)
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn key(&self) -> String {
        format!("filter_{}", self.property)
    }

    pub fn encoded_value(&self) -> String {
        match self.operator.prefix() {
            Some(prefix) => format!("{prefix}({})", self.value),
            None => self.value.clone(),
        }
    }

    /// Adds this predicate to `parameters`. Repeated properties accumulate,
    /// which the server treats as a logical OR.
    pub fn apply(&self, parameters: &mut Parameters) {
        parameters.push(self.key(), self.encoded_value());
    }
}

impl Display for SearchFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key(), self.encoded_value())
    }
}
