use std::env;
use std::fmt::{Debug, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::request::{keys, Parameters, RequestDescriptor};

const REDACTED: &str = "***";

/// URL scheme used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl Scheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// Secret used to authenticate each request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Server-issued hash; the normal steady state.
    PassHash(String),
    /// Plain password, only used to obtain a pass-hash.
    Password(String),
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PassHash(_) => f.write_str("PassHash(***)"),
            Self::Password(_) => f.write_str("Password(***)"),
        }
    }
}

/// Connection and authentication state shared by every request of a client.
/// Read-only after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    server: String,
    scheme: Scheme,
    username: String,
    credential: Credential,
}

impl ConnectionSettings {
    /// `server` may carry an explicit `http://` or `https://` prefix, which
    /// overrides the default scheme.
    pub fn new(
        server: impl AsRef<str>,
        username: impl Into<String>,
        credential: Credential,
    ) -> Result<Self, ClientError> {
        let raw = server.as_ref().trim();
        let (scheme, host) = if let Some(rest) = raw.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else if let Some(rest) = raw.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else {
            (Scheme::default(), raw)
        };
        let host = host.trim_end_matches('/');
        if host.is_empty() {
            return Err(ClientError::InvalidRequest(String::from(
                "server address cannot be empty",
            )));
        }

        let username = username.into();
        if username.trim().is_empty() {
            return Err(ClientError::InvalidRequest(String::from(
                "username cannot be empty",
            )));
        }

        Ok(Self {
            server: host.to_string(),
            scheme,
            username,
            credential,
        })
    }

    /// Reads `PROBEWIRE_SERVER`, `PROBEWIRE_USERNAME`, `PROBEWIRE_SCHEME` and
    /// either `PROBEWIRE_PASSHASH` or `PROBEWIRE_PASSWORD`.
    pub fn from_env() -> Result<Self, ClientError> {
        let server = required_env("PROBEWIRE_SERVER")?;
        let username = required_env("PROBEWIRE_USERNAME")?;
        let credential = match (env::var("PROBEWIRE_PASSHASH"), env::var("PROBEWIRE_PASSWORD")) {
            (Ok(hash), _) => Credential::PassHash(hash),
            (Err(_), Ok(password)) => Credential::Password(password),
            _ => {
                return Err(ClientError::InvalidRequest(String::from(
                    "either PROBEWIRE_PASSHASH or PROBEWIRE_PASSWORD must be set",
                )))
            }
        };

        let mut settings = Self::new(server, username, credential)?;
        if let Ok(scheme) = env::var("PROBEWIRE_SCHEME") {
            settings.scheme = match scheme.to_ascii_lowercase().as_str() {
                "http" => Scheme::Http,
                "https" => Scheme::Https,
                other => {
                    return Err(ClientError::InvalidRequest(format!(
                        "unsupported scheme '{other}', expected http or https"
                    )))
                }
            };
        }
        Ok(settings)
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Same server and user, authenticated by `credential`.
    pub fn with_credential(&self, credential: Credential) -> Self {
        Self {
            credential,
            ..self.clone()
        }
    }

    pub fn with_pass_hash(&self, pass_hash: impl Into<String>) -> Self {
        self.with_credential(Credential::PassHash(pass_hash.into()))
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.server)
    }

    /// Authentication parameters followed by the descriptor's own parameters.
    pub(crate) fn query_for(
        &self,
        descriptor: &RequestDescriptor,
        redact: bool,
    ) -> Result<Parameters, ClientError> {
        let own = descriptor.parameters();
        for reserved in [keys::USERNAME, keys::PASSHASH, keys::PASSWORD] {
            if own.contains_key(reserved) {
                return Err(ClientError::InvalidRequest(format!(
                    "parameter '{reserved}' is managed by the connection and cannot be set per request"
                )));
            }
        }

        let mut query = own.clone();
        query.insert(keys::USERNAME, self.username.as_str());
        let (key, secret) = match &self.credential {
            Credential::PassHash(hash) => (keys::PASSHASH, hash.as_str()),
            Credential::Password(password) => (keys::PASSWORD, password.as_str()),
        };
        query.insert(key, if redact { REDACTED } else { secret });
        Ok(query)
    }

    /// Full request URL including the query string.
    pub fn url_for(&self, descriptor: &RequestDescriptor) -> Result<String, ClientError> {
        self.render_url(descriptor, false)
    }

    /// URL safe for logs: secrets replaced by `***`.
    pub fn redacted_url_for(&self, descriptor: &RequestDescriptor) -> Result<String, ClientError> {
        self.render_url(descriptor, true)
    }

    fn render_url(
        &self,
        descriptor: &RequestDescriptor,
        redact: bool,
    ) -> Result<String, ClientError> {
        let query = self.query_for(descriptor, redact)?;
        Ok(format!(
            "{}/{}?{}",
            self.base_url(),
            descriptor.endpoint().path(),
            query.encode()
        ))
    }
}

fn required_env(name: &str) -> Result<String, ClientError> {
    env::var(name).map_err(|_| ClientError::InvalidRequest(format!("{name} is not set")))
}
