//! Execution of single logical requests with retry, validation and
//! server-version caching.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::connection::{ConnectionSettings, Credential};
use crate::error::ClientError;
use crate::events::{ClientEvent, EventBus};
use crate::http_client::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::request::{keys, EndpointKind, Parameters, RequestDescriptor};
use crate::response::{ResponseDeserializer, ServerStatus, TypedResponse};
use crate::retry::RetryConfig;

const ERROR_SNIPPET_LEN: usize = 200;

/// Executes requests against a shared transport.
///
/// Cloning is cheap and clones share the transport, event bus and version
/// cache. Each call to [`execute`](Self::execute) keeps its own attempt
/// counter.
#[derive(Clone)]
pub struct RequestEngine {
    connection: ConnectionSettings,
    transport: Arc<dyn HttpClient>,
    retry: RetryConfig,
    timeout: Duration,
    events: EventBus,
    version: Arc<OnceLock<String>>,
}

impl RequestEngine {
    pub fn new(
        connection: ConnectionSettings,
        transport: Arc<dyn HttpClient>,
        config: &ClientConfig,
        events: EventBus,
    ) -> Self {
        Self {
            connection,
            transport,
            retry: config.retry.clone(),
            timeout: config.request_timeout,
            events,
            version: Arc::new(OnceLock::new()),
        }
    }

    /// Same transport, events and version cache with different credentials.
    pub fn with_connection(&self, connection: ConnectionSettings) -> Self {
        Self {
            connection,
            ..self.clone()
        }
    }

    pub fn connection(&self) -> &ConnectionSettings {
        &self.connection
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Version reported by the first response that carried one.
    pub fn server_version(&self) -> Option<&str> {
        self.version.get().map(String::as_str)
    }

    /// Sends `descriptor` and returns the validated response body.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Transport`] once transient failures exhaust the retry budget,
    ///   or immediately for non-transient transport failures
    /// - [`ClientError::Authentication`] on 401/403
    /// - [`ClientError::Server`] on any other non-2xx status
    /// - [`ClientError::Validation`] when the descriptor's validator rejects the body
    /// - [`ClientError::Cancelled`] when `cancel` fires first
    pub async fn execute(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<String, ClientError> {
        self.execute_as(&self.connection, descriptor, cancel).await
    }

    /// Blocking form of [`execute`](Self::execute) for synchronous callers.
    ///
    /// Drives the request on a private single-threaded runtime, so it must not
    /// be called from inside an async context.
    pub fn execute_blocking(&self, descriptor: &RequestDescriptor) -> Result<String, ClientError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(ClientError::Internal(String::from(
                "execute_blocking called from within an async runtime; use execute instead",
            )));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| ClientError::Internal(format!("failed to start runtime: {error}")))?;
        runtime.block_on(self.execute(descriptor, &CancellationToken::new()))
    }

    /// Executes and deserializes a request, caching the server version.
    pub async fn fetch<T>(
        &self,
        descriptor: &RequestDescriptor,
        deserializer: &dyn ResponseDeserializer<T>,
        cancel: &CancellationToken,
    ) -> Result<TypedResponse<T>, ClientError> {
        let raw = self.execute(descriptor, cancel).await?;
        let response = deserializer.deserialize(&raw)?;
        if let Some(version) = &response.version {
            self.remember_version(version);
        }
        Ok(response)
    }

    /// Exchanges `password` for the server-issued pass-hash.
    pub async fn get_pass_hash(
        &self,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ClientError> {
        let connection = self
            .connection
            .with_credential(Credential::Password(password.to_string()));
        let descriptor = RequestDescriptor::new(EndpointKind::PassHash, Parameters::new());

        let body = self.execute_as(&connection, &descriptor, cancel).await?;
        let hash = body.trim();
        if hash.is_empty() || !hash.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(ClientError::Authentication(String::from(
                "server did not return a numeric pass-hash",
            )));
        }
        Ok(hash.to_string())
    }

    /// Queries the status endpoint, which also seeds the version cache.
    pub async fn get_status(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ServerStatus, ClientError> {
        let descriptor = RequestDescriptor::new(
            EndpointKind::Status,
            Parameters::new().with(keys::ID, "0"),
        );
        let raw = self.execute(&descriptor, cancel).await?;
        let status = ServerStatus::parse(&raw)?;
        if !status.version.is_empty() {
            self.remember_version(&status.version);
        }
        Ok(status)
    }

    fn remember_version(&self, version: &str) {
        if self.version.get().is_none() && self.version.set(version.to_string()).is_ok() {
            debug!(version, "cached server version");
        }
    }

    async fn execute_as(
        &self,
        connection: &ConnectionSettings,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<String, ClientError> {
        let request = self.build_request(connection, descriptor)?;
        let endpoint = descriptor.endpoint().path();
        let redacted = connection.redacted_url_for(descriptor)?;
        let max_retries = self.retry.effective_retries();
        let mut attempt: u32 = 0;

        loop {
            debug!(endpoint = %endpoint, url = %redacted, attempt, "sending request");
            self.events.publish(ClientEvent::Request {
                endpoint: endpoint.clone(),
                url: redacted.clone(),
            });

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                outcome = self.transport.execute(request.clone()) => outcome,
            };

            let error = match outcome {
                Ok(response) => return accept(descriptor, response),
                Err(error) => error,
            };

            if !error.is_transient() || attempt >= max_retries {
                return Err(ClientError::Transport(error));
            }

            attempt += 1;
            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                endpoint = %endpoint,
                url = %redacted,
                attempt,
                max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "transient transport failure, retrying"
            );
            self.events.publish(ClientEvent::Retry {
                endpoint: endpoint.clone(),
                url: redacted.clone(),
                attempt,
                max_retries,
                delay,
                error: error.message().to_string(),
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn build_request(
        &self,
        connection: &ConnectionSettings,
        descriptor: &RequestDescriptor,
    ) -> Result<HttpRequest, ClientError> {
        let request = match descriptor.endpoint().method() {
            HttpMethod::Get => HttpRequest::get(connection.url_for(descriptor)?),
            HttpMethod::Post => {
                let url = format!("{}/{}", connection.base_url(), descriptor.endpoint().path());
                let body = connection.query_for(descriptor, false)?.encode();
                HttpRequest::post(url).with_body(body)
            }
        };
        Ok(request.with_timeout(self.timeout))
    }
}

fn accept(descriptor: &RequestDescriptor, response: HttpResponse) -> Result<String, ClientError> {
    match response.status {
        401 | 403 => Err(ClientError::Authentication(error_message(&response.body))),
        _ if !response.is_success() => Err(ClientError::Server {
            status: response.status,
            message: error_message(&response.body),
        }),
        _ => match descriptor.validator() {
            Some(validator) => Ok(validator.apply(response.body)?),
            None => Ok(response.body),
        },
    }
}

/// Pulls the `<error>` element out of an error page, falling back to a
/// prefix of the body.
fn error_message(body: &str) -> String {
    if let Some(start) = body.find("<error>") {
        let rest = &body[start + "<error>".len()..];
        if let Some(end) = rest.find("</error>") {
            return rest[..end].trim().to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::from("no error message returned");
    }
    trimmed.chars().take(ERROR_SNIPPET_LEN).collect()
}
