use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ClientConfig;
use crate::connection::{ConnectionSettings, Credential};
use crate::engine::RequestEngine;
use crate::error::ClientError;
use crate::events::{ClientEvent, EventBus};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::request::RequestDescriptor;
use crate::response::{JsonTableDeserializer, ServerStatus};
use crate::streamer::{PagingStreamer, RecordStream, TableQuery};

/// Entry point for talking to a monitoring server.
///
/// # Example
///
/// ```rust,ignore
/// use futures_util::TryStreamExt;
/// use probewire_core::{
///     ClientConfig, ConnectionSettings, Content, Credential, MonitorClient, TableQuery,
/// };
///
/// #[derive(serde::Deserialize)]
/// struct Sensor { objid: u32, name: String }
///
/// let credential = Credential::Password(pw);
/// let settings = ConnectionSettings::new("monitor.example.com", "admin", credential)?;
/// let client = MonitorClient::connect(settings, ClientConfig::default()).await?;
///
/// let mut sensors = client.stream::<Sensor>(TableQuery::new(Content::Sensors)).await?;
/// while let Some(sensor) = sensors.try_next().await? {
///     println!("{} {}", sensor.objid, sensor.name);
/// }
/// ```
#[derive(Clone)]
pub struct MonitorClient {
    streamer: PagingStreamer,
}

impl MonitorClient {
    /// Connects over HTTP(S) with the default reqwest transport.
    ///
    /// A [`Credential::Password`] is exchanged for a pass-hash here, once;
    /// every later request authenticates with the hash.
    pub async fn connect(
        settings: ConnectionSettings,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        Self::connect_with_transport(settings, config, Arc::new(ReqwestHttpClient::new())).await
    }

    /// Builds a client from `PROBEWIRE_*` environment variables.
    pub async fn from_env() -> Result<Self, ClientError> {
        Self::connect(ConnectionSettings::from_env()?, ClientConfig::from_env()?).await
    }

    pub async fn connect_with_transport(
        settings: ConnectionSettings,
        config: ClientConfig,
        transport: Arc<dyn HttpClient>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let events = EventBus::new(config.event_capacity);
        let engine = RequestEngine::new(settings, transport, &config, events);

        let engine = match engine.connection().credential().clone() {
            Credential::PassHash(_) => engine,
            Credential::Password(password) => {
                let hash = engine
                    .get_pass_hash(&password, &CancellationToken::new())
                    .await?;
                info!(
                    server = engine.connection().server(),
                    username = engine.connection().username(),
                    "obtained pass-hash"
                );
                let connection = engine.connection().with_pass_hash(hash);
                engine.with_connection(connection)
            }
        };

        Ok(Self {
            streamer: PagingStreamer::new(engine, &config),
        })
    }

    pub fn engine(&self) -> &RequestEngine {
        self.streamer.engine()
    }

    pub fn streamer(&self) -> &PagingStreamer {
        &self.streamer
    }

    /// Retry, request and streaming notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.engine().events().subscribe()
    }

    pub fn server_version(&self) -> Option<&str> {
        self.engine().server_version()
    }

    pub fn pass_hash(&self) -> Option<&str> {
        match self.engine().connection().credential() {
            Credential::PassHash(hash) => Some(hash),
            Credential::Password(_) => None,
        }
    }

    /// Streams rows of `query` decoded from the JSON table envelope.
    pub async fn stream<T>(&self, query: TableQuery) -> Result<RecordStream<T>, ClientError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let deserializer = JsonTableDeserializer::<T>::new(query.content());
        self.streamer.stream(query, deserializer).await
    }

    /// Fetches every row of `query`.
    pub async fn get<T>(&self, query: TableQuery) -> Result<Vec<T>, ClientError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let deserializer = JsonTableDeserializer::<T>::new(query.content());
        self.streamer.collect(query, deserializer).await
    }

    pub async fn count(&self, query: &TableQuery) -> Result<usize, ClientError> {
        self.streamer.count(query).await
    }

    /// Sends an arbitrary request and returns the raw, validated body.
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<String, ClientError> {
        self.engine()
            .execute(descriptor, &CancellationToken::new())
            .await
    }

    pub fn execute_blocking(&self, descriptor: &RequestDescriptor) -> Result<String, ClientError> {
        self.engine().execute_blocking(descriptor)
    }

    pub async fn status(&self) -> Result<ServerStatus, ClientError> {
        self.engine().get_status(&CancellationToken::new()).await
    }
}
