//! Paged streaming of table queries.
//!
//! A stream starts with a count probe (`count=0`). Result sets up to the
//! serial threshold are fetched in parallel, one task per page, and yielded
//! in completion order through [`FanInMerger`]. Larger result sets, or
//! queries that ask for it, are fetched one page at a time and yielded in
//! page order.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{self, Stream, TryStreamExt};
use serde::de::IgnoredAny;
use tokio::sync::Semaphore;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::engine::RequestEngine;
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::fan_in::FanInMerger;
use crate::filter::SearchFilter;
use crate::paging::{select_strategy, PageCursor, Strategy, StreamSession};
use crate::request::{keys, Content, Parameters, RequestDescriptor};
use crate::response::{JsonTableDeserializer, ResponseDeserializer};

/// Lazily produced records of one streaming call.
pub type RecordStream<T> = Pin<Box<dyn Stream<Item = Result<T, ClientError>> + Send>>;

/// A table query: content kind, filters, columns and paging preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
    content: Content,
    parameters: Parameters,
    page_size: Option<usize>,
    limit: Option<usize>,
    serial: bool,
}

impl TableQuery {
    pub fn new(content: Content) -> Self {
        Self {
            content,
            parameters: Parameters::new(),
            page_size: None,
            limit: None,
            serial: false,
        }
    }

    pub fn filter(mut self, filter: SearchFilter) -> Self {
        filter.apply(&mut self.parameters);
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = columns
            .into_iter()
            .map(|column| column.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.parameters.insert(keys::COLUMNS, joined);
        self
    }

    /// Extra raw parameter. Paging keys are overwritten per page.
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Rows per page for this query; defaults to the client's page size.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Upper bound on rows streamed, regardless of the server's total.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Forces page-by-page fetching even for small result sets.
    pub fn serial(mut self) -> Self {
        self.serial = true;
        self
    }

    pub fn content(&self) -> Content {
        self.content
    }

    fn probe_descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::table(
            self.content,
            self.parameters.clone().with(keys::COUNT, 0usize),
        )
    }
}

/// Streams table queries through a [`RequestEngine`].
#[derive(Clone)]
pub struct PagingStreamer {
    engine: RequestEngine,
    page_size: usize,
    serial_threshold: usize,
    max_in_flight: Option<usize>,
}

impl PagingStreamer {
    pub fn new(engine: RequestEngine, config: &ClientConfig) -> Self {
        Self {
            engine,
            page_size: config.page_size,
            serial_threshold: config.serial_threshold,
            max_in_flight: config.max_in_flight,
        }
    }

    pub fn engine(&self) -> &RequestEngine {
        &self.engine
    }

    /// Total row count the server reports for `query`, before any limit.
    pub async fn count(&self, query: &TableQuery) -> Result<usize, ClientError> {
        let deserializer = JsonTableDeserializer::<IgnoredAny>::new(query.content);
        self.probe(query, &deserializer, &CancellationToken::new()).await
    }

    /// Probes the row count, picks a strategy and returns the record stream.
    ///
    /// Parallel page fetches are dispatched before this returns. Dropping the
    /// returned stream cancels whatever is still in flight.
    ///
    /// # Errors
    ///
    /// Errors from the count probe are returned directly. Page failures are
    /// yielded by the stream as [`ClientError::PageFetch`], after which the
    /// stream ends.
    pub async fn stream<T, D>(
        &self,
        query: TableQuery,
        deserializer: D,
    ) -> Result<RecordStream<T>, ClientError>
    where
        T: Send + 'static,
        D: ResponseDeserializer<T> + 'static,
    {
        let deserializer: Arc<dyn ResponseDeserializer<T>> = Arc::new(deserializer);
        let page_size = query.page_size.unwrap_or(self.page_size);
        if page_size == 0 {
            return Err(ClientError::InvalidRequest(String::from(
                "page size must be greater than zero",
            )));
        }

        let cancel = CancellationToken::new();
        let reported = self.probe(&query, deserializer.as_ref(), &cancel).await?;
        let total = query.limit.map_or(reported, |limit| limit.min(reported));

        let strategy = select_strategy(total, query.serial, self.serial_threshold);
        let session = StreamSession::new(query.content, total, page_size, strategy);

        if total > self.serial_threshold {
            info!(
                session = %session.id,
                content = %session.content,
                total,
                threshold = self.serial_threshold,
                "result set exceeds parallel threshold, switching to serial mode"
            );
            self.engine.events().publish(ClientEvent::StrategySwitch {
                session: session.id,
                content: session.content,
                total,
                threshold: self.serial_threshold,
                strategy,
            });
        }
        debug!(
            session = %session.id,
            content = %session.content,
            total,
            reported,
            page_size,
            strategy = %strategy,
            "starting stream"
        );

        Ok(match strategy {
            Strategy::Parallel => self.parallel(session, query.parameters, deserializer, cancel),
            Strategy::Serial => self.serial(session, query.parameters, deserializer, cancel),
        })
    }

    /// Streams `query` to completion.
    pub async fn collect<T, D>(
        &self,
        query: TableQuery,
        deserializer: D,
    ) -> Result<Vec<T>, ClientError>
    where
        T: Send + 'static,
        D: ResponseDeserializer<T> + 'static,
    {
        self.stream(query, deserializer).await?.try_collect().await
    }

    async fn probe<T>(
        &self,
        query: &TableQuery,
        deserializer: &dyn ResponseDeserializer<T>,
        cancel: &CancellationToken,
    ) -> Result<usize, ClientError> {
        let response = self
            .engine
            .fetch(&query.probe_descriptor(), deserializer, cancel)
            .await?;
        Ok(response.total_count)
    }

    fn parallel<T: Send + 'static>(
        &self,
        session: StreamSession,
        parameters: Parameters,
        deserializer: Arc<dyn ResponseDeserializer<T>>,
        cancel: CancellationToken,
    ) -> RecordStream<T> {
        let limiter = self.max_in_flight.map(|limit| Arc::new(Semaphore::new(limit)));
        let mut merger = FanInMerger::new(session.id, cancel.clone(), self.engine.events().clone());

        for cursor in session.pages() {
            let descriptor = RequestDescriptor::table(session.content, parameters.for_page(cursor));
            let engine = self.engine.clone();
            let deserializer = Arc::clone(&deserializer);
            let cancel = cancel.clone();
            let limiter = limiter.clone();

            merger.dispatch(cursor, async move {
                let _permit = match limiter {
                    Some(limiter) => Some(
                        limiter
                            .acquire_owned()
                            .await
                            .map_err(|_| ClientError::Cancelled)?,
                    ),
                    None => None,
                };
                let response = engine
                    .fetch(&descriptor, deserializer.as_ref(), &cancel)
                    .await?;
                Ok(response.items)
            });
        }

        Box::pin(merger)
    }

    fn serial<T: Send + 'static>(
        &self,
        session: StreamSession,
        parameters: Parameters,
        deserializer: Arc<dyn ResponseDeserializer<T>>,
        cancel: CancellationToken,
    ) -> RecordStream<T> {
        let state = SerialState {
            engine: self.engine.clone(),
            _guard: cancel.clone().drop_guard(),
            cancel,
            session,
            parameters,
            deserializer,
            next: PageCursor::new(0, 0, 0),
            buffer: Vec::new().into_iter(),
            yielded: 0,
            done: false,
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            let item = state.next_record().await?;
            Some((item, state))
        }))
    }
}

struct SerialState<T> {
    engine: RequestEngine,
    cancel: CancellationToken,
    _guard: DropGuard,
    session: StreamSession,
    parameters: Parameters,
    deserializer: Arc<dyn ResponseDeserializer<T>>,
    /// Index and offset of the next page to request.
    next: PageCursor,
    buffer: std::vec::IntoIter<T>,
    yielded: usize,
    done: bool,
}

impl<T> SerialState<T> {
    async fn next_record(&mut self) -> Option<Result<T, ClientError>> {
        loop {
            if let Some(record) = self.buffer.next() {
                self.yielded += 1;
                return Some(Ok(record));
            }
            if self.done || self.next.offset >= self.session.total {
                return None;
            }

            let size = self.session.page_size.min(self.session.total - self.next.offset);
            let cursor = PageCursor::new(self.next.index, self.next.offset, size);
            let descriptor =
                RequestDescriptor::table(self.session.content, self.parameters.for_page(cursor));

            let response = match self
                .engine
                .fetch(&descriptor, self.deserializer.as_ref(), &self.cancel)
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    self.done = true;
                    return Some(Err(ClientError::PageFetch {
                        page: cursor.index,
                        abandoned: Vec::new(),
                        source: Box::new(error),
                    }));
                }
            };

            if response.items.is_empty() {
                // Some content kinds over-report their totals; an empty page is the real end.
                self.done = true;
                debug!(
                    session = %self.session.id,
                    page = cursor.index,
                    yielded = self.yielded,
                    reported_total = self.session.total,
                    "empty page before reported total, ending stream"
                );
                self.engine.events().publish(ClientEvent::EarlyStop {
                    session: self.session.id,
                    content: self.session.content,
                    yielded: self.yielded,
                    reported_total: self.session.total,
                });
                return None;
            }

            self.next = PageCursor::new(cursor.index + 1, cursor.end(), 0);
            self.buffer = response.items.into_iter();
        }
    }
}
