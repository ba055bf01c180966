//! Completion-order draining of concurrently dispatched page fetches.
//!
//! Records are yielded page by page in the order the pages *finish*, not the
//! order they were dispatched. Within a page the server's row order is
//! preserved. Callers that need a stable order must sort the collected
//! records themselves.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::error::ClientError;
use crate::events::{ClientEvent, EventBus};
use crate::paging::PageCursor;

type PageOutcome<T> = (PageCursor, Result<Vec<T>, ClientError>);

/// Merges a fixed set of in-flight page fetches into one record stream.
///
/// The first failing page ends the stream: every page still pending is
/// aborted, the shared cancellation token fires, and the yielded
/// [`ClientError::PageFetch`] lists the abandoned page indices. Dropping the
/// merger aborts everything still in flight.
pub struct FanInMerger<T> {
    tasks: JoinSet<PageOutcome<T>>,
    task_pages: HashMap<Id, usize>,
    pending: BTreeSet<usize>,
    buffer: std::vec::IntoIter<T>,
    cancel: CancellationToken,
    session: Uuid,
    events: EventBus,
    finished: bool,
}

impl<T: Send + 'static> FanInMerger<T> {
    pub fn new(session: Uuid, cancel: CancellationToken, events: EventBus) -> Self {
        Self {
            tasks: JoinSet::new(),
            task_pages: HashMap::new(),
            pending: BTreeSet::new(),
            buffer: Vec::new().into_iter(),
            cancel,
            session,
            events,
            finished: false,
        }
    }

    /// Dispatches the fetch for `cursor` onto the runtime immediately.
    pub fn dispatch<F>(&mut self, cursor: PageCursor, fetch: F)
    where
        F: Future<Output = Result<Vec<T>, ClientError>> + Send + 'static,
    {
        let handle = self.tasks.spawn(async move { (cursor, fetch.await) });
        self.task_pages.insert(handle.id(), cursor.index);
        self.pending.insert(cursor.index);
    }

    /// Pages dispatched but not yet drained.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Stops every remaining fetch and returns the pages left unread.
    fn abandon(&mut self) -> Vec<usize> {
        let abandoned: Vec<usize> = self.pending.iter().copied().collect();
        self.cancel.cancel();
        self.tasks.abort_all();
        self.pending.clear();
        self.buffer = Vec::new().into_iter();
        self.finished = true;
        abandoned
    }

    fn fault(&mut self, page: usize, error: ClientError) -> ClientError {
        self.pending.remove(&page);
        let abandoned = self.abandon();

        warn!(
            session = %self.session,
            page,
            abandoned = abandoned.len(),
            error = %error,
            "page fetch failed, abandoning remaining pages"
        );
        self.events.publish(ClientEvent::PagesAbandoned {
            session: self.session,
            failed_page: page,
            abandoned: abandoned.clone(),
        });

        ClientError::PageFetch {
            page,
            abandoned,
            source: Box::new(error),
        }
    }
}

// No field is structurally pinned.
impl<T> Unpin for FanInMerger<T> {}

impl<T: Send + 'static> Stream for FanInMerger<T> {
    type Item = Result<T, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(record) = this.buffer.next() {
                return Poll::Ready(Some(Ok(record)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match ready!(this.tasks.poll_join_next(cx)) {
                None => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Some(Ok((cursor, Ok(records)))) => {
                    this.pending.remove(&cursor.index);
                    this.buffer = records.into_iter();
                }
                Some(Ok((cursor, Err(error)))) => {
                    return Poll::Ready(Some(Err(this.fault(cursor.index, error))));
                }
                Some(Err(join_error)) => {
                    let error = ClientError::Internal(format!("page task failed: {join_error}"));
                    let failure = match this.task_pages.get(&join_error.id()).copied() {
                        Some(page) => this.fault(page, error),
                        None => {
                            let abandoned = this.abandon();
                            warn!(
                                session = %this.session,
                                task = %join_error.id(),
                                abandoned = abandoned.len(),
                                "untracked page task failed, abandoning remaining pages"
                            );
                            error
                        }
                    };
                    return Poll::Ready(Some(Err(failure)));
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.buffer.len(), None)
    }
}

impl<T> Drop for FanInMerger<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
