use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::Content;

/// Default number of rows requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Above this many rows the streamer fetches pages one at a time.
pub const DEFAULT_SERIAL_THRESHOLD: usize = 20_000;

/// One page of a paginated query. Each dispatched fetch owns its own copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageCursor {
    pub index: usize,
    pub offset: usize,
    pub size: usize,
}

impl PageCursor {
    pub const fn new(index: usize, offset: usize, size: usize) -> Self {
        Self {
            index,
            offset,
            size,
        }
    }

    pub const fn end(self) -> usize {
        self.offset + self.size
    }
}

/// Splits `total` rows into consecutive pages, clipping the last one to the
/// remaining row count.
pub fn plan_pages(total: usize, page_size: usize) -> Vec<PageCursor> {
    if total == 0 || page_size == 0 {
        return Vec::new();
    }

    let mut pages = Vec::with_capacity(total.div_ceil(page_size));
    let mut offset = 0;
    while offset < total {
        let size = page_size.min(total - offset);
        pages.push(PageCursor::new(pages.len(), offset, size));
        offset += size;
    }
    pages
}

/// Fetch mode for a streaming query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// All pages dispatched at once, yielded in completion order.
    Parallel,
    /// One page at a time, yielded in page order.
    Serial,
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parallel => f.write_str("parallel"),
            Self::Serial => f.write_str("serial"),
        }
    }
}

pub fn select_strategy(total: usize, serial_requested: bool, threshold: usize) -> Strategy {
    if serial_requested || total > threshold {
        Strategy::Serial
    } else {
        Strategy::Parallel
    }
}

/// Planning state of one call to the streaming API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSession {
    pub id: Uuid,
    pub content: Content,
    /// Row count reported by the server; a planning hint only.
    pub total: usize,
    pub page_size: usize,
    pub strategy: Strategy,
}

impl StreamSession {
    pub fn new(content: Content, total: usize, page_size: usize, strategy: Strategy) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            total,
            page_size,
            strategy,
        }
    }

    pub fn pages(&self) -> Vec<PageCursor> {
        plan_pages(self.total, self.page_size)
    }
}
