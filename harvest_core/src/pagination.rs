use crate::error::{HarvestError, InvokeError, Result};
use crate::types::PageCursor;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the next page is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceRule {
    /// offset += page size
    Offset,
    /// adopt the continuation token returned with the previous page
    Cursor,
}

#[derive(Debug, Clone)]
pub struct PaginationSpec {
    pub page_size: usize,
    pub max_records: Option<usize>,
    pub advance: AdvanceRule,
    /// Politeness delay between consecutive page requests
    pub page_delay: Duration,
}

impl PaginationSpec {
    pub fn offset(page_size: usize) -> Self {
        Self {
            page_size,
            max_records: None,
            advance: AdvanceRule::Offset,
            page_delay: Duration::ZERO,
        }
    }

    pub fn cursor(page_size: usize) -> Self {
        Self {
            page_size,
            max_records: None,
            advance: AdvanceRule::Cursor,
            page_delay: Duration::ZERO,
        }
    }

    pub fn with_max_records(mut self, max_records: Option<usize>) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    fn first_cursor(&self) -> PageCursor {
        match self.advance {
            AdvanceRule::Offset => PageCursor::Offset {
                offset: 0,
                limit: self.page_size,
            },
            AdvanceRule::Cursor => PageCursor::Token {
                token: None,
                limit: self.page_size,
            },
        }
    }
}

/// One page of typed records plus the continuation token, if the API returned one
#[derive(Debug, Clone)]
pub struct Page<R> {
    pub records: Vec<R>,
    pub next_cursor: Option<String>,
}

impl<R> Page<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self {
            records,
            next_cursor: None,
        }
    }

    pub fn with_cursor(records: Vec<R>, next_cursor: Option<String>) -> Self {
        Self {
            records,
            next_cursor: next_cursor.filter(|c| !c.is_empty()),
        }
    }
}

/// A per-source adapter for one logical paginated query
#[async_trait]
pub trait PageSource: Send + Sync {
    type Record: Send;

    async fn fetch_page(&self, cursor: &PageCursor) -> std::result::Result<Page<Self::Record>, InvokeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A page failed after the invoker's retries; records gathered so far were kept
    PageFailed,
    EmptyPage,
    LimitReached,
    ShortPage,
    NoCursor,
}

#[derive(Debug)]
pub struct Collected<R> {
    pub records: Vec<R>,
    pub pages_requested: usize,
    pub pages_succeeded: usize,
    pub stop: StopReason,
}

impl<R> Collected<R> {
    pub fn is_partial(&self) -> bool {
        self.stop == StopReason::PageFailed
    }

    pub fn status(&self) -> String {
        format!("{}/{} pages", self.pages_succeeded, self.pages_requested)
    }
}

/// Receives each page as soon as it has been fetched
#[async_trait]
pub trait PageSink: Send {
    type Record: Send;
    type Error: From<HarvestError> + Send;

    async fn accept(&mut self, records: Vec<Self::Record>) -> std::result::Result<(), Self::Error>;
}

/// Page counts of a streamed walk; the records went to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWalk {
    pub records: usize,
    pub pages_requested: usize,
    pub pages_succeeded: usize,
    pub stop: StopReason,
}

impl PageWalk {
    pub fn is_partial(&self) -> bool {
        self.stop == StopReason::PageFailed
    }

    pub fn status(&self) -> String {
        format!("{}/{} pages", self.pages_succeeded, self.pages_requested)
    }
}

/// Drive `source` page by page until exhaustion or the record cap, handing
/// every page to `sink` before the next one is requested.
///
/// A failed first page is an error; a failed later page ends the walk with
/// what the sink already accepted. The last page is truncated to the cap.
/// Cancellation is checked before every page.
pub async fn stream_pages<S, K>(
    source: &S,
    spec: &PaginationSpec,
    cancel: &CancellationToken,
    sink: &mut K,
) -> std::result::Result<PageWalk, K::Error>
where
    S: PageSource + ?Sized,
    K: PageSink<Record = S::Record> + ?Sized,
{
    if spec.page_size == 0 {
        return Err(HarvestError::InvalidInput("page size must be positive".to_string()).into());
    }

    let mut walk = PageWalk {
        records: 0,
        pages_requested: 0,
        pages_succeeded: 0,
        stop: StopReason::EmptyPage,
    };
    let mut cursor = spec.first_cursor();

    loop {
        if cancel.is_cancelled() {
            info!("🛑 Pagination cancelled after {} pages", walk.pages_succeeded);
            return Err(HarvestError::Cancelled.into());
        }
        if walk.pages_requested > 0 && !spec.page_delay.is_zero() {
            tokio::time::sleep(spec.page_delay).await;
        }

        walk.pages_requested += 1;
        let page = match source.fetch_page(&cursor).await {
            Ok(page) => page,
            Err(e) if walk.records == 0 => return Err(HarvestError::from(e).into()),
            Err(e) => {
                warn!(
                    "⚠️ Page {} failed ({}), keeping {} records already collected",
                    walk.pages_requested, e, walk.records
                );
                walk.stop = StopReason::PageFailed;
                return Ok(walk);
            }
        };
        walk.pages_succeeded += 1;

        let Page {
            mut records,
            next_cursor,
        } = page;
        let page_len = records.len();
        debug!("📄 Page {}: {} records", walk.pages_requested, page_len);

        if page_len == 0 {
            walk.stop = StopReason::EmptyPage;
            return Ok(walk);
        }

        let room = spec.max_records.map(|max| max.saturating_sub(walk.records));
        if let Some(room) = room {
            records.truncate(room);
        }
        walk.records += records.len();
        sink.accept(records).await?;

        if room.is_some_and(|room| room <= page_len) {
            walk.stop = StopReason::LimitReached;
            return Ok(walk);
        }

        if page_len < spec.page_size {
            walk.stop = StopReason::ShortPage;
            return Ok(walk);
        }

        cursor = match (&cursor, spec.advance) {
            (PageCursor::Offset { offset, limit }, AdvanceRule::Offset) => PageCursor::Offset {
                offset: offset + spec.page_size,
                limit: *limit,
            },
            (_, _) => match next_cursor {
                Some(token) => PageCursor::Token {
                    token: Some(token),
                    limit: spec.page_size,
                },
                None => {
                    walk.stop = StopReason::NoCursor;
                    return Ok(walk);
                }
            },
        };
    }
}

struct Accumulate<R>(Vec<R>);

#[async_trait]
impl<R: Send> PageSink for Accumulate<R> {
    type Record = R;
    type Error = HarvestError;

    async fn accept(&mut self, records: Vec<R>) -> Result<()> {
        self.0.extend(records);
        Ok(())
    }
}

/// Drive `source` page by page until exhaustion or the record cap.
///
/// A failed first page is an error; a failed later page ends collection with
/// what was already gathered. Cancellation is checked before every page.
pub async fn collect_pages<S>(
    source: &S,
    spec: &PaginationSpec,
    cancel: &CancellationToken,
) -> Result<Collected<S::Record>>
where
    S: PageSource + ?Sized,
{
    let mut sink = Accumulate(Vec::new());
    let walk = stream_pages(source, spec, cancel, &mut sink).await?;
    Ok(Collected {
        records: sink.0,
        pages_requested: walk.pages_requested,
        pages_succeeded: walk.pages_succeeded,
        stop: walk.stop,
    })
}
