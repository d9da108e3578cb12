// Harvest Core - generic fetch machinery shared by every data source
// Retrying invoker, page collector, multi-resolution windows and a bounded worker pool

pub mod error;
pub mod http;
pub mod pagination;
pub mod types;
pub mod windowing;
pub mod worker_pool;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{HarvestError, InvokeError, Result};
pub use http::{
    ApiRequest, AttemptFailure, ErrorSink, HttpMethod, HttpTransport, Invoker, RawResponse,
    ReqwestTransport, TransportError, DEFAULT_PERMANENT_STATUSES,
};
pub use pagination::{
    collect_pages, stream_pages, AdvanceRule, Collected, Page, PageSink, PageSource, PageWalk, PaginationSpec,
    StopReason,
};
pub use types::{EntityKey, FetchWindow, Granularity, PageCursor, QueryFilter, Timestamped};
pub use windowing::{
    fetch_multi_resolution, fetch_windows, MultiResolutionSeries, TaggedRecord, WindowFetcher,
    WindowingPolicy,
};
pub use worker_pool::run_bounded;

// Re-exported so adapters and jobs share one cancellation type
pub use tokio_util::sync::CancellationToken;
