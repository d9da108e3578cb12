use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of one subject of collection (usually a token mint address)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for progress lines
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Time-bucket width of one data point, kept as the label the APIs accept ("1m", "1H", "12H", "1D")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Granularity(String);

impl Granularity {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn label(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half-open interval `[start_ts, end_ts)` in Unix seconds at one granularity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    pub start_ts: i64,
    pub end_ts: i64,
    pub granularity: Granularity,
}

impl FetchWindow {
    /// Returns `None` for an empty or inverted interval
    pub fn new(start_ts: i64, end_ts: i64, granularity: Granularity) -> Option<Self> {
        (start_ts < end_ts).then_some(Self {
            start_ts,
            end_ts,
            granularity,
        })
    }

    pub fn span_secs(&self) -> i64 {
        self.end_ts - self.start_ts
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start_ts && ts < self.end_ts
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}) @ {}", self.start_ts, self.end_ts, self.granularity)
    }
}

/// Position of the next page to request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Offset { offset: usize, limit: usize },
    /// Opaque continuation token; `None` requests the first page
    Token { token: Option<String>, limit: usize },
}

impl PageCursor {
    pub fn limit(&self) -> usize {
        match self {
            PageCursor::Offset { limit, .. } | PageCursor::Token { limit, .. } => *limit,
        }
    }

    pub fn offset(&self) -> Option<usize> {
        match self {
            PageCursor::Offset { offset, .. } => Some(*offset),
            PageCursor::Token { .. } => None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            PageCursor::Token { token, .. } => token.as_deref(),
            PageCursor::Offset { .. } => None,
        }
    }
}

/// The single filter dimension a paginated query may carry.
///
/// The trade endpoints reject a request that bounds both time and block
/// number, so only one variant can ever be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFilter {
    Unbounded,
    TimeRange {
        after: Option<i64>,
        before: Option<i64>,
    },
    BlockRange {
        after: Option<u64>,
        before: Option<u64>,
    },
}

impl QueryFilter {
    /// Query parameters for the active dimension
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        match self {
            QueryFilter::Unbounded => {}
            QueryFilter::TimeRange { after, before } => {
                if let Some(after) = after {
                    pairs.push(("after_time".to_string(), after.to_string()));
                }
                if let Some(before) = before {
                    pairs.push(("before_time".to_string(), before.to_string()));
                }
            }
            QueryFilter::BlockRange { after, before } => {
                if let Some(after) = after {
                    pairs.push(("after_block_number".to_string(), after.to_string()));
                }
                if let Some(before) = before {
                    pairs.push(("before_block_number".to_string(), before.to_string()));
                }
            }
        }
        pairs
    }
}

/// Records with a natural position in a time series
pub trait Timestamped {
    fn timestamp(&self) -> i64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_window_rejects_empty() {
        let g = Granularity::new("1m");
        assert!(FetchWindow::new(10, 10, g.clone()).is_none());
        assert!(FetchWindow::new(10, 5, g.clone()).is_none());

        let window = FetchWindow::new(0, 60, g).unwrap();
        assert_eq!(window.span_secs(), 60);
        assert!(window.contains(0));
        assert!(!window.contains(60));
    }

    #[test]
    fn test_query_filter_pairs() {
        let time = QueryFilter::TimeRange {
            after: Some(100),
            before: None,
        };
        assert_eq!(
            time.query_pairs(),
            vec![("after_time".to_string(), "100".to_string())]
        );

        let blocks = QueryFilter::BlockRange {
            after: Some(1),
            before: Some(2),
        };
        let keys: Vec<String> = blocks.query_pairs().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["after_block_number", "before_block_number"]);

        assert!(QueryFilter::Unbounded.query_pairs().is_empty());
    }

    #[test]
    fn test_entity_key_short() {
        assert_eq!(EntityKey::from("abc").short(), "abc");
        assert_eq!(
            EntityKey::from("So11111111111111111111111111111111111111112").short(),
            "So1111111111"
        );
    }
}
