use crate::error::{HarvestError, Result};
use crate::types::{EntityKey, FetchWindow, Granularity, Timestamped};
use async_trait::async_trait;
use config_manager::WindowingConfig;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Phase boundaries, measured from the entity's creation time
#[derive(Debug, Clone)]
pub struct WindowingPolicy {
    pub minute_phase_secs: i64,
    pub minute_split_secs: i64,
    pub hourly_phase_end_secs: i64,
    pub minute: Granularity,
    pub hourly: Granularity,
    pub coarse: Granularity,
}

impl Default for WindowingPolicy {
    fn default() -> Self {
        Self::from(&WindowingConfig {
            minute_phase_secs: 24 * 3600,
            minute_split_secs: 12 * 3600,
            hourly_phase_end_secs: 8 * 24 * 3600,
            minute_interval: "1m".to_string(),
            hourly_interval: "1H".to_string(),
            coarse_interval: "12H".to_string(),
        })
    }
}

impl From<&WindowingConfig> for WindowingPolicy {
    fn from(config: &WindowingConfig) -> Self {
        Self {
            minute_phase_secs: config.minute_phase_secs,
            minute_split_secs: config.minute_split_secs.max(1),
            hourly_phase_end_secs: config.hourly_phase_end_secs,
            minute: Granularity::new(config.minute_interval.clone()),
            hourly: Granularity::new(config.hourly_interval.clone()),
            coarse: Granularity::new(config.coarse_interval.clone()),
        }
    }
}

impl WindowingPolicy {
    /// Every request window that should be attempted for an entity created at
    /// `creation` when the clock reads `now`, in phase order.
    ///
    /// Windows never extend past `now`; a phase is only planned once `now`
    /// has passed its start.
    pub fn plan_windows(&self, creation: i64, now: i64) -> Vec<FetchWindow> {
        let mut windows = Vec::new();
        let minute_end = creation + self.minute_phase_secs;
        let hourly_end = creation + self.hourly_phase_end_secs;

        let mut start = creation;
        while start < minute_end && now > start {
            let end = (start + self.minute_split_secs).min(minute_end).min(now);
            windows.extend(FetchWindow::new(start, end, self.minute.clone()));
            start += self.minute_split_secs;
        }

        if now > minute_end {
            windows.extend(FetchWindow::new(
                minute_end,
                hourly_end.min(now),
                self.hourly.clone(),
            ));
        }

        if now > hourly_end {
            windows.extend(FetchWindow::new(hourly_end, now, self.coarse.clone()));
        }

        windows
    }
}

/// Fetches one bounded window of a time series
#[async_trait]
pub trait WindowFetcher: Send + Sync {
    type Record: Timestamped + Send;

    async fn fetch_window(&self, key: &EntityKey, window: &FetchWindow) -> Result<Vec<Self::Record>>;
}

/// A record plus the granularity of the phase that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedRecord<R> {
    #[serde(flatten)]
    pub record: R,
    pub interval: Granularity,
}

#[derive(Debug)]
pub struct MultiResolutionSeries<R> {
    pub records: Vec<TaggedRecord<R>>,
    pub attempted: usize,
    pub succeeded: usize,
}

impl<R> MultiResolutionSeries<R> {
    pub fn status(&self) -> String {
        format!("{}/{} phases", self.succeeded, self.attempted)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct interval labels in order of first appearance
    pub fn intervals(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for record in &self.records {
            let label = record.interval.label();
            if !seen.contains(&label) {
                seen.push(label);
            }
        }
        seen
    }
}

/// Fetch every planned window, tolerating per-window failures, then merge.
///
/// A window counts as succeeded only when it returned records. The merge is a
/// stable sort by timestamp that keeps the first record for each timestamp,
/// so earlier (finer) phases win at the boundaries. Only cancellation is an error.
pub async fn fetch_multi_resolution<F>(
    fetcher: &F,
    policy: &WindowingPolicy,
    key: &EntityKey,
    creation: i64,
    now: i64,
    pause: Duration,
    cancel: &CancellationToken,
) -> Result<MultiResolutionSeries<F::Record>>
where
    F: WindowFetcher + ?Sized,
{
    let windows = policy.plan_windows(creation, now);
    fetch_windows(fetcher, key, &windows, pause, cancel).await
}

/// Fetch an explicit list of windows with the same tolerance and merge rules
pub async fn fetch_windows<F>(
    fetcher: &F,
    key: &EntityKey,
    windows: &[FetchWindow],
    pause: Duration,
    cancel: &CancellationToken,
) -> Result<MultiResolutionSeries<F::Record>>
where
    F: WindowFetcher + ?Sized,
{
    let mut records = Vec::new();
    let mut attempted = 0usize;
    let mut succeeded = 0usize;

    for (i, window) in windows.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }
        if i > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        attempted += 1;
        match fetcher.fetch_window(key, window).await {
            Ok(batch) if !batch.is_empty() => {
                debug!("📈 {} {} -> {} records", key.short(), window, batch.len());
                succeeded += 1;
                records.extend(batch.into_iter().map(|record| TaggedRecord {
                    record,
                    interval: window.granularity.clone(),
                }));
            }
            Ok(_) => debug!("📭 {} {} returned no data", key.short(), window),
            Err(e) if e.is_cancelled() => return Err(HarvestError::Cancelled),
            Err(e) => warn!("⚠️ {} {} failed: {}", key.short(), window, e),
        }
    }

    records.sort_by_key(|r| r.record.timestamp());
    records.dedup_by_key(|r| r.record.timestamp());

    Ok(MultiResolutionSeries {
        records,
        attempted,
        succeeded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvokeError;
    use std::sync::Mutex;

    const HOUR: i64 = 3600;
    const DAY: i64 = 24 * HOUR;
    const T0: i64 = 1_700_000_000;

    #[derive(Debug, Clone, PartialEq)]
    struct Point {
        ts: i64,
        source: &'static str,
    }

    impl Timestamped for Point {
        fn timestamp(&self) -> i64 {
            self.ts
        }
    }

    /// Returns points at the window edges; a window whose granularity is listed in
    /// `failing` errors out
    struct EdgeFetcher {
        failing: Vec<&'static str>,
        seen: Mutex<Vec<FetchWindow>>,
    }

    impl EdgeFetcher {
        fn new(failing: Vec<&'static str>) -> Self {
            Self {
                failing,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WindowFetcher for EdgeFetcher {
        type Record = Point;

        async fn fetch_window(&self, _key: &EntityKey, window: &FetchWindow) -> Result<Vec<Point>> {
            self.seen.lock().unwrap().push(window.clone());
            let label = window.granularity.label();
            if self.failing.contains(&label) {
                return Err(InvokeError::Exhausted {
                    attempts: 4,
                    last: "HTTP 500".to_string(),
                }
                .into());
            }
            let source = match label {
                "1m" => "minute",
                "1H" => "hourly",
                _ => "coarse",
            };
            // Include the end timestamp to simulate an API that is inclusive on both ends
            Ok(vec![
                Point { ts: window.start_ts, source },
                Point { ts: window.end_ts, source },
            ])
        }
    }

    #[test]
    fn test_plan_ten_day_old_token() {
        let windows = WindowingPolicy::default().plan_windows(T0, T0 + 10 * DAY);
        let plan: Vec<(i64, i64, &str)> = windows
            .iter()
            .map(|w| (w.start_ts - T0, w.end_ts - T0, w.granularity.label()))
            .collect();

        assert_eq!(
            plan,
            vec![
                (0, 12 * HOUR, "1m"),
                (12 * HOUR, DAY, "1m"),
                (DAY, 8 * DAY, "1H"),
                (8 * DAY, 10 * DAY, "12H"),
            ]
        );
    }

    #[test]
    fn test_plan_young_token_clamps_to_now() {
        let policy = WindowingPolicy::default();

        let six_hours = policy.plan_windows(T0, T0 + 6 * HOUR);
        assert_eq!(six_hours.len(), 1);
        assert_eq!(six_hours[0].end_ts, T0 + 6 * HOUR);

        let two_days = policy.plan_windows(T0, T0 + 2 * DAY);
        assert_eq!(two_days.len(), 3);
        assert_eq!(two_days[2].end_ts, T0 + 2 * DAY);

        assert!(policy.plan_windows(T0, T0).is_empty());
    }

    #[test]
    fn test_plan_respects_configured_split() {
        let policy = WindowingPolicy {
            minute_split_secs: 8 * HOUR,
            ..WindowingPolicy::default()
        };
        let minute_windows = policy
            .plan_windows(T0, T0 + 2 * DAY)
            .into_iter()
            .filter(|w| w.granularity.label() == "1m")
            .count();
        assert_eq!(minute_windows, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_day_scenario_merges_and_tags() {
        let fetcher = EdgeFetcher::new(vec![]);
        let key = EntityKey::from("TOKEN1");

        let series = fetch_multi_resolution(
            &fetcher,
            &WindowingPolicy::default(),
            &key,
            T0,
            T0 + 10 * DAY,
            Duration::from_millis(1500),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(series.status(), "4/4 phases");
        let timestamps: Vec<i64> = series.records.iter().map(|r| r.record.ts - T0).collect();
        assert_eq!(timestamps, vec![0, 12 * HOUR, DAY, 8 * DAY, 10 * DAY]);

        // Boundary at +24h is produced by both the minute and hourly phase; minute wins
        let boundary = &series.records[2];
        assert_eq!(boundary.interval.label(), "1m");
        assert_eq!(boundary.record.source, "minute");
        assert_eq!(series.intervals(), vec!["1m", "1H", "12H"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_phase_does_not_stop_later_phases() {
        let fetcher = EdgeFetcher::new(vec!["1m"]);
        let series = fetch_multi_resolution(
            &fetcher,
            &WindowingPolicy::default(),
            &EntityKey::from("TOKEN1"),
            T0,
            T0 + 10 * DAY,
            Duration::ZERO,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(series.status(), "2/4 phases");
        assert_eq!(fetcher.seen.lock().unwrap().len(), 4);
        assert!(series.records.iter().all(|r| r.interval.label() != "1m"));
    }

    #[tokio::test]
    async fn test_all_phases_failing_is_tolerated() {
        let fetcher = EdgeFetcher::new(vec!["1m", "1H", "12H"]);
        let series = fetch_multi_resolution(
            &fetcher,
            &WindowingPolicy::default(),
            &EntityKey::from("TOKEN1"),
            T0,
            T0 + 2 * DAY,
            Duration::ZERO,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(series.is_empty());
        assert_eq!(series.status(), "0/3 phases");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_between_windows() {
        let fetcher = EdgeFetcher::new(vec![]);
        let start = tokio::time::Instant::now();
        fetch_multi_resolution(
            &fetcher,
            &WindowingPolicy::default(),
            &EntityKey::from("TOKEN1"),
            T0,
            T0 + 10 * DAY,
            Duration::from_secs(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }
}
