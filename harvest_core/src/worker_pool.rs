use crate::error::{HarvestError, Result};
use futures::future::join_all;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Run `work` over `keys` with at most `workers` in flight.
///
/// Workers pull from a shared queue and push into a shared accumulator; the
/// call returns only after every worker has joined, so callers can commit a
/// whole batch before moving on. Results come back in input order.
pub async fn run_bounded<K, T, F, Fut>(keys: Vec<K>, workers: usize, work: F) -> Result<Vec<(K, T)>>
where
    K: Clone + Send + 'static,
    T: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    let total = keys.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let workers = workers.clamp(1, total);

    let queue = Arc::new(Mutex::new(
        keys.into_iter().enumerate().collect::<VecDeque<(usize, K)>>(),
    ));
    let results: Arc<Mutex<Vec<Option<(K, T)>>>> =
        Arc::new(Mutex::new((0..total).map(|_| None).collect()));
    let work = Arc::new(work);

    let handles = (0..workers).map(|worker_id| {
        let queue = Arc::clone(&queue);
        let results = Arc::clone(&results);
        let work = Arc::clone(&work);
        tokio::spawn(async move {
            let mut handled = 0usize;
            loop {
                let next = queue.lock().await.pop_front();
                let Some((index, key)) = next else {
                    break;
                };
                let output = work(key.clone()).await;
                results.lock().await[index] = Some((key, output));
                handled += 1;
            }
            debug!("🧵 Worker {} finished after {} items", worker_id, handled);
        })
    });

    for joined in join_all(handles).await {
        joined.map_err(|e| HarvestError::Worker(e.to_string()))?;
    }

    let mut results = results.lock().await;
    let collected: Vec<(K, T)> = results.drain(..).flatten().collect();
    if collected.len() != total {
        return Err(HarvestError::Worker(format!(
            "{} of {} results missing",
            total - collected.len(),
            total
        )));
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_results_in_input_order() {
        let keys: Vec<u64> = (0..20).collect();
        let results = run_bounded(keys, 4, |k| async move {
            // later keys finish first
            tokio::time::sleep(Duration::from_millis(100 - k * 5)).await;
            k * 2
        })
        .await
        .unwrap();

        let expected: Vec<(u64, u64)> = (0..20).map(|k| (k, k * 2)).collect();
        assert_eq!(results, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (in_flight_c, peak_c) = (in_flight.clone(), peak.clone());
        let results = run_bounded((0..30).collect::<Vec<u32>>(), 3, move |_| {
            let in_flight = in_flight_c.clone();
            let peak = peak_c.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 30);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results = run_bounded(Vec::<String>::new(), 8, |k| async move { k })
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
