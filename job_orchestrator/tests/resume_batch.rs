//! Resume behaviour of the batch runner across runs sharing one ledger file

use async_trait::async_trait;
use harvest_core::{CancellationToken, EntityKey};
use job_orchestrator::{BatchRunner, EntityJob, EntityOutcome, Result, RunOptions};
use persistence_layer::{Outcome, ProgressLedger};
use std::sync::Mutex;

/// Records every key it is asked to process; keys ending in `!` fail
#[derive(Default)]
struct CountingJob {
    seen: Mutex<Vec<String>>,
}

impl CountingJob {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntityJob for CountingJob {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn process(&self, key: &EntityKey, _cancel: &CancellationToken) -> Result<EntityOutcome> {
        self.seen.lock().unwrap().push(key.to_string());
        if key.as_str().ends_with('!') {
            return Ok(EntityOutcome::Failed("boom".to_string()));
        }
        Ok(EntityOutcome::Completed("ok".to_string()))
    }
}

fn keys(names: &[&str]) -> Vec<EntityKey> {
    names.iter().map(|n| EntityKey::from(*n)).collect()
}

#[tokio::test]
async fn test_pre_completed_entity_is_not_reprocessed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counting_progress.json");
    let entities = keys(&["A", "B", "C", "D", "E"]);

    let mut ledger = ProgressLedger::load(&path, 1);
    ledger.record(&entities[2], Outcome::Completed, None).unwrap();
    ledger.flush().unwrap();

    let job = CountingJob::default();
    let mut runner = BatchRunner::new(
        ProgressLedger::load(&path, 10),
        RunOptions::default(),
        CancellationToken::new(),
    );
    let summary = runner.run(&job, &entities).await.unwrap();

    assert_eq!(job.seen(), vec!["A", "B", "D", "E"]);
    assert_eq!(summary.total, 5);
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.already_processed, 1);
    assert!(!summary.cancelled);

    let reloaded = ProgressLedger::load(&path, 10);
    assert!(entities.iter().all(|k| reloaded.status(k) == Some(Outcome::Completed)));
}

#[tokio::test]
async fn test_failed_entities_wait_for_retry_failed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counting_progress.json");
    let entities = keys(&["A", "B!", "C"]);

    let job = CountingJob::default();
    let first = BatchRunner::new(
        ProgressLedger::load(&path, 10),
        RunOptions::default(),
        CancellationToken::new(),
    )
    .run(&job, &entities)
    .await
    .unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.failed_keys, vec![("B!".to_string(), "boom".to_string())]);
    assert!(first.render().contains("Failed (showing 1 of 1):"));

    let job = CountingJob::default();
    let second = BatchRunner::new(
        ProgressLedger::load(&path, 10),
        RunOptions::default(),
        CancellationToken::new(),
    )
    .run(&job, &entities)
    .await
    .unwrap();
    assert!(job.seen().is_empty());
    assert_eq!(second.already_processed, 3);

    let job = CountingJob::default();
    let options = RunOptions {
        retry_failed: true,
        ..RunOptions::default()
    };
    BatchRunner::new(ProgressLedger::load(&path, 10), options, CancellationToken::new())
        .run(&job, &entities)
        .await
        .unwrap();
    assert_eq!(job.seen(), vec!["B!"]);
}

#[tokio::test]
async fn test_cancelled_run_records_nothing_further() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counting_progress.json");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let job = CountingJob::default();
    let summary = BatchRunner::new(ProgressLedger::load(&path, 10), RunOptions::default(), cancel)
        .run(&job, &keys(&["A", "B"]))
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.processed(), 0);
    assert!(job.seen().is_empty());
    assert_eq!(ProgressLedger::load(&path, 10).counts().completed, 0);
}
