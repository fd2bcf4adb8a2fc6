//! Queue Scheduler (Component H, §4.H). Bounds simultaneous downloads with
//! a semaphore, claims the queue head atomically through the repository,
//! drives one adapter-agnostic `Downloader` per item, and translates
//! backend progress into persisted state + published events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::download_client::Downloader;
use crate::error::{Error, Result};
use crate::events::{Event, EventPublisher};
use crate::models::{DownloadQueueItem, DownloadStatus};
use crate::queue::state;
use crate::repository::DownloadQueueRepository;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Pause,
    Resume,
    Cancel,
    Delete,
    Retry,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub affected: u64,
    pub errors: Vec<(Uuid, String)>,
}

#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub verified: bool,
    pub checksum: Option<String>,
    pub error: Option<String>,
}

pub struct QueueScheduler {
    repo: Arc<dyn DownloadQueueRepository>,
    downloader: Arc<dyn Downloader>,
    events: Arc<EventPublisher>,
    semaphore: Arc<Semaphore>,
    poll_interval: Duration,
    retry_base: Duration,
    cancels: RwLock<HashMap<Uuid, CancellationToken>>,
    shutdown: CancellationToken,
}

impl QueueScheduler {
    pub fn new(
        repo: Arc<dyn DownloadQueueRepository>,
        downloader: Arc<dyn Downloader>,
        events: Arc<EventPublisher>,
        max_concurrent_downloads: usize,
    ) -> Self {
        Self {
            repo,
            downloader,
            events,
            semaphore: Arc::new(Semaphore::new(max_concurrent_downloads.max(1))),
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_base: DEFAULT_RETRY_BASE,
            cancels: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn enqueue(&self, item: DownloadQueueItem) -> Result<DownloadQueueItem> {
        self.repo.insert(&item).await?;
        self.events.publish(Event::DownloadAdded { item: item.clone() });
        self.events.publish(Event::QueueUpdated { affected: 1 });
        Ok(item)
    }

    /// The long-running scheduling loop: claims the queue head whenever a
    /// concurrency slot is free, and runs each claim to completion on its
    /// own task.
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            match self.repo.select_next_pending().await {
                Ok(Some(item)) => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.run_claimed(item).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {},
                        _ = self.shutdown.cancelled() => return,
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "failed to select next pending download");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Signal the loop to stop claiming new work. In-flight downloads are
    /// left to finish (or be cancelled individually) by the caller.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn run_claimed(&self, item: DownloadQueueItem) {
        let id = item.id;
        let cancel = CancellationToken::new();
        self.cancels.write().await.insert(id, cancel.clone());
        self.events.publish(Event::DownloadStatusChanged {
            id,
            from: DownloadStatus::Pending,
            to: DownloadStatus::Downloading,
            at: Utc::now(),
        });

        self.execute(item, cancel).await;
        self.cancels.write().await.remove(&id);
    }

    /// Runs one claimed item's transfer to a terminal-or-retried outcome.
    /// Split out from `run_claimed` so tests can drive it without the
    /// scheduling loop or semaphore.
    async fn execute(&self, mut item: DownloadQueueItem, cancel: CancellationToken) {
        let handle = match self.downloader.start(&item).await {
            Ok(handle) => handle,
            Err(e) => {
                self.handle_failure(item, e.to_string()).await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = cancel.cancelled() => {
                    let _ = self.downloader.cancel(&handle).await;
                    self.handle_cancel(item).await;
                    return;
                }
            }

            match self.downloader.poll(&handle).await {
                Ok(progress) => {
                    if progress.progress_percentage > item.progress_percentage {
                        item.progress_percentage = progress.progress_percentage;
                        item.updated_at = Utc::now();
                        if let Err(e) = self
                            .repo
                            .update_progress(item.id, item.progress_percentage)
                            .await
                        {
                            tracing::warn!(id = %item.id, error = %e, "failed to persist progress");
                        }
                        self.events.publish(Event::DownloadProgress {
                            id: item.id,
                            progress_percentage: item.progress_percentage,
                        });
                    }
                    if let Some(message) = progress.error {
                        self.handle_failure(item, message).await;
                        return;
                    }
                    if progress.completed {
                        item.download_path = progress.download_path.clone();
                        self.finish(item).await;
                        return;
                    }
                }
                Err(e) => {
                    self.handle_failure(item, e.to_string()).await;
                    return;
                }
            }
        }
    }

    async fn finish(&self, mut item: DownloadQueueItem) {
        if let Some(expected) = item.checksum.clone() {
            let path = item.download_path.clone();
            let actual = match path {
                Some(path) => compute_checksum(path).await,
                None => Err(Error::IntegrityMismatch("no file to verify".to_string())),
            };
            match actual {
                Ok(actual) if actual == expected => {}
                _ => {
                    self.handle_failure(item, "checksum mismatch".to_string()).await;
                    return;
                }
            }
        }

        item.status = DownloadStatus::Completed;
        item.progress_percentage = 100;
        item.completed_at = Some(Utc::now());
        item.updated_at = Utc::now();
        if let Err(e) = self.repo.finalize(&item).await {
            tracing::error!(id = %item.id, error = %e, "failed to persist completion");
        }
        self.events.publish(Event::DownloadStatusChanged {
            id: item.id,
            from: DownloadStatus::Downloading,
            to: DownloadStatus::Completed,
            at: Utc::now(),
        });
        self.events.publish(Event::DownloadCompleted {
            id: item.id,
            download_path: item.download_path.clone(),
        });
        self.events.publish(Event::QueueUpdated { affected: 1 });
    }

    /// Non-fatal failure handling: a failure always lands in `Failed`
    /// first, then retries back to `Pending` if budget remains — two
    /// persisted, published transitions, matching §8 scenario 4's "exactly
    /// two transitions failed → pending" for a twice-retried item.
    async fn handle_failure(&self, mut item: DownloadQueueItem, message: String) {
        item.status = DownloadStatus::Failed;
        item.error_message = Some(message);
        item.updated_at = Utc::now();
        if let Err(e) = self.repo.update(&item).await {
            tracing::error!(id = %item.id, error = %e, "failed to persist failure");
        }
        self.events.publish(Event::DownloadStatusChanged {
            id: item.id,
            from: DownloadStatus::Downloading,
            to: DownloadStatus::Failed,
            at: Utc::now(),
        });

        if item.retry_count < item.max_retries {
            item.retry_count += 1;
            item.status = DownloadStatus::Pending;
            item.error_message = None;
            item.estimated_completion = Some(Utc::now() + self.backoff_with_jitter(item.retry_count));
            item.updated_at = Utc::now();
            if let Err(e) = self.repo.update(&item).await {
                tracing::error!(id = %item.id, error = %e, "failed to persist retry");
            }
            self.events.publish(Event::DownloadStatusChanged {
                id: item.id,
                from: DownloadStatus::Failed,
                to: DownloadStatus::Pending,
                at: Utc::now(),
            });
        } else if let Err(e) = self.repo.finalize(&item).await {
            tracing::error!(id = %item.id, error = %e, "failed to persist terminal failure");
        }
        self.events.publish(Event::QueueUpdated { affected: 1 });
    }

    async fn handle_cancel(&self, mut item: DownloadQueueItem) {
        item.status = DownloadStatus::Cancelled;
        item.updated_at = Utc::now();
        if let Err(e) = self.repo.finalize(&item).await {
            tracing::error!(id = %item.id, error = %e, "failed to persist cancellation");
        }
        self.events.publish(Event::DownloadStatusChanged {
            id: item.id,
            from: DownloadStatus::Downloading,
            to: DownloadStatus::Cancelled,
            at: Utc::now(),
        });
        self.events.publish(Event::QueueUpdated { affected: 1 });
    }

    /// `base * 2^retry_count` with up to ~1s of jitter, avoiding a thundering
    /// retry herd without pulling in a dedicated RNG dependency — `Uuid`'s
    /// own randomness supplies the jitter fraction.
    fn backoff_with_jitter(&self, retry_count: u32) -> ChronoDuration {
        let exp = self.retry_base.saturating_mul(1u32.checked_shl(retry_count).unwrap_or(u32::MAX));
        let jitter_ms = (jitter_fraction() * 1000.0) as u64;
        ChronoDuration::from_std(exp + Duration::from_millis(jitter_ms)).unwrap_or_default()
    }

    pub async fn verify(&self, id: Uuid) -> Result<VerifyOutcome> {
        let item = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let Some(path) = item.download_path.clone() else {
            return Ok(VerifyOutcome {
                verified: false,
                checksum: None,
                error: Some("no download path recorded".to_string()),
            });
        };
        let actual = compute_checksum(path).await?;
        Ok(match &item.checksum {
            Some(expected) if expected == &actual => VerifyOutcome {
                verified: true,
                checksum: Some(actual),
                error: None,
            },
            Some(_) => VerifyOutcome {
                verified: false,
                checksum: Some(actual),
                error: Some("checksum mismatch".to_string()),
            },
            None => VerifyOutcome {
                verified: true,
                checksum: Some(actual),
                error: None,
            },
        })
    }

    /// Apply `action` to every id in `ids`, each atomically; failures on one
    /// id never block the rest (§4.H "each id's transition either happens
    /// entirely or reports an error").
    pub async fn batch(&self, action: BatchAction, ids: &[Uuid]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for &id in ids {
            match self.apply_one(action, id).await {
                Ok(()) => outcome.affected += 1,
                Err(e) => outcome.errors.push((id, e.to_string())),
            }
        }
        if outcome.affected > 0 {
            self.events.publish(Event::QueueUpdated {
                affected: outcome.affected,
            });
        }
        Ok(outcome)
    }

    async fn apply_one(&self, action: BatchAction, id: Uuid) -> Result<()> {
        let mut item = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let from = item.status;

        match action {
            BatchAction::Pause => {
                state::validate_batch_target(&item, DownloadStatus::Paused)?;
                item.status = DownloadStatus::Paused;
                item.updated_at = Utc::now();
                self.repo.update(&item).await?;
            }
            BatchAction::Resume => {
                state::validate_batch_target(&item, DownloadStatus::Pending)?;
                item.status = DownloadStatus::Pending;
                item.updated_at = Utc::now();
                self.repo.update(&item).await?;
            }
            BatchAction::Cancel => {
                state::validate_batch_target(&item, DownloadStatus::Cancelled)?;
                if let Some(token) = self.cancels.read().await.get(&id) {
                    token.cancel();
                }
                if item.status != DownloadStatus::Downloading {
                    item.status = DownloadStatus::Cancelled;
                    item.updated_at = Utc::now();
                    self.repo.finalize(&item).await?;
                }
            }
            BatchAction::Delete => {
                self.repo.delete(id).await?;
                return Ok(());
            }
            BatchAction::Retry => {
                item.retry_count = 0;
                item.status = DownloadStatus::Pending;
                item.error_message = None;
                item.estimated_completion = None;
                item.updated_at = Utc::now();
                self.repo.update(&item).await?;
            }
        }

        self.events.publish(Event::DownloadStatusChanged {
            id,
            from,
            to: item.status,
            at: Utc::now(),
        });
        Ok(())
    }
}

fn jitter_fraction() -> f64 {
    let bytes = *Uuid::new_v4().as_bytes();
    let v = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    f64::from(v) / f64::from(u32::MAX)
}

async fn compute_checksum(path: String) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut file = std::fs::File::open(&path).map_err(Error::Io)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher).map_err(Error::Io)?;
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| Error::Internal(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download_client::DownloadProgress;
    use crate::repository::sqlite::SqliteRepositories;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyDownloader {
        start_calls: AtomicUsize,
        fail_first_n_starts: usize,
    }

    #[async_trait]
    impl Downloader for FlakyDownloader {
        async fn start(&self, item: &DownloadQueueItem) -> Result<String> {
            let call = self.start_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_n_starts {
                Err(Error::Transport("simulated transport failure".into()))
            } else {
                Ok(item.id.to_string())
            }
        }
        async fn poll(&self, _handle: &str) -> Result<DownloadProgress> {
            Ok(DownloadProgress {
                progress_percentage: 100,
                completed: true,
                download_path: None,
                error: None,
            })
        }
        async fn cancel(&self, _handle: &str) -> Result<()> {
            Ok(())
        }
        async fn test_connection(&self) -> Result<()> {
            Ok(())
        }
    }

    fn sample_item(max_retries: u32) -> DownloadQueueItem {
        DownloadQueueItem::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Some Book".into(),
            "http://x/dl".into(),
            crate::models::BookFormat::Epub,
            50,
            max_retries,
        )
    }

    #[tokio::test]
    async fn test_two_transient_failures_then_success_completes_with_retry_count_two() {
        let repo = Arc::new(SqliteRepositories::in_memory().unwrap());
        let downloader = Arc::new(FlakyDownloader {
            start_calls: AtomicUsize::new(0),
            fail_first_n_starts: 2,
        });
        let events = Arc::new(EventPublisher::new());
        let scheduler = QueueScheduler::new(repo.clone(), downloader, events, 1);

        let mut item = sample_item(3);
        scheduler.enqueue(item.clone()).await.unwrap();

        for _ in 0..3 {
            item = repo.select_next_pending().await.unwrap().unwrap();
            scheduler.execute(item.clone(), CancellationToken::new()).await;
        }

        let final_item = repo.get(item.id).await.unwrap().unwrap();
        assert_eq!(final_item.status, DownloadStatus::Completed);
        assert_eq!(final_item.retry_count, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_end_terminal_failed() {
        let repo = Arc::new(SqliteRepositories::in_memory().unwrap());
        let downloader = Arc::new(FlakyDownloader {
            start_calls: AtomicUsize::new(0),
            fail_first_n_starts: 100,
        });
        let events = Arc::new(EventPublisher::new());
        let scheduler = QueueScheduler::new(repo.clone(), downloader, events, 1);

        let item = sample_item(2);
        scheduler.enqueue(item.clone()).await.unwrap();

        let mut current = item.clone();
        for _ in 0..3 {
            current = repo.select_next_pending().await.unwrap().unwrap();
            scheduler.execute(current.clone(), CancellationToken::new()).await;
        }

        let final_item = repo.get(item.id).await.unwrap().unwrap();
        assert_eq!(final_item.status, DownloadStatus::Failed);
        assert_eq!(final_item.retry_count, 2);
        assert!(state::is_effectively_terminal(&final_item));
    }

    #[tokio::test]
    async fn test_batch_cancel_is_rejected_for_already_cancelled_item() {
        let repo = Arc::new(SqliteRepositories::in_memory().unwrap());
        let downloader = Arc::new(FlakyDownloader {
            start_calls: AtomicUsize::new(0),
            fail_first_n_starts: 0,
        });
        let events = Arc::new(EventPublisher::new());
        let scheduler = QueueScheduler::new(repo.clone(), downloader, events, 1);

        let item = sample_item(1);
        scheduler.enqueue(item.clone()).await.unwrap();
        let first = scheduler.batch(BatchAction::Cancel, &[item.id]).await.unwrap();
        assert_eq!(first.affected, 1);

        let second = scheduler.batch(BatchAction::Cancel, &[item.id]).await.unwrap();
        assert_eq!(second.affected, 0);
        assert_eq!(second.errors.len(), 1);
    }
}
