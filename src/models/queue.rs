use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::search::BookFormat;

/// A state in the download queue's lifecycle. See `crate::queue::state` for
/// the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Cancelled | DownloadStatus::Failed
        )
    }
}

/// A row in the persistent priority download queue.
///
/// `priority` ∈ [1, 100], larger meaning more important. `progress_percentage`
/// must be monotonically non-decreasing within one active run;
/// `retry_count` ≤ `max_retries`; `completed_at` is present iff
/// `status == Completed`; `started_at` is present iff the item has entered
/// `Downloading` at least once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadQueueItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub book_id: Option<Uuid>,
    pub indexer_id: Uuid,
    pub title: String,
    pub author: Option<String>,
    pub download_url: String,
    pub file_format: BookFormat,
    pub file_size_bytes: Option<u64>,
    pub priority: i32,
    pub status: DownloadStatus,
    pub progress_percentage: u8,
    pub download_path: Option<String>,
    pub quality_profile_id: Option<Uuid>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl DownloadQueueItem {
    pub fn new(
        user_id: Uuid,
        indexer_id: Uuid,
        title: String,
        download_url: String,
        file_format: BookFormat,
        priority: i32,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            book_id: None,
            indexer_id,
            title,
            author: None,
            download_url,
            file_format,
            file_size_bytes: None,
            priority: priority.clamp(1, 100),
            status: DownloadStatus::Pending,
            progress_percentage: 0,
            download_path: None,
            quality_profile_id: None,
            retry_count: 0,
            max_retries,
            error_message: None,
            checksum: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            estimated_completion: None,
        }
    }
}

/// Immutable archival copy written on terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadHistoryItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub indexer_id: Uuid,
    pub title: String,
    pub file_format: BookFormat,
    pub final_status: DownloadStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl From<&DownloadQueueItem> for DownloadHistoryItem {
    fn from(item: &DownloadQueueItem) -> Self {
        Self {
            id: item.id,
            user_id: item.user_id,
            indexer_id: item.indexer_id,
            title: item.title.clone(),
            file_format: item.file_format,
            final_status: item.status,
            retry_count: item.retry_count,
            error_message: item.error_message.clone(),
            created_at: item.created_at,
            completed_at: item.completed_at.unwrap_or_else(Utc::now),
        }
    }
}
