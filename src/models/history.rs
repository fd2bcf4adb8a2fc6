use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::search::SearchRequest;

/// One row of a user's search history, written best-effort per completed
/// search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHistoryEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub query: String,
    pub filters: SearchRequest,
    pub results_count: usize,
    pub indexers_searched: Vec<Uuid>,
    pub search_duration_ms: u64,
    pub searched_at: DateTime<Utc>,
}
