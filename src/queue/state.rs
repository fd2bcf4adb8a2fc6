//! Download status transition table (§4.H state machine).
//!
//! ```text
//! pending ──► downloading ──► completed
//!    │            │  ▲
//!    │            │  │ (retry)
//!    │            ▼  │
//!    │          failed ── (retry exhausted) ──► failed (terminal)
//!    ├──► cancelled (terminal)
//!    └──► paused ──► pending
//! ```
//!
//! `DownloadStatus` alone cannot distinguish a retryable `failed` from its
//! terminal twin — that depends on `retry_count` vs `max_retries` — so this
//! table treats `(Failed, Pending)` as structurally valid and leaves the
//! retry-budget check to [`is_effectively_terminal`].

use crate::error::{Error, Result};
use crate::models::{DownloadQueueItem, DownloadStatus};

/// Whether `to` is a legal transition from `from`, ignoring retry budget.
pub fn is_valid_transition(from: DownloadStatus, to: DownloadStatus) -> bool {
    use DownloadStatus::*;
    matches!(
        (from, to),
        (Pending, Downloading)
            | (Pending, Cancelled)
            | (Pending, Paused)
            | (Downloading, Completed)
            | (Downloading, Failed)
            | (Downloading, Cancelled)
            | (Failed, Pending)
            | (Paused, Pending)
            | (Paused, Cancelled)
    )
}

/// Validate a bare status transition.
pub fn validate_transition(from: DownloadStatus, to: DownloadStatus) -> Result<()> {
    if from == to {
        return Ok(());
    }
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "illegal transition {from:?} -> {to:?}"
        )))
    }
}

/// Whether `item` has no further outgoing edges. `Completed` and `Cancelled`
/// always qualify; `Failed` only once its retry budget is exhausted (§4.H
/// "Terminal states: completed, cancelled, failed (after retry_count ==
/// max_retries)").
pub fn is_effectively_terminal(item: &DownloadQueueItem) -> bool {
    match item.status {
        DownloadStatus::Completed | DownloadStatus::Cancelled => true,
        DownloadStatus::Failed => item.retry_count >= item.max_retries,
        _ => false,
    }
}

/// Validate a batch-operation target against an item's retry-aware terminal
/// state, returning `Conflict` (§7's terminal-state batch error) when the
/// item has no outgoing edges left.
pub fn validate_batch_target(item: &DownloadQueueItem, to: DownloadStatus) -> Result<()> {
    if is_effectively_terminal(item) {
        return Err(Error::Conflict(format!(
            "item {} is already in a terminal state",
            item.id
        )));
    }
    validate_transition(item.status, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use DownloadStatus::*;

    fn sample_item(status: DownloadStatus, retry_count: u32, max_retries: u32) -> DownloadQueueItem {
        let mut item = DownloadQueueItem::new(
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            "title".into(),
            "http://x/dl".into(),
            crate::models::BookFormat::Epub,
            50,
            max_retries,
        );
        item.status = status;
        item.retry_count = retry_count;
        item
    }

    #[test]
    fn test_pending_to_downloading_is_valid() {
        assert!(is_valid_transition(Pending, Downloading));
    }

    #[test]
    fn test_completed_and_cancelled_have_no_outgoing_edges() {
        assert!(!is_valid_transition(Completed, Pending));
        assert!(!is_valid_transition(Cancelled, Pending));
    }

    #[test]
    fn test_failed_retries_back_to_pending_when_structurally_valid() {
        assert!(is_valid_transition(Failed, Pending));
        assert!(!is_valid_transition(Failed, Downloading));
    }

    #[test]
    fn test_paused_resumes_to_pending_only() {
        assert!(is_valid_transition(Paused, Pending));
        assert!(is_valid_transition(Paused, Cancelled));
        assert!(!is_valid_transition(Paused, Downloading));
    }

    #[test]
    fn test_failed_item_with_retry_budget_remaining_is_not_effectively_terminal() {
        let item = sample_item(Failed, 1, 3);
        assert!(!is_effectively_terminal(&item));
        assert!(validate_batch_target(&item, Pending).is_ok());
    }

    #[test]
    fn test_failed_item_with_exhausted_retries_is_effectively_terminal() {
        let item = sample_item(Failed, 3, 3);
        assert!(is_effectively_terminal(&item));
        let err = validate_batch_target(&item, Pending).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_illegal_non_terminal_transition_is_invalid_argument() {
        let err = validate_transition(Pending, Completed).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
