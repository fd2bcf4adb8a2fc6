use uuid::Uuid;

/// Lookup tables owned by the user-facing layers. The core only ever
/// consumes their identifiers; their contents are opaque to search and
/// download orchestration.
pub type QualityProfile = Uuid;
pub type DownloadFolder = Uuid;
pub type UserPreferences = Uuid;
