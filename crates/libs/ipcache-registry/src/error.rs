/// Failures of the durable store.
///
/// Fatal to the connection that triggered them. In-memory state is only
/// touched after a write commits, so a failed call leaves it unchanged.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored ip {value:?} for principal {principal_id} is not an IP address")]
    InvalidIp { principal_id: String, value: String },

    #[error("unknown authorization type {0}")]
    UnknownAuthorizationType(i64),

    #[error("store operation {operation} timed out")]
    Timeout { operation: &'static str },

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store task failed: {0}")]
    Task(String),
}
