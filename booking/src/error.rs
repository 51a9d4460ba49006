use thiserror::Error;

/// Faults crossing the coordinator / finalizer boundary.
///
/// Domain outcomes (exhausted, not found, already cancelled) are never
/// represented here; they are variants of the per-operation outcome enums.
#[derive(Error, Debug)]
pub enum BookingError {
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("queue failure: {0}")]
    Queue(#[from] QueueError),

    #[error("payload codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("cannot encode instruction: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("queue message {0} is no longer leased")]
    LeaseLost(String),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

pub type BookingResult<T> = Result<T, BookingError>;
