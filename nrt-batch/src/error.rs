use nrt_format::FormatError;

pub type BatchResult<T> = std::result::Result<T, BatchError>;

/// Errors produced while slicing, collating or iterating a dataset.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Failure in the underlying dataset (lookup, open, validation).
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Invalid window policy: {0}")]
    InvalidWindow(String),

    /// An explicit event-group range does not fit inside the item.
    #[error("Event-group range {start}..{end} out of bounds for item {index} with {len} event-groups")]
    SubRangeOutOfBounds {
        index: usize,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("Invalid batch plan: {0}")]
    InvalidPlan(String),

    #[error("Failed to spawn loader worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("Loader worker {worker} panicked")]
    WorkerPanicked { worker: usize },
}
