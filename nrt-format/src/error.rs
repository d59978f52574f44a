use std::path::PathBuf;

pub type FormatResult<T> = std::result::Result<T, FormatError>;

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Writing error: {0}")]
    Writing(#[from] WritingError),
    #[error("Reading error: {0}")]
    Reading(#[from] ReadingError),
    #[error("{what} index {index} out of range for length {len}")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },
    #[error("item range {start}..{end} out of bounds for length {len}")]
    InvalidRange {
        start: usize,
        end: usize,
        len: usize,
    },
}

/// Structural defects in nested input or in a set of flat buffers.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error(
        "item {item}, event-group {event_group}: {codes} codes but {values} values"
    )]
    CodeValueMismatch {
        item: usize,
        event_group: usize,
        codes: usize,
        values: usize,
    },
    #[error("item {item}, event-group {event_group}: invalid timedelta {value}")]
    InvalidTimedelta {
        item: usize,
        event_group: usize,
        value: f32,
    },
    #[error("column '{column}' at {location}: expected length {expected}, found {actual}")]
    ColumnLengthMismatch {
        column: &'static str,
        location: String,
        expected: usize,
        actual: usize,
    },
    #[error("field '{field}' has {actual} elements, layout requires {expected}")]
    BufferLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("boundary '{field}' corrupt at position {index}: {reason}")]
    CorruptBoundary {
        field: &'static str,
        index: usize,
        reason: String,
    },
    #[error("field '{field}' has invalid value at position {index}: {reason}")]
    InvalidValue {
        field: &'static str,
        index: usize,
        reason: String,
    },
    #[error("Invalid generator configuration: {0}")]
    InvalidGenerator(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WritingError {
    #[error("Refusing to overwrite existing dataset at {0}")]
    AlreadyExists(PathBuf),
    #[error("Failed to create staging directory next to {path}: {source}")]
    StagingFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    FileWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode manifest: {0}")]
    ManifestEncode(#[source] serde_json::Error),
    #[error("Failed to publish dataset at {path}: {source}")]
    PublishFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported host byte order: {0}")]
    UnsupportedByteOrder(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum ReadingError {
    #[error("Manifest not found at {0}")]
    ManifestMissing(PathBuf),
    #[error("Failed to decode manifest {path}: {source}")]
    ManifestDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported format '{0}'")]
    UnsupportedFormat(String),
    #[error("Unsupported format version {found}, this build reads version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("Dataset byte order '{dataset}' does not match host byte order '{host}'")]
    ByteOrderMismatch {
        dataset: &'static str,
        host: &'static str,
    },
    #[error("Field '{0}' missing from manifest")]
    FieldMissing(&'static str),
    #[error("Field '{field}' declared as {actual} ({actual_width} bytes), expected {expected}")]
    FieldDType {
        field: &'static str,
        expected: &'static str,
        actual: &'static str,
        actual_width: u8,
    },
    #[error("Field '{field}' declared at level {actual}, expected {expected}")]
    FieldLevel {
        field: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Field '{field}' is stored in '{file}', which is not a plain file name")]
    FieldFileName { field: &'static str, file: String },
    #[error("Field '{field}' expects {expected} bytes on disk, found {actual}")]
    FieldLength {
        field: &'static str,
        expected: u64,
        actual: u64,
    },
    #[error("Failed to load {path}: {source}")]
    FieldLoadFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Buffer for field '{0}' is not aligned for its element type")]
    Misaligned(&'static str),
    #[error("Checksum mismatch for field '{field}': manifest {expected}, computed {actual}")]
    ChecksumMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },
    #[error("Manifest declares {declared} items but layout holds {actual}")]
    ItemCountMismatch { declared: u64, actual: u64 },
}
