use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("failed to retrieve '{path}' (status {status})")]
    RemoteFetch { path: String, status: u16 },

    #[error("file service request failed: {0}")]
    RemoteHttp(String),

    #[error("range request for '{path}' returned {received} bytes, expected {expected}")]
    ShortRange {
        path: String,
        expected: u64,
        received: u64,
    },

    #[error("conversion failed for '{path}': {reason}")]
    Conversion { path: String, reason: String },

    #[error("conversion of '{path}' did not finish within {elapsed_secs}s")]
    ConversionTimeout { path: String, elapsed_secs: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to obtain a directory listing for '{path}'")]
    DirectoryListing { path: String },

    #[error("experiment has no assays")]
    NoAssay,

    #[error("search index returned status {status}: {message}")]
    SearchQuery { status: u16, message: String },

    #[error("search index request failed: {0}")]
    SearchHttp(String),

    #[error("malformed payload at '{path}': {message}")]
    InvalidPayload { path: String, message: String },

    #[error("failed to decode chunk: {0}")]
    Decode(String),

    #[error("unknown assay: {0}")]
    UnknownAssay(String),

    #[error("unknown reduced dimension: {0}")]
    UnknownReducedDimension(String),

    #[error("gene not found in row names: {0}")]
    UnknownGene(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("row {row} is out of range (row count {row_count})")]
    RowOutOfRange { row: usize, row_count: usize },

    #[error("length mismatch: {left} values vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("failed to read config file at {0}")]
    ConfigRead(String),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

impl KiraError {
    pub(crate) fn invalid_payload(path: &str, message: impl ToString) -> Self {
        KiraError::InvalidPayload {
            path: path.to_string(),
            message: message.to_string(),
        }
    }
}
