use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HprofDelveError {
    #[error("input file '{name}' not found")]
    InputFileNotFound { name: String },
    #[error("invalid top value, must be a positive integer")]
    InvalidTopPositiveInt,
    #[error("invalid object address '{value}'")]
    InvalidAddress { value: String },
    #[error("invalid hprof file ({message})")]
    InvalidHprofFile { message: String },
    #[error("invalid hprof file header size")]
    InvalidHeaderSize,
    #[error("unsupported identifier size {size}, expected 4 or 8")]
    UnsupportedIdSize { size: u32 },
    #[error("corrupted heap dump at offset {offset}: {message}")]
    Corruption { offset: u64, message: String },
    #[error("unknown heap sub-record tag 0x{tag:02x} at offset {offset}")]
    UnknownSubRecordTag { offset: u64, tag: u8 },
    #[error("stale index file '{path}': {reason}")]
    StaleIndex { path: PathBuf, reason: String },
    #[error(transparent)]
    ClapError(#[from] clap::Error),
    #[error(transparent)]
    StdIoError(#[from] std::io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

impl HprofDelveError {
    /// Stale indexes are recoverable: the caller rebuilds instead of failing.
    pub fn is_stale_index(&self) -> bool {
        matches!(self, HprofDelveError::StaleIndex { .. })
    }
}
