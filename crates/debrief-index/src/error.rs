//! Index and segmentation errors.

use std::io;
use std::path::{Path, PathBuf};

use debrief_types::TypesError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The index file is not valid JSON in either the map or the legacy
    /// array layout.
    #[error("index file {path} is malformed: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// One index entry could not be turned back into session metadata.
    #[error("index entry for {log_file} is invalid: {source}")]
    Entry {
        log_file: String,
        #[source]
        source: TypesError,
    },

    /// A log line did not decode as a message.
    #[error("{path} line {line}: {source}")]
    LogLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A message the segmenter cannot interpret where it appears.
    #[error("unexpected message at index {index}: {reason}")]
    UnexpectedMessage { index: usize, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Types(#[from] TypesError),
}

impl IndexError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
