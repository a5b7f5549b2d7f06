//! Playback error types.

use std::io;
use std::path::PathBuf;

use debrief_types::TypesError;
use thiserror::Error;

/// Errors from cursor preparation, patch files, and the playback actor.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Rejected argument (negative seek time, blank node name, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Nothing left to play after preparing the log.
    #[error("no playable messages in {0}")]
    EmptyLog(String),

    /// Reading or writing a patch file failed.
    #[error("patch file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A patch file line did not decode.
    #[error("patch file {path} line {line}: {source}")]
    PatchFormat {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The assessment manager rejected a request.
    #[error("assessment: {0}")]
    Assessment(String),

    /// The playback actor has terminated.
    #[error("playback terminated")]
    Terminated,

    #[error(transparent)]
    Types(#[from] TypesError),
}

impl PlaybackError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type PlaybackResult<T> = Result<T, PlaybackError>;
