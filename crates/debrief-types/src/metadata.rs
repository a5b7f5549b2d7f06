//! Playable-session records extracted from log files.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::session::SessionDescriptor;

/// Suffix appended to a log file name to form its patch file name.
pub const LOG_PATCH_SUFFIX: &str = ".logPatch";

/// Extension of the current log container format.
pub const PROTOBUF_LOG_EXTENSION: &str = ".protobuf.bin";

/// Extension of legacy text logs.
pub const LEGACY_LOG_EXTENSION: &str = ".log";

/// Candidate patch files for a log, in lookup order.
///
/// The second candidate covers logs whose patch was rewritten after the log
/// was converted to the newer container format.
pub fn patch_file_candidates(log_file: &Path, suffix: &str, converted_extension: &str) -> [PathBuf; 2] {
    let base = log_file.as_os_str().to_string_lossy();
    [
        PathBuf::from(format!("{base}{suffix}")),
        PathBuf::from(format!("{base}{converted_extension}{suffix}")),
    ]
}

/// Half-open index range `[start, end)` into a message stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogSpan {
    start: usize,
    end: usize,
}

impl LogSpan {
    pub fn new(start: usize, end: usize) -> Result<Self, TypesError> {
        if start > end {
            return Err(TypesError::InvalidSpan { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Move the exclusive end; never before `start`.
    pub fn set_end(&mut self, end: usize) -> Result<(), TypesError> {
        if end < self.start {
            return Err(TypesError::InvalidSpan {
                start: self.start,
                end,
            });
        }
        self.end = end;
        Ok(())
    }
}

/// Reference to a video metadata file, relative to the session folder.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoRef(String);

impl VideoRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One playable session inside one log file.
///
/// Identity is `(log_file, start_time)`: equality, hashing, and ordering
/// ignore every other field so a re-segmented record can replace its
/// predecessor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogMetadata {
    session: SessionDescriptor,
    /// Log path relative to the archive root, `/`-separated.
    log_file: String,
    log_span: LogSpan,
    start_time: i64,
    end_time: i64,
    #[serde(default)]
    users_favorite: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log_patch_file: Option<String>,
    #[serde(default)]
    video_files: BTreeSet<VideoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dkf: Option<String>,
}

impl LogMetadata {
    pub fn new(
        session: SessionDescriptor,
        log_file: impl Into<String>,
        log_span: LogSpan,
        start_time: i64,
        end_time: i64,
    ) -> Result<Self, TypesError> {
        let log_file = log_file.into();
        if log_file.is_empty() {
            return Err(TypesError::InvalidArgument("log file name is empty".into()));
        }
        if end_time < start_time {
            return Err(TypesError::InvalidTimes {
                start: start_time,
                end: end_time,
            });
        }
        if !session.in_past_session_mode {
            return Err(TypesError::NotPastSession(session.name_of_session));
        }
        Ok(Self {
            session,
            log_file,
            log_span,
            start_time,
            end_time,
            users_favorite: BTreeSet::new(),
            log_patch_file: None,
            video_files: BTreeSet::new(),
            dkf: None,
        })
    }

    pub fn session(&self) -> &SessionDescriptor {
        &self.session
    }

    pub fn log_file(&self) -> &str {
        &self.log_file
    }

    pub fn log_span(&self) -> LogSpan {
        self.log_span
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    /// Extend the session to cover a later message at `index` / `time`.
    pub fn extend_to(&mut self, index: usize, time: i64) -> Result<(), TypesError> {
        if time < self.start_time {
            return Err(TypesError::InvalidTimes {
                start: self.start_time,
                end: time,
            });
        }
        self.log_span.set_end(index + 1)?;
        self.end_time = time;
        self.session.session_end_time = time;
        Ok(())
    }

    pub fn users_favorite(&self) -> &BTreeSet<String> {
        &self.users_favorite
    }

    pub fn is_favorite_of(&self, username: &str) -> bool {
        self.users_favorite.contains(username)
    }

    /// Returns true when the set changed.
    pub fn set_favorite(&mut self, username: &str, favorite: bool) -> bool {
        if favorite {
            self.users_favorite.insert(username.to_string())
        } else {
            self.users_favorite.remove(username)
        }
    }

    pub fn merge_favorites(&mut self, other: &LogMetadata) {
        self.users_favorite
            .extend(other.users_favorite.iter().cloned());
    }

    pub fn log_patch_file(&self) -> Option<&str> {
        self.log_patch_file.as_deref()
    }

    pub fn set_log_patch_file(&mut self, name: Option<String>) {
        self.log_patch_file = name;
    }

    pub fn video_files(&self) -> &BTreeSet<VideoRef> {
        &self.video_files
    }

    pub fn add_video_files(&mut self, videos: impl IntoIterator<Item = VideoRef>) {
        self.video_files.extend(videos);
    }

    pub fn dkf(&self) -> Option<&str> {
        self.dkf.as_deref()
    }

    /// Stored with `/` separators regardless of platform.
    pub fn set_dkf(&mut self, dkf: Option<String>) {
        self.dkf = dkf.map(|d| d.replace('\\', "/"));
    }

    /// Folder holding the log, first path component of `log_file`.
    pub fn session_folder(&self) -> &str {
        self.log_file
            .rsplit_once('/')
            .map(|(folder, _)| folder)
            .unwrap_or("")
    }
}

impl PartialEq for LogMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.log_file == other.log_file && self.start_time == other.start_time
    }
}

impl Eq for LogMetadata {}

impl Hash for LogMetadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.log_file.hash(state);
        self.start_time.hash(state);
    }
}

impl PartialOrd for LogMetadata {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogMetadata {
    fn cmp(&self, other: &Self) -> Ordering {
        self.log_file
            .cmp(&other.log_file)
            .then(self.start_time.cmp(&other.start_time))
    }
}

// ============================================================================
// Tests
// ============================================================================
