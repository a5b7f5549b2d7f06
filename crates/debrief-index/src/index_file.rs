//! On-disk layout of the session index.
//!
//! The canonical form is a JSON object keyed by log file (`folder/file`),
//! each value an array of session records. Older archives wrote a flat
//! array of records instead; it is accepted on load and regrouped by each
//! record's `fileName`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use debrief_types::{LogMetadata, LogSpan, SessionDescriptor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IndexError, IndexResult};

/// Sessions grouped by the index key of their log file.
pub type SessionIndex = BTreeMap<String, BTreeSet<LogMetadata>>;

/// One persisted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    pub session: SessionDescriptor,
    pub file_name: String,
    pub first_msg_index: usize,
    /// Exclusive end of the session's span.
    pub last_msg_index: usize,
    pub first_msg_time: i64,
    pub last_msg_time: i64,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub users_favorite: BTreeSet<String>,
    #[serde(default)]
    pub dkf: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IndexLayout {
    ByLogFile(BTreeMap<String, Vec<IndexRecord>>),
    Legacy(Vec<IndexRecord>),
}

impl IndexLayout {
    fn normalize(self) -> BTreeMap<String, Vec<IndexRecord>> {
        match self {
            Self::ByLogFile(map) => map,
            Self::Legacy(records) => {
                let mut map: BTreeMap<String, Vec<IndexRecord>> = BTreeMap::new();
                for record in records {
                    map.entry(record.file_name.clone()).or_default().push(record);
                }
                map
            }
        }
    }
}

impl IndexRecord {
    pub fn from_metadata(metadata: &LogMetadata) -> Self {
        let mut session = metadata.session().clone();
        // Playback ids belong to live viewers.
        session.playback_id = None;
        Self {
            session,
            file_name: metadata.log_file().to_string(),
            first_msg_index: metadata.log_span().start(),
            last_msg_index: metadata.log_span().end(),
            first_msg_time: metadata.start_time(),
            last_msg_time: metadata.end_time(),
            users_favorite: metadata.users_favorite().clone(),
            dkf: metadata.dkf().map(str::to_string),
        }
    }

    /// Rebuild session metadata for the log stored under `log_file`.
    pub fn into_metadata(self, log_file: &str) -> IndexResult<LogMetadata> {
        let entry_error = |source| IndexError::Entry {
            log_file: log_file.to_string(),
            source,
        };
        let span = LogSpan::new(self.first_msg_index, self.last_msg_index).map_err(entry_error)?;
        let session = self
            .session
            .into_past_session(self.first_msg_time, self.last_msg_time, log_file);
        let mut metadata = LogMetadata::new(session, log_file, span, self.first_msg_time, self.last_msg_time)
            .map_err(entry_error)?;
        for user in &self.users_favorite {
            metadata.set_favorite(user, true);
        }
        metadata.set_dkf(self.dkf);
        Ok(metadata)
    }
}

/// Load the index at `path`. A missing file is an empty index.
pub fn read_index(path: &Path) -> IndexResult<SessionIndex> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SessionIndex::new()),
        Err(e) => return Err(IndexError::io(path, e)),
    };
    let layout: IndexLayout = serde_json::from_str(&text).map_err(|source| IndexError::Format {
        path: path.to_path_buf(),
        source,
    })?;

    let mut index = SessionIndex::new();
    for (log_file, records) in layout.normalize() {
        let sessions = index.entry(log_file.clone()).or_default();
        for record in records {
            sessions.insert(record.into_metadata(&log_file)?);
        }
    }
    debug!(path = %path.display(), logs = index.len(), "read session index");
    Ok(index)
}

/// Persist `index` at `path` through a temporary sibling file.
pub fn write_index(path: &Path, index: &SessionIndex) -> IndexResult<()> {
    let records: BTreeMap<&str, Vec<IndexRecord>> = index
        .iter()
        .map(|(log_file, sessions)| {
            (
                log_file.as_str(),
                sessions.iter().map(IndexRecord::from_metadata).collect(),
            )
        })
        .collect();

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);

    let file = fs::File::create(tmp).map_err(|e| IndexError::io(tmp, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &records).map_err(|e| IndexError::io(tmp, io::Error::other(e)))?;
    writer.flush().map_err(|e| IndexError::io(tmp, e))?;
    drop(writer);

    fs::rename(tmp, path).map_err(|e| IndexError::io(path, e))?;
    debug!(path = %path.display(), logs = index.len(), "wrote session index");
    Ok(())
}
