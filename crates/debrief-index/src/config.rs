//! Archive layout and indexing tunables.

use std::path::{Path, PathBuf};

use debrief_types::{LEGACY_LOG_EXTENSION, LOG_PATCH_SUFFIX, PROTOBUF_LOG_EXTENSION};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Archive root. Each session log lives in its own folder directly below.
    pub root: PathBuf,
    /// Index file name, stored at the archive root.
    pub index_file_name: String,
    /// Suffix appended to a log file name to form its patch file name.
    pub patch_suffix: String,
    /// File extensions recognised as session logs.
    pub log_extensions: Vec<String>,
    /// Extension of the newer log container. Patch files of logs converted
    /// to it carry it before the patch suffix.
    pub converted_extension: String,
    /// Suffix of video metadata files found next to a log.
    pub video_suffix: String,
    /// A lesson score published within this many ms after a lesson closes
    /// belongs to that lesson.
    pub publish_score_timeout_ms: i64,
    /// Files whose name starts with this are never logs.
    pub ignored_prefix: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("output/domainSessions"),
            index_file_name: "logIndex.json".to_string(),
            patch_suffix: LOG_PATCH_SUFFIX.to_string(),
            log_extensions: vec![LEGACY_LOG_EXTENSION.to_string(), PROTOBUF_LOG_EXTENSION.to_string()],
            converted_extension: PROTOBUF_LOG_EXTENSION.to_string(),
            video_suffix: ".vmeta.xml".to_string(),
            publish_score_timeout_ms: 30_000,
            ignored_prefix: "bookmark".to_string(),
        }
    }
}

impl IndexConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(&self.index_file_name)
    }

    /// Whether a file name inside a session folder names a log.
    pub fn is_log_file(&self, name: &str) -> bool {
        !name.starts_with(&self.ignored_prefix) && self.log_extensions.iter().any(|ext| name.ends_with(ext.as_str()))
    }

    /// Absolute path of an index key (`folder/file`).
    pub fn resolve(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Index key of a log below the root, `/`-separated.
    pub fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }
}
