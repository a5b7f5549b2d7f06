//! Incremental session index over an archive of logs.
//!
//! [`IndexCache`] owns one archive root. Each refresh loads the persisted
//! index, re-segments only logs that are new or changed since the index was
//! last written, prunes logs that disappeared, and rewrites the index only
//! when something was re-segmented. Patch files and video files are looked
//! up on every refresh since neither changes the log's modification time.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use debrief_types::{LogMetadata, SessionDescriptor, patch_file_candidates};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult};
use crate::index_file::{SessionIndex, read_index, write_index};
use crate::reader::{JsonLinesLogReader, LogReader};
use crate::segmenter::{extract_metadata, find_video_files};

// ============================================================================
// Progress
// ============================================================================

/// Receives coarse progress while the index refreshes.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, task: &str, percent: u8);
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _task: &str, _percent: u8) {}
}

const PARSING_INDEX: (&str, u8) = ("Parsing cache...", 0);
const PARSING_LOGS: (&str, u8) = ("Parsing log files...", 10);
const CHECKING_PATCHES: (&str, u8) = ("Parsing log patch files...", 80);
const WRITING_INDEX: (&str, u8) = ("Updating cache...", 95);
const DONE: (&str, u8) = ("Completed updating cache", 100);

// ============================================================================
// Scan report
// ============================================================================

/// What one refresh did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Logs found under the root.
    pub logs: usize,
    /// Logs re-segmented, by index key.
    pub rescanned: Vec<String>,
    /// Index entries dropped because their log is gone.
    pub pruned: Vec<String>,
    /// Logs that could not be read, with the reason.
    pub failed: Vec<(String, String)>,
    /// Whether the index file was rewritten.
    pub persisted: bool,
}

// ============================================================================
// IndexCache
// ============================================================================

pub struct IndexCache {
    config: IndexConfig,
    reader: Box<dyn LogReader>,
    progress: Box<dyn ProgressReporter>,
}

impl IndexCache {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            reader: Box::new(JsonLinesLogReader),
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_reader(mut self, reader: impl LogReader + 'static) -> Self {
        self.reader = Box::new(reader);
        self
    }

    pub fn with_progress(mut self, progress: impl ProgressReporter + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Bring the index up to date with the archive and return it.
    #[tracing::instrument(skip(self), name = "index.refresh", fields(root = %self.config.root.display()))]
    pub fn refresh(&self) -> IndexResult<(SessionIndex, ScanReport)> {
        let index_path = self.config.index_path();
        self.report(PARSING_INDEX);
        let mut index = read_index(&index_path)?;
        let index_time = fs::metadata(&index_path).and_then(|m| m.modified()).ok();

        let logs = self.list_logs()?;
        let mut report = ScanReport {
            logs: logs.len(),
            ..Default::default()
        };

        let present: HashSet<&str> = logs.iter().map(|(key, _)| key.as_str()).collect();
        let gone: Vec<String> = index
            .keys()
            .filter(|key| !present.contains(key.as_str()))
            .cloned()
            .collect();
        for key in &gone {
            index.remove(key);
        }
        report.pruned = gone;

        let stale: Vec<&String> = logs
            .iter()
            .filter(|(key, modified)| {
                !index.contains_key(key.as_str()) || is_newer(*modified, index_time)
            })
            .map(|(key, _)| key)
            .collect();

        if !stale.is_empty() {
            self.report(PARSING_LOGS);
            let span = u32::from(CHECKING_PATCHES.1 - PARSING_LOGS.1);
            for (done, key) in stale.iter().enumerate() {
                match extract_metadata(self.reader.as_ref(), &self.config, key) {
                    Ok(fresh) => merge_rescanned(&mut index, key, fresh),
                    Err(e) => {
                        report.failed.push(((*key).clone(), e.to_string()));
                        index.entry((*key).clone()).or_default();
                    }
                }
                report.rescanned.push((*key).clone());
                let done = u32::try_from(done + 1).unwrap_or(u32::MAX);
                let total = u32::try_from(stale.len()).unwrap_or(u32::MAX);
                let percent = u32::from(PARSING_LOGS.1) + done.saturating_mul(span) / total;
                self.progress
                    .report(PARSING_LOGS.0, u8::try_from(percent).unwrap_or(CHECKING_PATCHES.1));
            }
        }
        if !report.failed.is_empty() {
            let lines: Vec<String> = report
                .failed
                .iter()
                .map(|(key, reason)| format!("{key} : {reason}"))
                .collect();
            warn!("log files that failed to parse:\n{}", lines.join("\n"));
        }

        self.report(CHECKING_PATCHES);
        index = self.attach_sidecars(index);

        if !report.rescanned.is_empty() {
            self.report(WRITING_INDEX);
            write_index(&index_path, &index)?;
            report.persisted = true;
        }

        self.report(DONE);
        info!(
            logs = report.logs,
            rescanned = report.rescanned.len(),
            pruned = report.pruned.len(),
            "session index refreshed"
        );
        Ok((index, report))
    }

    /// Every session, favorites of `username` first, then the default
    /// session order.
    pub fn all_sessions_sorted(&self, username: Option<&str>) -> IndexResult<Vec<LogMetadata>> {
        let (index, _) = self.refresh()?;
        let mut sessions: Vec<LogMetadata> = index.into_values().flatten().collect();
        let username = username.map(str::trim).filter(|u| !u.is_empty());
        sessions.sort_by(|a, b| {
            let favorite = |m: &LogMetadata| username.is_some_and(|u| m.is_favorite_of(u));
            favorite(b)
                .cmp(&favorite(a))
                .then_with(|| SessionDescriptor::default_order(a.session(), b.session()))
        });
        Ok(sessions)
    }

    /// Replace the stored record equal to `metadata` (same log and start
    /// time). Returns false, writing nothing, when there is no such record.
    pub fn update_one(&self, metadata: LogMetadata) -> IndexResult<bool> {
        let (mut index, _) = self.refresh()?;
        let Some(sessions) = index.get_mut(metadata.log_file()) else {
            return Ok(false);
        };
        if !sessions.contains(&metadata) {
            return Ok(false);
        }
        sessions.replace(metadata);
        write_index(&self.config.index_path(), &index)?;
        Ok(true)
    }

    /// Segment the log in one session folder and pick the session best
    /// matching `session_name` and `start_time`.
    ///
    /// The first session found is the fallback; a session with the same name
    /// replaces it whenever its start is closer to `start_time`.
    pub fn find_session(&self, folder: &str, session_name: &str, start_time: i64) -> IndexResult<Option<LogMetadata>> {
        let dir = self.config.root.join(folder);
        let entries = fs::read_dir(&dir).map_err(|e| IndexError::io(&dir, e))?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| self.config.is_log_file(name))
            .collect();
        names.sort();
        let Some(name) = names.into_iter().next() else {
            return Err(IndexError::InvalidArgument(format!("no log file in session folder {folder}")));
        };

        let key = format!("{folder}/{name}");
        let sessions = extract_metadata(self.reader.as_ref(), &self.config, &key)?;
        let mut best: Option<LogMetadata> = None;
        for candidate in sessions {
            best = match best {
                None => Some(candidate),
                Some(current)
                    if candidate.session().name_of_session == session_name
                        && (start_time - candidate.start_time()).abs() < (start_time - current.start_time()).abs() =>
                {
                    Some(candidate)
                }
                keep => keep,
            };
        }
        Ok(best)
    }

    fn report(&self, (task, percent): (&str, u8)) {
        self.progress.report(task, percent);
    }

    /// Logs under the root as `(index key, modified time)`. Only files one
    /// folder deep count; each session log lives in its own folder.
    fn list_logs(&self) -> IndexResult<Vec<(String, Option<SystemTime>)>> {
        let root = &self.config.root;
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(IndexError::io(root, e)),
        };

        let mut logs = Vec::new();
        for folder in entries.filter_map(Result::ok) {
            if !folder.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let folder_path = folder.path();
            let files = fs::read_dir(&folder_path).map_err(|e| IndexError::io(&folder_path, e))?;
            for file in files.filter_map(Result::ok) {
                let Ok(name) = file.file_name().into_string() else {
                    continue;
                };
                if !self.config.is_log_file(&name) {
                    continue;
                }
                let Some(key) = self.config.key_for(&file.path()) else {
                    continue;
                };
                let modified = file.metadata().and_then(|m| m.modified()).ok();
                logs.push((key, modified));
            }
        }
        logs.sort();
        Ok(logs)
    }

    /// Attach patch file names and video files to every record.
    fn attach_sidecars(&self, index: SessionIndex) -> SessionIndex {
        index
            .into_iter()
            .map(|(key, sessions)| {
                let log_path = self.config.resolve(&key);
                let patch = self.patch_file_for(&key, &log_path);
                let folder = log_path.parent().unwrap_or(Path::new(""));
                let videos = find_video_files(folder, &self.config.video_suffix);
                let sessions: BTreeSet<LogMetadata> = sessions
                    .into_iter()
                    .map(|mut meta| {
                        meta.set_log_patch_file(patch.clone());
                        meta.add_video_files(videos.iter().cloned());
                        meta
                    })
                    .collect();
                (key, sessions)
            })
            .collect()
    }

    fn patch_file_for(&self, key: &str, log_path: &Path) -> Option<String> {
        let [primary, converted] =
            patch_file_candidates(log_path, &self.config.patch_suffix, &self.config.converted_extension);
        let chosen = if primary.exists() {
            primary
        } else if !key.ends_with(self.config.converted_extension.as_str()) && converted.exists() {
            converted
        } else {
            return None;
        };
        chosen.file_name().map(|n| n.to_string_lossy().into_owned())
    }
}

fn is_newer(modified: Option<SystemTime>, index_time: Option<SystemTime>) -> bool {
    match (modified, index_time) {
        (Some(modified), Some(index_time)) => modified > index_time,
        _ => true,
    }
}

/// Replace a log's sessions with a fresh segmentation, carrying favorites
/// over from records with the same identity.
fn merge_rescanned(index: &mut SessionIndex, key: &str, fresh: Vec<LogMetadata>) {
    let previous = index.remove(key).unwrap_or_default();
    let mut sessions = BTreeSet::new();
    for mut meta in fresh {
        if let Some(old) = previous.get(&meta) {
            meta.merge_favorites(old);
        }
        sessions.insert(meta);
    }
    debug!(log = key, sessions = sessions.len(), "re-segmented log");
    index.insert(key.to_string(), sessions);
}
