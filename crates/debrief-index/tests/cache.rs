//! Incremental refresh of the session index over a temporary archive.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use debrief_index::{
    IndexCache, IndexConfig, IndexRecord, JsonLinesLogReader, ProgressReporter, extract_metadata,
};
use debrief_types::{Message, MessageType, Payload, SessionDescriptor, SessionType};
use tempfile::TempDir;

const LONG_AGO: Duration = Duration::from_secs(1_000_000_000);

fn lesson(ds: i32, name: &str, start: i64) -> Vec<Message> {
    let mut sessions = BTreeMap::new();
    sessions.insert(ds, SessionDescriptor::new(name, ds, SessionType::Individual));
    vec![
        Message::new(MessageType::LessonStarted, start, Payload::Empty),
        Message::new(
            MessageType::ActiveKnowledgeSessionsReply,
            start + 50,
            Payload::KnowledgeSessions(sessions),
        ),
        Message::new(MessageType::EntityState, start + 80, Payload::Empty),
        Message::new(MessageType::LessonCompleted, start + 400, Payload::Empty),
    ]
    .into_iter()
    .map(|m| m.with_domain_session(ds))
    .collect()
}

/// Write `messages` as a log under `root/folder/file`, dated long ago.
fn write_log(root: &Path, folder: &str, file: &str, messages: &[Message]) {
    let dir = root.join(folder);
    fs::create_dir_all(&dir).unwrap();
    let lines: Vec<String> = messages.iter().map(|m| serde_json::to_string(m).unwrap()).collect();
    let path = dir.join(file);
    fs::write(&path, lines.join("\n")).unwrap();
    set_mtime(&path, SystemTime::UNIX_EPOCH + LONG_AGO);
}

fn set_mtime(path: &Path, time: SystemTime) {
    File::options().write(true).open(path).unwrap().set_modified(time).unwrap();
}

fn touch(path: &Path) {
    set_mtime(path, SystemTime::now() + Duration::from_secs(3_600));
}

fn archive() -> (TempDir, IndexCache) {
    let dir = TempDir::new().unwrap();
    write_log(dir.path(), "ds1", "ds1.log", &lesson(1, "Convoy", 1_000));
    write_log(dir.path(), "ds2", "ds2.log", &lesson(2, "Patrol", 9_000));
    let cache = IndexCache::new(IndexConfig::with_root(dir.path()));
    (dir, cache)
}

#[test]
fn test_first_refresh_segments_everything_and_persists() {
    let (dir, cache) = archive();
    let (index, report) = cache.refresh().unwrap();

    assert_eq!(report.logs, 2);
    assert_eq!(report.rescanned, vec!["ds1/ds1.log", "ds2/ds2.log"]);
    assert!(report.persisted);
    assert!(dir.path().join("logIndex.json").exists());

    let convoy = index["ds1/ds1.log"].iter().next().unwrap();
    assert_eq!(convoy.session().name_of_session, "Convoy");
    assert_eq!(convoy.start_time(), 1_080);
    assert_eq!(convoy.end_time(), 1_400);
}

#[test]
fn test_unmodified_archive_is_not_rescanned_or_rewritten() {
    let (dir, cache) = archive();
    cache.refresh().unwrap();
    let index_path = dir.path().join("logIndex.json");
    let written = fs::metadata(&index_path).unwrap().modified().unwrap();

    let (index, report) = cache.refresh().unwrap();
    assert!(report.rescanned.is_empty());
    assert!(!report.persisted);
    assert_eq!(index.len(), 2);
    assert_eq!(fs::metadata(&index_path).unwrap().modified().unwrap(), written);
}

#[test]
fn test_touching_one_log_rescans_only_that_log() {
    let (dir, cache) = archive();
    cache.refresh().unwrap();

    touch(&dir.path().join("ds2").join("ds2.log"));
    let (_, report) = cache.refresh().unwrap();
    assert_eq!(report.rescanned, vec!["ds2/ds2.log"]);
    assert!(report.persisted);
}

#[test]
fn test_favorites_survive_reindexing() {
    let (dir, cache) = archive();
    let (index, _) = cache.refresh().unwrap();
    let mut convoy = index["ds1/ds1.log"].iter().next().unwrap().clone();
    convoy.set_favorite("ana", true);
    assert!(cache.update_one(convoy).unwrap());

    touch(&dir.path().join("ds1").join("ds1.log"));
    let (index, report) = cache.refresh().unwrap();
    assert_eq!(report.rescanned, vec!["ds1/ds1.log"]);
    assert!(index["ds1/ds1.log"].iter().next().unwrap().is_favorite_of("ana"));
}

#[test]
fn test_update_of_unknown_session_writes_nothing() {
    let (dir, cache) = archive();
    let (index, _) = cache.refresh().unwrap();
    let index_path = dir.path().join("logIndex.json");
    let before = fs::read_to_string(&index_path).unwrap();

    let stranger = index["ds1/ds1.log"].iter().next().unwrap();
    let moved = debrief_types::LogMetadata::new(
        stranger.session().clone(),
        "ds9/ds9.log",
        stranger.log_span(),
        stranger.start_time(),
        stranger.end_time(),
    )
    .unwrap();
    assert!(!cache.update_one(moved).unwrap());
    assert_eq!(fs::read_to_string(&index_path).unwrap(), before);
}

#[test]
fn test_removed_logs_are_pruned() {
    let (dir, cache) = archive();
    cache.refresh().unwrap();

    fs::remove_dir_all(dir.path().join("ds2")).unwrap();
    let (index, report) = cache.refresh().unwrap();
    assert_eq!(report.pruned, vec!["ds2/ds2.log"]);
    assert!(!index.contains_key("ds2/ds2.log"));
}

#[test]
fn test_legacy_index_is_read_and_upgraded_on_next_write() {
    let (dir, cache) = archive();
    let config = cache.config().clone();
    let mut records = Vec::new();
    for key in ["ds1/ds1.log", "ds2/ds2.log"] {
        for mut meta in extract_metadata(&JsonLinesLogReader, &config, key).unwrap() {
            meta.set_favorite("ben", true);
            records.push(IndexRecord::from_metadata(&meta));
        }
    }
    let index_path = dir.path().join("logIndex.json");
    fs::write(&index_path, serde_json::to_string(&records).unwrap()).unwrap();

    let (index, report) = cache.refresh().unwrap();
    assert!(report.rescanned.is_empty());
    assert!(index["ds2/ds2.log"].iter().all(|m| m.is_favorite_of("ben")));

    touch(&dir.path().join("ds1").join("ds1.log"));
    cache.refresh().unwrap();
    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&index_path).unwrap()).unwrap();
    assert!(raw.is_object());
    assert_eq!(raw["ds1/ds1.log"][0]["usersFavorite"][0], "ben");
}

#[test]
fn test_patch_files_are_attached_on_every_refresh() {
    let (dir, cache) = archive();
    cache.refresh().unwrap();

    fs::write(dir.path().join("ds1").join("ds1.log.logPatch"), "").unwrap();
    let (index, report) = cache.refresh().unwrap();
    assert!(report.rescanned.is_empty());
    let convoy = index["ds1/ds1.log"].iter().next().unwrap();
    assert_eq!(convoy.log_patch_file(), Some("ds1.log.logPatch"));
    let patrol = index["ds2/ds2.log"].iter().next().unwrap();
    assert_eq!(patrol.log_patch_file(), None);
}

#[test]
fn test_converted_log_patch_variant_is_found() {
    let dir = TempDir::new().unwrap();
    write_log(dir.path(), "ds3", "ds3.log", &lesson(3, "Ambush", 500));
    fs::write(dir.path().join("ds3").join("ds3.log.protobuf.bin.logPatch"), "").unwrap();
    let cache = IndexCache::new(IndexConfig::with_root(dir.path()));

    let (index, _) = cache.refresh().unwrap();
    let ambush = index["ds3/ds3.log"].iter().next().unwrap();
    assert_eq!(ambush.log_patch_file(), Some("ds3.log.protobuf.bin.logPatch"));
}

#[test]
fn test_bookmarks_and_broken_logs_do_not_stop_the_scan() {
    let (dir, cache) = archive();
    fs::write(dir.path().join("ds1").join("bookmark_1.log"), "not a log").unwrap();
    fs::create_dir_all(dir.path().join("ds4")).unwrap();
    fs::write(dir.path().join("ds4").join("ds4.log"), "{ garbage").unwrap();

    let (index, report) = cache.refresh().unwrap();
    assert_eq!(report.logs, 3);
    assert!(index["ds4/ds4.log"].is_empty());
    assert_eq!(index["ds1/ds1.log"].len(), 1);

    let (_, report) = cache.refresh().unwrap();
    assert!(report.rescanned.is_empty());
}

#[test]
fn test_sorted_listing_puts_favorites_first() {
    let (_dir, cache) = archive();
    let sessions = cache.all_sessions_sorted(None).unwrap();
    let names: Vec<&str> = sessions.iter().map(|m| m.session().name_of_session.as_str()).collect();
    assert_eq!(names, vec!["Patrol", "Convoy"]);

    let mut convoy = sessions[1].clone();
    convoy.set_favorite("ana", true);
    cache.update_one(convoy).unwrap();

    let sessions = cache.all_sessions_sorted(Some("ana")).unwrap();
    assert_eq!(sessions[0].session().name_of_session, "Convoy");
    let sessions = cache.all_sessions_sorted(Some("ben")).unwrap();
    assert_eq!(sessions[0].session().name_of_session, "Patrol");
}

#[test]
fn test_find_session_prefers_closest_start_with_same_name() {
    let dir = TempDir::new().unwrap();
    let mut messages = lesson(5, "Convoy", 1_000);
    messages.extend(lesson(5, "Convoy", 100_000));
    write_log(dir.path(), "ds5", "ds5.log", &messages);
    let cache = IndexCache::new(IndexConfig::with_root(dir.path()));

    let found = cache.find_session("ds5", "Convoy", 99_000).unwrap().unwrap();
    assert_eq!(found.start_time(), 100_080);
    let fallback = cache.find_session("ds5", "Other", 99_000).unwrap().unwrap();
    assert_eq!(fallback.start_time(), 1_080);
}

#[derive(Default)]
struct Recorder(Mutex<Vec<(String, u8)>>);

impl ProgressReporter for &'static Recorder {
    fn report(&self, task: &str, percent: u8) {
        self.0.lock().unwrap().push((task.to_string(), percent));
    }
}

#[test]
fn test_progress_runs_from_zero_to_one_hundred() {
    let recorder: &'static Recorder = Box::leak(Box::new(Recorder::default()));
    let (_dir, cache) = archive();
    let cache = cache.with_progress(recorder);
    cache.refresh().unwrap();

    let seen = recorder.0.lock().unwrap();
    assert_eq!(seen.first().map(|(_, p)| *p), Some(0));
    assert_eq!(seen.last().map(|(t, p)| (t.as_str(), *p)), Some(("Completed updating cache", 100)));
    assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
}
