//! Patch file persistence.
//!
//! A patch file sits next to its log and holds every patched message, one
//! JSON object per line, stamped with the user who saved it. Loading diffs
//! each line against the message in effect at its timestamp and re-applies
//! the difference.

use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use debrief_types::{Message, MessageType, PatchRequest, patch_file_candidates};
use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::cursor::{MessageCursor, PlaybackCursor};
use crate::error::{PlaybackError, PlaybackResult};

impl MessageCursor {
    /// Attach the patch file of `log_file` and re-apply any edits it holds.
    ///
    /// The converted-container variant is used when only it exists. With no
    /// patch file on disk, later writes go to the primary name.
    pub fn load_patch_file(&mut self, log_file: &Path, config: &PlaybackConfig) -> PlaybackResult<()> {
        let [primary, converted] =
            patch_file_candidates(log_file, &config.patch_suffix, &config.converted_extension);
        let chosen = if !primary.exists() && converted.exists() {
            converted
        } else {
            primary
        };

        if chosen.exists() {
            let patch_messages = read_patch_messages(&chosen)?;
            let count = patch_messages.len();
            for msg in patch_messages {
                self.reapply(msg);
            }
            info!(path = %chosen.display(), count, "loaded patch file");
        }
        self.patch_file = Some(chosen);
        Ok(())
    }

    fn reapply(&mut self, patch_msg: Message) {
        match patch_msg.message_type {
            MessageType::LearnerState => self.reapply_learner_state(&patch_msg),
            MessageType::PublishLessonScoreRequest => {
                let Some(index) = self.messages.iter().position(|m| {
                    m.message_type == MessageType::PublishLessonScoreRequest && m.timestamp == patch_msg.timestamp
                }) else {
                    warn!(timestamp = patch_msg.timestamp, "patched lesson score has no recorded counterpart");
                    return;
                };
                if let Some(score) = patch_msg.lesson_score() {
                    self.score_patches.insert(index, score.clone());
                }
            }
            other => debug!(message_type = %other, "ignoring unpatchable message in patch file"),
        }
    }

    /// Diff a patched learner state against the one in effect at its time
    /// and re-apply the difference there. A patched state with no recorded
    /// counterpart was added by an edit and is added again.
    fn reapply_learner_state(&mut self, patch_msg: &Message) {
        let Some(patched) = patch_msg.learner_state() else {
            return;
        };
        let Some(index) = self
            .messages
            .iter()
            .rposition(|m| m.message_type == MessageType::LearnerState && m.timestamp <= patch_msg.timestamp)
        else {
            warn!(timestamp = patch_msg.timestamp, "patched learner state precedes every recorded one");
            return;
        };
        let Some(current) = self.message_at(index).map(|m| m.into_owned()) else {
            return;
        };
        let Some(current) = current.learner_state() else {
            return;
        };
        let changed: Vec<_> = patched
            .performance
            .nodes()
            .into_iter()
            .filter(|node| {
                current
                    .performance
                    .attribute(&node.state.name)
                    .is_some_and(|attr| !node.state.diff_fields(attr).is_empty())
            })
            .map(|node| node.state.clone())
            .collect();
        if changed.is_empty() {
            return;
        }
        let request = PatchRequest {
            attributes: changed,
            timestamp: patch_msg.timestamp,
            update_entire_span: false,
        };
        self.apply_patch(&request);
    }

    pub(crate) fn write_patches(&mut self, username: &str) -> PlaybackResult<Option<String>> {
        let mut indices: Vec<usize> = self
            .patches
            .keys()
            .chain(self.score_patches.keys())
            .copied()
            .collect();
        indices.sort_unstable();
        indices.dedup();

        if indices.is_empty() {
            self.remove_patch_file()?;
            return Ok(None);
        }

        let Some(path) = self.patch_file.clone() else {
            return Err(PlaybackError::invalid("cursor has no log file to patch"));
        };

        let file = fs::File::create(&path).map_err(|e| PlaybackError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        for index in &indices {
            let Some(mut msg) = self.message_at(*index).map(|m| m.into_owned()) else {
                continue;
            };
            msg.username = Some(username.to_string());
            serde_json::to_writer(&mut writer, &msg)
                .map_err(|e| PlaybackError::io(&path, io::Error::other(e)))?;
            writer.write_all(b"\n").map_err(|e| PlaybackError::io(&path, e))?;
        }
        writer.flush().map_err(|e| PlaybackError::io(&path, e))?;

        info!(path = %path.display(), username, messages = indices.len(), "wrote patch file");
        Ok(path.file_name().map(|n| n.to_string_lossy().into_owned()))
    }

    pub(crate) fn delete_patches(&mut self) -> PlaybackResult<()> {
        self.remove_patch_file()?;
        self.patches.clear();
        self.score_patches.clear();
        for at in self.inserted_indices().into_iter().rev() {
            self.remove_learner_state(at);
        }
        Ok(())
    }

    fn remove_patch_file(&self) -> PlaybackResult<()> {
        let Some(path) = &self.patch_file else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "deleted patch file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PlaybackError::io(path, e)),
        }
    }
}

fn read_patch_messages(path: &Path) -> PlaybackResult<Vec<Message>> {
    let file = fs::File::open(path).map_err(|e| PlaybackError::io(path, e))?;
    let mut messages = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| PlaybackError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let msg = serde_json::from_str(&line).map_err(|source| PlaybackError::PatchFormat {
            path: path.to_path_buf(),
            line: line_no + 1,
            source,
        })?;
        messages.push(msg);
    }
    Ok(messages)
}

// ============================================================================
// Tests
// ============================================================================
