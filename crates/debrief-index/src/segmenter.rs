//! Splitting one log into playable sessions.
//!
//! A single forward pass tracks the span being recorded, the session
//! descriptor announced for it, and the scenario file. A lesson-completed or
//! close-session message turns that state into a [`LogMetadata`].
//!
//! ```text
//!   LESSON_STARTED ──┐
//!   CREATE_TEAM ─────┼─▶ open span ─▶ session reply ─▶ LESSON_COMPLETED ─▶ LogMetadata
//!                    │                                     │
//!                    │                 PUBLISH_LESSON_SCORE (within timeout) extends it
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use debrief_types::{LogMetadata, LogSpan, MembershipAction, Message, MessageType, Payload, SessionDescriptor, VideoRef};
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult};
use crate::reader::LogReader;

/// Video metadata files in a session folder, by file name.
pub fn find_video_files(folder: &Path, suffix: &str) -> BTreeSet<VideoRef> {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return BTreeSet::new(),
        Err(e) => {
            warn!(folder = %folder.display(), "failed to list video files: {e}");
            return BTreeSet::new();
        }
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(suffix))
        .map(VideoRef::new)
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct OpenSpan {
    index: usize,
    time: i64,
}

/// Per-log segmentation state.
pub struct Segmenter<'a> {
    config: &'a IndexConfig,
    log_file: String,
    folder: PathBuf,
    videos: Option<BTreeSet<VideoRef>>,

    open: Option<OpenSpan>,
    session: Option<SessionDescriptor>,
    /// Sequence number a session reply must answer.
    team_sequence: Option<i64>,
    first_entity_time: Option<i64>,
    dkf: Option<String>,
    last_closed_time: Option<i64>,
    sessions: Vec<LogMetadata>,
}

impl<'a> Segmenter<'a> {
    /// `log_file` is the index key of the log; `folder` is where its video
    /// files are looked up.
    pub fn new(config: &'a IndexConfig, log_file: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            config,
            log_file: log_file.into(),
            folder: folder.into(),
            videos: None,
            open: None,
            session: None,
            team_sequence: None,
            first_entity_time: None,
            dkf: None,
            last_closed_time: None,
            sessions: Vec::new(),
        }
    }

    pub fn push(&mut self, index: usize, msg: &Message) -> IndexResult<()> {
        match msg.message_type {
            MessageType::LessonStarted if self.open.is_none() => {
                self.open_span(index, msg.timestamp);
            }
            MessageType::ManageMembershipTeamKnowledgeSession => {
                let Payload::ManageTeamMembership { action } = &msg.payload else {
                    return Err(unexpected(index, "membership request without an action"));
                };
                match action {
                    MembershipAction::CreateTeamSession => {
                        // Re-entering the lobby restarts the span; only the
                        // last entry before the session starts counts.
                        self.open_span(index, msg.timestamp);
                        self.team_sequence = Some(msg.sequence_number);
                    }
                    MembershipAction::AssignTeamMember | MembershipAction::UnassignTeamMember => {
                        self.team_sequence = Some(msg.sequence_number);
                    }
                    MembershipAction::DestroyTeamSession
                    | MembershipAction::JoinTeamSession
                    | MembershipAction::LeaveTeamSession => {
                        self.team_sequence = None;
                        self.session = None;
                    }
                    MembershipAction::ChangeTeamSessionName => {}
                }
            }
            MessageType::ActiveKnowledgeSessionsReply
            | MessageType::KnowledgeSessionUpdatedRequest
            | MessageType::KnowledgeSessionCreated => {
                self.on_session_message(index, msg)?;
            }
            MessageType::EntityState if self.first_entity_time.is_none() => {
                self.first_entity_time = Some(msg.timestamp);
            }
            MessageType::InitializeLessonRequest => {
                if let Payload::InitializeLesson {
                    content_reference: Some(reference),
                } = &msg.payload
                {
                    self.dkf = reference.rsplit(['/', '\\']).next().map(str::to_string);
                }
            }
            MessageType::LessonCompleted | MessageType::CloseDomainSessionRequest => {
                self.close_span(index, msg)?;
            }
            MessageType::PublishLessonScoreRequest => {
                self.fold_score(index, msg)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn finish(self) -> Vec<LogMetadata> {
        self.sessions
    }

    fn open_span(&mut self, index: usize, time: i64) {
        self.open = Some(OpenSpan { index, time });
        self.first_entity_time = None;
        self.last_closed_time = None;
    }

    fn on_session_message(&mut self, index: usize, msg: &Message) -> IndexResult<()> {
        let Some(ds_id) = msg.domain_session_id else {
            return Err(unexpected(index, "session message outside a domain session"));
        };
        let correlated = msg.message_type == MessageType::KnowledgeSessionUpdatedRequest
            || msg.reply_to_sequence_number == self.team_sequence;

        match &msg.payload {
            Payload::KnowledgeSessions(sessions) if correlated => {
                self.team_sequence = None;
                if let Some(session) = sessions.get(&ds_id) {
                    self.session = Some(session.clone());
                }
            }
            Payload::KnowledgeSessionCreated(session)
                if correlated || msg.message_type == MessageType::KnowledgeSessionCreated =>
            {
                self.team_sequence = None;
                self.session = Some(session.clone());
            }
            Payload::KnowledgeSessions(_) => {}
            _ => return Err(unexpected(index, "session message without a session payload")),
        }
        Ok(())
    }

    fn close_span(&mut self, index: usize, msg: &Message) -> IndexResult<()> {
        let open = self.open.take();
        let session = self.session.take();
        let first_entity_time = self.first_entity_time.take();
        let dkf = self.dkf.take();
        self.team_sequence = None;

        let (Some(open), Some(session)) = (open, session) else {
            return Ok(());
        };
        let start = first_entity_time.unwrap_or(open.time);
        let end = msg.timestamp;
        let span = LogSpan::new(open.index, index + 1)?;
        let session = session.into_past_session(start, end, self.log_file.clone());

        let mut metadata = LogMetadata::new(session, self.log_file.clone(), span, start, end)?;
        let folder = &self.folder;
        let suffix = &self.config.video_suffix;
        let videos = self.videos.get_or_insert_with(|| find_video_files(folder, suffix));
        metadata.add_video_files(videos.iter().cloned());
        metadata.set_dkf(dkf);

        debug!(
            session = %metadata.session().name_of_session,
            start = span.start(),
            end = span.end(),
            "closed session span"
        );
        self.sessions.push(metadata);
        self.last_closed_time = Some(end);
        Ok(())
    }

    /// A score published shortly after a lesson closes belongs to it.
    fn fold_score(&mut self, index: usize, msg: &Message) -> IndexResult<()> {
        let Some(closed_at) = self.last_closed_time else {
            return Ok(());
        };
        if msg.timestamp - closed_at >= self.config.publish_score_timeout_ms {
            return Ok(());
        }
        if let Some(last) = self.sessions.last_mut() {
            last.extend_to(index, msg.timestamp)?;
        }
        Ok(())
    }
}

fn unexpected(index: usize, reason: &str) -> IndexError {
    IndexError::UnexpectedMessage {
        index,
        reason: reason.to_string(),
    }
}

/// Segment the log stored under index key `log_file`.
///
/// Logs whose first message carries no domain session (system logs) yield
/// nothing. A message that cannot be decoded or interpreted ends the pass;
/// sessions closed before it are still returned. Only failing to open the
/// log is an error.
#[tracing::instrument(skip(reader, config), name = "index.segment")]
pub fn extract_metadata(reader: &dyn LogReader, config: &IndexConfig, log_file: &str) -> IndexResult<Vec<LogMetadata>> {
    let path = config.resolve(log_file);
    let stream = reader.open(&path)?;
    let folder = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut segmenter = Segmenter::new(config, log_file, folder);

    for (index, item) in stream.enumerate() {
        let msg = match item {
            Ok(msg) => msg,
            Err(e) => {
                warn!(index, "stopped reading log: {e}");
                break;
            }
        };
        if index == 0 && msg.domain_session_id.is_none() {
            debug!("not a domain session log");
            return Ok(Vec::new());
        }
        if let Err(e) = segmenter.push(index, &msg) {
            warn!(index, "stopped segmenting log: {e}");
            break;
        }
    }
    Ok(segmenter.finish())
}

// ============================================================================
// Tests
// ============================================================================
