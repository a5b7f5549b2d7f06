//! Movable read position over a prepared message list.
//!
//! [`PlaybackCursor`] is what the scheduler drives. [`MessageCursor`] is the
//! in-memory implementation: the recorded messages stay untouched and every
//! edit lives in a patch overlay keyed by message index. An edit made between
//! two learner states adds a learner state at the edit instant, which goes
//! away again with its last patch. Readers get the merged view through
//! [`PlaybackCursor::message_at`].

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use debrief_types::{
    AttributePatch, EntityId, GradedScoreNode, Message, MessageType, Payload, PatchRequest, PatchResult,
};
use tracing::debug;

use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, PlaybackResult};

/// Position-aware access to a session's messages plus their patch overlay.
pub trait PlaybackCursor: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the next message to play. Equals `len()` at end of log.
    fn current_index(&self) -> usize;

    /// Message at `index` with patches applied.
    fn message_at(&self, index: usize) -> Option<Cow<'_, Message>>;

    /// Message at `index` as recorded. A learner state added by a patch
    /// reads as the recorded state it was copied from, re-timed.
    fn original_at(&self, index: usize) -> Option<&Message>;

    fn current_message(&self) -> Option<Cow<'_, Message>> {
        self.message_at(self.current_index())
    }

    /// Move to `index`, clamped to `len()`.
    fn reset_to(&mut self, index: usize);

    /// Step past the current message and return the new current one.
    fn advance(&mut self) -> Option<Cow<'_, Message>>;

    /// Move forward to the first message accepted by `filter`.
    ///
    /// At index 0 the current message is tested too; elsewhere testing starts
    /// after it. Every visited message is shown to `filter`, so it may carry
    /// side effects. Returns the landing index, or `None` with the cursor at
    /// end of log.
    fn fast_forward_to(&mut self, filter: &mut dyn FnMut(&Message) -> bool) -> Option<usize>;

    /// Latest index of each requested type at or before the current position.
    /// Visual-only learner states are not counted.
    fn latest_messages_of_type(&self, types: &[MessageType]) -> HashMap<MessageType, usize>;

    /// Indices of `message_type` from the current position on, in order.
    fn future_messages_of_type(&self, message_type: MessageType) -> Vec<usize>;

    /// Most recent published lesson score, with patches applied.
    fn published_score(&self) -> Option<Cow<'_, Message>>;

    fn apply_patch(&mut self, request: &PatchRequest) -> PatchResult;

    fn apply_score_patch(&mut self, score: GradedScoreNode) -> PatchResult;

    /// Remove the patch on `node_name` carried by the learner state at
    /// `timestamp`, everywhere it was propagated. `None` when there is no
    /// such patch.
    fn remove_patch(&mut self, timestamp: i64, node_name: &str) -> Option<PatchResult>;

    /// Persist patched messages. With nothing patched the file is deleted
    /// and `None` returned.
    fn write_patch_file(&mut self, username: &str) -> PlaybackResult<Option<String>>;

    /// Delete the patch file and drop every patch, including the learner
    /// states patches added.
    fn delete_patch_file(&mut self) -> PlaybackResult<()>;

    fn is_team_session(&self) -> bool;

    /// Release all messages. The cursor is empty afterwards.
    fn clear(&mut self);
}

/// In-memory cursor with an index-keyed patch overlay.
#[derive(Debug, Default)]
pub struct MessageCursor {
    pub(crate) messages: Vec<Message>,
    /// Node patches per message, in the order they were applied.
    pub(crate) patches: BTreeMap<usize, Vec<AttributePatch>>,
    pub(crate) score_patches: BTreeMap<usize, GradedScoreNode>,
    /// Timestamps of learner states added by patches rather than recorded.
    pub(crate) inserted: BTreeSet<i64>,
    pub(crate) current: usize,
    pub(crate) patch_file: Option<PathBuf>,
    team_session: bool,
}

impl MessageCursor {
    /// Wrap messages that are already in playback order.
    pub fn new(messages: Vec<Message>) -> Self {
        let team_session = messages
            .iter()
            .any(|m| m.message_type == MessageType::StartTeamKnowledgeSessionRequest);
        Self {
            messages,
            team_session,
            ..Default::default()
        }
    }

    /// Prepare raw log messages for playback.
    ///
    /// Drops messages outside a domain session and repeated
    /// `(source_event_id, sender_address)` pairs, thins ENTITY_STATE to one
    /// message per entity per sample interval, stamps the configured
    /// username, orders by timestamp, and makes learner-state timestamps
    /// unique by bumping collisions one millisecond at a time.
    pub fn from_log(messages: Vec<Message>, config: &PlaybackConfig) -> PlaybackResult<Self> {
        let total = messages.len();
        let mut seen_events: HashSet<(i64, Option<String>)> = HashSet::new();
        let mut last_entity_time: HashMap<EntityId, i64> = HashMap::new();

        let mut kept: Vec<Message> = messages
            .into_iter()
            .filter(|m| m.domain_session_id.is_some())
            .filter(|m| seen_events.insert((m.source_event_id, m.sender_address.clone())))
            .filter(|m| {
                let Some(es) = m.entity_state() else {
                    return true;
                };
                match last_entity_time.get(&es.entity_id) {
                    Some(&last) if m.timestamp - last <= config.entity_sample_interval_ms => false,
                    _ => {
                        last_entity_time.insert(es.entity_id, m.timestamp);
                        true
                    }
                }
            })
            .map(|mut m| {
                if let Some(username) = &config.username {
                    m.username = Some(username.clone());
                }
                m
            })
            .collect();

        kept.sort_by_key(|m| m.timestamp);
        let mut learner_times = HashSet::new();
        for msg in kept
            .iter_mut()
            .filter(|m| m.message_type == MessageType::LearnerState)
        {
            while !learner_times.insert(msg.timestamp) {
                msg.timestamp += 1;
            }
        }
        kept.sort_by_key(|m| m.timestamp);

        if kept.is_empty() {
            return Err(PlaybackError::EmptyLog(format!("{total} recorded messages")));
        }
        debug!(total, kept = kept.len(), "prepared log for playback");
        Ok(Self::new(kept))
    }

    /// Whether any patch is applied.
    pub fn is_patched(&self) -> bool {
        !self.patches.is_empty() || !self.score_patches.is_empty()
    }

    pub fn patch_file(&self) -> Option<&std::path::Path> {
        self.patch_file.as_deref()
    }

    fn is_patched_at(&self, index: usize) -> bool {
        self.patches.get(&index).is_some_and(|p| !p.is_empty()) || self.score_patches.contains_key(&index)
    }

    fn patched_copy(&self, index: usize, base: &Message) -> Message {
        let mut msg = base.clone();
        if let Some(ls) = msg.learner_state_mut() {
            for patch in self.patches.get(&index).into_iter().flatten() {
                if let Some(node) = ls.performance.find_mut(&patch.id.node_name) {
                    patch.apply(&mut node.state);
                }
            }
        }
        if let (Some(score), Payload::LessonScore { score: slot, .. }) =
            (self.score_patches.get(&index), &mut msg.payload)
        {
            *slot = Some(score.clone());
        }
        msg
    }

    pub(crate) fn published_score_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.message_type == MessageType::PublishLessonScoreRequest)
    }
}

impl PlaybackCursor for MessageCursor {
    fn len(&self) -> usize {
        self.messages.len()
    }

    fn current_index(&self) -> usize {
        self.current
    }

    fn message_at(&self, index: usize) -> Option<Cow<'_, Message>> {
        let base = self.messages.get(index)?;
        if self.is_patched_at(index) {
            Some(Cow::Owned(self.patched_copy(index, base)))
        } else {
            Some(Cow::Borrowed(base))
        }
    }

    fn original_at(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    fn reset_to(&mut self, index: usize) {
        self.current = index.min(self.messages.len());
    }

    fn advance(&mut self) -> Option<Cow<'_, Message>> {
        if self.current < self.messages.len() {
            self.current += 1;
        }
        self.current_message()
    }

    fn fast_forward_to(&mut self, filter: &mut dyn FnMut(&Message) -> bool) -> Option<usize> {
        if self.current == 0 {
            if let Some(msg) = self.message_at(0) {
                if filter(&msg) {
                    return Some(0);
                }
            }
        }
        while self.current < self.messages.len() {
            self.current += 1;
            let Some(msg) = self.message_at(self.current) else {
                break;
            };
            if filter(&msg) {
                return Some(self.current);
            }
        }
        None
    }

    fn latest_messages_of_type(&self, types: &[MessageType]) -> HashMap<MessageType, usize> {
        let mut found = HashMap::new();
        if self.messages.is_empty() {
            return found;
        }
        let start = self.current.min(self.messages.len() - 1);
        for index in (0..=start).rev() {
            let msg = &self.messages[index];
            if !types.contains(&msg.message_type) || found.contains_key(&msg.message_type) {
                continue;
            }
            if msg.is_visual_only_learner_state() {
                continue;
            }
            found.insert(msg.message_type, index);
            if found.len() == types.len() {
                break;
            }
        }
        found
    }

    fn future_messages_of_type(&self, message_type: MessageType) -> Vec<usize> {
        (self.current..self.messages.len())
            .filter(|&i| {
                let msg = &self.messages[i];
                msg.message_type == message_type && !msg.is_visual_only_learner_state()
            })
            .collect()
    }

    fn published_score(&self) -> Option<Cow<'_, Message>> {
        self.published_score_index().and_then(|i| self.message_at(i))
    }

    fn apply_patch(&mut self, request: &PatchRequest) -> PatchResult {
        self.apply_patch_request(request)
    }

    fn apply_score_patch(&mut self, score: GradedScoreNode) -> PatchResult {
        self.apply_score(score)
    }

    fn remove_patch(&mut self, timestamp: i64, node_name: &str) -> Option<PatchResult> {
        self.remove_node_patch(timestamp, node_name)
    }

    fn write_patch_file(&mut self, username: &str) -> PlaybackResult<Option<String>> {
        self.write_patches(username)
    }

    fn delete_patch_file(&mut self) -> PlaybackResult<()> {
        self.delete_patches()
    }

    fn is_team_session(&self) -> bool {
        self.team_session
    }

    fn clear(&mut self) {
        self.messages.clear();
        self.patches.clear();
        self.score_patches.clear();
        self.inserted.clear();
        self.current = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use debrief_types::{EntityState, LearnerState};

    fn msg(message_type: MessageType, ts: i64, event: i64) -> Message {
        let mut m = Message::new(message_type, ts, Payload::Empty).with_domain_session(1);
        m.source_event_id = event;
        m
    }

    fn entity(ts: i64, event: i64, id: u32) -> Message {
        let mut m = Message::new(
            MessageType::EntityState,
            ts,
            Payload::EntityState(EntityState::new(EntityId::new(1, 1, id))),
        )
        .with_domain_session(1);
        m.source_event_id = event;
        m
    }

    fn learner(ts: i64, event: i64) -> Message {
        let mut m = Message::new(
            MessageType::LearnerState,
            ts,
            Payload::LearnerState(LearnerState::default()),
        )
        .with_domain_session(1);
        m.source_event_id = event;
        m
    }

    #[test]
    fn test_from_log_prepares_messages() {
        let mut system = msg(MessageType::Other, 1, 99);
        system.domain_session_id = None;
        let raw = vec![
            msg(MessageType::LessonStarted, 10, 1),
            msg(MessageType::LessonStarted, 10, 1), // duplicate event
            system,
            entity(100, 2, 7),
            entity(300, 3, 7), // within 250ms of the last kept sample
            entity(351, 4, 7),
            learner(500, 5),
            learner(500, 6),
            entity(40, 8, 9),
        ];
        let config = PlaybackConfig {
            username: Some("reviewer".into()),
            ..Default::default()
        };
        let cursor = MessageCursor::from_log(raw, &config).unwrap();
        let stamps: Vec<(MessageType, i64)> = cursor
            .messages
            .iter()
            .map(|m| (m.message_type, m.timestamp))
            .collect();
        assert_eq!(
            stamps,
            vec![
                (MessageType::LessonStarted, 10),
                (MessageType::EntityState, 40),
                (MessageType::EntityState, 100),
                (MessageType::EntityState, 351),
                (MessageType::LearnerState, 500),
                (MessageType::LearnerState, 501),
            ]
        );
        assert!(cursor.messages.iter().all(|m| m.username.as_deref() == Some("reviewer")));
        assert!(!cursor.is_team_session());
    }

    #[test]
    fn test_from_log_empty_is_error() {
        let mut system = msg(MessageType::Other, 1, 1);
        system.domain_session_id = None;
        let err = MessageCursor::from_log(vec![system], &PlaybackConfig::default()).unwrap_err();
        assert!(matches!(err, PlaybackError::EmptyLog(_)));
    }

    #[test]
    fn test_fast_forward_tests_first_message_only_at_start() {
        let mut cursor = MessageCursor::new(vec![
            msg(MessageType::LessonStarted, 0, 1),
            msg(MessageType::EntityState, 5, 2),
            msg(MessageType::LessonCompleted, 9, 3),
        ]);
        let mut visited = Vec::new();
        let landed = cursor.fast_forward_to(&mut |m| {
            visited.push(m.timestamp);
            m.timestamp >= 5
        });
        assert_eq!(landed, Some(1));
        assert_eq!(visited, vec![0, 5]);

        // From a non-zero index the current message is skipped.
        let landed = cursor.fast_forward_to(&mut |m| m.timestamp >= 5);
        assert_eq!(landed, Some(2));

        let landed = cursor.fast_forward_to(&mut |_| false);
        assert_eq!(landed, None);
        assert_eq!(cursor.current_index(), 3);
        assert!(cursor.current_message().is_none());
    }

    #[test]
    fn test_latest_and_future_of_type() {
        let mut cursor = MessageCursor::new(vec![
            learner(0, 1),
            msg(MessageType::AuthorizeStrategiesRequest, 1, 2),
            learner(2, 3),
            msg(MessageType::EntityState, 3, 4),
            learner(4, 5),
        ]);
        cursor.reset_to(3);
        let latest = cursor.latest_messages_of_type(&[
            MessageType::LearnerState,
            MessageType::AuthorizeStrategiesRequest,
            MessageType::ApplyStrategies,
        ]);
        assert_eq!(latest.get(&MessageType::LearnerState), Some(&2));
        assert_eq!(latest.get(&MessageType::AuthorizeStrategiesRequest), Some(&1));
        assert!(!latest.contains_key(&MessageType::ApplyStrategies));
        assert_eq!(cursor.future_messages_of_type(MessageType::LearnerState), vec![4]);

        // At end of log the search starts from the last message.
        cursor.reset_to(99);
        assert_eq!(cursor.current_index(), 5);
        let latest = cursor.latest_messages_of_type(&[MessageType::LearnerState]);
        assert_eq!(latest.get(&MessageType::LearnerState), Some(&4));
    }

    #[test]
    fn test_team_session_and_clear() {
        let mut cursor = MessageCursor::new(vec![
            msg(MessageType::StartTeamKnowledgeSessionRequest, 0, 1),
            msg(MessageType::LessonStarted, 1, 2),
        ]);
        assert!(cursor.is_team_session());
        cursor.advance();
        cursor.clear();
        assert!(cursor.is_empty());
        assert_eq!(cursor.current_index(), 0);
        assert!(cursor.current_message().is_none());
    }
}
