//! Entity visibility bookkeeping for playback.
//!
//! Recordings do not always end an entity explicitly. At construction the
//! roster scans the log backward once and replaces each entity's final
//! ENTITY_STATE with an inactive copy. The replacements live in an overlay
//! keyed by message index; the cursor's messages are never touched.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};

use debrief_types::{EntityId, Message, MessageType, Payload};

use crate::cursor::PlaybackCursor;

#[derive(Debug, Default)]
pub struct EntityRoster {
    /// Inactive replacement for each entity's final message.
    overlay: HashMap<usize, Message>,
    /// Index of each entity's final message.
    last_seen: BTreeMap<EntityId, usize>,
    /// Length of the message list the indices refer to.
    built_for: usize,
}

impl EntityRoster {
    pub fn build(cursor: &dyn PlaybackCursor) -> Self {
        let mut roster = Self {
            built_for: cursor.len(),
            ..Self::default()
        };
        for index in (0..cursor.len()).rev() {
            let Some(msg) = cursor.original_at(index) else {
                continue;
            };
            let Some(es) = msg.entity_state() else {
                continue;
            };
            if roster.last_seen.contains_key(&es.entity_id) {
                continue;
            }
            let closed = msg.with_payload(Payload::EntityState(es.deactivated()));
            roster.last_seen.insert(es.entity_id, index);
            roster.overlay.insert(index, closed);
        }
        roster
    }

    /// Whether the roster's indices still line up with `cursor`. Adding or
    /// dropping a learner state shifts every later index.
    pub fn matches(&self, cursor: &dyn PlaybackCursor) -> bool {
        self.built_for == cursor.len()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    /// Message at `index` as playback sees it.
    pub fn resolve<'a>(&'a self, cursor: &'a dyn PlaybackCursor, index: usize) -> Option<Cow<'a, Message>> {
        match self.overlay.get(&index) {
            Some(closed) => Some(Cow::Borrowed(closed)),
            None => cursor.message_at(index),
        }
    }

    /// Entity snapshot for a playhead landing at `before` with recorded
    /// time `time`.
    ///
    /// Each entity seen within `lookback_ms` before the landing point is
    /// re-sent as last seen; every other known entity is re-sent inactive.
    /// All copies are re-timed to `time`. Output is ordered: live entities
    /// newest first, then inactive ones by id.
    pub fn snapshot(&self, cursor: &dyn PlaybackCursor, before: usize, time: i64, lookback_ms: i64) -> Vec<Message> {
        let mut found = HashSet::new();
        let mut out = Vec::new();

        for index in (0..before.min(cursor.len())).rev() {
            let Some(msg) = self.resolve(cursor, index) else {
                continue;
            };
            if time - msg.timestamp > lookback_ms {
                break;
            }
            if msg.message_type != MessageType::EntityState {
                continue;
            }
            let Some(es) = msg.entity_state() else {
                continue;
            };
            if found.insert(es.entity_id) {
                out.push(msg.synthesize_at(time));
            }
        }

        for (id, index) in &self.last_seen {
            if found.contains(id) {
                continue;
            }
            if let Some(closed) = self.overlay.get(index) {
                out.push(closed.synthesize_at(time));
            }
        }
        out
    }
}
