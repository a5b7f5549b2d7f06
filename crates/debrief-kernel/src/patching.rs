//! Patch overlay maintenance for [`MessageCursor`].
//!
//! A patch is anchored on the learner state at the request time. When no
//! learner state sits exactly there, a copy of the closest earlier one is
//! added at the request time to carry the edit, so nothing before that
//! instant changes. The patch is then carried forward through later learner
//! states while the node's recorded assessment stays the same run: equal
//! short-term level, equal assessment time, and each node state continuing
//! into the next.

use std::borrow::Cow;
use std::collections::BTreeMap;

use debrief_types::{
    AttributePatch, GradedScoreNode, Message, MessageType, PatchRequest, PatchResult, PerformanceStateAttribute,
};
use tracing::{debug, warn};

use crate::cursor::{MessageCursor, PlaybackCursor};

fn attribute_named<'a>(msg: &'a Message, name: &str) -> Option<&'a PerformanceStateAttribute> {
    msg.learner_state()?.performance.attribute(name)
}

/// Move every key through `remap`.
fn reindex<V>(map: &mut BTreeMap<usize, V>, remap: impl Fn(usize) -> usize) {
    *map = std::mem::take(map).into_iter().map(|(k, v)| (remap(k), v)).collect();
}

impl MessageCursor {
    /// Learner-state indices carrying any of `names`.
    fn learner_states_with(&self, names: &[&str]) -> Vec<usize> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.message_type == MessageType::LearnerState)
            .filter(|(_, m)| names.iter().any(|n| attribute_named(m, n).is_some()))
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether the message at `test` continues the recorded assessment run of
    /// node `name` that starts at `head` and was last seen at `prev`.
    ///
    /// The assessment is compared with the head of the run, the node state
    /// with the message just before, so a FINISHED node that turns ACTIVE
    /// again ends the run even when its level did not change.
    pub fn continues_run(&self, head: usize, prev: usize, test: usize, name: &str) -> bool {
        let recorded = |index: usize| self.messages.get(index).and_then(|m| attribute_named(m, name));
        let (Some(head), Some(prev)) = (recorded(head), recorded(prev)) else {
            return false;
        };
        let Some(msg) = self.message_at(test) else {
            return false;
        };
        let Some(attr) = attribute_named(&msg, name) else {
            return false;
        };
        head.short_term == attr.short_term
            && head.short_term_timestamp == attr.short_term_timestamp
            && prev.node_state.continues_into(attr.node_state)
    }

    /// Add patches to one message, replacing any with the same id. Returns
    /// true when the overlay changed.
    fn add_patches(&mut self, index: usize, patches: &[AttributePatch]) -> bool {
        let slot = self.patches.entry(index).or_default();
        let mut changed = false;
        for patch in patches {
            match slot.iter_mut().find(|p| p.id == patch.id) {
                Some(existing) if existing == patch => {}
                Some(existing) => {
                    *existing = patch.clone();
                    changed = true;
                }
                None => {
                    slot.push(patch.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    /// Add a copy of the learner state at `source`, re-timed to `timestamp`
    /// and carrying the patches `source` already has. The playhead stays on
    /// the message it was on. Returns the new index.
    fn insert_learner_state(&mut self, source: usize, timestamp: i64) -> usize {
        let at = self.messages.partition_point(|m| m.timestamp <= timestamp);
        let copy = self.messages[source].synthesize_at(timestamp);
        self.messages.insert(at, copy);
        reindex(&mut self.patches, |i| if i >= at { i + 1 } else { i });
        reindex(&mut self.score_patches, |i| if i >= at { i + 1 } else { i });
        if let Some(inherited) = self.patches.get(&source).cloned() {
            self.patches.insert(at, inherited);
        }
        if self.current >= at {
            self.current += 1;
        }
        self.inserted.insert(timestamp);
        debug!(timestamp, index = at, "added learner state for patch");
        at
    }

    /// Drop the added learner state at `at` together with its patches.
    pub(crate) fn remove_learner_state(&mut self, at: usize) {
        let removed = self.messages.remove(at);
        self.inserted.remove(&removed.timestamp);
        self.patches.remove(&at);
        self.score_patches.remove(&at);
        reindex(&mut self.patches, |i| if i > at { i - 1 } else { i });
        reindex(&mut self.score_patches, |i| if i > at { i - 1 } else { i });
        if self.current > at {
            self.current -= 1;
        }
        debug!(timestamp = removed.timestamp, index = at, "removed added learner state");
    }

    /// Indices of learner states added by patches, in order.
    pub(crate) fn inserted_indices(&self) -> Vec<usize> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.message_type == MessageType::LearnerState && self.inserted.contains(&m.timestamp))
            .map(|(i, _)| i)
            .collect()
    }

    pub(crate) fn apply_patch_request(&mut self, request: &PatchRequest) -> PatchResult {
        let mut result = PatchResult::default();
        let names: Vec<&str> = request.attributes.iter().map(|a| a.name.as_str()).collect();
        let candidates = self.learner_states_with(&names);

        // Walk up to the request time, tracking the exact match, the closest
        // earlier state, and the unbroken run that ends there.
        let mut span: Vec<usize> = Vec::new();
        let mut exact = None;
        let mut closest_pos = None;
        for (pos, &index) in candidates.iter().enumerate() {
            let ts = self.messages[index].timestamp;
            if ts > request.timestamp {
                break;
            }
            if request.update_entire_span {
                if let (Some(&head), Some(&prev)) = (span.first(), span.last()) {
                    if names.iter().any(|n| !self.continues_run(head, prev, index, n)) {
                        span.clear();
                    }
                }
                span.push(index);
            }
            if ts == request.timestamp {
                exact = Some(index);
            }
            closest_pos = Some(pos);
        }

        let Some(closest_pos) = closest_pos else {
            debug!(timestamp = request.timestamp, "no learner state at or before patch time");
            return result;
        };
        let closest = candidates[closest_pos];
        result.current_index = Some(exact.unwrap_or(closest));

        let anchor = match span.first() {
            Some(&head) if request.update_entire_span => self.messages[head].timestamp,
            _ => request.timestamp,
        };

        let patches: Vec<AttributePatch> = {
            let Some(source) = self.message_at(closest).map(Cow::into_owned) else {
                return result;
            };
            request
                .attributes
                .iter()
                .filter_map(|attr| {
                    let current = attribute_named(&source, &attr.name)?;
                    AttributePatch::between(current, attr, anchor)
                })
                .collect()
        };
        if patches.is_empty() {
            return result;
        }

        // Later candidates move up by one when a learner state is added.
        let mut shift = 0;
        let span_head = if request.update_entire_span {
            for &index in &span {
                if self.add_patches(index, &patches) {
                    result.affected.push(index);
                }
            }
            span.first().copied().unwrap_or(closest)
        } else {
            let target = match exact {
                Some(index) => index,
                None => {
                    shift = 1;
                    self.insert_learner_state(closest, request.timestamp)
                }
            };
            result.current_index = Some(target);
            if self.add_patches(target, &patches) {
                result.affected.push(target);
            }
            target
        };

        let mut prev = span.last().copied().unwrap_or(span_head);
        for &index in &candidates[closest_pos + 1..] {
            let index = index + shift;
            if names.iter().any(|n| !self.continues_run(span_head, prev, index, n)) {
                break;
            }
            if self.add_patches(index, &patches) {
                result.affected.push(index);
            }
            prev = index;
        }

        result.node_patches = request.attributes.clone();
        debug!(
            anchor,
            affected = result.affected.len(),
            "applied patch to learner states"
        );
        result
    }

    pub(crate) fn apply_score(&mut self, score: GradedScoreNode) -> PatchResult {
        let mut result = PatchResult::default();
        let Some(index) = self.published_score_index() else {
            warn!("no published lesson score to patch");
            return result;
        };
        result.current_index = Some(index);
        if self.score_patches.get(&index) != Some(&score) {
            self.score_patches.insert(index, score);
            result.affected.push(index);
        }
        result
    }

    pub(crate) fn remove_node_patch(&mut self, timestamp: i64, node_name: &str) -> Option<PatchResult> {
        let matched: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.timestamp == timestamp && attribute_named(m, node_name).is_some())
            .map(|(i, _)| i)
            .collect();
        let &first = matched.first()?;
        if matched.len() > 1 {
            warn!(
                timestamp,
                node_name,
                count = matched.len(),
                "several learner states share the removal timestamp"
            );
        }

        let on_node: Vec<_> = self
            .patches
            .get(&first)?
            .iter()
            .filter(|p| p.id.node_name == node_name)
            .collect();
        let id = on_node
            .iter()
            .find(|p| p.id.anchor == timestamp)
            .or_else(|| on_node.last())
            .map(|p| p.id.clone())?;

        let mut result = PatchResult::default();
        for (&index, patches) in self.patches.iter_mut() {
            let before = patches.len();
            patches.retain(|p| p.id != id);
            if patches.len() != before {
                result.current_index.get_or_insert(index);
                result.affected.push(index);
            }
        }
        self.patches.retain(|_, patches| !patches.is_empty());

        // An added learner state lives only as long as a patch made at its
        // own instant.
        for at in self.inserted_indices().into_iter().rev() {
            let own = self.messages[at].timestamp;
            let keeps = self
                .patches
                .get(&at)
                .is_some_and(|patches| patches.iter().any(|p| p.id.anchor == own));
            if keeps {
                continue;
            }
            self.remove_learner_state(at);
            result.affected.retain(|&i| i != at);
            for index in &mut result.affected {
                if *index > at {
                    *index -= 1;
                }
            }
            result.current_index = match result.current_index {
                Some(i) if i == at => self.messages[..at]
                    .iter()
                    .rposition(|m| m.message_type == MessageType::LearnerState),
                Some(i) if i > at => Some(i - 1),
                other => other,
            };
        }

        debug!(node_name, anchor = id.anchor, removed = result.affected.len(), "removed patch");
        Some(result)
    }
}

// ============================================================================
// Tests
// ============================================================================
