//! Recorded domain messages.
//!
//! A [`Message`] is one timestamped entry of a domain-session log. The
//! envelope is fixed; the body is a [`Payload`] variant chosen by the
//! message type. Types this crate does not model deserialize as
//! [`MessageType::Other`] with an [`Payload::Opaque`] body.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::performance::{GradedScoreNode, LearnerState};
use crate::session::SessionDescriptor;

/// Domain message type.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum MessageType {
    LessonStarted,
    LessonCompleted,
    CloseDomainSessionRequest,
    ManageMembershipTeamKnowledgeSession,
    ActiveKnowledgeSessionsReply,
    KnowledgeSessionUpdatedRequest,
    KnowledgeSessionCreated,
    StartTeamKnowledgeSessionRequest,
    EntityState,
    InitializeLessonRequest,
    PublishLessonScoreRequest,
    LearnerState,
    AuthorizeStrategiesRequest,
    ApplyStrategies,
    /// Anything else found in a log.
    #[serde(other)]
    Other,
}

/// Team-lobby membership action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipAction {
    CreateTeamSession,
    AssignTeamMember,
    UnassignTeamMember,
    DestroyTeamSession,
    JoinTeamSession,
    LeaveTeamSession,
    ChangeTeamSessionName,
}

/// Simulation entity identifier (site, application, entity).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub site: u16,
    pub application: u16,
    pub entity: u32,
}

impl EntityId {
    pub fn new(site: u16, application: u16, entity: u32) -> Self {
        Self {
            site,
            application,
            entity,
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.site, self.application, self.entity)
    }
}

/// Visual appearance flags of an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Appearance {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posture: Option<String>,
}

impl Default for Appearance {
    fn default() -> Self {
        Self {
            active: true,
            damage: None,
            posture: None,
        }
    }
}

/// Kinematic state of one simulation entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marking: Option<String>,
    #[serde(default)]
    pub location: [f64; 3],
    #[serde(default)]
    pub orientation: [f64; 3],
    #[serde(default)]
    pub velocity: [f64; 3],
    #[serde(default)]
    pub appearance: Appearance,
}

impl EntityState {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            ..Default::default()
        }
    }

    /// Copy with the appearance forced to inactive.
    pub fn deactivated(&self) -> Self {
        let mut copy = self.clone();
        copy.appearance.active = false;
        copy
    }
}

/// Body of a [`Message`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    #[default]
    Empty,
    EntityState(EntityState),
    LearnerState(LearnerState),
    /// Session map keyed by host domain session id.
    KnowledgeSessions(BTreeMap<i32, SessionDescriptor>),
    KnowledgeSessionCreated(SessionDescriptor),
    ManageTeamMembership {
        action: MembershipAction,
    },
    InitializeLesson {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_reference: Option<String>,
    },
    AuthorizeStrategies {
        #[serde(default)]
        strategies: BTreeMap<String, Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        evaluator: Option<String>,
    },
    LessonScore {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        score: Option<GradedScoreNode>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        concepts: Vec<String>,
    },
    /// Unmodelled body kept verbatim.
    Opaque(serde_json::Value),
}

/// One recorded domain message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_type: MessageType,
    /// Recorded time (epoch millis).
    pub timestamp: i64,
    #[serde(default)]
    pub sequence_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_sequence_number: Option<i64>,
    #[serde(default)]
    pub source_event_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_address: Option<String>,
    /// Absent on system (non domain-session) logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_session_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Milliseconds since the domain session started.
    #[serde(default)]
    pub elapsed_session_ms: i64,
    /// When the logger wrote the entry (epoch millis).
    #[serde(default)]
    pub write_time: i64,
    #[serde(default)]
    pub payload: Payload,
}

impl Message {
    pub fn new(message_type: MessageType, timestamp: i64, payload: Payload) -> Self {
        Self {
            message_type,
            timestamp,
            sequence_number: 0,
            reply_to_sequence_number: None,
            source_event_id: 0,
            sender_address: None,
            domain_session_id: None,
            username: None,
            elapsed_session_ms: 0,
            write_time: timestamp,
            payload,
        }
    }

    pub fn with_domain_session(mut self, id: i32) -> Self {
        self.domain_session_id = Some(id);
        self
    }

    pub fn with_sequence(mut self, sequence_number: i64) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    pub fn with_reply_to(mut self, sequence_number: i64) -> Self {
        self.reply_to_sequence_number = Some(sequence_number);
        self
    }

    /// Copy of this message re-timed to `timestamp`.
    ///
    /// Elapsed-session time and write time shift by the same delta as the
    /// timestamp so the copy stays internally consistent.
    pub fn synthesize_at(&self, timestamp: i64) -> Self {
        let delta = timestamp - self.timestamp;
        let mut copy = self.clone();
        copy.timestamp = timestamp;
        copy.elapsed_session_ms += delta;
        copy.write_time += delta;
        copy
    }

    /// Copy carrying a different payload, same envelope.
    pub fn with_payload(&self, payload: Payload) -> Self {
        let mut copy = self.clone();
        copy.payload = payload;
        copy
    }

    pub fn entity_state(&self) -> Option<&EntityState> {
        match &self.payload {
            Payload::EntityState(state) => Some(state),
            _ => None,
        }
    }

    pub fn learner_state(&self) -> Option<&LearnerState> {
        match &self.payload {
            Payload::LearnerState(state) => Some(state),
            _ => None,
        }
    }

    pub fn learner_state_mut(&mut self) -> Option<&mut LearnerState> {
        match &mut self.payload {
            Payload::LearnerState(state) => Some(state),
            _ => None,
        }
    }

    pub fn lesson_score(&self) -> Option<&GradedScoreNode> {
        match &self.payload {
            Payload::LessonScore { score, .. } => score.as_ref(),
            _ => None,
        }
    }

    /// Learner states whose assessment is visual-only do not count as real
    /// assessments when looking up the latest or upcoming state.
    pub fn is_visual_only_learner_state(&self) -> bool {
        self.learner_state()
            .is_some_and(|ls| ls.performance.is_visual_only())
    }
}

// ============================================================================
// Tests
// ============================================================================
