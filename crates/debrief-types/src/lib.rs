//! Shared types for after-action review of recorded training sessions.
//!
//! This crate is the leaf of the workspace: the recorded message model,
//! session descriptors, the performance assessment tree, playable-session
//! metadata, and retroactive patch requests. It has **no internal debrief
//! dependencies**.
//!
//! # Key Types
//!
//! |-------------------------|-------------------------------------------------|
//! | Type                    | Purpose                                         |
//! |-------------------------|-------------------------------------------------|
//! | [`Message`]             | One timestamped domain message from a log       |
//! | [`MessageType`]         | What kind of message (drives segmentation)      |
//! | [`EntityState`]         | Simulation entity snapshot                      |
//! | [`LearnerState`]        | Assessment snapshot with a performance forest   |
//! | [`SessionDescriptor`]   | Knowledge session (individual or team)          |
//! | [`LogSpan`]             | Half-open message index range                   |
//! | [`LogMetadata`]         | One playable session inside one log file        |
//! | [`EvaluatorUpdateRequest`] | Observer edit of one performance node        |
//! | [`PatchRequest`]        | Attribute edits anchored at one instant         |
//! | [`PatchResult`]         | What an applied edit changed                    |
//! |-------------------------|-------------------------------------------------|

pub mod error;
pub mod message;
pub mod metadata;
pub mod patch;
pub mod performance;
pub mod session;

// Re-export primary types at crate root for convenience.
pub use error::TypesError;
pub use message::{Appearance, EntityId, EntityState, MembershipAction, Message, MessageType, Payload};
pub use metadata::{
    LEGACY_LOG_EXTENSION, LOG_PATCH_SUFFIX, LogMetadata, LogSpan, PROTOBUF_LOG_EXTENSION, VideoRef,
    patch_file_candidates,
};
pub use patch::{AttributePatch, PatchId, PatchRequest, PatchResult};
pub use performance::{
    AssessmentLevel, AttributeField, EvaluatorUpdateRequest, GradedScoreNode, LearnerState, NodeKind,
    NodeState, PerformanceNode, PerformanceState, PerformanceStateAttribute, ScoreNodeUpdate,
};
pub use session::{ObserverControls, SessionDescriptor, SessionType};
