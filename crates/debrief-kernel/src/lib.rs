//! # debrief-kernel
//!
//! Playback of one recorded session and retroactive assessment editing.
//!
//! A log is prepared into a [`MessageCursor`], handed to [`spawn_playback`]
//! together with a [`PlaybackSink`], and driven through the returned
//! [`PlaybackHandle`]:
//! - messages are re-emitted with their recorded spacing
//! - seeking rebuilds the learner's view (strategies, learner state, live
//!   entities) at the new position
//! - observer edits land in a patch overlay that never touches the recorded
//!   messages and can be persisted next to the log

pub mod assessment;
pub mod config;
pub mod cursor;
pub mod entity;
pub mod error;
pub mod patch_file;
pub mod patching;
pub mod scheduler;
pub mod sink;

pub use assessment::{AssessmentManager, ScenarioInfo, apply_evaluator_update};
pub use config::PlaybackConfig;
pub use cursor::{MessageCursor, PlaybackCursor};
pub use entity::EntityRoster;
pub use error::{PlaybackError, PlaybackResult};
pub use scheduler::{PlaybackHandle, PlaybackState, PlaybackStatus, SeekFilter, spawn_playback};
pub use sink::{PlaybackSink, SinkError};
