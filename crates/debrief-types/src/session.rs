//! Knowledge-session descriptors.
//!
//! A descriptor names one scenario execution (individual or team) and is
//! carried by the session-list replies the segmenter correlates against.

use std::cmp::Ordering;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Individual learner or team session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    Individual,
    Team,
}

/// Observer controls recorded with a session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObserverControls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_audio_path: Option<String>,
}

impl ObserverControls {
    /// Reduce the captured audio path to its file name.
    ///
    /// Recordings move with their session folder, so only the name is kept.
    pub fn strip_audio_directory(&mut self) {
        if let Some(path) = self.captured_audio_path.take() {
            let name = Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(path);
            self.captured_audio_path = Some(name);
        }
    }
}

/// Describes one knowledge session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub name_of_session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_description: Option<String>,
    pub host_domain_session_id: i32,
    #[serde(default)]
    pub session_type: SessionType,
    #[serde(default)]
    pub in_past_session_mode: bool,
    /// Epoch millis.
    #[serde(default)]
    pub session_start_time: i64,
    /// Epoch millis.
    #[serde(default)]
    pub session_end_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_session_log_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observer_controls: Option<ObserverControls>,
    /// Descriptor fields this crate does not model, kept for round-trips.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionDescriptor {
    pub fn new(name: impl Into<String>, host_domain_session_id: i32, session_type: SessionType) -> Self {
        Self {
            name_of_session: name.into(),
            host_domain_session_id,
            session_type,
            ..Default::default()
        }
    }

    /// Switch to past-session mode, recording the replay window and log.
    pub fn into_past_session(mut self, start: i64, end: i64, log_file_name: impl Into<String>) -> Self {
        self.in_past_session_mode = true;
        self.session_start_time = start;
        self.session_end_time = end;
        self.domain_session_log_file_name = Some(log_file_name.into());
        if let Some(controls) = self.observer_controls.as_mut() {
            controls.strip_audio_directory();
        }
        self
    }

    /// Default listing order: past sessions first, newest start first, then
    /// name (case-insensitive), then host domain session id.
    pub fn default_order(a: &Self, b: &Self) -> Ordering {
        b.in_past_session_mode
            .cmp(&a.in_past_session_mode)
            .then_with(|| {
                if a.in_past_session_mode && b.in_past_session_mode {
                    b.session_start_time.cmp(&a.session_start_time)
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| {
                a.name_of_session
                    .to_lowercase()
                    .cmp(&b.name_of_session.to_lowercase())
            })
            .then_with(|| a.host_domain_session_id.cmp(&b.host_domain_session_id))
    }
}

// ============================================================================
// Tests
// ============================================================================
