//! Playback configuration.

use debrief_types::{LOG_PATCH_SUFFIX, MessageType, PROTOBUF_LOG_EXTENSION};
use serde::{Deserialize, Serialize};

/// Tunables for cursor preparation and the playback scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Types played as soon as they are reached, never waiting on their
    /// recorded time.
    pub ignore_timestamp_types: Vec<MessageType>,
    /// Types emitted while fast-forwarding during a seek.
    pub fast_forward_types: Vec<MessageType>,
    /// How far back a seek looks for live entities (ms of recorded time).
    pub entity_lookback_ms: i64,
    /// Minimum gap between kept ENTITY_STATE messages of one entity (ms).
    pub entity_sample_interval_ms: i64,
    /// Username stamped on prepared and synthesized messages.
    pub username: Option<String>,
    /// Suffix appended to a log path to name its patch file.
    pub patch_suffix: String,
    /// Container extension used for the converted patch file variant.
    pub converted_extension: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            ignore_timestamp_types: vec![
                MessageType::KnowledgeSessionUpdatedRequest,
                MessageType::StartTeamKnowledgeSessionRequest,
            ],
            fast_forward_types: vec![
                MessageType::AuthorizeStrategiesRequest,
                MessageType::ApplyStrategies,
            ],
            entity_lookback_ms: 30_000,
            entity_sample_interval_ms: 250,
            username: None,
            patch_suffix: LOG_PATCH_SUFFIX.to_string(),
            converted_extension: PROTOBUF_LOG_EXTENSION.to_string(),
        }
    }
}

impl PlaybackConfig {
    pub fn ignores_timestamp(&self, message_type: MessageType) -> bool {
        self.ignore_timestamp_types.contains(&message_type)
    }

    pub fn is_fast_forward(&self, message_type: MessageType) -> bool {
        self.fast_forward_types.contains(&message_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlaybackConfig::default();
        assert!(config.ignores_timestamp(MessageType::StartTeamKnowledgeSessionRequest));
        assert!(!config.ignores_timestamp(MessageType::LearnerState));
        assert!(config.is_fast_forward(MessageType::ApplyStrategies));
        assert_eq!(config.entity_lookback_ms, 30_000);
        assert_eq!(config.patch_suffix, ".logPatch");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PlaybackConfig =
            serde_json::from_str(r#"{"entity_lookback_ms": 5000, "username": "jo"}"#).unwrap();
        assert_eq!(config.entity_lookback_ms, 5000);
        assert_eq!(config.username.as_deref(), Some("jo"));
        assert_eq!(config.entity_sample_interval_ms, 250);
        assert_eq!(config.fast_forward_types.len(), 2);
    }
}
