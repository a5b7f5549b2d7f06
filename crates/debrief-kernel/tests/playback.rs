//! Timeline behavior of the playback actor, run on tokio's paused clock.

use std::time::Duration;

use debrief_kernel::{
    MessageCursor, PlaybackConfig, PlaybackError, PlaybackHandle, PlaybackSink, PlaybackState, SinkError,
    spawn_playback,
};
use debrief_types::{
    AssessmentLevel, EntityId, EntityState, EvaluatorUpdateRequest, LearnerState, Message, MessageType, NodeKind,
    NodeState, Payload, PerformanceNode, PerformanceState, PerformanceStateAttribute,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

const NODE: &str = "Establish security";

fn plain(message_type: MessageType, ts: i64) -> Message {
    Message::new(message_type, ts, Payload::Empty).with_domain_session(7)
}

fn entity(ts: i64, id: u32) -> Message {
    Message::new(
        MessageType::EntityState,
        ts,
        Payload::EntityState(EntityState::new(EntityId::new(1, 3, id))),
    )
    .with_domain_session(7)
}

fn learner(ts: i64, state: NodeState) -> Message {
    let mut attr = PerformanceStateAttribute::new(NODE, 4, state);
    attr.short_term = AssessmentLevel::AtExpectation;
    Message::new(
        MessageType::LearnerState,
        ts,
        Payload::LearnerState(LearnerState {
            performance: PerformanceState {
                tasks: vec![PerformanceNode::new(NodeKind::Task, attr)],
            },
            ..Default::default()
        }),
    )
    .with_domain_session(7)
}

fn spawn(messages: Vec<Message>) -> (PlaybackHandle, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = spawn_playback(MessageCursor::new(messages), tx, None, PlaybackConfig::default());
    (handle, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn level_of(msg: &Message) -> AssessmentLevel {
    msg.learner_state()
        .and_then(|ls| ls.performance.attribute(NODE))
        .map(|a| a.short_term)
        .unwrap_or_default()
}

fn scenario() -> Vec<Message> {
    vec![
        plain(MessageType::LessonStarted, 0),
        entity(100, 1),
        entity(2_000, 1),
        learner(3_000, NodeState::Active),
        entity(4_000, 2),
        plain(MessageType::LessonCompleted, 5_000),
    ]
}

// ============================================================================
// Timing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_messages_keep_recorded_spacing() {
    let (handle, mut rx) = spawn(vec![
        plain(MessageType::LessonStarted, 0),
        learner(1_000, NodeState::Active),
        plain(MessageType::LessonCompleted, 3_000),
    ]);
    let t0 = Instant::now();
    handle.start(false).await.unwrap();

    let mut offsets = Vec::new();
    for _ in 0..3 {
        rx.recv().await.unwrap();
        offsets.push(t0.elapsed().as_millis());
    }
    assert_eq!(offsets, vec![0, 1_000, 3_000]);

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, PlaybackState::Paused);
    assert_eq!(status.current_index, 3);
    assert_eq!(status.pending_delay_ms, None);
}

#[tokio::test(start_paused = true)]
async fn test_pause_keeps_remaining_delay() {
    let (handle, mut rx) = spawn(vec![
        plain(MessageType::LessonStarted, 0),
        plain(MessageType::LessonCompleted, 1_000),
    ]);
    handle.start(false).await.unwrap();
    rx.recv().await.unwrap();

    tokio::time::advance(Duration::from_millis(400)).await;
    handle.pause().await.unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, PlaybackState::Paused);
    assert_eq!(status.pending_delay_ms, Some(600));

    // Time spent paused does not count.
    tokio::time::advance(Duration::from_millis(5_000)).await;
    assert!(rx.try_recv().is_err());

    let resumed = Instant::now();
    handle.start(false).await.unwrap();
    let last = rx.recv().await.unwrap();
    assert_eq!(last.message_type, MessageType::LessonCompleted);
    assert_eq!(resumed.elapsed().as_millis(), 600);
}

#[tokio::test(start_paused = true)]
async fn test_ignore_delay_plays_immediately() {
    let (handle, mut rx) = spawn(vec![
        plain(MessageType::LessonStarted, 0),
        plain(MessageType::LessonCompleted, 1_000),
    ]);
    handle.seek(1_000).await.unwrap();
    drain(&mut rx);

    let t0 = Instant::now();
    handle.start(true).await.unwrap();
    let msg = rx.recv().await.unwrap();
    assert_eq!(msg.message_type, MessageType::LessonCompleted);
    assert_eq!(t0.elapsed().as_millis(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ignored_timestamp_plays_without_delay() {
    let (handle, mut rx) = spawn(vec![
        plain(MessageType::LessonStarted, 0),
        plain(MessageType::StartTeamKnowledgeSessionRequest, 5_000),
        plain(MessageType::LessonCompleted, 6_000),
    ]);
    let t0 = Instant::now();
    handle.start(false).await.unwrap();

    let mut offsets = Vec::new();
    for _ in 0..3 {
        let msg = rx.recv().await.unwrap();
        offsets.push((msg.message_type, t0.elapsed().as_millis()));
    }
    assert_eq!(
        offsets,
        vec![
            (MessageType::LessonStarted, 0),
            (MessageType::StartTeamKnowledgeSessionRequest, 0),
            (MessageType::LessonCompleted, 6_000),
        ]
    );
}

// ============================================================================
// Seeking
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_seek_replays_recorded_strategies() {
    let (handle, mut rx) = spawn(vec![
        plain(MessageType::LessonStarted, 0),
        plain(MessageType::AuthorizeStrategiesRequest, 500),
        plain(MessageType::ApplyStrategies, 800),
        learner(1_000, NodeState::Active),
        plain(MessageType::LessonCompleted, 2_000),
    ]);
    handle.seek(1_500).await.unwrap();

    let sent = drain(&mut rx);
    let kinds: Vec<(MessageType, i64)> = sent.iter().map(|m| (m.message_type, m.timestamp)).collect();
    assert_eq!(
        kinds,
        vec![
            (MessageType::AuthorizeStrategiesRequest, 500),
            (MessageType::ApplyStrategies, 800),
            (MessageType::LearnerState, 2_000),
        ]
    );
    assert_eq!(handle.status().await.unwrap().current_index, 4);
}

#[tokio::test(start_paused = true)]
async fn test_seek_is_reversible_and_deterministic() {
    let (handle, mut rx) = spawn(scenario());

    handle.seek(2_500).await.unwrap();
    assert_eq!(handle.status().await.unwrap().current_index, 3);
    let first = drain(&mut rx);

    handle.seek(0).await.unwrap();
    assert_eq!(handle.status().await.unwrap().current_index, 0);
    drain(&mut rx);

    handle.seek(2_500).await.unwrap();
    assert_eq!(handle.status().await.unwrap().current_index, 3);
    let second = drain(&mut rx);
    assert_eq!(first, second);

    // Synthesized strategies, the learner state, then one copy per entity.
    assert_eq!(first[0].message_type, MessageType::AuthorizeStrategiesRequest);
    assert_eq!(first[0].domain_session_id, Some(7));
    assert_eq!(first[1].message_type, MessageType::LearnerState);
    let entities: Vec<_> = first[2..].iter().filter_map(Message::entity_state).collect();
    assert_eq!(entities.len(), 2);
    assert!(first.iter().all(|m| m.timestamp == 3_000));
}

#[tokio::test(start_paused = true)]
async fn test_seek_past_end_lands_at_end_of_log() {
    let (handle, mut rx) = spawn(scenario());
    handle.seek(99_000).await.unwrap();

    let status = handle.status().await.unwrap();
    assert_eq!(status.current_index, 6);
    assert_eq!(status.current_time, None);

    let snapshot = drain(&mut rx);
    assert!(snapshot.iter().all(|m| m.timestamp == 5_000));
    let entities: Vec<_> = snapshot.iter().filter_map(Message::entity_state).collect();
    assert_eq!(entities.len(), 2);
    assert!(entities.iter().all(|e| !e.appearance.active));
}

#[tokio::test(start_paused = true)]
async fn test_negative_seek_is_rejected() {
    let (handle, _rx) = spawn(scenario());
    let err = handle.seek(-1).await.unwrap_err();
    assert!(matches!(err, PlaybackError::InvalidArgument(_)));
}

#[tokio::test(start_paused = true)]
async fn test_jump_to_activation_start() {
    let (handle, _rx) = spawn(vec![
        learner(1_000, NodeState::Unactivated),
        learner(2_000, NodeState::Unactivated),
        learner(3_000, NodeState::Active),
    ]);
    assert_eq!(handle.jump_to_activation_start(NODE).await.unwrap(), Some(3_000));
    assert_eq!(handle.jump_to_activation_start("no such node").await.unwrap(), None);
}

// ============================================================================
// Entities
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_each_entity_ends_inactive_exactly_once() {
    let (handle, mut rx) = spawn(scenario());
    handle.start(true).await.unwrap();

    let mut played = Vec::new();
    for _ in 0..6 {
        played.push(rx.recv().await.unwrap());
    }
    for id in [1, 2] {
        let inactive = played
            .iter()
            .filter_map(Message::entity_state)
            .filter(|e| e.entity_id.entity == id && !e.appearance.active)
            .count();
        assert_eq!(inactive, 1, "entity {id}");
    }
    assert!(played[1].entity_state().unwrap().appearance.active);
}

// ============================================================================
// Patching
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_evaluator_update_follows_lifecycle_run() {
    let (handle, mut rx) = spawn(vec![
        learner(1_000, NodeState::Active),
        learner(2_000, NodeState::Active),
        learner(3_000, NodeState::Finished),
        learner(4_000, NodeState::Unactivated),
    ]);
    let request = EvaluatorUpdateRequest::new(NODE, 500).with_performance(AssessmentLevel::BelowExpectation);

    let results = handle
        .apply_evaluator_update(500, false, request, true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].affected, vec![0, 1, 2]);
    assert!(results[1..].iter().all(|r| r.affected.is_empty()));
    drain(&mut rx);

    for (time, expected) in [
        (1_000, AssessmentLevel::BelowExpectation),
        (2_000, AssessmentLevel::BelowExpectation),
        (3_000, AssessmentLevel::BelowExpectation),
        (4_000, AssessmentLevel::AtExpectation),
    ] {
        handle.seek(time).await.unwrap();
        let learner = drain(&mut rx)
            .into_iter()
            .find(|m| m.message_type == MessageType::LearnerState)
            .unwrap();
        assert_eq!(level_of(&learner), expected, "at {time}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_evaluator_update_stops_when_finished_node_reactivates() {
    let (handle, mut rx) = spawn(vec![
        learner(1_000, NodeState::Active),
        learner(2_000, NodeState::Finished),
        learner(3_000, NodeState::Active),
    ]);
    let request = EvaluatorUpdateRequest::new(NODE, 1_000).with_performance(AssessmentLevel::BelowExpectation);

    let results = handle
        .apply_evaluator_update(1_000, false, request, true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].affected, vec![0, 1]);
    drain(&mut rx);

    for (time, expected) in [
        (1_000, AssessmentLevel::BelowExpectation),
        (2_000, AssessmentLevel::BelowExpectation),
        (3_000, AssessmentLevel::AtExpectation),
    ] {
        handle.seek(time).await.unwrap();
        let learner = drain(&mut rx)
            .into_iter()
            .find(|m| m.message_type == MessageType::LearnerState)
            .unwrap();
        assert_eq!(level_of(&learner), expected, "at {time}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_edit_between_learner_states_applies_from_its_instant() {
    let (handle, mut rx) = spawn(vec![
        learner(1_000, NodeState::Active),
        learner(2_000, NodeState::Active),
    ]);
    let request = EvaluatorUpdateRequest::new(NODE, 1_500).with_performance(AssessmentLevel::BelowExpectation);

    let results = handle
        .apply_evaluator_update(1_500, false, request, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].current_index, Some(1));
    assert_eq!(results[0].current_message.as_ref().map(|m| m.timestamp), Some(1_500));
    assert_eq!(handle.status().await.unwrap().len, 3);
    drain(&mut rx);

    for (time, expected) in [
        (1_000, AssessmentLevel::AtExpectation),
        (1_500, AssessmentLevel::BelowExpectation),
        (2_000, AssessmentLevel::BelowExpectation),
    ] {
        handle.seek(time).await.unwrap();
        let learner = drain(&mut rx)
            .into_iter()
            .find(|m| m.message_type == MessageType::LearnerState)
            .unwrap();
        assert_eq!(level_of(&learner), expected, "at {time}");
    }

    handle.remove_attribute_patch(1_500, NODE).await.unwrap().unwrap();
    assert_eq!(handle.status().await.unwrap().len, 2);
}

#[tokio::test(start_paused = true)]
async fn test_evaluator_update_for_missing_node_without_manager() {
    let (handle, _rx) = spawn(vec![learner(1_000, NodeState::Active)]);
    let request = EvaluatorUpdateRequest::new("Unknown node", 1_500);
    let result = handle.apply_evaluator_update(1_500, false, request, false).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_patch_on_current_message_is_reemitted() {
    let (handle, mut rx) = spawn(vec![
        learner(1_000, NodeState::Active),
        learner(2_000, NodeState::Active),
    ]);
    handle.seek(2_000).await.unwrap();
    drain(&mut rx);

    let mut attr = PerformanceStateAttribute::new(NODE, 4, NodeState::Active);
    attr.short_term = AssessmentLevel::AboveExpectation;
    let result = handle.patch_attribute(2_000, attr).await.unwrap();
    assert_eq!(result.current_index, Some(1));
    assert_eq!(result.current_message.as_ref().map(level_of), Some(AssessmentLevel::AboveExpectation));

    let resent = drain(&mut rx);
    assert_eq!(resent.len(), 1);
    assert_eq!(level_of(&resent[0]), AssessmentLevel::AboveExpectation);

    let removed = handle.remove_attribute_patch(2_000, NODE).await.unwrap().unwrap();
    assert_eq!(removed.affected, vec![1]);
    assert_eq!(level_of(&drain(&mut rx)[0]), AssessmentLevel::AtExpectation);
}

#[tokio::test(start_paused = true)]
async fn test_no_assessment_manager_means_no_scoring() {
    let (handle, _rx) = spawn(scenario());
    assert!(handle
        .apply_overall_assessments(0, Default::default(), vec![])
        .await
        .unwrap()
        .is_none());
    assert!(handle.calculate_roll_up(Default::default()).await.unwrap().is_none());
    assert!(handle.knowledge_session_scenario().await.unwrap().is_none());
    assert!(!handle.is_team_session().await.unwrap());
}

// ============================================================================
// Lifecycle
// ============================================================================

struct BrokenSink;

impl PlaybackSink for BrokenSink {
    fn handle_message(&mut self, _message: &Message) -> Result<(), SinkError> {
        Err("consumer went away".into())
    }
}

#[tokio::test(start_paused = true)]
async fn test_sink_errors_do_not_stop_playback() {
    let handle = spawn_playback(MessageCursor::new(scenario()), BrokenSink, None, PlaybackConfig::default());
    handle.start(false).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.current_index, 6);
    assert_eq!(status.state, PlaybackState::Paused);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_releases_and_rejects() {
    let (handle, _rx) = spawn(scenario());
    handle.start(false).await.unwrap();
    handle.terminate().await.unwrap();

    assert!(handle.has_terminated());
    assert!(matches!(handle.start(false).await, Err(PlaybackError::Terminated)));
    // A second terminate is a no-op.
    handle.terminate().await.unwrap();
}
