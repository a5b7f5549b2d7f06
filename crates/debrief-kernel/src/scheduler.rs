//! Real-time playback actor.
//!
//! One task owns the cursor, the sink, and a single cancellable timer. The
//! public [`PlaybackHandle`] is `Send + Sync + Clone`; every call is a
//! command over an mpsc channel answered through a oneshot, so playback
//! steps, seeks, and patch edits never interleave.
//!
//! ```text
//!   PlaybackHandle            mpsc       PlaybackActor (tokio task)
//!   ┌──────────────────┐  ──────────▶  ┌────────────────────────────┐
//!   │ .start() .seek() │               │ cursor + entity roster     │
//!   │ .pause()         │  ◀──────────  │ one deadline (sleep_until) │
//!   │ .apply_*()       │    oneshot    │ sink                       │
//!   └──────────────────┘               └────────────────────────────┘
//! ```
//!
//! Timing follows the recording: the actor keeps the offset between its
//! clock and recorded time (`past_present_delta`) and schedules each message
//! at `timestamp - (now - delta)`. The offset is re-anchored on every start
//! and seek.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use debrief_types::{
    AssessmentLevel, EvaluatorUpdateRequest, LearnerState, Message, MessageType, NodeState, PatchRequest,
    PatchResult, Payload, PerformanceStateAttribute, ScoreNodeUpdate,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::assessment::{AssessmentManager, ScenarioInfo, apply_evaluator_update};
use crate::config::PlaybackConfig;
use crate::cursor::PlaybackCursor;
use crate::entity::EntityRoster;
use crate::error::{PlaybackError, PlaybackResult};
use crate::sink::PlaybackSink;

/// Caller-supplied seek condition. The first message it accepts becomes the
/// next one to play.
pub type SeekFilter = Box<dyn FnMut(&Message) -> bool + Send>;

// ============================================================================
// Status
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Constructed, never started.
    #[default]
    Stopped,
    Playing,
    Paused,
    Terminated,
}

/// Snapshot of the actor's position and timing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub current_index: usize,
    pub len: usize,
    /// Recorded time of the next message to play.
    pub current_time: Option<i64>,
    /// Delay the next message still owes, kept across a pause or a seek.
    pub pending_delay_ms: Option<i64>,
    pub past_present_delta_ms: i64,
}

// ============================================================================
// Commands (internal)
// ============================================================================

enum SeekTarget {
    Time(i64),
    ActivationStart(String),
    Matching(SeekFilter),
}

enum PlaybackCommand {
    // Timeline
    Start {
        ignore_delay: bool,
        reply: oneshot::Sender<()>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Seek {
        target: SeekTarget,
        reply: oneshot::Sender<Option<i64>>,
    },
    Status {
        reply: oneshot::Sender<PlaybackStatus>,
    },
    Terminate {
        reply: oneshot::Sender<()>,
    },

    // Patching
    PatchAttribute {
        timestamp: i64,
        attribute: PerformanceStateAttribute,
        reply: oneshot::Sender<PlaybackResult<PatchResult>>,
    },
    EvaluatorUpdate {
        timestamp: i64,
        update_entire_span: bool,
        request: EvaluatorUpdateRequest,
        apply_to_future: bool,
        reply: oneshot::Sender<PlaybackResult<Option<Vec<PatchResult>>>>,
    },
    RemovePatch {
        timestamp: i64,
        node_name: String,
        reply: oneshot::Sender<Option<PatchResult>>,
    },
    OverallAssessments {
        timestamp: i64,
        conditions: BTreeMap<i32, Vec<ScoreNodeUpdate>>,
        course_concepts: Vec<String>,
        reply: oneshot::Sender<PlaybackResult<Option<PatchResult>>>,
    },
    CalculateRollUp {
        conditions: BTreeMap<i32, Vec<ScoreNodeUpdate>>,
        reply: oneshot::Sender<PlaybackResult<Option<BTreeMap<i32, AssessmentLevel>>>>,
    },
    WritePatchFile {
        username: String,
        reply: oneshot::Sender<PlaybackResult<Option<String>>>,
    },
    DeletePatchFile {
        reply: oneshot::Sender<PlaybackResult<()>>,
    },

    // Session info
    ScenarioInfo {
        reply: oneshot::Sender<Option<ScenarioInfo>>,
    },
    IsTeamSession {
        reply: oneshot::Sender<bool>,
    },
}

// ============================================================================
// PlaybackHandle (Send + Sync public API)
// ============================================================================

/// Handle to a running playback actor. Cheap to clone.
#[derive(Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<PlaybackCommand>,
    terminated: Arc<AtomicBool>,
}

impl PlaybackHandle {
    async fn call<T>(&self, cmd: impl FnOnce(oneshot::Sender<T>) -> PlaybackCommand) -> PlaybackResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(cmd(reply)).map_err(|_| PlaybackError::Terminated)?;
        rx.await.map_err(|_| PlaybackError::Terminated)
    }

    // ── Timeline ─────────────────────────────────────────────────────────

    /// Start or resume playback. With `ignore_delay` the next message plays
    /// immediately instead of waiting out the delay left by a pause or seek.
    pub async fn start(&self, ignore_delay: bool) -> PlaybackResult<()> {
        self.call(|reply| PlaybackCommand::Start { ignore_delay, reply }).await
    }

    /// Pause, keeping whatever delay the next message still owes.
    pub async fn pause(&self) -> PlaybackResult<()> {
        self.call(|reply| PlaybackCommand::Pause { reply }).await
    }

    /// Move the playhead to the first message at or after `time_ms` of
    /// recorded time. Past the last message the playhead sits at end of log.
    pub async fn seek(&self, time_ms: i64) -> PlaybackResult<()> {
        if time_ms < 0 {
            return Err(PlaybackError::invalid(format!("seek time {time_ms} is negative")));
        }
        self.call(|reply| PlaybackCommand::Seek {
            target: SeekTarget::Time(time_ms),
            reply,
        })
        .await?;
        Ok(())
    }

    /// Move the playhead to the first message `filter` accepts. Returns its
    /// recorded time, or `None` when nothing matched.
    pub async fn seek_to(&self, filter: SeekFilter) -> PlaybackResult<Option<i64>> {
        self.call(|reply| PlaybackCommand::Seek {
            target: SeekTarget::Matching(filter),
            reply,
        })
        .await
    }

    /// Seek to the first learner state in which `node_name` has left the
    /// unactivated state.
    pub async fn jump_to_activation_start(&self, node_name: &str) -> PlaybackResult<Option<i64>> {
        self.call(|reply| PlaybackCommand::Seek {
            target: SeekTarget::ActivationStart(node_name.to_string()),
            reply,
        })
        .await
    }

    pub async fn status(&self) -> PlaybackResult<PlaybackStatus> {
        self.call(|reply| PlaybackCommand::Status { reply }).await
    }

    /// Stop for good and release the messages. Later calls fail with
    /// [`PlaybackError::Terminated`].
    pub async fn terminate(&self) -> PlaybackResult<()> {
        if self.has_terminated() {
            return Ok(());
        }
        self.call(|reply| PlaybackCommand::Terminate { reply }).await
    }

    pub fn has_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    // ── Patching ─────────────────────────────────────────────────────────

    /// Overwrite one node attribute at `timestamp`.
    pub async fn patch_attribute(
        &self,
        timestamp: i64,
        attribute: PerformanceStateAttribute,
    ) -> PlaybackResult<PatchResult> {
        self.call(|reply| PlaybackCommand::PatchAttribute {
            timestamp,
            attribute,
            reply,
        })
        .await?
    }

    /// Apply an observer edit at `timestamp`, optionally carrying it through
    /// later learner states while the node stays in the same lifecycle run.
    ///
    /// Returns `None` for a log without an assessment manager whose anchor
    /// learner state lacks the node.
    pub async fn apply_evaluator_update(
        &self,
        timestamp: i64,
        update_entire_span: bool,
        request: EvaluatorUpdateRequest,
        apply_to_future: bool,
    ) -> PlaybackResult<Option<Vec<PatchResult>>> {
        self.call(|reply| PlaybackCommand::EvaluatorUpdate {
            timestamp,
            update_entire_span,
            request,
            apply_to_future,
            reply,
        })
        .await?
    }

    /// Undo the patch on `node_name` anchored at `timestamp`.
    pub async fn remove_attribute_patch(
        &self,
        timestamp: i64,
        node_name: &str,
    ) -> PlaybackResult<Option<PatchResult>> {
        self.call(|reply| PlaybackCommand::RemovePatch {
            timestamp,
            node_name: node_name.to_string(),
            reply,
        })
        .await
    }

    /// Re-score the session from observer condition assessments and patch
    /// the published score. `None` without an assessment manager.
    pub async fn apply_overall_assessments(
        &self,
        timestamp: i64,
        conditions: BTreeMap<i32, Vec<ScoreNodeUpdate>>,
        course_concepts: Vec<String>,
    ) -> PlaybackResult<Option<PatchResult>> {
        self.call(|reply| PlaybackCommand::OverallAssessments {
            timestamp,
            conditions,
            course_concepts,
            reply,
        })
        .await?
    }

    pub async fn calculate_roll_up(
        &self,
        conditions: BTreeMap<i32, Vec<ScoreNodeUpdate>>,
    ) -> PlaybackResult<Option<BTreeMap<i32, AssessmentLevel>>> {
        self.call(|reply| PlaybackCommand::CalculateRollUp { conditions, reply })
            .await?
    }

    /// Persist the patch overlay. Returns the patch file name, or `None`
    /// when nothing is patched and the file was removed.
    pub async fn write_patch_file(&self, username: &str) -> PlaybackResult<Option<String>> {
        self.call(|reply| PlaybackCommand::WritePatchFile {
            username: username.to_string(),
            reply,
        })
        .await?
    }

    /// Drop every patch and its file, then re-seek to the current time.
    pub async fn delete_patch_file(&self) -> PlaybackResult<()> {
        self.call(|reply| PlaybackCommand::DeletePatchFile { reply }).await?
    }

    // ── Session info ─────────────────────────────────────────────────────

    pub async fn knowledge_session_scenario(&self) -> PlaybackResult<Option<ScenarioInfo>> {
        self.call(|reply| PlaybackCommand::ScenarioInfo { reply }).await
    }

    pub async fn is_team_session(&self) -> PlaybackResult<bool> {
        self.call(|reply| PlaybackCommand::IsTeamSession { reply }).await
    }
}

// ============================================================================
// PlaybackActor (internal)
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct PlaybackActor {
    cursor: Box<dyn PlaybackCursor>,
    sink: Box<dyn PlaybackSink>,
    assessment: Option<Box<dyn AssessmentManager>>,
    config: PlaybackConfig,
    entities: EntityRoster,
    /// Stamped on synthesized messages.
    domain_session_id: Option<i32>,
    state: PlaybackState,
    pending_delay: Option<i64>,
    past_present_delta: i64,
    origin: Instant,
    /// The one pending timer.
    deadline: Option<Instant>,
    terminated: Arc<AtomicBool>,
}

/// Hand one message to the sink. Failures are logged and swallowed so a
/// broken consumer cannot stall the timeline.
fn deliver(sink: &mut dyn PlaybackSink, message: &Message) {
    if let Err(e) = sink.handle_message(message) {
        error!(
            message_type = %message.message_type,
            timestamp = message.timestamp,
            "sink failed to handle message: {e}"
        );
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn activates(message: &Message, node_name: &str) -> bool {
    message
        .learner_state()
        .and_then(|ls| ls.performance.attribute(node_name))
        .is_some_and(|attr| attr.node_state != NodeState::Unactivated)
}

impl PlaybackActor {
    fn now_ms(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX)
    }

    /// Message at `index` with entity closings and patches applied.
    fn read(&self, index: usize) -> Option<Message> {
        self.entities
            .resolve(self.cursor.as_ref(), index)
            .map(Cow::into_owned)
    }

    fn emit(&mut self, message: &Message) {
        deliver(self.sink.as_mut(), message);
    }

    fn synthesize(&self, message_type: MessageType, time: i64, payload: Payload) -> Message {
        let mut msg = Message::new(message_type, time, payload);
        msg.domain_session_id = self.domain_session_id;
        msg.username = self.config.username.clone();
        msg
    }

    /// Recorded time the playhead stands at. At end of log that is the last
    /// message's time.
    fn playhead_time(&self) -> Option<i64> {
        let index = self.cursor.current_index().min(self.cursor.len().checked_sub(1)?);
        self.cursor.original_at(index).map(|m| m.timestamp)
    }

    fn remap_clock(&mut self) {
        if let Some(ts) = self.cursor.current_message().map(|m| m.timestamp) {
            self.past_present_delta = self.now_ms() - ts;
        }
    }

    // ── Timer ────────────────────────────────────────────────────────────

    fn schedule(&mut self, delay_ms: i64) {
        let delay = Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0));
        self.deadline = Some(Instant::now() + delay);
    }

    /// Cancel the pending timer. Returns the delay it still had to run, if
    /// any.
    fn cancel_timer(&mut self) -> Option<i64> {
        self.pending_delay = None;
        let deadline = self.deadline.take()?;
        let remaining = deadline.checked_duration_since(Instant::now())?;
        let ms = i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX);
        (ms > 0).then_some(ms)
    }

    // ── Timeline ─────────────────────────────────────────────────────────

    fn start(&mut self, ignore_delay: bool) {
        if self.state == PlaybackState::Playing {
            return;
        }
        self.remap_clock();
        self.state = PlaybackState::Playing;
        match self.pending_delay.take() {
            Some(delay) if !ignore_delay => self.schedule(delay),
            _ => self.execute_next(),
        }
        debug!(index = self.cursor.current_index(), "playback started");
    }

    fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.state = PlaybackState::Paused;
        self.pending_delay = self.cancel_timer();
        debug!(pending = ?self.pending_delay, "playback paused");
    }

    /// Play the current message and every following one already due, then
    /// arm the timer for the next.
    fn execute_next(&mut self) {
        if self.state != PlaybackState::Playing {
            self.pause();
            return;
        }
        let Some(mut msg) = self.read(self.cursor.current_index()) else {
            self.pause();
            return;
        };
        loop {
            self.emit(&msg);
            self.cursor.advance();
            let Some(next) = self.read(self.cursor.current_index()) else {
                info!("reached end of log");
                self.pause();
                return;
            };
            let delay = if self.config.ignores_timestamp(next.message_type) {
                0
            } else {
                next.timestamp - (self.now_ms() - self.past_present_delta)
            };
            if delay > 0 {
                self.schedule(delay);
                return;
            }
            msg = next;
        }
    }

    /// Fast-forward from the start to the first message `filter` accepts and
    /// rebuild the learner's view at that point.
    #[tracing::instrument(skip_all, name = "playback.seek")]
    fn seek(&mut self, filter: &mut dyn FnMut(&Message) -> bool) -> Option<i64> {
        self.cancel_timer();
        if self.cursor.is_empty() {
            return None;
        }
        self.cursor.reset_to(0);

        let landed = {
            let sink = self.sink.as_mut();
            let config = &self.config;
            self.cursor.fast_forward_to(&mut |msg| {
                let accepted = filter(msg);
                if !accepted && config.is_fast_forward(msg.message_type) {
                    deliver(&mut *sink, msg);
                }
                accepted
            })
        };
        let time = self.playhead_time()?;

        let latest = self.cursor.latest_messages_of_type(&[
            MessageType::AuthorizeStrategiesRequest,
            MessageType::ApplyStrategies,
            MessageType::LearnerState,
        ]);
        if !latest.contains_key(&MessageType::AuthorizeStrategiesRequest) {
            let strategies = self.synthesize(
                MessageType::AuthorizeStrategiesRequest,
                time,
                Payload::AuthorizeStrategies {
                    strategies: BTreeMap::new(),
                    evaluator: None,
                },
            );
            self.emit(&strategies);
        }
        let learner = match latest.get(&MessageType::LearnerState).and_then(|&i| self.read(i)) {
            Some(recorded) => recorded.synthesize_at(time),
            None => self.synthesize(MessageType::LearnerState, time, Payload::LearnerState(LearnerState::default())),
        };
        self.emit(&learner);

        let snapshot = self.entities.snapshot(
            self.cursor.as_ref(),
            self.cursor.current_index(),
            time,
            self.config.entity_lookback_ms,
        );
        for msg in &snapshot {
            self.emit(msg);
        }

        self.remap_clock();
        let delay = self.cursor.current_message().map(|m| m.timestamp - time);
        match (delay, self.state) {
            (Some(delay), PlaybackState::Playing) => self.schedule(delay.max(0)),
            (None, PlaybackState::Playing) => self.pause(),
            (delay, _) => self.pending_delay = delay,
        }

        debug!(time, index = self.cursor.current_index(), entities = snapshot.len(), "seek complete");
        landed.map(|_| time)
    }

    fn status(&self) -> PlaybackStatus {
        let remaining = self
            .deadline
            .and_then(|d| d.checked_duration_since(Instant::now()))
            .and_then(|d| i64::try_from(d.as_millis()).ok());
        PlaybackStatus {
            state: self.state,
            current_index: self.cursor.current_index(),
            len: self.cursor.len(),
            current_time: self.cursor.current_message().map(|m| m.timestamp),
            pending_delay_ms: self.pending_delay.or(remaining),
            past_present_delta_ms: self.past_present_delta,
        }
    }

    fn terminate(&mut self) {
        self.pause();
        self.deadline = None;
        self.cursor.clear();
        self.state = PlaybackState::Terminated;
        self.terminated.store(true, Ordering::Release);
        info!("playback terminated");
    }

    // ── Patching ─────────────────────────────────────────────────────────

    /// Fill in the patched message and re-send it when it is the one the
    /// playhead stands on.
    fn finish_patch(&mut self, result: &mut PatchResult) {
        self.refresh_roster();
        result.current_message = result.current_index.and_then(|i| self.read(i));
        let current = self.cursor.current_index();
        if result.current_index == Some(current) || result.affected.contains(&current) {
            if let Some(msg) = self.read(current) {
                self.emit(&msg);
            }
        }
    }

    fn refresh_roster(&mut self) {
        if !self.entities.matches(self.cursor.as_ref()) {
            self.entities = EntityRoster::build(self.cursor.as_ref());
            debug!(messages = self.cursor.len(), "rebuilt entity roster");
        }
    }

    fn patch_attribute(&mut self, timestamp: i64, attribute: PerformanceStateAttribute) -> PlaybackResult<PatchResult> {
        let request = PatchRequest::new(vec![attribute], timestamp)?;
        let mut result = self.cursor.apply_patch(&request);
        self.finish_patch(&mut result);
        Ok(result)
    }

    /// Latest real learner state at or before `timestamp`.
    fn anchor_learner_state(&self, timestamp: i64) -> Option<usize> {
        (0..self.cursor.len())
            .filter_map(|i| self.cursor.original_at(i).map(|m| (i, m)))
            .take_while(|(_, m)| m.timestamp <= timestamp)
            .filter(|(_, m)| m.message_type == MessageType::LearnerState && !m.is_visual_only_learner_state())
            .map(|(i, _)| i)
            .last()
    }

    fn learner_state_at(&self, timestamp: i64) -> Option<usize> {
        (0..self.cursor.len()).find(|&i| {
            self.cursor
                .original_at(i)
                .is_some_and(|m| m.message_type == MessageType::LearnerState && m.timestamp == timestamp)
        })
    }

    fn later_learner_states(&self, after: Option<usize>, timestamp: i64) -> Vec<usize> {
        let from = after.map_or(0, |i| i + 1);
        (from..self.cursor.len())
            .filter(|&i| {
                self.cursor.original_at(i).is_some_and(|m| {
                    m.message_type == MessageType::LearnerState
                        && !m.is_visual_only_learner_state()
                        && (after.is_some() || m.timestamp > timestamp)
                })
            })
            .collect()
    }

    fn apply_evaluator_update(
        &mut self,
        timestamp: i64,
        update_entire_span: bool,
        request: &EvaluatorUpdateRequest,
        apply_to_future: bool,
    ) -> PlaybackResult<Option<Vec<PatchResult>>> {
        if request.node_name.trim().is_empty() {
            return Err(PlaybackError::invalid("evaluator update names no node"));
        }

        let anchor = self.anchor_learner_state(timestamp);
        let mut targets: Vec<usize> = anchor.into_iter().collect();
        if apply_to_future {
            targets.extend(self.later_learner_states(anchor, timestamp));
        }
        // Patching may add a learner state and shift indices, so targets are
        // tracked by their unique timestamps.
        let targets: Vec<i64> = targets
            .into_iter()
            .filter_map(|i| self.cursor.original_at(i).map(|m| m.timestamp))
            .collect();

        let mut results = Vec::new();
        let mut last_state: Option<NodeState> = None;
        for (n, target_time) in targets.into_iter().enumerate() {
            let Some(index) = self.learner_state_at(target_time) else {
                continue;
            };
            let Some(msg) = self.cursor.message_at(index).map(Cow::into_owned) else {
                continue;
            };
            let Some(ls) = msg.learner_state() else {
                continue;
            };
            let Some(attr) = ls.performance.attribute(&request.node_name) else {
                if n == 0 && anchor.is_some() && self.assessment.is_none() {
                    warn!(node = %request.node_name, timestamp, "node not found in anchor learner state");
                    return Ok(None);
                }
                continue;
            };

            if let Some(last) = last_state {
                if !last.continues_into(attr.node_state) {
                    debug!(node = %request.node_name, index, "node left its lifecycle run");
                    break;
                }
            }
            last_state = Some(attr.node_state);

            let attributes = match self.assessment.as_mut() {
                Some(manager) => manager.apply_and_roll_up(request, &ls.performance)?,
                None => {
                    let mut edited = attr.clone();
                    apply_evaluator_update(request, &mut edited);
                    vec![edited]
                }
            };
            if attributes.is_empty() {
                continue;
            }

            let patch_time = if n == 0 && msg.timestamp <= timestamp {
                timestamp
            } else {
                msg.timestamp
            };
            let patch = PatchRequest {
                attributes,
                timestamp: patch_time,
                update_entire_span,
            };
            let mut result = self.cursor.apply_patch(&patch);
            self.finish_patch(&mut result);
            results.push(result);
        }

        info!(node = %request.node_name, timestamp, patched = results.len(), "applied evaluator update");
        Ok(Some(results))
    }

    fn remove_patch(&mut self, timestamp: i64, node_name: &str) -> Option<PatchResult> {
        let mut result = self.cursor.remove_patch(timestamp, node_name)?;
        self.finish_patch(&mut result);
        Some(result)
    }

    fn apply_overall_assessments(
        &mut self,
        timestamp: i64,
        conditions: &BTreeMap<i32, Vec<ScoreNodeUpdate>>,
        course_concepts: &[String],
    ) -> PlaybackResult<Option<PatchResult>> {
        let Some(manager) = self.assessment.as_mut() else {
            debug!(timestamp, "no assessment manager, overall assessments ignored");
            return Ok(None);
        };
        let score = manager.score_overall_assessments(conditions, course_concepts)?;
        let mut result = self.cursor.apply_score_patch(score);
        self.finish_patch(&mut result);
        Ok(Some(result))
    }

    fn calculate_roll_up(
        &mut self,
        conditions: &BTreeMap<i32, Vec<ScoreNodeUpdate>>,
    ) -> PlaybackResult<Option<BTreeMap<i32, AssessmentLevel>>> {
        self.assessment
            .as_mut()
            .map(|manager| manager.calculate_roll_up(conditions))
            .transpose()
    }

    fn delete_patch_file(&mut self) -> PlaybackResult<()> {
        let time = self.playhead_time().unwrap_or(0);
        self.cursor.delete_patch_file()?;
        self.refresh_roster();
        self.seek(&mut |m| m.timestamp >= time);
        Ok(())
    }

    fn scenario_info(&self) -> Option<ScenarioInfo> {
        let mut info = self.assessment.as_ref()?.scenario_info();
        if let Some(msg) = self.cursor.published_score() {
            if let Payload::LessonScore { score, concepts } = &msg.payload {
                info.current_score = score.clone();
                info.course_concepts = concepts.clone();
            }
        }
        Some(info)
    }

    // ── Loop ─────────────────────────────────────────────────────────────

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PlaybackCommand>) {
        loop {
            tokio::select! {
                biased;
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("playback actor shutting down: channel closed");
                        break;
                    };
                    if self.handle_command(cmd) == Flow::Stop {
                        break;
                    }
                }
                () = wait_for(self.deadline) => {
                    self.deadline = None;
                    self.execute_next();
                }
            }
        }
        self.terminated.store(true, Ordering::Release);
    }

    fn handle_command(&mut self, cmd: PlaybackCommand) -> Flow {
        match cmd {
            // ── Timeline ─────────────────────────────────────────────
            PlaybackCommand::Start { ignore_delay, reply } => {
                self.start(ignore_delay);
                let _ = reply.send(());
            }
            PlaybackCommand::Pause { reply } => {
                self.pause();
                let _ = reply.send(());
            }
            PlaybackCommand::Seek { target, reply } => {
                let landed = match target {
                    SeekTarget::Time(time) => self.seek(&mut |m| m.timestamp >= time),
                    SeekTarget::ActivationStart(name) => self.seek(&mut |m| activates(m, &name)),
                    SeekTarget::Matching(mut filter) => self.seek(&mut |m| filter(m)),
                };
                let _ = reply.send(landed);
            }
            PlaybackCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            PlaybackCommand::Terminate { reply } => {
                self.terminate();
                let _ = reply.send(());
                return Flow::Stop;
            }

            // ── Patching ─────────────────────────────────────────────
            PlaybackCommand::PatchAttribute {
                timestamp,
                attribute,
                reply,
            } => {
                let _ = reply.send(self.patch_attribute(timestamp, attribute));
            }
            PlaybackCommand::EvaluatorUpdate {
                timestamp,
                update_entire_span,
                request,
                apply_to_future,
                reply,
            } => {
                let result = self.apply_evaluator_update(timestamp, update_entire_span, &request, apply_to_future);
                let _ = reply.send(result);
            }
            PlaybackCommand::RemovePatch {
                timestamp,
                node_name,
                reply,
            } => {
                let _ = reply.send(self.remove_patch(timestamp, &node_name));
            }
            PlaybackCommand::OverallAssessments {
                timestamp,
                conditions,
                course_concepts,
                reply,
            } => {
                let _ = reply.send(self.apply_overall_assessments(timestamp, &conditions, &course_concepts));
            }
            PlaybackCommand::CalculateRollUp { conditions, reply } => {
                let _ = reply.send(self.calculate_roll_up(&conditions));
            }
            PlaybackCommand::WritePatchFile { username, reply } => {
                let _ = reply.send(self.cursor.write_patch_file(&username));
            }
            PlaybackCommand::DeletePatchFile { reply } => {
                let _ = reply.send(self.delete_patch_file());
            }

            // ── Session info ─────────────────────────────────────────
            PlaybackCommand::ScenarioInfo { reply } => {
                let _ = reply.send(self.scenario_info());
            }
            PlaybackCommand::IsTeamSession { reply } => {
                let _ = reply.send(self.cursor.is_team_session());
            }
        }
        Flow::Continue
    }
}

// ============================================================================
// Public spawn function
// ============================================================================

/// Spawn a playback actor on the current tokio runtime.
///
/// The entity roster is built here, once, from the prepared cursor. The
/// actor starts stopped at the first message; call
/// [`PlaybackHandle::start`] to play. It exits on terminate or when every
/// handle is dropped.
pub fn spawn_playback(
    cursor: impl PlaybackCursor + 'static,
    sink: impl PlaybackSink,
    assessment: Option<Box<dyn AssessmentManager>>,
    config: PlaybackConfig,
) -> PlaybackHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let terminated = Arc::new(AtomicBool::new(false));
    let entities = EntityRoster::build(&cursor);
    let domain_session_id = cursor.original_at(0).and_then(|m| m.domain_session_id);
    debug!(messages = cursor.len(), entities = entities.len(), "spawning playback actor");

    let actor = PlaybackActor {
        cursor: Box::new(cursor),
        sink: Box::new(sink),
        assessment,
        config,
        entities,
        domain_session_id,
        state: PlaybackState::Stopped,
        pending_delay: None,
        past_present_delta: 0,
        origin: Instant::now(),
        deadline: None,
        terminated: terminated.clone(),
    };
    tokio::spawn(actor.run(rx));
    PlaybackHandle { tx, terminated }
}
