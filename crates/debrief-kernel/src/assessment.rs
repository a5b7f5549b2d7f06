//! Assessment manager seam and the legacy single-node update.
//!
//! Logs recorded with their assessment definition get an
//! [`AssessmentManager`] that rolls an edit up the node hierarchy. Older
//! logs have none; for those [`apply_evaluator_update`] edits only the
//! targeted node.

use std::collections::BTreeMap;

use debrief_types::{
    AssessmentLevel, EvaluatorUpdateRequest, GradedScoreNode, PerformanceState, PerformanceStateAttribute,
    ScoreNodeUpdate,
};
use serde::{Deserialize, Serialize};

use crate::error::PlaybackResult;

/// Structure of the scenario behind a session, with its latest score.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Task and concept tree as defined by the scenario.
    #[serde(default)]
    pub structure: PerformanceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_score: Option<GradedScoreNode>,
    #[serde(default)]
    pub course_concepts: Vec<String>,
}

/// Assessment logic backed by the session's scenario definition.
pub trait AssessmentManager: Send {
    /// Apply `request` to `state` and roll the change up. Returns every
    /// modified attribute, target node first and topmost ancestor last.
    fn apply_and_roll_up(
        &mut self,
        request: &EvaluatorUpdateRequest,
        state: &PerformanceState,
    ) -> PlaybackResult<Vec<PerformanceStateAttribute>>;

    /// Score the whole session from observer condition assessments, keyed by
    /// concept node id.
    fn score_overall_assessments(
        &mut self,
        conditions: &BTreeMap<i32, Vec<ScoreNodeUpdate>>,
        course_concepts: &[String],
    ) -> PlaybackResult<GradedScoreNode>;

    /// Roll condition assessments up without touching any message.
    fn calculate_roll_up(
        &mut self,
        conditions: &BTreeMap<i32, Vec<ScoreNodeUpdate>>,
    ) -> PlaybackResult<BTreeMap<i32, AssessmentLevel>>;

    fn scenario_info(&self) -> ScenarioInfo;
}

/// Apply an observer edit directly to one attribute.
///
/// Team assessments in the request replace the recorded ones. A new
/// performance level without team members is broadcast to every member
/// already assessed. Comment and media are always overwritten; the other
/// metrics and hold flags only when present. The explanation becomes the
/// observer's reason, or a generated line naming the assessed members.
pub fn apply_evaluator_update(request: &EvaluatorUpdateRequest, attr: &mut PerformanceStateAttribute) {
    let has_team_members = !request.team_org_entities.is_empty();
    if has_team_members {
        attr.assessed_team_org_entities = request
            .team_org_entities
            .iter()
            .map(|(name, level)| (name.clone(), Some(*level)))
            .collect();
    }

    if let Some(level) = request.performance_metric {
        attr.short_term = level;
        attr.short_term_timestamp = request.timestamp;
        if !has_team_members {
            for assessed in attr.assessed_team_org_entities.values_mut() {
                *assessed = Some(level);
            }
        }
    }

    attr.observer_comment = request.reason.clone();
    attr.observer_media = request.media_file.clone();

    if let Some(v) = request.competence_metric {
        attr.competence = v;
    }
    if let Some(v) = request.confidence_metric {
        attr.confidence = v;
    }
    if let Some(v) = request.priority_metric {
        attr.priority = Some(v);
    }
    if let Some(v) = request.trend_metric {
        attr.trend = v;
    }
    if let Some(evaluator) = &request.evaluator {
        attr.evaluator = Some(evaluator.clone());
    }

    if let Some(v) = request.assessment_hold {
        attr.assessment_hold = v;
    }
    if let Some(v) = request.priority_hold {
        attr.priority_hold = v;
    }
    if let Some(v) = request.confidence_hold {
        attr.confidence_hold = v;
    }
    if let Some(v) = request.competence_hold {
        attr.competence_hold = v;
    }
    if let Some(v) = request.trend_hold {
        attr.trend_hold = v;
    }

    attr.performance_assessment_time = Some(request.timestamp);

    let reason = request.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
    if let Some(reason) = reason {
        attr.assessment_explanation.clear();
        attr.assessment_explanation.insert(reason.to_string());
    } else if has_team_members {
        let names: Vec<&str> = request.team_org_entities.keys().map(String::as_str).collect();
        let verb = if names.len() == 1 { "has" } else { "have" };
        attr.assessment_explanation.clear();
        attr.assessment_explanation
            .insert(format!("[{}] {verb} been assessed.", names.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use debrief_types::NodeState;

    fn attr() -> PerformanceStateAttribute {
        let mut attr = PerformanceStateAttribute::new("Hold fire", 3, NodeState::Active);
        attr.assessed_team_org_entities.insert("alpha".into(), Some(AssessmentLevel::AtExpectation));
        attr.assessed_team_org_entities.insert("bravo".into(), Some(AssessmentLevel::Unknown));
        attr.observer_comment = Some("old".into());
        attr.competence = 0.5;
        attr
    }

    #[test]
    fn test_level_broadcast_without_team_members() {
        let mut a = attr();
        let request = EvaluatorUpdateRequest::new("Hold fire", 1_000)
            .with_performance(AssessmentLevel::BelowExpectation)
            .with_evaluator("lead");
        apply_evaluator_update(&request, &mut a);

        assert_eq!(a.short_term, AssessmentLevel::BelowExpectation);
        assert_eq!(a.short_term_timestamp, 1_000);
        assert!(a
            .assessed_team_org_entities
            .values()
            .all(|l| *l == Some(AssessmentLevel::BelowExpectation)));
        assert_eq!(a.evaluator.as_deref(), Some("lead"));
        assert_eq!(a.observer_comment, None);
        assert_eq!(a.competence, 0.5);
        assert_eq!(a.performance_assessment_time, Some(1_000));
        assert!(a.assessment_explanation.is_empty());
    }

    #[test]
    fn test_team_members_replace_and_explain() {
        let mut a = attr();
        let mut request = EvaluatorUpdateRequest::new("Hold fire", 2_000);
        request
            .team_org_entities
            .insert("charlie".into(), AssessmentLevel::AboveExpectation);
        request.assessment_hold = Some(true);
        request.competence_metric = Some(0.9);
        apply_evaluator_update(&request, &mut a);

        assert_eq!(a.assessed_team_org_entities.len(), 1);
        assert!(a.assessment_hold);
        assert_eq!(a.competence, 0.9);
        assert_eq!(
            a.assessment_explanation.iter().next().map(String::as_str),
            Some("[charlie] has been assessed.")
        );
    }

    #[test]
    fn test_reason_wins_explanation() {
        let mut a = attr();
        let mut request = EvaluatorUpdateRequest::new("Hold fire", 3_000).with_reason("fired early");
        request.team_org_entities.insert("alpha".into(), AssessmentLevel::BelowExpectation);
        request.team_org_entities.insert("bravo".into(), AssessmentLevel::BelowExpectation);
        apply_evaluator_update(&request, &mut a);

        assert_eq!(a.observer_comment.as_deref(), Some("fired early"));
        assert_eq!(
            a.assessment_explanation.iter().collect::<Vec<_>>(),
            vec!["fired early"]
        );
    }
}
