//! Performance assessment tree carried by learner-state messages.
//!
//! A learner state holds a forest of [`PerformanceNode`]s (tasks at the roots,
//! concepts below them). Each node carries a [`PerformanceStateAttribute`]
//! with the current assessment. Observer edits are expressed as
//! [`EvaluatorUpdateRequest`]s and land on a node as a set of changed
//! [`AttributeField`]s.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Assessment level of a performance node.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum AssessmentLevel {
    #[default]
    Unknown,
    BelowExpectation,
    AtExpectation,
    AboveExpectation,
}

/// Activation state of a performance node.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum NodeState {
    #[default]
    Unactivated,
    Active,
    Finished,
    Deactivated,
}

impl NodeState {
    /// Whether an edit carried across a change from `self` to `next` stays
    /// attached to the node.
    ///
    /// Equal states are continuous. ACTIVE to FINISHED is also continuous: a
    /// concept may finish while its task is still running, and the edit stays
    /// visible until the task itself ends. Every other change breaks the run.
    pub fn continues_into(self, next: NodeState) -> bool {
        match (self, next) {
            (a, b) if a == b => true,
            (NodeState::Active, NodeState::Finished) => true,
            _ => false,
        }
    }
}

/// Position of a node in the assessment hierarchy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Task,
    IntermediateConcept,
    Concept,
}

/// Assessment state of one performance node at one instant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceStateAttribute {
    pub name: String,
    pub node_id: i32,
    pub node_state: NodeState,
    pub short_term: AssessmentLevel,
    /// When the short-term assessment was made (epoch millis).
    pub short_term_timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    pub confidence: f32,
    pub competence: f32,
    pub trend: f32,
    pub assessment_hold: bool,
    pub priority_hold: bool,
    pub confidence_hold: bool,
    pub competence_hold: bool,
    pub trend_hold: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observer_comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observer_media: Option<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub assessment_explanation: BTreeSet<String>,
    /// Per team-member assessments. A `None` level marks a visual-only state.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub assessed_team_org_entities: BTreeMap<String, Option<AssessmentLevel>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_assessment_time: Option<i64>,
}

/// Fields an observer edit can change on an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeField {
    ShortTerm,
    ShortTermTimestamp,
    Priority,
    Confidence,
    Competence,
    Trend,
    AssessmentHold,
    PriorityHold,
    ConfidenceHold,
    CompetenceHold,
    TrendHold,
    Evaluator,
    ObserverComment,
    ObserverMedia,
    AssessmentExplanation,
    AssessedTeamOrgEntities,
    PerformanceAssessmentTime,
}

impl PerformanceStateAttribute {
    pub fn new(name: impl Into<String>, node_id: i32, node_state: NodeState) -> Self {
        Self {
            name: name.into(),
            node_id,
            node_state,
            ..Default::default()
        }
    }

    /// Fields whose value in `self` differs from `other`.
    ///
    /// Identity (`name`, `node_id`) and `node_state` are never reported: an
    /// edit changes what was assessed, not where the node sits in its
    /// lifecycle.
    pub fn diff_fields(&self, other: &Self) -> BTreeSet<AttributeField> {
        let mut fields = BTreeSet::new();
        let mut check = |differs: bool, field: AttributeField| {
            if differs {
                fields.insert(field);
            }
        };
        check(self.short_term != other.short_term, AttributeField::ShortTerm);
        check(
            self.short_term_timestamp != other.short_term_timestamp,
            AttributeField::ShortTermTimestamp,
        );
        check(self.priority != other.priority, AttributeField::Priority);
        check(self.confidence != other.confidence, AttributeField::Confidence);
        check(self.competence != other.competence, AttributeField::Competence);
        check(self.trend != other.trend, AttributeField::Trend);
        check(self.assessment_hold != other.assessment_hold, AttributeField::AssessmentHold);
        check(self.priority_hold != other.priority_hold, AttributeField::PriorityHold);
        check(self.confidence_hold != other.confidence_hold, AttributeField::ConfidenceHold);
        check(self.competence_hold != other.competence_hold, AttributeField::CompetenceHold);
        check(self.trend_hold != other.trend_hold, AttributeField::TrendHold);
        check(self.evaluator != other.evaluator, AttributeField::Evaluator);
        check(self.observer_comment != other.observer_comment, AttributeField::ObserverComment);
        check(self.observer_media != other.observer_media, AttributeField::ObserverMedia);
        check(
            self.assessment_explanation != other.assessment_explanation,
            AttributeField::AssessmentExplanation,
        );
        check(
            self.assessed_team_org_entities != other.assessed_team_org_entities,
            AttributeField::AssessedTeamOrgEntities,
        );
        check(
            self.performance_assessment_time != other.performance_assessment_time,
            AttributeField::PerformanceAssessmentTime,
        );
        fields
    }

    /// Copy the listed fields from `source` onto `self`.
    pub fn copy_fields(&mut self, source: &Self, fields: &BTreeSet<AttributeField>) {
        for field in fields {
            match field {
                AttributeField::ShortTerm => self.short_term = source.short_term,
                AttributeField::ShortTermTimestamp => {
                    self.short_term_timestamp = source.short_term_timestamp
                }
                AttributeField::Priority => self.priority = source.priority,
                AttributeField::Confidence => self.confidence = source.confidence,
                AttributeField::Competence => self.competence = source.competence,
                AttributeField::Trend => self.trend = source.trend,
                AttributeField::AssessmentHold => self.assessment_hold = source.assessment_hold,
                AttributeField::PriorityHold => self.priority_hold = source.priority_hold,
                AttributeField::ConfidenceHold => self.confidence_hold = source.confidence_hold,
                AttributeField::CompetenceHold => self.competence_hold = source.competence_hold,
                AttributeField::TrendHold => self.trend_hold = source.trend_hold,
                AttributeField::Evaluator => self.evaluator = source.evaluator.clone(),
                AttributeField::ObserverComment => {
                    self.observer_comment = source.observer_comment.clone()
                }
                AttributeField::ObserverMedia => self.observer_media = source.observer_media.clone(),
                AttributeField::AssessmentExplanation => {
                    self.assessment_explanation = source.assessment_explanation.clone()
                }
                AttributeField::AssessedTeamOrgEntities => {
                    self.assessed_team_org_entities = source.assessed_team_org_entities.clone()
                }
                AttributeField::PerformanceAssessmentTime => {
                    self.performance_assessment_time = source.performance_assessment_time
                }
            }
        }
    }

    /// A visual-only state carries at least one team assessment with no level.
    pub fn is_visual_only(&self) -> bool {
        self.assessed_team_org_entities.values().any(Option::is_none)
    }
}

/// One node of the assessment hierarchy with its current state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceNode {
    #[serde(default)]
    pub kind: NodeKind,
    pub state: PerformanceStateAttribute,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PerformanceNode>,
}

impl PerformanceNode {
    pub fn new(kind: NodeKind, state: PerformanceStateAttribute) -> Self {
        Self {
            kind,
            state,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: PerformanceNode) -> Self {
        self.children.push(child);
        self
    }

    fn find(&self, name: &str) -> Option<&PerformanceNode> {
        if self.state.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut PerformanceNode> {
        if self.state.name == name {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(name))
    }

    fn visit<'a>(&'a self, out: &mut Vec<&'a PerformanceNode>) {
        out.push(self);
        for child in &self.children {
            child.visit(out);
        }
    }
}

/// The performance forest of a learner state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceState {
    #[serde(default)]
    pub tasks: Vec<PerformanceNode>,
}

impl PerformanceState {
    pub fn find(&self, name: &str) -> Option<&PerformanceNode> {
        self.tasks.iter().find_map(|t| t.find(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut PerformanceNode> {
        self.tasks.iter_mut().find_map(|t| t.find_mut(name))
    }

    pub fn attribute(&self, name: &str) -> Option<&PerformanceStateAttribute> {
        self.find(name).map(|n| &n.state)
    }

    /// All nodes in depth-first order, tasks first.
    pub fn nodes(&self) -> Vec<&PerformanceNode> {
        let mut out = Vec::new();
        for task in &self.tasks {
            task.visit(&mut out);
        }
        out
    }

    /// True when any concept under any task is visual-only.
    pub fn is_visual_only(&self) -> bool {
        self.tasks
            .iter()
            .flat_map(|t| {
                let mut nodes = Vec::new();
                t.visit(&mut nodes);
                nodes
            })
            .filter(|n| n.kind != NodeKind::Task)
            .any(|n| n.state.is_visual_only())
    }
}

/// Point-in-time learner assessment snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnerState {
    #[serde(default)]
    pub performance: PerformanceState,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub cognitive: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub affective: serde_json::Value,
}

/// Observer-supplied edit of one performance node.
///
/// Every metric is optional; only the ones present are applied.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorUpdateRequest {
    pub node_name: String,
    pub evaluator: Option<String>,
    /// When the edit was made (epoch millis).
    pub timestamp: i64,
    pub performance_metric: Option<AssessmentLevel>,
    pub competence_metric: Option<f32>,
    pub confidence_metric: Option<f32>,
    pub priority_metric: Option<i32>,
    pub trend_metric: Option<f32>,
    pub assessment_hold: Option<bool>,
    pub priority_hold: Option<bool>,
    pub confidence_hold: Option<bool>,
    pub competence_hold: Option<bool>,
    pub trend_hold: Option<bool>,
    pub reason: Option<String>,
    pub media_file: Option<String>,
    pub team_org_entities: BTreeMap<String, AssessmentLevel>,
}

impl EvaluatorUpdateRequest {
    pub fn new(node_name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            node_name: node_name.into(),
            timestamp,
            ..Default::default()
        }
    }

    pub fn with_performance(mut self, level: AssessmentLevel) -> Self {
        self.performance_metric = Some(level);
        self
    }

    pub fn with_evaluator(mut self, evaluator: impl Into<String>) -> Self {
        self.evaluator = Some(evaluator.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Node of a summative score tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GradedScoreNode {
    pub name: String,
    #[serde(default)]
    pub grade: AssessmentLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<GradedScoreNode>,
}

/// Observer override of one condition under a concept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreNodeUpdate {
    pub name: String,
    pub assessment: AssessmentLevel,
}

// ============================================================================
// Tests
// ============================================================================
