//! Retroactive assessment edit requests and their outcomes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::message::Message;
use crate::performance::{AttributeField, PerformanceStateAttribute};

/// A set of attribute edits anchored at one instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub attributes: Vec<PerformanceStateAttribute>,
    /// Epoch millis the edit applies at.
    pub timestamp: i64,
    /// Patch every earlier message in the same unbroken assessment run too.
    #[serde(default)]
    pub update_entire_span: bool,
}

impl PatchRequest {
    pub fn new(attributes: Vec<PerformanceStateAttribute>, timestamp: i64) -> Result<Self, TypesError> {
        if attributes.is_empty() {
            return Err(TypesError::InvalidArgument("patch request has no attributes".into()));
        }
        if let Some(blank) = attributes.iter().find(|a| a.name.trim().is_empty()) {
            return Err(TypesError::InvalidArgument(format!(
                "patch attribute for node {} has a blank name",
                blank.node_id
            )));
        }
        Ok(Self {
            attributes,
            timestamp,
            update_entire_span: false,
        })
    }

    pub fn entire_span(mut self, update_entire_span: bool) -> Self {
        self.update_entire_span = update_entire_span;
        self
    }
}

/// Identity of one applied patch: the node it edits and the instant it was
/// anchored at.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatchId {
    pub node_name: String,
    pub anchor: i64,
}

/// An edit of one node: the patched attribute plus which of its fields to
/// copy onto the node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributePatch {
    pub id: PatchId,
    pub attribute: PerformanceStateAttribute,
    pub fields: BTreeSet<AttributeField>,
}

impl AttributePatch {
    /// Build the patch turning `source` into `patched`, or `None` when they
    /// already agree.
    pub fn between(source: &PerformanceStateAttribute, patched: &PerformanceStateAttribute, anchor: i64) -> Option<Self> {
        let fields = patched.diff_fields(source);
        if fields.is_empty() {
            return None;
        }
        Some(Self {
            id: PatchId {
                node_name: patched.name.clone(),
                anchor,
            },
            attribute: patched.clone(),
            fields,
        })
    }

    pub fn apply(&self, target: &mut PerformanceStateAttribute) {
        target.copy_fields(&self.attribute, &self.fields);
    }
}

/// Outcome of applying or removing a patch.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PatchResult {
    /// Index of the message the edit is anchored on.
    pub current_index: Option<usize>,
    /// That message as it reads after the edit.
    pub current_message: Option<Message>,
    /// Every message index whose effective content changed.
    pub affected: Vec<usize>,
    /// Node attributes written, target node first, topmost ancestor last.
    pub node_patches: Vec<PerformanceStateAttribute>,
}

impl PatchResult {
    pub fn is_empty(&self) -> bool {
        self.current_index.is_none() && self.affected.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
