//! Traversal policy: decides what follows a confirmed symptom.
//!
//! Structural children are preferred while the hierarchy has depth left.
//! Once the deepest level is reached, or a symptom has no children, the
//! resolver is consulted with every confirmed symptom. The level only grows
//! along the children path because resolver candidates may span levels.

use crate::repository::Query;
use crate::symptoms::{CropId, Disease, Resolution, Symptom, SymptomId};

pub const DEFAULT_MAX_LEVEL: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalPolicy {
    max_level: u32,
}

/// Next step after a children query returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildrenStep {
    Descend { level: u32, candidates: Vec<Symptom> },
    Fallback(Query),
}

/// Terminal or continuing result of a resolver answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Diagnosed(Disease),
    Alternatives(Vec<Symptom>),
    Exhausted,
}

impl Default for TraversalPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEVEL)
    }
}

impl TraversalPolicy {
    /// Hierarchy depth bound; at least one level always exists.
    pub fn new(max_level: u32) -> Self {
        Self {
            max_level: max_level.max(1),
        }
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Query to issue right after `symptom` was confirmed. `history` already
    /// contains `symptom`.
    pub fn after_confirm(
        &self,
        crop: CropId,
        current_level: u32,
        symptom: &Symptom,
        history: &[Symptom],
    ) -> Query {
        if current_level < self.max_level {
            Query::ChildrenOf {
                crop,
                level: current_level + 1,
                parent: symptom.sid.clone(),
            }
        } else {
            Self::resolve_query(crop, history)
        }
    }

    pub fn after_children(
        &self,
        crop: CropId,
        current_level: u32,
        children: Vec<Symptom>,
        history: &[Symptom],
    ) -> ChildrenStep {
        if children.is_empty() {
            ChildrenStep::Fallback(Self::resolve_query(crop, history))
        } else {
            ChildrenStep::Descend {
                level: current_level + 1,
                candidates: children,
            }
        }
    }

    pub fn after_resolution(&self, resolution: Resolution) -> Outcome {
        match resolution {
            Resolution::Diagnosis(disease) => Outcome::Diagnosed(disease),
            Resolution::Candidates(symptoms) if !symptoms.is_empty() => {
                Outcome::Alternatives(symptoms)
            }
            Resolution::Candidates(_) | Resolution::Nothing => Outcome::Exhausted,
        }
    }

    pub fn resolve_query(crop: CropId, history: &[Symptom]) -> Query {
        Query::Resolve {
            crop,
            confirmed: confirmed_ids(history),
        }
    }
}

/// Confirmed symptom ids in confirmation order, without repeats.
pub fn confirmed_ids(history: &[Symptom]) -> Vec<SymptomId> {
    let mut ids: Vec<SymptomId> = Vec::with_capacity(history.len());
    for symptom in history {
        if !ids.contains(&symptom.sid) {
            ids.push(symptom.sid.clone());
        }
    }
    ids
}
