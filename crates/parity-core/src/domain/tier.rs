//! Annotation-quality tiers used to stratify results.
//!
//! Tiers are a coarse heuristic signal, never ground truth about an item.

use serde::{Deserialize, Serialize};

/// Coarse annotation tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Tier 1: adequately (or partially) annotated.
    Annotated,
    /// Tier 2: no annotations observed.
    Unannotated,
}

impl Tier {
    pub fn ordinal(&self) -> u8 {
        match self {
            Tier::Annotated => 1,
            Tier::Unannotated => 2,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Tier> {
        match ordinal {
            1 => Some(Tier::Annotated),
            2 => Some(Tier::Unannotated),
            _ => None,
        }
    }

    /// Key used for the per-tier breakdown in reports.
    pub fn key(&self) -> &'static str {
        match self {
            Tier::Annotated => "tier1",
            Tier::Unannotated => "tier2",
        }
    }
}

/// Annotation counts and derived tier for one item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierProfile {
    /// Function and method definitions.
    pub callable_count: u32,

    /// Parameters across all callables.
    pub parameter_count: u32,

    /// Parameters carrying a type annotation.
    pub param_annotations: u32,

    /// Callables carrying a return annotation.
    pub return_annotations: u32,

    /// Standalone annotated bindings (`x: int = 0`).
    pub variable_annotations: u32,

    /// Annotations observed / annotations expected.
    pub annotation_ratio: f64,

    /// Derived tier.
    pub tier: Tier,

    /// Human-readable explanation of the tier.
    pub reason: String,
}

impl TierProfile {
    /// Total annotations of any kind.
    pub fn total_annotations(&self) -> u32 {
        self.param_annotations + self.return_annotations + self.variable_annotations
    }
}

/// How (or whether) an item was tiered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TierAssessment {
    /// Computed by the classifier.
    Classified { profile: TierProfile },
    /// Pre-tagged by the corpus manifest.
    Tagged { tier: Tier },
    /// Source did not parse; excluded from tiering only.
    ParseError { message: String },
}

impl TierAssessment {
    pub fn tier(&self) -> Option<Tier> {
        match self {
            TierAssessment::Classified { profile } => Some(profile.tier),
            TierAssessment::Tagged { tier } => Some(*tier),
            TierAssessment::ParseError { .. } => None,
        }
    }
}
