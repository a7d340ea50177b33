//! Domain types shared by every stage of a verification run.

pub mod corpus;
pub mod error;
pub mod result;
pub mod stage;
pub mod tier;
pub mod verdict;

pub use corpus::{content_digest, CorpusItem, ExcludedItem};
pub use error::{ConfigError, CorpusError, RuleError, TierError};
pub use result::{ClassifiedError, OutputMismatch, PipelineResult, HARNESS_ERROR};
pub use stage::{Stage, StageOutcome, StageStatus};
pub use tier::{Tier, TierAssessment, TierProfile};
pub use verdict::Verdict;
