// Core engine exports
pub mod batch;
pub mod diversity;
pub mod fingerprint;
pub mod matcher;
pub mod policy;
pub mod prompt;
pub mod rules;

pub use batch::{BatchError, BatchJob, BatchRunner, BatchSettings};
pub use diversity::{allocate_cities, DiversityRebalancer};
pub use fingerprint::fingerprint;
pub use matcher::{InputError, Matcher, MatcherSettings};
pub use policy::{policy_for, TierPolicy};
pub use prompt::{PromptBuilder, ScoringRequest};
pub use rules::RuleScorer;
