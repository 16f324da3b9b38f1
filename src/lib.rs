//! JobMatch Engine - matching and selection engine for personalized job alerts
//!
//! Given a pool of job postings and a user profile, this library produces a
//! small ranked set of matches: AI scoring where the tier allows it, a
//! deterministic rule-based fallback, city/source diversity rebalancing and
//! fingerprint-keyed result caching.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use crate::core::{policy_for, InputError, Matcher, MatcherSettings, RuleScorer, TierPolicy};
pub use crate::models::{JobCandidate, MatchResult, Provenance, ScoredCandidate, Tier, UserProfile};
pub use crate::services::{CacheStore, MemoryCacheStore, ScoringError, ScoringService};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        // Verify that the library exports work correctly
        let policy = policy_for(Tier::Free);
        assert_eq!(policy.result_count, 5);
    }
}
