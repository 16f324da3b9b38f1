use crate::models::Tier;

/// Sizing and AI rules for one subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    pub result_count: usize,
    pub use_ai: bool,
    pub max_candidates_for_ai: usize,
    /// Minimum valid AI entries for an AI result, and the number of
    /// consecutive AI failures tolerated before AI is skipped
    pub fallback_threshold: usize,
    pub include_score_breakdown: bool,
}

/// Single source of truth for tier sizing
pub const fn policy_for(tier: Tier) -> TierPolicy {
    match tier {
        Tier::Free => TierPolicy {
            result_count: 5,
            use_ai: true,
            max_candidates_for_ai: 50,
            fallback_threshold: 3,
            include_score_breakdown: false,
        },
        Tier::Premium => TierPolicy {
            result_count: 10,
            use_ai: true,
            max_candidates_for_ai: 100,
            fallback_threshold: 5,
            include_score_breakdown: true,
        },
    }
}
