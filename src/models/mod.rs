// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    Algorithm, CacheEntry, DiversityAllocation, ExperienceLevel, JobCandidate, MatchResult,
    Provenance, ScoredCandidate, Tier, UserProfile,
};
pub use requests::{BatchMatchRequest, FindMatchesRequest};
pub use responses::{BatchMatchItem, BatchMatchResponse, ErrorResponse, FindMatchesResponse, HealthResponse};
