use serde::{Deserialize, Serialize};
use validator::Validate;
use crate::models::domain::{JobCandidate, UserProfile};

/// Request to find matches for one profile
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FindMatchesRequest {
    #[validate(nested)]
    pub profile: UserProfile,
    #[serde(default)]
    pub candidates: Vec<JobCandidate>,
}

/// Request to match several profiles in one call
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BatchMatchRequest {
    #[validate(length(min = 1, max = 500))]
    pub requests: Vec<FindMatchesRequest>,
}
