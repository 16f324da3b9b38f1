use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Job posting supplied by the candidate pool provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct JobCandidate {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub city: String,
    /// Free-text location as scraped, e.g. "London, England, UK"
    #[serde(default)]
    pub location: Option<String>,
    /// Originating job board or platform
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "postedAt", default)]
    pub posted_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "isEarlyCareer", default)]
    pub is_early_career: bool,
    #[serde(rename = "isInternship", default)]
    pub is_internship: bool,
    #[serde(rename = "isGraduate", default)]
    pub is_graduate: bool,
}

impl JobCandidate {
    /// Any of the early-career flags set
    pub fn early_career(&self) -> bool {
        self.is_early_career || self.is_internship || self.is_graduate
    }

    /// Whether this posting is in `city` (case-insensitive exact match on the
    /// normalized city, else substring match against the free-text location)
    pub fn in_city(&self, city: &str) -> bool {
        let wanted = normalize(city);
        if wanted.is_empty() {
            return false;
        }
        if normalize(&self.city) == wanted {
            return true;
        }
        self.location
            .as_deref()
            .map(|loc| normalize(loc).contains(&wanted))
            .unwrap_or(false)
    }
}

/// Lower-cased, trimmed form used for city and source comparisons
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Entry,
    Mid,
    Senior,
}

/// User profile supplied per request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UserProfile {
    #[validate(length(min = 1))]
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Declared order is significant: it breaks ties in diversity allocation
    #[serde(rename = "targetCities", default)]
    pub target_cities: Vec<String>,
    #[serde(rename = "careerPaths", default)]
    pub career_paths: Vec<String>,
    pub tier: Tier,
    #[serde(rename = "visaStatus", default)]
    pub visa_status: Option<String>,
    #[serde(rename = "experienceLevel", default)]
    pub experience_level: Option<ExperienceLevel>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(rename = "workEnvironment", default)]
    pub work_environment: Option<String>,
}

impl UserProfile {
    /// Early-career product: no declared level counts as entry-level
    pub fn is_entry_level(&self) -> bool {
        matches!(self.experience_level, None | Some(ExperienceLevel::Entry))
    }

    /// Whether the visa status indicates the user needs sponsorship
    pub fn needs_sponsorship(&self) -> bool {
        self.visa_status
            .as_deref()
            .map(|status| {
                let status = status.to_lowercase();
                status.contains("sponsor") || status.contains("requires visa")
            })
            .unwrap_or(false)
    }

    /// Target cities with blanks and duplicates removed, declared order kept
    pub fn cities(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for city in &self.target_cities {
            let trimmed = city.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !seen.iter().any(|c: &String| normalize(c) == normalize(trimmed)) {
                seen.push(trimmed.to_string());
            }
        }
        seen
    }

    /// Career paths with blanks removed
    pub fn paths(&self) -> Vec<String> {
        self.career_paths
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

/// A candidate with a score from either scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: JobCandidate,
    #[serde(rename = "matchScore")]
    pub match_score: u8,
    #[serde(rename = "confidenceScore")]
    pub confidence_score: u8,
    pub reason: String,
    #[serde(rename = "scoreBreakdown", default, skip_serializing_if = "Option::is_none")]
    pub score_breakdown: Option<BTreeMap<String, u8>>,
}

/// Per-city slot allocation computed by the rebalancer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiversityAllocation {
    pub city: String,
    pub target_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Ai,
    Rules,
    Hybrid,
}

/// How a result was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub algorithm: Algorithm,
    #[serde(rename = "cacheHit")]
    pub cache_hit: bool,
    #[serde(rename = "latencyMs")]
    pub latency_ms: u64,
    #[serde(rename = "costUnits")]
    pub cost_units: u32,
    #[serde(rename = "fallbackReason", default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// Ranked matches plus provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matches: Vec<ScoredCandidate>,
    pub provenance: Provenance,
}

/// Memoized result owned by the cache store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub result: MatchResult,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let ttl = chrono::Duration::seconds(self.ttl_secs.min(i64::MAX as u64) as i64);
        self.created_at + ttl <= now
    }
}
