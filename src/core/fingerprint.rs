use serde::Serialize;
use sha2::{Digest, Sha256};
use crate::models::{domain::normalize, ExperienceLevel, JobCandidate, Tier, UserProfile};

/// Scoring-relevant view of a profile. Identity is excluded so equivalent
/// profiles share cached results.
#[derive(Debug, Serialize)]
struct ProfileSignature<'a> {
    cities: Vec<String>,
    career_paths: Vec<String>,
    visa_status: Option<String>,
    experience_level: Option<&'a ExperienceLevel>,
    languages: Vec<String>,
    work_environment: Option<String>,
}

#[derive(Debug, Serialize)]
struct FingerprintInput<'a> {
    profile: ProfileSignature<'a>,
    candidate_ids: Vec<&'a str>,
    tier: Tier,
}

/// Hex SHA-256 over (profile signature, sorted candidate ids, tier)
pub fn fingerprint(profile: &UserProfile, candidates: &[JobCandidate], tier: Tier) -> String {
    let mut candidate_ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
    candidate_ids.sort_unstable();
    candidate_ids.dedup();

    let input = FingerprintInput {
        profile: profile_signature(profile),
        candidate_ids,
        tier,
    };

    // Struct fields serialize in declaration order, so the encoding is canonical
    let encoded = serde_json::to_vec(&input).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    format!("{:x}", hasher.finalize())
}

fn profile_signature(profile: &UserProfile) -> ProfileSignature<'_> {
    let mut career_paths: Vec<String> = profile.paths().iter().map(|p| normalize(p)).collect();
    career_paths.sort();
    career_paths.dedup();

    let mut languages: Vec<String> = profile.languages.iter().map(|l| normalize(l)).collect();
    languages.sort();
    languages.dedup();

    ProfileSignature {
        cities: profile.cities().iter().map(|c| normalize(c)).collect(),
        career_paths,
        visa_status: profile.visa_status.as_deref().map(normalize),
        experience_level: profile.experience_level.as_ref(),
        languages,
        work_environment: profile.work_environment.as_deref().map(normalize),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_profile(user_id: &str, cities: &[&str], paths: &[&str]) -> UserProfile {
        UserProfile {
            user_id: user_id.to_string(),
            target_cities: cities.iter().map(|c| c.to_string()).collect(),
            career_paths: paths.iter().map(|p| p.to_string()).collect(),
            tier: Tier::Free,
            visa_status: None,
            experience_level: None,
            languages: vec![],
            work_environment: None,
        }
    }

    fn job(id: &str) -> JobCandidate {
        JobCandidate {
            id: id.to_string(),
            title: "Analyst".to_string(),
            company: String::new(),
            city: String::new(),
            location: None,
            source: String::new(),
            description: String::new(),
            posted_at: None,
            is_early_career: false,
            is_internship: false,
            is_graduate: false,
        }
    }

    #[test]
    fn test_candidate_order_does_not_matter() {
        let profile = create_profile("u1", &["London"], &["Finance", "Tech"]);
        let a = fingerprint(&profile, &[job("1"), job("2")], Tier::Free);
        let b = fingerprint(&profile, &[job("2"), job("1")], Tier::Free);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_equivalent_profiles_share_fingerprint() {
        let a = create_profile("u1", &["London"], &["Finance", "Tech"]);
        let b = create_profile("u2", &["london "], &["Tech", "finance"]);
        let jobs = [job("1")];
        assert_eq!(fingerprint(&a, &jobs, Tier::Free), fingerprint(&b, &jobs, Tier::Free));
    }

    #[test]
    fn test_any_change_misses() {
        let profile = create_profile("u1", &["London", "Berlin"], &["Finance"]);
        let base = fingerprint(&profile, &[job("1")], Tier::Free);
        assert_ne!(base, fingerprint(&profile, &[job("1")], Tier::Premium));
        assert_ne!(base, fingerprint(&profile, &[job("1"), job("2")], Tier::Free));
        let reordered = create_profile("u1", &["Berlin", "London"], &["Finance"]);
        assert_ne!(base, fingerprint(&reordered, &[job("1")], Tier::Free));
    }
}
