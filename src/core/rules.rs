use std::cmp::Ordering;
use std::collections::BTreeMap;
use crate::models::{JobCandidate, ScoredCandidate, UserProfile};

const BASE_SCORE: i32 = 50;
const CAREER_MATCH_BONUS: i32 = 30;
const CAREER_MISS_PENALTY: i32 = -20;
const SENIORITY_CONFLICT_PENALTY: i32 = -30;
const CITY_MATCH_BONUS: i32 = 15;
const EARLY_CAREER_BONUS: i32 = 10;
const NO_SPONSORSHIP_PENALTY: i32 = -15;

const BASE_CONFIDENCE: i32 = 40;
const CONFIDENCE_PER_SIGNAL: i32 = 10;
const MAX_CONFIDENCE: i32 = 90;

/// Title markers for postings that need prior experience
const SENIOR_MARKERS: &[&str] = &[
    "senior", "sr", "lead", "principal", "head of", "director", "staff", "manager",
];

const NO_SPONSORSHIP_MARKERS: &[&str] = &[
    "no visa sponsorship",
    "no sponsorship",
    "unable to sponsor",
    "cannot sponsor",
    "not able to sponsor",
    "does not offer sponsorship",
];

/// Synonyms per career path. Keywords and markers match whole words, with an
/// optional plural `s` on the last word.
const CAREER_KEYWORDS: &[(&str, &[&str])] = &[
    ("finance", &["finance", "financial", "investment", "banking", "accounting", "audit", "analyst", "treasury"]),
    ("tech", &["software", "developer", "engineer", "engineering", "programmer", "devops", "backend", "frontend"]),
    ("software", &["software", "developer", "engineer", "programmer", "backend", "frontend"]),
    ("data", &["data", "analytics", "machine learning", "statistics", "bi"]),
    ("marketing", &["marketing", "brand", "growth", "seo", "content", "social media"]),
    ("consulting", &["consulting", "consultant", "advisory", "strategy"]),
    ("sales", &["sales", "business development", "account executive", "account manager"]),
    ("operations", &["operations", "supply chain", "logistics", "procurement"]),
    ("product", &["product", "product manager", "product owner"]),
    ("design", &["design", "designer", "ux", "ui"]),
    ("hr", &["hr", "human resources", "people", "recruiter", "recruiting", "recruitment", "talent"]),
];

/// Deterministic, network-free scorer used as the guaranteed fallback
///
/// Scoring formula:
/// score = 50
///     + 30 if any career-path keyword is in title/description (-20 if paths given but none match)
///     - 30 if the user is entry-level and the title is senior-only
///     + 15 if the posting is in a target city
///     + 10 if the posting is early-career and the user is entry-level
///     - 15 if the user needs sponsorship and the posting offers none
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleScorer;

impl RuleScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score every candidate and return them ranked, best first.
    /// Never drops a candidate.
    pub fn score(&self, profile: &UserProfile, candidates: &[JobCandidate]) -> Vec<ScoredCandidate> {
        let keywords = career_keywords(&profile.paths());
        let cities = profile.cities();

        let mut scored: Vec<ScoredCandidate> = candidates
            .iter()
            .map(|candidate| score_candidate(profile, candidate, &keywords, &cities))
            .collect();

        scored.sort_by(rank_order);
        scored
    }
}

/// Ranking: score desc, confidence desc, newest first, then id
pub fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.match_score
        .cmp(&a.match_score)
        .then_with(|| b.confidence_score.cmp(&a.confidence_score))
        .then_with(|| b.candidate.posted_at.cmp(&a.candidate.posted_at))
        .then_with(|| a.candidate.id.cmp(&b.candidate.id))
}

fn score_candidate(
    profile: &UserProfile,
    candidate: &JobCandidate,
    keywords: &[String],
    cities: &[String],
) -> ScoredCandidate {
    let title = words(&candidate.title);
    let mut text = title.clone();
    text.extend(words(&candidate.description));

    let mut score = BASE_SCORE;
    let mut signals = 0;
    let mut reasons: Vec<String> = Vec::new();
    let mut breakdown = BTreeMap::new();

    // Career path
    let career = if keywords.is_empty() {
        0
    } else if let Some(hit) = keywords.iter().find(|kw| contains_phrase(&text, kw)) {
        signals += 1;
        reasons.push(format!("matches career interest ({})", hit));
        CAREER_MATCH_BONUS
    } else {
        signals += 1;
        reasons.push("outside career interests".to_string());
        CAREER_MISS_PENALTY
    };
    score += career;
    breakdown.insert("careerFit".to_string(), component(career, CAREER_MISS_PENALTY, CAREER_MATCH_BONUS));

    // Seniority
    let mut seniority = 0;
    if profile.is_entry_level() {
        if !candidate.early_career() && is_senior_only(&title) {
            signals += 1;
            reasons.push("requires more experience".to_string());
            seniority = SENIORITY_CONFLICT_PENALTY;
        } else if candidate.early_career() {
            reasons.push("early-career role".to_string());
            seniority = EARLY_CAREER_BONUS;
        }
    }
    score += seniority;
    breakdown.insert(
        "seniority".to_string(),
        component(seniority, SENIORITY_CONFLICT_PENALTY, EARLY_CAREER_BONUS),
    );

    // Location
    let location = match cities.iter().find(|city| candidate.in_city(city)) {
        Some(city) => {
            signals += 1;
            reasons.push(format!("located in {}", city));
            CITY_MATCH_BONUS
        }
        None => 0,
    };
    score += location;
    breakdown.insert("location".to_string(), component(location, 0, CITY_MATCH_BONUS));

    // Visa
    let visa = if profile.needs_sponsorship() && offers_no_sponsorship(&text) {
        signals += 1;
        reasons.push("no visa sponsorship".to_string());
        NO_SPONSORSHIP_PENALTY
    } else {
        0
    };
    score += visa;
    breakdown.insert("visa".to_string(), component(visa, NO_SPONSORSHIP_PENALTY, 0));

    let confidence = (BASE_CONFIDENCE + signals * CONFIDENCE_PER_SIGNAL).min(MAX_CONFIDENCE);
    let reason = if reasons.is_empty() {
        "baseline rule match".to_string()
    } else {
        capitalize(&reasons.join(", "))
    };

    ScoredCandidate {
        candidate: candidate.clone(),
        match_score: clamp_score(score),
        confidence_score: clamp_score(confidence),
        reason,
        score_breakdown: Some(breakdown),
    }
}

/// Clamp to the 0-100 score range
#[inline]
pub fn clamp_score(value: i32) -> u8 {
    value.clamp(0, 100) as u8
}

/// Map a delta within [min, max] onto 0-100
#[inline]
fn component(delta: i32, min: i32, max: i32) -> u8 {
    if max == min {
        return 50;
    }
    clamp_score((delta - min) * 100 / (max - min))
}

#[inline]
fn is_senior_only(title: &[String]) -> bool {
    SENIOR_MARKERS.iter().any(|marker| contains_phrase(title, marker))
}

#[inline]
fn offers_no_sponsorship(text: &[String]) -> bool {
    NO_SPONSORSHIP_MARKERS.iter().any(|marker| contains_phrase(text, marker))
}

/// Lower-case alphanumeric words of `text`
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// True if the words of `phrase` appear consecutively in `text`
fn contains_phrase(text: &[String], phrase: &str) -> bool {
    let wanted = words(phrase);
    let Some((last, head)) = wanted.split_last() else {
        return false;
    };
    text.windows(wanted.len()).any(|window| {
        window.split_last().is_some_and(|(tail, lead)| {
            lead == head && (tail == last || tail.strip_suffix('s') == Some(last.as_str()))
        })
    })
}

/// Expand career paths into lower-case keywords, deduplicated and sorted
pub fn career_keywords(paths: &[String]) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for path in paths {
        let lower = path.to_lowercase();
        for (name, synonyms) in CAREER_KEYWORDS {
            if lower.contains(name) {
                keywords.extend(synonyms.iter().map(|s| s.to_string()));
            }
        }
        keywords.extend(
            lower
                .split(|c: char| !c.is_alphanumeric())
                .filter(|word| word.len() > 2 && *word != "and")
                .map(str::to_string),
        );
    }
    keywords.sort();
    keywords.dedup();
    keywords
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExperienceLevel, Tier};

    fn create_test_profile(paths: &[&str], cities: &[&str]) -> UserProfile {
        UserProfile {
            user_id: "user".to_string(),
            target_cities: cities.iter().map(|c| c.to_string()).collect(),
            career_paths: paths.iter().map(|p| p.to_string()).collect(),
            tier: Tier::Free,
            visa_status: None,
            experience_level: None,
            languages: vec![],
            work_environment: None,
        }
    }

    fn create_test_job(id: &str, title: &str, city: &str) -> JobCandidate {
        JobCandidate {
            id: id.to_string(),
            title: title.to_string(),
            company: "Acme".to_string(),
            city: city.to_string(),
            location: None,
            source: "reed".to_string(),
            description: String::new(),
            posted_at: None,
            is_early_career: false,
            is_internship: false,
            is_graduate: false,
        }
    }

    #[test]
    fn test_career_match_bonus() {
        let profile = create_test_profile(&["Finance"], &[]);
        let scored = RuleScorer::new().score(&profile, &[create_test_job("1", "Finance Analyst", "Paris")]);
        assert_eq!(scored[0].match_score, 80);
    }

    #[test]
    fn test_career_miss_penalty() {
        let profile = create_test_profile(&["Finance"], &[]);
        let scored = RuleScorer::new().score(&profile, &[create_test_job("1", "Barista", "Paris")]);
        assert_eq!(scored[0].match_score, 30);
    }

    #[test]
    fn test_no_paths_keeps_baseline() {
        let profile = create_test_profile(&[], &[]);
        let scored = RuleScorer::new().score(&profile, &[create_test_job("1", "Barista", "Paris")]);
        assert_eq!(scored[0].match_score, 50);
        assert_eq!(scored[0].reason, "baseline rule match");
    }

    #[test]
    fn test_seniority_conflict() {
        let profile = create_test_profile(&[], &[]);
        let scored = RuleScorer::new().score(&profile, &[create_test_job("1", "Senior Engineer", "Paris")]);
        assert_eq!(scored[0].match_score, 20);

        let mut senior = create_test_profile(&[], &[]);
        senior.experience_level = Some(ExperienceLevel::Senior);
        let scored = RuleScorer::new().score(&senior, &[create_test_job("1", "Senior Engineer", "Paris")]);
        assert_eq!(scored[0].match_score, 50);
    }

    #[test]
    fn test_city_and_early_career_bonus() {
        let profile = create_test_profile(&[], &["London"]);
        let mut job = create_test_job("1", "Graduate Scheme", "london");
        job.is_graduate = true;
        let scored = RuleScorer::new().score(&profile, &[job]);
        assert_eq!(scored[0].match_score, 75);
    }

    #[test]
    fn test_sponsorship_penalty() {
        let mut profile = create_test_profile(&[], &[]);
        profile.visa_status = Some("Needs sponsorship".to_string());
        let mut job = create_test_job("1", "Analyst", "Paris");
        job.description = "Unfortunately we are unable to sponsor visas.".to_string();
        let scored = RuleScorer::new().score(&profile, &[job]);
        assert_eq!(scored[0].match_score, 35);
    }

    #[test]
    fn test_scores_every_candidate_and_ranks() {
        let profile = create_test_profile(&["Finance"], &["London"]);
        let jobs = vec![
            create_test_job("a", "Barista", "Berlin"),
            create_test_job("b", "Finance Graduate", "London"),
            create_test_job("c", "Senior Director", "Berlin"),
        ];
        let scored = RuleScorer::new().score(&profile, &jobs);
        assert_eq!(scored.len(), 3);
        assert_eq!(scored[0].candidate.id, "b");
        assert_eq!(scored[2].candidate.id, "c");
        assert!(scored.iter().all(|s| s.match_score <= 100 && s.confidence_score <= 100));
    }

    #[test]
    fn test_markers_match_whole_words() {
        let profile = create_test_profile(&[], &[]);
        let jobs = vec![
            create_test_job("1", "Staffing Coordinator", "Paris"),
            create_test_job("2", "Leadership Programme Associate", "Paris"),
        ];
        let scored = RuleScorer::new().score(&profile, &jobs);
        assert!(scored.iter().all(|s| s.match_score == 50), "{:?}", scored);

        let scored = RuleScorer::new().score(&profile, &[create_test_job("3", "Team Lead", "Paris")]);
        assert_eq!(scored[0].match_score, 20);
    }

    #[test]
    fn test_short_keywords_need_word_boundaries() {
        let profile = create_test_profile(&["HR"], &[]);
        let mut job = create_test_job("1", "Warehouse Assistant", "Paris");
        job.description = "Three month placement through partners.".to_string();
        let scored = RuleScorer::new().score(&profile, &[job]);
        assert_eq!(scored[0].match_score, 30);

        let mut job = create_test_job("2", "HR Assistant", "Paris");
        job.description = "Supporting our recruiters.".to_string();
        let scored = RuleScorer::new().score(&profile, &[job]);
        assert_eq!(scored[0].match_score, 80);
    }

    #[test]
    fn test_phrases_allow_plural() {
        let text = words("Junior Data Analysts, Head of  Sales");
        assert!(contains_phrase(&text, "analyst"));
        assert!(contains_phrase(&text, "head of"));
        assert!(!contains_phrase(&text, "head sales"));
        assert!(!contains_phrase(&text, ""));
    }

    #[test]
    fn test_keywords_expand_synonyms() {
        let keywords = career_keywords(&["Finance & Banking".to_string()]);
        assert!(keywords.contains(&"investment".to_string()));
        assert!(keywords.contains(&"banking".to_string()));
    }
}
