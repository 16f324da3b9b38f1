use std::fmt::Write;
use crate::core::policy::TierPolicy;
use crate::models::{JobCandidate, UserProfile};

/// Characters of each description included in the prompt
const DESCRIPTION_PREVIEW_CHARS: usize = 200;

/// Breakdown dimensions requested from the scoring service on premium
pub const BREAKDOWN_DIMENSIONS: &[&str] = &["careerFit", "location", "seniority", "visa"];

/// A fully built request for the external scoring service
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringRequest {
    pub user_id: String,
    pub system: String,
    pub prompt: String,
    /// Candidates in prompt index order; `jobIndex` refers to positions here
    pub candidates: Vec<JobCandidate>,
    pub include_score_breakdown: bool,
}

/// Builds tier-appropriate scoring prompts. Output is a pure function of its
/// inputs, so identical inputs give byte-identical requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(
        &self,
        profile: &UserProfile,
        candidates: &[JobCandidate],
        policy: &TierPolicy,
    ) -> ScoringRequest {
        let window: Vec<JobCandidate> = candidates
            .iter()
            .take(policy.max_candidates_for_ai)
            .cloned()
            .collect();

        let mut prompt = String::new();
        write_profile(&mut prompt, profile);
        prompt.push('\n');
        write_candidates(&mut prompt, &window);
        prompt.push('\n');
        write_output_schema(&mut prompt, policy, window.len());

        ScoringRequest {
            user_id: profile.user_id.clone(),
            system: system_message(policy),
            prompt,
            candidates: window,
            include_score_breakdown: policy.include_score_breakdown,
        }
    }
}

fn system_message(policy: &TierPolicy) -> String {
    let mut system = String::from(
        "You are a careers advisor matching early-career job seekers to job postings. \
         Judge each posting against the candidate's target cities, career interests, \
         experience level and visa situation. Respond with JSON only.",
    );
    if policy.include_score_breakdown {
        system.push_str(
            " Give a detailed per-dimension assessment for every posting you return.",
        );
    } else {
        system.push_str(" Keep each reason to one short sentence.");
    }
    system
}

fn write_profile(out: &mut String, profile: &UserProfile) {
    let mut paths = profile.paths();
    paths.sort();

    out.push_str("CANDIDATE PROFILE\n");
    let _ = writeln!(out, "Target cities (in order of preference): {}", join_or_none(&profile.cities()));
    let _ = writeln!(out, "Career interests: {}", join_or_none(&paths));
    let _ = writeln!(
        out,
        "Experience level: {}",
        match profile.experience_level {
            Some(level) => format!("{:?}", level).to_lowercase(),
            None => "entry".to_string(),
        }
    );
    let _ = writeln!(out, "Visa status: {}", profile.visa_status.as_deref().unwrap_or("not specified"));
    if !profile.languages.is_empty() {
        let mut languages = profile.languages.clone();
        languages.sort();
        let _ = writeln!(out, "Languages: {}", languages.join(", "));
    }
    if let Some(env) = profile.work_environment.as_deref() {
        let _ = writeln!(out, "Work environment: {}", env);
    }
}

fn write_candidates(out: &mut String, candidates: &[JobCandidate]) {
    let _ = writeln!(out, "JOB POSTINGS ({})", candidates.len());
    for (index, job) in candidates.iter().enumerate() {
        let _ = writeln!(
            out,
            "[{}] {} | {} | {} | {} | {} | {}",
            index,
            one_line(&job.title),
            one_line(&job.company),
            one_line(&job.city),
            one_line(&job.source),
            if job.early_career() { "early-career" } else { "unflagged" },
            preview(&job.description),
        );
    }
}

fn write_output_schema(out: &mut String, policy: &TierPolicy, candidate_count: usize) {
    let max_entries = (policy.result_count * 2).min(candidate_count);
    out.push_str("OUTPUT FORMAT\n");
    let _ = writeln!(
        out,
        "Return a JSON array with the best {} postings, best first. Refer to postings ONLY by \
         their bracketed number as jobIndex (0 to {}); never by title.",
        max_entries,
        candidate_count.saturating_sub(1),
    );
    out.push_str("Each element must be an object with:\n");
    out.push_str("  \"jobIndex\": integer\n");
    out.push_str("  \"matchScore\": integer 0-100 (relevance to this candidate)\n");
    out.push_str("  \"confidenceScore\": integer 0-100 (how certain you are of matchScore)\n");
    out.push_str("  \"matchReason\": string\n");
    if policy.include_score_breakdown {
        let _ = writeln!(
            out,
            "  \"scoreBreakdown\": object with integer 0-100 values for {}",
            BREAKDOWN_DIMENSIONS.join(", ")
        );
    }
    out.push_str("Do not include any text outside the JSON array.\n");
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "none specified".to_string()
    } else {
        values.join(", ")
    }
}

fn one_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn preview(description: &str) -> String {
    let flat = one_line(description);
    if flat.chars().count() <= DESCRIPTION_PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
    format!("{}...", cut.trim_end())
}
