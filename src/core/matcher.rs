use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use validator::Validate;
use crate::core::{
    diversity::DiversityRebalancer,
    fingerprint::fingerprint,
    policy::{policy_for, TierPolicy},
    prompt::PromptBuilder,
    rules::{rank_order, RuleScorer},
};
use crate::models::{
    Algorithm, CacheEntry, JobCandidate, MatchResult, Provenance, ScoredCandidate, Tier, UserProfile,
};
use crate::services::{CacheKey, CacheStore, FailureTracker, ScoringError, ScoringService};

/// Problems with the request itself; no scorer can help
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("candidate pool is empty")]
    EmptyCandidatePool,

    #[error("invalid profile: {0}")]
    InvalidProfile(String),
}

/// Orchestrator tunables
#[derive(Debug, Clone)]
pub struct MatcherSettings {
    pub ai_timeout: Duration,
    pub cache_ttl_secs: u64,
    pub substitution_penalty: u8,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            ai_timeout: Duration::from_secs(12),
            cache_ttl_secs: 3_600,
            substitution_penalty: crate::core::diversity::DEFAULT_SUBSTITUTION_PENALTY,
        }
    }
}

/// Ranked list produced by the scoring stage
struct ScoringOutcome {
    ranked: Vec<ScoredCandidate>,
    ai_ids: HashSet<String>,
    cost_units: u32,
    fallback_reason: Option<String>,
    /// False when the result depends on a transient AI failure
    cacheable: bool,
}

/// Main matching orchestrator
///
/// # Pipeline Stages
/// 1. Policy resolution and input validation
/// 2. Cache lookup by fingerprint
/// 3. AI scoring, or rule-based fallback
/// 4. Diversity rebalancing
/// 5. Cache write
///
/// This is the only place that decides between AI and fallback scoring.
#[derive(Clone)]
pub struct Matcher {
    scorer: Arc<dyn ScoringService>,
    cache: Arc<dyn CacheStore>,
    failures: FailureTracker,
    rules: RuleScorer,
    prompts: PromptBuilder,
    rebalancer: DiversityRebalancer,
    settings: MatcherSettings,
}

impl Matcher {
    pub fn new(
        scorer: Arc<dyn ScoringService>,
        cache: Arc<dyn CacheStore>,
        failures: FailureTracker,
        settings: MatcherSettings,
    ) -> Self {
        Self {
            scorer,
            cache,
            failures,
            rules: RuleScorer::new(),
            prompts: PromptBuilder::new(),
            rebalancer: DiversityRebalancer::new(settings.substitution_penalty),
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Find matches for a profile; the tier comes from `profile.tier`.
    ///
    /// Scoring failures never surface here: they are absorbed by the
    /// rule-based fallback and reported through `Provenance`.
    pub async fn find_matches(
        &self,
        profile: &UserProfile,
        candidates: Vec<JobCandidate>,
    ) -> Result<MatchResult, InputError> {
        let started = Instant::now();
        let tier = profile.tier;

        validate_profile(profile)?;
        let candidates = ingest_candidates(candidates)?;
        let policy = policy_for(tier);
        debug!("Policy resolved for {} ({}): {:?}", profile.user_id, tier, policy);

        let fingerprint = fingerprint(profile, &candidates, tier);
        let key = CacheKey::matches(tier, &fingerprint);
        if let Some(result) = self.lookup(&key, &fingerprint, started).await {
            info!(
                "Returning {} cached matches for user {} ({:?})",
                result.matches.len(),
                profile.user_id,
                result.provenance.algorithm
            );
            return Ok(result);
        }

        let outcome = self.score(profile, &policy, &candidates).await;

        let mut matches = self
            .rebalancer
            .rebalance(&outcome.ranked, policy.result_count, &profile.cities());
        if !policy.include_score_breakdown {
            for scored in &mut matches {
                scored.score_breakdown = None;
            }
        }

        let ai_count = matches
            .iter()
            .filter(|s| outcome.ai_ids.contains(&s.candidate.id))
            .count();
        let algorithm = match ai_count {
            0 => Algorithm::Rules,
            n if n == matches.len() => Algorithm::Ai,
            _ => Algorithm::Hybrid,
        };
        let fallback_reason = match algorithm {
            Algorithm::Hybrid => Some(format!(
                "AI scored {} of {} results; remainder filled by rules",
                ai_count,
                matches.len()
            )),
            _ => outcome.fallback_reason,
        };

        let result = MatchResult {
            matches,
            provenance: Provenance {
                algorithm,
                cache_hit: false,
                latency_ms: elapsed_ms(started),
                cost_units: outcome.cost_units,
                fallback_reason,
            },
        };

        if outcome.cacheable {
            self.store(&key, fingerprint, &result).await;
        }

        info!(
            "Returning {} matches for user {} (algorithm: {:?}, {} candidates, {}ms)",
            result.matches.len(),
            profile.user_id,
            result.provenance.algorithm,
            candidates.len(),
            result.provenance.latency_ms
        );

        Ok(result)
    }

    /// Serve a live entry whose fingerprint matches exactly. Cache I/O
    /// errors count as misses.
    async fn lookup(&self, key: &str, fingerprint: &str, started: Instant) -> Option<MatchResult> {
        match self.cache.get(key).await {
            Ok(Some(entry)) if entry.fingerprint == fingerprint && !entry.is_expired(chrono::Utc::now()) => {
                let mut result = entry.result;
                result.provenance.cache_hit = true;
                result.provenance.cost_units = 0;
                result.provenance.latency_ms = elapsed_ms(started);
                Some(result)
            }
            Ok(Some(_)) => {
                debug!("Ignoring stale cache entry {}", key);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read failed for {}, treating as miss: {}", key, e);
                None
            }
        }
    }

    async fn store(&self, key: &str, fingerprint: String, result: &MatchResult) {
        let entry = CacheEntry {
            fingerprint,
            result: result.clone(),
            created_at: chrono::Utc::now(),
            ttl_secs: self.settings.cache_ttl_secs,
        };
        if let Err(e) = self.cache.put(key, &entry).await {
            warn!("Cache write failed for {}: {}", key, e);
        }
    }

    /// AI attempt with rule-based fallback. Fallback only starts once the
    /// AI path has definitively failed or been skipped.
    async fn score(
        &self,
        profile: &UserProfile,
        policy: &TierPolicy,
        candidates: &[JobCandidate],
    ) -> ScoringOutcome {
        let tier = profile.tier;
        let ranked_by_rules = self.rules.score(profile, candidates);

        if !policy.use_ai {
            return rules_only(ranked_by_rules, "AI scoring disabled for tier".to_string(), 0, true);
        }

        let failures = self.failures.consecutive_failures(tier).await;
        if failures as usize > policy.fallback_threshold {
            debug!("Skipping AI for {} tier after {} consecutive failures", tier, failures);
            return rules_only(
                ranked_by_rules,
                format!("AI skipped after {} consecutive failures", failures),
                0,
                false,
            );
        }

        // Rule ranking picks the AI window so the best candidates are sent
        let window: Vec<JobCandidate> = ranked_by_rules
            .iter()
            .take(policy.max_candidates_for_ai)
            .map(|s| s.candidate.clone())
            .collect();
        let request = self.prompts.build(profile, &window, policy);

        // Hard deadline even for scorers that ignore the timeout argument
        let attempt = tokio::time::timeout(
            self.settings.ai_timeout,
            self.scorer.score(&request, self.settings.ai_timeout),
        )
        .await
        .unwrap_or(Err(ScoringError::Timeout));

        let response = match attempt {
            Ok(response) => response,
            // Quota is per user and says nothing about the service's health
            Err(ScoringError::BudgetExceeded) => {
                info!("Scoring quota exhausted for user {}, using rules", profile.user_id);
                return rules_only(ranked_by_rules, ScoringError::BudgetExceeded.to_string(), 0, false);
            }
            Err(e) => {
                let count = self.failures.record_failure(tier).await;
                warn!(
                    "AI scoring failed for user {} ({} consecutive for {} tier), using rules: {}",
                    profile.user_id, count, tier, e
                );
                return rules_only(ranked_by_rules, e.to_string(), 0, false);
            }
        };

        let required = policy.fallback_threshold.min(window.len());
        if response.candidates.len() < required {
            self.failures.record_failure(tier).await;
            warn!(
                "AI returned {} valid results for user {} (need {}), using rules",
                response.candidates.len(),
                profile.user_id,
                required
            );
            return rules_only(
                ranked_by_rules,
                format!(
                    "AI returned {} valid results, below threshold {}",
                    response.candidates.len(),
                    required
                ),
                response.cost_units,
                false,
            );
        }
        self.failures.record_success(tier).await;

        let mut ranked = response.candidates;
        ranked.sort_by(rank_order);
        let ai_ids: HashSet<String> = ranked.iter().map(|s| s.candidate.id.clone()).collect();

        // Rule-scored remainder backs up the AI list for rebalancing
        ranked.extend(
            ranked_by_rules
                .into_iter()
                .filter(|s| !ai_ids.contains(&s.candidate.id)),
        );

        ScoringOutcome {
            ranked,
            ai_ids,
            cost_units: response.cost_units,
            fallback_reason: None,
            cacheable: true,
        }
    }
}

fn rules_only(
    ranked: Vec<ScoredCandidate>,
    reason: String,
    cost_units: u32,
    cacheable: bool,
) -> ScoringOutcome {
    ScoringOutcome {
        ranked,
        ai_ids: HashSet::new(),
        cost_units,
        fallback_reason: Some(reason),
        cacheable,
    }
}

/// Required fields per tier
fn validate_profile(profile: &UserProfile) -> Result<(), InputError> {
    profile
        .validate()
        .map_err(|e| InputError::InvalidProfile(e.to_string()))?;

    if profile.cities().is_empty() {
        return Err(InputError::InvalidProfile("at least one target city is required".into()));
    }
    if profile.tier == Tier::Premium && profile.paths().is_empty() {
        return Err(InputError::InvalidProfile(
            "premium profiles require at least one career path".into(),
        ));
    }
    Ok(())
}

/// Drop malformed postings and duplicate ids (first occurrence wins)
fn ingest_candidates(candidates: Vec<JobCandidate>) -> Result<Vec<JobCandidate>, InputError> {
    let total = candidates.len();
    let mut seen = HashSet::with_capacity(total);
    let accepted: Vec<JobCandidate> = candidates
        .into_iter()
        .filter(|c| c.validate().is_ok() && !c.id.trim().is_empty() && !c.title.trim().is_empty())
        .filter(|c| seen.insert(c.id.clone()))
        .collect();

    if accepted.len() < total {
        warn!("Dropped {} malformed or duplicate candidates", total - accepted.len());
    }
    if accepted.is_empty() {
        return Err(InputError::EmptyCandidatePool);
    }
    Ok(accepted)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u64::MAX as u128) as u64
}
