use async_trait::async_trait;
use moka::ops::compute::{CompResult, Op};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};
use thiserror::Error;
use crate::config::ScoringSettings;
use crate::core::prompt::ScoringRequest;
use crate::core::rules::clamp_score;
use crate::models::{JobCandidate, ScoredCandidate};

/// Confidence assumed when the service omits it
const DEFAULT_CONFIDENCE: u8 = 50;

/// Failures of a single scoring attempt. All of them are recoverable by
/// the rule-based fallback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoringError {
    #[error("scoring service timed out")]
    Timeout,

    #[error("scoring service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("malformed scoring output: {0}")]
    MalformedOutput(String),

    #[error("per-user scoring quota exhausted")]
    BudgetExceeded,
}

/// Validated output of one scoring call
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringResponse {
    pub candidates: Vec<ScoredCandidate>,
    pub cost_units: u32,
}

/// External scoring service. Implementations make at most one call and
/// never retry; retry and fallback policy belongs to the caller.
#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn score(
        &self,
        request: &ScoringRequest,
        timeout: Duration,
    ) -> Result<ScoringResponse, ScoringError>;
}

#[derive(Debug, Clone, Copy)]
struct QuotaWindow {
    started: Instant,
    used: u32,
}

/// Per-user call budget over a fixed window
#[derive(Clone)]
pub struct CallQuota {
    calls: moka::future::Cache<String, QuotaWindow>,
    max_calls: u32,
    window: Duration,
}

impl CallQuota {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        let calls = moka::future::CacheBuilder::new(100_000)
            .time_to_live(window)
            .build();
        Self { calls, max_calls, window }
    }

    /// Count one call for `user_id`; false if the budget is already spent.
    /// Check and increment happen in one atomic entry update.
    pub async fn try_acquire(&self, user_id: &str) -> bool {
        let now = Instant::now();
        let (max_calls, window) = (self.max_calls, self.window);

        let outcome = self
            .calls
            .entry_by_ref(user_id)
            .and_compute_with(|existing| {
                let current = match existing.map(|entry| entry.into_value()) {
                    Some(w) if now.duration_since(w.started) < window => w,
                    _ => QuotaWindow { started: now, used: 0 },
                };
                let op = if current.used >= max_calls {
                    Op::Nop
                } else {
                    Op::Put(QuotaWindow { started: current.started, used: current.used + 1 })
                };
                std::future::ready(op)
            })
            .await;

        matches!(outcome, CompResult::Inserted(_) | CompResult::ReplacedWith(_))
    }
}

/// Client for an OpenAI-compatible chat completions endpoint
pub struct HttpScoringClient {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    quota: CallQuota,
}

impl HttpScoringClient {
    pub fn new(settings: &ScoringSettings) -> Result<Self, reqwest::Error> {
        // Per-call deadlines are enforced by `score`
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}{}", settings.endpoint.trim_end_matches('/'), settings.path),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            quota: CallQuota::new(
                settings.calls_per_user,
                Duration::from_secs(settings.quota_window_secs),
            ),
        })
    }

    async fn call(&self, request: &ScoringRequest) -> Result<ScoringResponse, ScoringError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Scoring service returned {}: {}", status, body);
            return Err(ScoringError::ServiceUnavailable(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(ScoringError::ServiceUnavailable(format!("unexpected status {}", status)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ScoringError::MalformedOutput(format!("response body is not JSON: {}", e)))?;

        let content = extract_content(&json)?;
        let candidates = parse_scores(&content, &request.candidates, request.include_score_breakdown)?;
        let cost_units = json
            .pointer("/usage/total_tokens")
            .and_then(Value::as_u64)
            .map(|tokens| tokens.min(u32::MAX as u64) as u32)
            .unwrap_or(1);

        tracing::debug!(
            "Scoring service returned {} valid entries for {} candidates ({} cost units)",
            candidates.len(),
            request.candidates.len(),
            cost_units
        );

        Ok(ScoringResponse { candidates, cost_units })
    }
}

#[async_trait]
impl ScoringService for HttpScoringClient {
    async fn score(
        &self,
        request: &ScoringRequest,
        timeout: Duration,
    ) -> Result<ScoringResponse, ScoringError> {
        if !self.quota.try_acquire(&request.user_id).await {
            tracing::info!("Scoring quota exhausted for user {}", request.user_id);
            return Err(ScoringError::BudgetExceeded);
        }

        match tokio::time::timeout(timeout, self.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(ScoringError::Timeout),
        }
    }
}

fn classify_transport_error(err: reqwest::Error) -> ScoringError {
    if err.is_timeout() {
        ScoringError::Timeout
    } else {
        ScoringError::ServiceUnavailable(err.to_string())
    }
}

/// Pull the model's text out of a chat completion, or accept a bare
/// JSON payload from services that answer directly
fn extract_content(json: &Value) -> Result<String, ScoringError> {
    if let Some(content) = json
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
    {
        return Ok(content.to_string());
    }

    if json.is_array() || json.get("matches").is_some() || json.get("results").is_some() {
        return Ok(json.to_string());
    }

    Err(ScoringError::MalformedOutput("response is missing message content".into()))
}

/// Parse and validate the service's JSON array against the candidates
/// that were sent. Out-of-range and duplicate indices are dropped (first
/// occurrence wins) and scores are clamped to 0-100.
pub fn parse_scores(
    raw: &str,
    candidates: &[JobCandidate],
    include_breakdown: bool,
) -> Result<Vec<ScoredCandidate>, ScoringError> {
    let value = repair_json(raw)
        .ok_or_else(|| ScoringError::MalformedOutput("content is not valid JSON".into()))?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut obj) => match obj.remove("matches").or_else(|| obj.remove("results")) {
            Some(Value::Array(entries)) => entries,
            _ => return Err(ScoringError::MalformedOutput("expected a JSON array of matches".into())),
        },
        _ => return Err(ScoringError::MalformedOutput("expected a JSON array of matches".into())),
    };

    let mut seen = HashSet::new();
    let mut scored = Vec::with_capacity(entries.len());
    let mut dropped = 0usize;

    for entry in &entries {
        let Some(index) = entry.get("jobIndex").and_then(as_index) else {
            dropped += 1;
            continue;
        };
        if index >= candidates.len() || !seen.insert(index) {
            dropped += 1;
            continue;
        }
        let Some(match_score) = entry.get("matchScore").and_then(as_score) else {
            dropped += 1;
            continue;
        };

        let confidence_score = entry
            .get("confidenceScore")
            .and_then(as_score)
            .unwrap_or(DEFAULT_CONFIDENCE);
        let reason = entry
            .get("matchReason")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or("Recommended by AI scoring")
            .to_string();
        let score_breakdown = if include_breakdown {
            entry.get("scoreBreakdown").and_then(as_breakdown)
        } else {
            None
        };

        scored.push(ScoredCandidate {
            candidate: candidates[index].clone(),
            match_score,
            confidence_score,
            reason,
            score_breakdown,
        });
    }

    if dropped > 0 {
        tracing::warn!("Dropped {} of {} scoring entries during validation", dropped, entries.len());
    }

    if scored.is_empty() {
        return Err(ScoringError::MalformedOutput("no valid entries in response".into()));
    }

    Ok(scored)
}

/// Best-effort JSON recovery: as-is, without markdown fences, then the
/// outermost array or object slice
fn repair_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let unfenced = strip_code_fence(trimmed);
    if let Ok(value) = serde_json::from_str(unfenced) {
        return Some(value);
    }

    let cleaned = strip_trailing_commas(unfenced);
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Some(value);
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (cleaned.find(open), cleaned.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&cleaned[start..=end]) {
                    return Some(value);
                }
            }
        }
    }

    None
}

/// Remove commas directly before a closing bracket, outside of strings
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some(']') | Some('}')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().trim_end_matches("```").trim()
}

fn as_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return usize::try_from(u).ok();
            }
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                .map(|f| f as usize)
        }
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_score(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(clamp_score(raw.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32))
}

fn as_breakdown(value: &Value) -> Option<BTreeMap<String, u8>> {
    let obj = value.as_object()?;
    let breakdown: BTreeMap<String, u8> = obj
        .iter()
        .filter_map(|(dimension, score)| as_score(score).map(|s| (dimension.clone(), s)))
        .collect();
    (!breakdown.is_empty()).then_some(breakdown)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jobs(count: usize) -> Vec<JobCandidate> {
        (0..count)
            .map(|i| JobCandidate {
                id: format!("job-{}", i),
                title: format!("Analyst {}", i),
                company: "Acme".into(),
                city: "London".into(),
                location: None,
                source: "reed".into(),
                description: String::new(),
                posted_at: None,
                is_early_career: true,
                is_internship: false,
                is_graduate: false,
            })
            .collect()
    }

    fn request(count: usize) -> ScoringRequest {
        ScoringRequest {
            user_id: "u1".into(),
            system: "system".into(),
            prompt: "prompt".into(),
            candidates: jobs(count),
            include_score_breakdown: false,
        }
    }

    fn settings(endpoint: String) -> ScoringSettings {
        ScoringSettings {
            endpoint,
            api_key: "test_key".into(),
            ..ScoringSettings::default()
        }
    }

    #[test]
    fn test_parse_clamps_and_dedups() {
        let raw = r#"[
            {"jobIndex": 1, "matchScore": 140, "confidenceScore": -5, "matchReason": "Great fit"},
            {"jobIndex": 1, "matchScore": 10, "confidenceScore": 10, "matchReason": "Duplicate"},
            {"jobIndex": 999, "matchScore": 90, "confidenceScore": 90, "matchReason": "Out of range"},
            {"jobIndex": 0, "matchScore": 72.6, "confidenceScore": 80, "matchReason": ""}
        ]"#;
        let scored = parse_scores(raw, &jobs(10), false).unwrap();
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].candidate.id, "job-1");
        assert_eq!(scored[0].match_score, 100);
        assert_eq!(scored[0].confidence_score, 0);
        assert_eq!(scored[0].reason, "Great fit");
        assert_eq!(scored[1].match_score, 73);
        assert_eq!(scored[1].reason, "Recommended by AI scoring");
    }

    #[test]
    fn test_parse_repairs_fenced_output() {
        let raw = "Here you go:\n```json\n[{\"jobIndex\": 2, \"matchScore\": 60, \"confidenceScore\": 70, \"matchReason\": \"ok\"}]\n```";
        let scored = parse_scores(raw, &jobs(3), false).unwrap();
        assert_eq!(scored[0].candidate.id, "job-2");

        let fenced = "```json\n{\"matches\": [{\"jobIndex\": \"1\", \"matchScore\": \"55\"}]}\n```";
        let scored = parse_scores(fenced, &jobs(3), false).unwrap();
        assert_eq!(scored[0].confidence_score, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_trailing_commas_removed_outside_strings() {
        assert_eq!(strip_trailing_commas(r#"[1, 2, ]"#), "[1, 2 ]");
        assert_eq!(strip_trailing_commas(r#"{"a": ",]", }"#), r#"{"a": ",]" }"#);
    }

    #[test]
    fn test_parse_all_out_of_range_is_malformed() {
        let raw = r#"[{"jobIndex": 50, "matchScore": 60}, {"jobIndex": -1, "matchScore": 60}]"#;
        assert!(matches!(parse_scores(raw, &jobs(3), false), Err(ScoringError::MalformedOutput(_))));
        assert!(matches!(parse_scores("not json at all", &jobs(3), false), Err(ScoringError::MalformedOutput(_))));
        assert!(matches!(parse_scores(r#"{"score": 1}"#, &jobs(3), false), Err(ScoringError::MalformedOutput(_))));
    }

    #[test]
    fn test_breakdown_kept_only_when_requested() {
        let raw = r#"[{"jobIndex": 0, "matchScore": 60, "scoreBreakdown": {"location": 120, "careerFit": 40}}]"#;
        let with = parse_scores(raw, &jobs(1), true).unwrap();
        let breakdown = with[0].score_breakdown.as_ref().unwrap();
        assert_eq!(breakdown.get("location"), Some(&100));
        assert_eq!(breakdown.get("careerFit"), Some(&40));
        let without = parse_scores(raw, &jobs(1), false).unwrap();
        assert!(without[0].score_breakdown.is_none());
    }

    #[tokio::test]
    async fn test_quota_exhausts() {
        let quota = CallQuota::new(2, Duration::from_secs(60));
        assert!(quota.try_acquire("u1").await);
        assert!(quota.try_acquire("u1").await);
        assert!(!quota.try_acquire("u1").await);
        assert!(quota.try_acquire("u2").await);
    }

    #[tokio::test]
    async fn test_quota_holds_under_concurrent_acquires() {
        let quota = CallQuota::new(5, Duration::from_secs(60));
        let mut set = tokio::task::JoinSet::new();
        for _ in 0..200 {
            let quota = quota.clone();
            set.spawn(async move { quota.try_acquire("u1").await });
        }

        let mut granted = 0;
        while let Some(joined) = set.join_next().await {
            if joined.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 5);
        assert!(quota.try_acquire("u2").await);
    }

    #[tokio::test]
    async fn test_client_parses_chat_completion() {
        let mut server = mockito::Server::new_async().await;
        let content = r#"[{\"jobIndex\": 0, \"matchScore\": 88, \"confidenceScore\": 77, \"matchReason\": \"Strong fit\"}]"#;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test_key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"choices": [{{"message": {{"content": "{}"}}}}], "usage": {{"total_tokens": 321}}}}"#,
                content
            ))
            .create_async()
            .await;

        let client = HttpScoringClient::new(&settings(server.url())).unwrap();
        let response = client.score(&request(2), Duration::from_secs(5)).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.cost_units, 321);
        assert_eq!(response.candidates[0].match_score, 88);
        assert_eq!(response.candidates[0].reason, "Strong fit");
    }

    #[tokio::test]
    async fn test_client_classifies_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .create_async()
            .await;

        let client = HttpScoringClient::new(&settings(server.url())).unwrap();
        let err = client.score(&request(2), Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ScoringError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_client_rejects_over_budget() {
        let server = mockito::Server::new_async().await;
        let mut cfg = settings(server.url());
        cfg.calls_per_user = 0;
        let client = HttpScoringClient::new(&cfg).unwrap();
        let err = client.score(&request(2), Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, ScoringError::BudgetExceeded);
    }
}
