use actix_web::{web, HttpResponse, Responder};
use validator::Validate;
use crate::core::{BatchError, BatchJob, BatchRunner, InputError, Matcher};
use crate::models::{
    BatchMatchItem, BatchMatchRequest, BatchMatchResponse, ErrorResponse, FindMatchesRequest,
    FindMatchesResponse, HealthResponse, MatchResult,
};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub matcher: Matcher,
    pub batch: BatchRunner,
}

/// Configure all match-related routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/matches/find", web::post().to(find_matches))
        .route("/matches/batch", web::post().to(batch_matches));
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        cache_entries: state.matcher.cache().entry_count(),
    })
}

/// Find matches endpoint
///
/// POST /api/v1/matches/find
///
/// Request body:
/// ```json
/// {
///   "profile": { "userId": "string", "targetCities": ["London"], "careerPaths": ["Finance"], "tier": "free" },
///   "candidates": [{ "id": "string", "title": "string", "city": "London", "source": "reed" }]
/// }
/// ```
async fn find_matches(
    state: web::Data<AppState>,
    req: web::Json<FindMatchesRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        tracing::info!("Validation failed for find_matches request: {:?}", errors);
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Validation failed".to_string(),
            message: errors.to_string(),
            status_code: 400,
        });
    }

    let FindMatchesRequest { profile, candidates } = req.into_inner();
    let total_candidates = candidates.len();

    tracing::info!(
        "Finding matches for user: {}, tier: {}, candidates: {}",
        profile.user_id,
        profile.tier,
        total_candidates
    );

    match state.matcher.find_matches(&profile, candidates).await {
        Ok(result) => HttpResponse::Ok().json(to_response(result, total_candidates)),
        Err(e) => {
            tracing::info!("Rejected match request for {}: {}", profile.user_id, e);
            HttpResponse::UnprocessableEntity().json(input_error(&e))
        }
    }
}

/// Batch matching endpoint
///
/// POST /api/v1/matches/batch
async fn batch_matches(
    state: web::Data<AppState>,
    req: web::Json<BatchMatchRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Validation failed".to_string(),
            message: errors.to_string(),
            status_code: 400,
        });
    }

    let jobs: Vec<BatchJob> = req
        .into_inner()
        .requests
        .into_iter()
        .map(|r| BatchJob { profile: r.profile, candidates: r.candidates })
        .collect();
    let meta: Vec<(String, usize)> = jobs
        .iter()
        .map(|j| (j.profile.user_id.clone(), j.candidates.len()))
        .collect();

    tracing::info!("Running batch of {} match requests", jobs.len());

    let results = state.batch.run(jobs).await;
    let items = meta
        .into_iter()
        .zip(results)
        .map(|((user_id, total), result)| match result {
            Ok(result) => BatchMatchItem {
                user_id,
                result: Some(to_response(result, total)),
                error: None,
            },
            Err(BatchError::Input(e)) => BatchMatchItem {
                user_id,
                result: None,
                error: Some(input_error(&e)),
            },
            Err(e) => BatchMatchItem {
                user_id,
                result: None,
                error: Some(ErrorResponse {
                    error: "internal_error".to_string(),
                    message: e.to_string(),
                    status_code: 500,
                }),
            },
        })
        .collect();

    HttpResponse::Ok().json(BatchMatchResponse { results: items })
}

fn to_response(result: MatchResult, total_candidates: usize) -> FindMatchesResponse {
    FindMatchesResponse {
        request_id: uuid::Uuid::new_v4().to_string(),
        matches: result.matches,
        provenance: result.provenance,
        total_candidates,
    }
}

fn input_error(err: &InputError) -> ErrorResponse {
    let error = match err {
        InputError::EmptyCandidatePool => "empty_candidate_pool",
        InputError::InvalidProfile(_) => "invalid_profile",
    };
    ErrorResponse {
        error: error.to_string(),
        message: err.to_string(),
        status_code: 422,
    }
}
