use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use jobmatch_engine::config::{LoggingSettings, Settings};
use jobmatch_engine::core::{BatchRunner, Matcher};
use jobmatch_engine::routes::{self, matches::AppState};
use jobmatch_engine::services::{
    CacheStore, FailureTracker, HttpScoringClient, MemoryCacheStore, TieredCacheStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    // Load configuration; logging is not up yet, so failures go to the panic message
    let settings = Settings::load().unwrap_or_else(|e| panic!("Configuration error: {}", e));

    init_tracing(&settings.logging);

    info!("Starting JobMatch engine...");
    info!("Configuration loaded successfully");

    // Cache store: Redis-backed when configured, in-memory otherwise
    let cache_ttl = settings.cache.ttl_secs;
    let l1_cache_size = settings.cache.l1_cache_size;

    let cache: Arc<dyn CacheStore> = match settings.cache.redis_url.as_deref() {
        Some(url) => match TieredCacheStore::connect(url, l1_cache_size, cache_ttl).await {
            Ok(store) => {
                info!("Tiered cache initialized (L1: {} entries, TTL: {}s)", l1_cache_size, cache_ttl);
                Arc::new(store)
            }
            Err(e) => {
                warn!("Failed to connect to Redis ({}), using in-memory cache", e);
                Arc::new(MemoryCacheStore::new(l1_cache_size, cache_ttl))
            }
        },
        None => {
            info!("No Redis URL configured, using in-memory cache ({} entries)", l1_cache_size);
            Arc::new(MemoryCacheStore::new(l1_cache_size, cache_ttl))
        }
    };

    // Scoring client
    if settings.scoring.api_key.is_empty() {
        warn!("No scoring API key configured; AI calls will fail over to rule-based scoring");
    }
    let scorer = Arc::new(HttpScoringClient::new(&settings.scoring).map_err(|e| {
        error!("Failed to build scoring client: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e)
    })?);

    info!(
        "Scoring client initialized ({} via {}{}, timeout {}ms)",
        settings.scoring.model, settings.scoring.endpoint, settings.scoring.path, settings.scoring.timeout_ms
    );

    let failures = FailureTracker::new(Duration::from_secs(settings.matching.failure_cooldown_secs));
    let matcher = Matcher::new(scorer, cache, failures, settings.matcher_settings());
    let batch = BatchRunner::new(matcher.clone(), settings.batch_settings());

    info!("Matcher initialized with settings: {:?}", settings.matcher_settings());

    let app_state = AppState { matcher, batch };

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}

/// Initialize the tracing subscriber from the logging section
fn init_tracing(logging: &LoggingSettings) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&logging.level))
        .with_target(false)
        .with_level(true);

    if logging.is_pretty() {
        subscriber.pretty().init();
    } else if logging.is_json() {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
