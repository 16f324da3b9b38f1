// Service exports
pub mod cache;
pub mod failures;
pub mod scoring;

pub use cache::{CacheError, CacheKey, CacheStore, MemoryCacheStore, TieredCacheStore};
pub use failures::FailureTracker;
pub use scoring::{CallQuota, HttpScoringClient, ScoringError, ScoringResponse, ScoringService};
