use std::time::Duration;
use crate::models::Tier;

/// Consecutive AI failures per tier. Counts expire after the cooldown so
/// AI is retried once the service has had time to recover.
#[derive(Clone)]
pub struct FailureTracker {
    failures: moka::future::Cache<Tier, u32>,
}

impl FailureTracker {
    pub fn new(cooldown: Duration) -> Self {
        let failures = moka::future::CacheBuilder::new(16)
            .time_to_live(cooldown)
            .build();
        Self { failures }
    }

    pub async fn consecutive_failures(&self, tier: Tier) -> u32 {
        self.failures.get(&tier).await.unwrap_or(0)
    }

    pub async fn record_failure(&self, tier: Tier) -> u32 {
        let count = self.consecutive_failures(tier).await.saturating_add(1);
        self.failures.insert(tier, count).await;
        count
    }

    pub async fn record_success(&self, tier: Tier) {
        self.failures.invalidate(&tier).await;
    }
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
