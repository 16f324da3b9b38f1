use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use crate::core::matcher::{InputError, Matcher};
use crate::models::{JobCandidate, MatchResult, UserProfile};

#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Requests scored at the same time
    pub concurrency: usize,
    /// Pause between chunks, as backpressure on the scoring service
    pub delay: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("match task failed: {0}")]
    Task(String),
}

/// One user's request within a batch
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub profile: UserProfile,
    pub candidates: Vec<JobCandidate>,
}

/// Runs many match requests in fixed-size chunks
#[derive(Clone)]
pub struct BatchRunner {
    matcher: Matcher,
    settings: BatchSettings,
}

impl BatchRunner {
    pub fn new(matcher: Matcher, settings: BatchSettings) -> Self {
        Self { matcher, settings }
    }

    /// Results come back in input order
    pub async fn run(&self, jobs: Vec<BatchJob>) -> Vec<Result<MatchResult, BatchError>> {
        let total = jobs.len();
        let chunk_size = self.settings.concurrency.max(1);
        let mut results: Vec<Result<MatchResult, BatchError>> = (0..total)
            .map(|_| Err(BatchError::Task("not run".to_string())))
            .collect();

        let mut pending = jobs.into_iter().enumerate().peekable();
        let mut chunk_index = 0usize;

        while pending.peek().is_some() {
            if chunk_index > 0 && !self.settings.delay.is_zero() {
                tokio::time::sleep(self.settings.delay).await;
            }

            let mut set = JoinSet::new();
            for (index, job) in pending.by_ref().take(chunk_size) {
                let matcher = self.matcher.clone();
                set.spawn(async move {
                    let result = matcher.find_matches(&job.profile, job.candidates).await;
                    (index, result)
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((index, result)) => results[index] = result.map_err(BatchError::from),
                    Err(e) => tracing::error!("Batch match task failed: {}", e),
                }
            }

            chunk_index += 1;
            tracing::debug!("Finished batch chunk {} ({} requests total)", chunk_index, total);
        }

        results
    }
}
