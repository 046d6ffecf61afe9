//! Ordered strategy chain with a wall-clock budget.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{AcquireContext, AcquireError, Acquisition, AcquisitionStrategy, StrategyError, StrategyFailure};
use crate::record::DetectedVideo;

/// Default overall budget for one acquisition.
pub const DEFAULT_ACQUISITION_BUDGET: Duration = Duration::from_secs(600);

/// Strategies tried in registration order, stopping at the first success.
pub struct AcquisitionChain {
    strategies: Vec<Box<dyn AcquisitionStrategy>>,
    budget: Duration,
}

impl AcquisitionChain {
    /// Creates an empty chain with the given wall-clock budget.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self {
            strategies: Vec::new(),
            budget,
        }
    }

    /// Appends a strategy.
    #[tracing::instrument(skip(self, strategy), fields(strategy_name))]
    pub fn register(&mut self, strategy: Box<dyn AcquisitionStrategy>) {
        tracing::Span::current().record("strategy_name", strategy.name());
        debug!(name = strategy.name(), "Registering acquisition strategy");
        self.strategies.push(strategy);
    }

    /// Number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Returns true if no strategies are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Strategy names in order.
    #[must_use]
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Overall budget.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Runs the strategies in order until one succeeds.
    ///
    /// # Errors
    ///
    /// [`AcquireError::AllStrategiesExhausted`] with every strategy's failure,
    /// [`AcquireError::Timeout`] when the budget runs out first, or
    /// [`AcquireError::Canceled`] once the context's cancel signal fires.
    #[tracing::instrument(skip(self, video, ctx), fields(url = %video.url, record_id = %ctx.record_id))]
    pub async fn acquire(&self, video: &DetectedVideo, ctx: &AcquireContext) -> Result<Acquisition, AcquireError> {
        match tokio::time::timeout(self.budget, self.run(video, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(budget_secs = self.budget.as_secs(), "acquisition timed out");
                Err(AcquireError::Timeout {
                    url: video.url.clone(),
                    budget: self.budget,
                })
            }
        }
    }

    async fn run(&self, video: &DetectedVideo, ctx: &AcquireContext) -> Result<Acquisition, AcquireError> {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            if ctx.cancel.is_canceled() {
                return Err(canceled(video, failures));
            }
            debug!(strategy = strategy.name(), "Trying acquisition strategy");
            match strategy.acquire(video, ctx).await {
                Ok(acquisition) => {
                    info!(strategy = strategy.name(), "Acquisition successful");
                    return Ok(acquisition);
                }
                Err(StrategyError::Canceled) => return Err(canceled(video, failures)),
                Err(error) if error.is_capability_gap() => {
                    debug!(strategy = strategy.name(), error = %error, "Strategy not applicable, trying next");
                    failures.push(StrategyFailure {
                        strategy: strategy.name().to_string(),
                        error,
                    });
                }
                Err(error) => {
                    warn!(strategy = strategy.name(), error = %error, "Strategy failed, trying next");
                    failures.push(StrategyFailure {
                        strategy: strategy.name().to_string(),
                        error,
                    });
                }
            }
        }

        if ctx.cancel.is_canceled() {
            return Err(canceled(video, failures));
        }
        Err(AcquireError::AllStrategiesExhausted {
            url: video.url.clone(),
            failures,
        })
    }
}

fn canceled(video: &DetectedVideo, failures: Vec<StrategyFailure>) -> AcquireError {
    info!(tried = failures.len(), "acquisition canceled");
    AcquireError::Canceled {
        url: video.url.clone(),
        failures,
    }
}

impl std::fmt::Debug for AcquisitionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionChain")
            .field("strategy_count", &self.strategies.len())
            .field("strategies", &self.strategy_names())
            .field("budget", &self.budget)
            .finish()
    }
}

impl Default for AcquisitionChain {
    fn default() -> Self {
        Self::new(DEFAULT_ACQUISITION_BUDGET)
    }
}
