//! Engine Configuration Module
//!
//! Configuration for lock TTLs, grace windows, retry budgets, and
//! exploration. Loaded from environment variables with sensible defaults
//! for development.

use dispatch_llm::RetryBudget;
use std::time::Duration;

/// Coordinator and ranker configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TTL of the per-key generation lock. Heartbeats extend it while a
    /// refresh pass is running.
    pub lock_ttl: Duration,

    /// Interval between heartbeat extensions while holding the lock.
    pub heartbeat_interval: Duration,

    /// Age under which an in-progress placeholder claimed by another
    /// writer means "poll again" rather than "regenerate".
    pub grace_window: Duration,

    /// Default retry budget for field generators that do not override it.
    pub retry: RetryBudget,

    /// Exploration rate for the ranker.
    pub epsilon: f64,

    /// Number of top candidates eligible for exploration.
    pub pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let lock_ttl = Duration::from_secs(30);
        Self {
            lock_ttl,
            heartbeat_interval: lock_ttl / 3,
            grace_window: Duration::from_secs(10),
            retry: RetryBudget::default(),
            epsilon: 0.1,
            pool_size: 6,
        }
    }
}

impl EngineConfig {
    /// Create EngineConfig from environment variables.
    ///
    /// Environment variables:
    /// - `DISPATCH_LOCK_TTL_MS`: Lock TTL in milliseconds (default: 30000)
    /// - `DISPATCH_GRACE_WINDOW_MS`: In-progress grace window (default: 10000)
    /// - `DISPATCH_RETRY_DEADLINE_MS`: Retry deadline (default: 30000)
    /// - `DISPATCH_RETRY_MAX_ATTEMPTS`: Retries after the initial attempt (default: 3)
    /// - `DISPATCH_EPSILON`: Exploration rate, clamped to [0, 1] (default: 0.1)
    /// - `DISPATCH_POOL_SIZE`: Exploration pool size (default: 6)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let lock_ttl = env_ms("DISPATCH_LOCK_TTL_MS").unwrap_or(defaults.lock_ttl);
        let grace_window = env_ms("DISPATCH_GRACE_WINDOW_MS").unwrap_or(defaults.grace_window);

        let mut retry = defaults.retry.clone();
        if let Some(deadline) = env_ms("DISPATCH_RETRY_DEADLINE_MS") {
            retry.deadline = deadline;
        }
        if let Some(max_attempts) = env_parse::<u32>("DISPATCH_RETRY_MAX_ATTEMPTS") {
            retry.max_attempts = max_attempts;
        }

        let epsilon = env_parse::<f64>("DISPATCH_EPSILON")
            .unwrap_or(defaults.epsilon)
            .clamp(0.0, 1.0);
        let pool_size = env_parse::<usize>("DISPATCH_POOL_SIZE").unwrap_or(defaults.pool_size);

        Self {
            lock_ttl,
            heartbeat_interval: lock_ttl / 3,
            grace_window,
            retry,
            epsilon,
            pool_size,
        }
    }

    /// Set the lock TTL, keeping the heartbeat at a third of it.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self.heartbeat_interval = ttl / 3;
        self
    }

    /// Set the in-progress grace window.
    pub fn with_grace_window(mut self, window: Duration) -> Self {
        self.grace_window = window;
        self
    }

    /// Set the default retry budget.
    pub fn with_retry(mut self, retry: RetryBudget) -> Self {
        self.retry = retry;
        self
    }

    /// Set the exploration parameters.
    pub fn with_exploration(mut self, epsilon: f64, pool_size: usize) -> Self {
        self.epsilon = epsilon.clamp(0.0, 1.0);
        self.pool_size = pool_size;
        self
    }
}

fn env_ms(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
