//! Offline coordinator configuration

use std::fmt;
use std::sync::Arc;

use driftq_domain::constants::DEFAULT_MAX_RETRIES;
use driftq_domain::{CollectionRegistry, OutboxError, Result, Transaction};

use crate::ports::{
    BeforeRetryFilter, LeaderElection, LeadershipCallback, MutationRegistry, OnlineDetector,
    StorageAdapter, UnknownMutationFnCallback,
};
use crate::time::Clock;

/// Configuration for [`crate::coordinator::OfflineCoordinator`].
///
/// `collections` and `mutation_fns` are required; everything else has a
/// sensible default (in-memory storage, null leader election, manual online
/// detector, system clock).
pub struct OfflineConfig {
    pub collections: CollectionRegistry,
    pub mutation_fns: MutationRegistry,
    pub storage: Option<Arc<dyn StorageAdapter>>,
    /// Reserved: the core currently forces sequential execution
    pub max_concurrency: usize,
    pub jitter: bool,
    pub max_retries: u32,
    pub before_retry: Option<BeforeRetryFilter>,
    pub on_unknown_mutation_fn: Option<UnknownMutationFnCallback>,
    pub on_leadership_change: Option<LeadershipCallback>,
    pub leader_election: Option<Arc<dyn LeaderElection>>,
    pub online_detector: Option<Arc<dyn OnlineDetector>>,
    pub clock: Option<Arc<dyn Clock>>,
}

impl OfflineConfig {
    /// Create a configuration with the required registries and defaults for
    /// everything else
    pub fn new(collections: CollectionRegistry, mutation_fns: MutationRegistry) -> Self {
        Self {
            collections,
            mutation_fns,
            storage: None,
            max_concurrency: 1,
            jitter: true,
            max_retries: DEFAULT_MAX_RETRIES,
            before_retry: None,
            on_unknown_mutation_fn: None,
            on_leadership_change: None,
            leader_election: None,
            online_detector: None,
            clock: None,
        }
    }

    /// Override the storage adapter
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the reserved concurrency knob (the core forces 1 for now)
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Enable or disable retry jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Cap the number of retry attempts
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Install a replay filter applied when leadership is acquired
    #[must_use]
    pub fn with_before_retry<F>(mut self, filter: F) -> Self
    where
        F: Fn(Vec<Transaction>) -> Vec<Transaction> + Send + Sync + 'static,
    {
        self.before_retry = Some(Arc::new(filter));
        self
    }

    /// Install a callback fired when a transaction names a missing mutation
    /// function
    #[must_use]
    pub fn with_on_unknown_mutation_fn<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &Transaction) + Send + Sync + 'static,
    {
        self.on_unknown_mutation_fn = Some(Arc::new(callback));
        self
    }

    /// Install a callback fired on leadership changes
    #[must_use]
    pub fn with_on_leadership_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.on_leadership_change = Some(Arc::new(callback));
        self
    }

    /// Override the leader-election primitive
    #[must_use]
    pub fn with_leader_election(mut self, election: Arc<dyn LeaderElection>) -> Self {
        self.leader_election = Some(election);
        self
    }

    /// Override the connectivity detector
    #[must_use]
    pub fn with_online_detector(mut self, detector: Arc<dyn OnlineDetector>) -> Self {
        self.online_detector = Some(detector);
        self
    }

    /// Override the wall clock (tests)
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.mutation_fns.is_empty() {
            return Err(OutboxError::Config(
                "at least one mutation function must be registered".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(OutboxError::Config("max_concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for OfflineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineConfig")
            .field("collections", &self.collections)
            .field("mutation_fns", &self.mutation_fns)
            .field("max_concurrency", &self.max_concurrency)
            .field("jitter", &self.jitter)
            .field("max_retries", &self.max_retries)
            .field("has_storage_override", &self.storage.is_some())
            .field("has_leader_election_override", &self.leader_election.is_some())
            .field("has_online_detector_override", &self.online_detector.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the configuration surface.
    use super::*;
    use crate::ports::MutationContext;

    fn minimal_config() -> OfflineConfig {
        let mut mutation_fns = MutationRegistry::new();
        mutation_fns
            .register_fn("noop", |_ctx: MutationContext| async move { Ok(serde_json::json!(null)) });
        OfflineConfig::new(CollectionRegistry::new(), mutation_fns)
    }

    /// Validates configuration defaults.
    ///
    /// Assertions:
    /// - Confirms jitter on, concurrency 1, max retries 10.
    #[test]
    fn test_defaults() {
        let config = minimal_config();

        assert!(config.jitter);
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.max_retries, 10);
        assert!(config.validate().is_ok());
    }

    /// Validates `validate` rejections.
    ///
    /// Assertions:
    /// - Ensures an empty mutation registry fails validation.
    /// - Ensures zero concurrency fails validation.
    #[test]
    fn test_validate_rejections() {
        let empty = OfflineConfig::new(CollectionRegistry::new(), MutationRegistry::new());
        assert!(empty.validate().is_err());

        let zero = minimal_config().with_max_concurrency(0);
        assert!(zero.validate().is_err());
    }
}
