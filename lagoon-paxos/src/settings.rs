//! Tunables for the context layer.

/// Default cap on concurrently booked instances per proposer.
pub const DEFAULT_MAX_CONCURRENT_INSTANCES: usize = 10;

/// Default number of delivered instances the in-memory store keeps around.
pub const DEFAULT_RETAINED_DELIVERED_INSTANCES: u64 = 100;

/// Settings shared by the roles of a [`PaxosContext`](crate::PaxosContext).
///
/// # Example
///
/// ```rust
/// use lagoon_paxos::PaxosSettings;
///
/// let settings = PaxosSettings::builder()
///     .max_concurrent_instances(4)
///     .build();
/// assert_eq!(settings.max_concurrent_instances(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaxosSettings {
    max_concurrent_instances: usize,
    retained_delivered_instances: u64,
}

impl Default for PaxosSettings {
    fn default() -> Self {
        Self {
            max_concurrent_instances: DEFAULT_MAX_CONCURRENT_INSTANCES,
            retained_delivered_instances: DEFAULT_RETAINED_DELIVERED_INSTANCES,
        }
    }
}

impl PaxosSettings {
    /// Settings for tests: a small store window so pruning is observable.
    pub fn for_testing() -> Self {
        Self {
            max_concurrent_instances: DEFAULT_MAX_CONCURRENT_INSTANCES,
            retained_delivered_instances: 2,
        }
    }

    /// Start building settings from the defaults.
    pub fn builder() -> PaxosSettingsBuilder {
        PaxosSettingsBuilder::default()
    }

    /// Backpressure limit on booked instances.
    pub fn max_concurrent_instances(&self) -> usize {
        self.max_concurrent_instances
    }

    /// How many delivered instances the in-memory store retains.
    pub fn retained_delivered_instances(&self) -> u64 {
        self.retained_delivered_instances
    }
}

/// Builder for [`PaxosSettings`].
#[derive(Debug, Clone, Default)]
pub struct PaxosSettingsBuilder {
    settings: PaxosSettings,
}

impl PaxosSettingsBuilder {
    /// Set the booked-instance limit.
    pub fn max_concurrent_instances(mut self, n: usize) -> Self {
        self.settings.max_concurrent_instances = n;
        self
    }

    /// Set how many delivered instances are retained.
    pub fn retained_delivered_instances(mut self, n: u64) -> Self {
        self.settings.retained_delivered_instances = n;
        self
    }

    /// Build the settings (infallible).
    pub fn build(self) -> PaxosSettings {
        self.settings
    }
}
