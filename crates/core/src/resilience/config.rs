use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Downstream systems guarded by a circuit breaker.
///
/// The set is closed: every dependency is registered at startup with its own
/// thresholds, so there is no lookup by free-form name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    Cache,
    Notification,
    Revalidation,
}

impl Dependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::Cache => "cache",
            Dependency::Notification => "notification",
            Dependency::Revalidation => "revalidation",
        }
    }

    pub fn all() -> [Dependency; 3] {
        [
            Dependency::Cache,
            Dependency::Notification,
            Dependency::Revalidation,
        ]
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-dependency breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub threshold: u32,
    /// How long the breaker stays open before a half-open probe.
    pub open_timeout: Duration,
    /// Upper bound on a single protected call. Exceeding it counts as a failure.
    pub call_timeout: Duration,
}

impl BreakerConfig {
    pub fn new(threshold: u32, open_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            open_timeout,
            call_timeout,
        }
    }

    /// Defaults tuned to each dependency's blast radius.
    ///
    /// The cache sits inline on every write and recovers quickly. The broker
    /// tolerates more noise before tripping. The external revalidation endpoint
    /// is slow and outside our control, so it backs off longest.
    pub fn default_for(dependency: Dependency) -> Self {
        match dependency {
            Dependency::Cache => Self::new(3, Duration::from_secs(30), Duration::from_secs(2)),
            Dependency::Notification => {
                Self::new(5, Duration::from_secs(60), Duration::from_secs(3))
            }
            Dependency::Revalidation => {
                Self::new(3, Duration::from_secs(300), Duration::from_secs(5))
            }
        }
    }
}
