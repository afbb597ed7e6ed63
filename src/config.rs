//! Dispatcher configuration.

use std::time::Duration;

use crate::protocol::DEFAULT_GRANULARITY;

/// How calls are assigned to workers.
///
/// The policy is a construction-time choice; one dispatcher instance never
/// mixes the two models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationPolicy {
    /// One in-flight call per worker. Idle workers are taken from a FIFO
    /// pool and overflow calls queue in submission order, so calls reach
    /// workers in the order they were submitted.
    #[default]
    Fifo,

    /// Multiple concurrently outstanding calls per worker, multiplexed
    /// over one channel by call id. Allocation picks the least-loaded
    /// worker immediately; no submission-order guarantee exists. Requires
    /// workers that handle requests concurrently.
    LeastLoaded,
}

/// Tunable dispatcher options.
///
/// Defaults mirror a small, conservatively timed pool: one worker, 30 s
/// call timeout, recycle after 1024 executed calls, 64 KiB I/O granularity.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Minimum pool size; maintained across worker failures.
    pub pool_min: usize,
    /// Maximum pool size; the pool grows on demand up to this bound.
    pub pool_max: usize,
    /// Per-call deadline. `None` disables timeout tracking entirely.
    pub call_timeout: Option<Duration>,
    /// Cadence of the timeout sweep.
    pub timeout_check_interval: Duration,
    /// Completed calls after which a worker is recycled. 0 disables.
    pub execution_limit: u32,
    /// Idle duration after which an above-minimum worker is retired.
    /// `None` disables idle decay.
    pub idle_timeout: Option<Duration>,
    /// Read/write chunk size for channel I/O.
    pub granularity: usize,
    /// Cap on outstanding (queued + in-flight) calls. 0 means unbounded.
    pub max_outstanding: usize,
    /// Worker allocation policy.
    pub allocation: AllocationPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pool_min: 1,
            pool_max: 1,
            call_timeout: Some(Duration::from_secs(30)),
            timeout_check_interval: Duration::from_secs(1),
            execution_limit: 1024,
            idle_timeout: None,
            granularity: DEFAULT_GRANULARITY,
            max_outstanding: 1024,
            allocation: AllocationPolicy::Fifo,
        }
    }
}

impl DispatcherConfig {
    /// Clamp pathological values into usable ranges.
    pub(crate) fn normalized(mut self) -> Self {
        self.pool_min = self.pool_min.max(1);
        self.pool_max = self.pool_max.max(self.pool_min);
        self.granularity = self.granularity.max(1);
        if self.timeout_check_interval.is_zero() {
            self.timeout_check_interval = Duration::from_millis(1);
        }
        self
    }
}
