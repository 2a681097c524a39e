//! Relay configuration

use std::time::Duration;

use crate::bus::DEFAULT_EVENT_CAPACITY;
use crate::fanout::ReconnectPolicy;
use crate::media::gop::DEFAULT_GOP_CACHE_SIZE;

/// Shortest interval the cleanup task runs at
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(100);

/// Per-link egress settings
#[derive(Debug, Clone)]
pub struct EgressConfig {
    /// Frames buffered per link before it is considered stalled
    pub queue_capacity: usize,

    /// A single connection attempt must complete within this time
    pub connect_timeout: Duration,

    /// A single frame write must complete within this time
    pub write_timeout: Duration,

    /// Backoff and retry budget after failures
    pub reconnect: ReconnectPolicy,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl EgressConfig {
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,

    /// Time links get to flush and close when a session stops; stragglers
    /// are aborted afterwards
    pub close_grace_period: Duration,

    /// Sessions that receive no frame for this long are stopped by cleanup
    pub idle_timeout: Duration,

    /// Interval of the background cleanup task, at least
    /// [`MIN_CLEANUP_INTERVAL`]
    pub cleanup_interval: Duration,

    /// Buffered events per bus subscriber
    pub event_capacity: usize,

    /// Events kept in each session's history
    pub history_limit: usize,

    /// Cache the current GOP so (re)connecting links start on a keyframe
    pub gop_cache_enabled: bool,

    /// Maximum GOP cache size in bytes per session
    pub gop_cache_max_size: usize,

    pub egress: EgressConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_sessions: 0, // Unlimited
            close_grace_period: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(10),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            history_limit: 128,
            gop_cache_enabled: true,
            gop_cache_max_size: DEFAULT_GOP_CACHE_SIZE,
            egress: EgressConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn close_grace_period(mut self, grace: Duration) -> Self {
        self.close_grace_period = grace;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval.max(MIN_CLEANUP_INTERVAL);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn disable_gop_cache(mut self) -> Self {
        self.gop_cache_enabled = false;
        self
    }

    pub fn gop_cache_max_size(mut self, size: usize) -> Self {
        self.gop_cache_max_size = size;
        self
    }

    pub fn egress(mut self, egress: EgressConfig) -> Self {
        self.egress = egress;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.egress.reconnect = policy;
        self
    }
}
