//! Relay-wide statistics

use std::time::Duration;

use serde::Serialize;

/// Counters summed over all live sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    /// Sessions in the manager, including those still closing
    pub active_sessions: usize,
    pub streaming_sessions: usize,
    /// Registered destinations
    pub destinations: usize,
    pub enabled_destinations: usize,
    /// Egress links over all sessions
    pub links: usize,
    pub streaming_links: usize,
    /// Links waiting to retry or permanently failed
    pub failed_links: usize,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub uptime_secs: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uptime(&self) -> Duration {
        Duration::from_secs(self.uptime_secs)
    }

    /// Average ingest bitrate over the uptime (bits/sec)
    pub fn ingest_bitrate(&self) -> u64 {
        if self.uptime_secs > 0 {
            (self.bytes_received * 8) / self.uptime_secs
        } else {
            0
        }
    }

    /// Share of links currently streaming, 1.0 with no links
    pub fn link_health(&self) -> f64 {
        if self.links == 0 {
            1.0
        } else {
            self.streaming_links as f64 / self.links as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_stats_new() {
        let stats = RelayStats::new();
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.frames_received, 0);
        assert_eq!(stats.ingest_bitrate(), 0);
        assert_eq!(stats.link_health(), 1.0);
    }

    #[test]
    fn test_ingest_bitrate() {
        let stats = RelayStats {
            bytes_received: 1_000_000,
            uptime_secs: 10,
            ..RelayStats::default()
        };

        // 1,000,000 bytes * 8 bits / 10 seconds = 800,000 bps
        assert_eq!(stats.ingest_bitrate(), 800_000);
        assert_eq!(stats.uptime(), Duration::from_secs(10));
    }

    #[test]
    fn test_link_health() {
        let stats = RelayStats {
            links: 4,
            streaming_links: 3,
            failed_links: 1,
            ..RelayStats::default()
        };
        assert_eq!(stats.link_health(), 0.75);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(RelayStats::new()).unwrap();
        assert!(json.get("activeSessions").is_some());
        assert!(json.get("uptimeSecs").is_some());
    }
}
