//! `Channel` and its rolling statistics (spec §3): grounded on
//! `channel.cpp`/`.h` in `examples/original_source/aether/`, which keeps a
//! bounded sample window per channel and answers percentile queries
//! against it.

use std::collections::VecDeque;
use std::time::Duration;

use aether_proto::Endpoint;

/// Samples kept per metric before the oldest is evicted (spec §3:
/// "statistics window size is bounded").
const WINDOW_SIZE: usize = 32;

/// Returned by `ChannelStats::percentile` when the requested metric's
/// window is empty (spec §3: "percentile queries on an empty window
/// return a configured default").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsDefaults {
    pub connect_time: Duration,
    pub rtt: Duration,
}

impl Default for StatsDefaults {
    fn default() -> Self {
        // Pessimistic defaults so an untested channel never outranks a
        // channel with a proven track record during selection.
        StatsDefaults { connect_time: Duration::from_secs(5), rtt: Duration::from_millis(500) }
    }
}

#[derive(Debug, Clone, Default)]
struct SampleWindow(VecDeque<Duration>);

impl SampleWindow {
    fn push(&mut self, sample: Duration) {
        if self.0.len() == WINDOW_SIZE {
            self.0.pop_front();
        }
        self.0.push_back(sample);
    }

    /// Nearest-rank percentile, `p` in `[0.0, 1.0]`.
    fn percentile(&self, p: f64, default: Duration) -> Duration {
        if self.0.is_empty() {
            return default;
        }
        let mut sorted: Vec<Duration> = self.0.iter().copied().collect();
        sorted.sort_unstable();
        let rank = ((p.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize)
            .saturating_sub(1)
            .min(sorted.len() - 1);
        sorted[rank]
    }
}

/// Rolling connect-time/RTT statistics for one `Channel` (spec §3).
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    connect_times: SampleWindow,
    rtts: SampleWindow,
    defaults: StatsDefaults,
}

impl ChannelStats {
    pub fn with_defaults(defaults: StatsDefaults) -> Self {
        ChannelStats { defaults, ..Default::default() }
    }

    pub fn record_connect_time(&mut self, sample: Duration) {
        self.connect_times.push(sample);
    }

    pub fn record_rtt(&mut self, sample: Duration) {
        self.rtts.push(sample);
    }

    pub fn connect_time_percentile(&self, p: f64) -> Duration {
        self.connect_times.percentile(p, self.defaults.connect_time)
    }

    pub fn rtt_percentile(&self, p: f64) -> Duration {
        self.rtts.percentile(p, self.defaults.rtt)
    }
}

/// A `(Server, Endpoint, transport-properties)` tuple with its own rolling
/// statistics (spec §3).
#[derive(Debug, Clone)]
pub struct Channel {
    pub endpoint: Endpoint,
    pub stats: ChannelStats,
}

impl Channel {
    pub fn new(endpoint: Endpoint) -> Self {
        Channel { endpoint, stats: ChannelStats::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_on_empty_window_returns_default() {
        let stats = ChannelStats::default();
        assert_eq!(stats.rtt_percentile(0.5), StatsDefaults::default().rtt);
    }

    #[test]
    fn percentile_reflects_recorded_samples() {
        let mut stats = ChannelStats::default();
        for ms in [10, 20, 30, 40, 50] {
            stats.record_rtt(Duration::from_millis(ms));
        }
        assert_eq!(stats.rtt_percentile(1.0), Duration::from_millis(50));
        assert_eq!(stats.rtt_percentile(0.0), Duration::from_millis(10));
    }

    #[test]
    fn window_evicts_oldest_sample_past_capacity() {
        let mut stats = ChannelStats::default();
        for ms in 0..WINDOW_SIZE as u64 + 5 {
            stats.record_connect_time(Duration::from_millis(ms));
        }
        // the oldest samples (0..5ms) should have been evicted
        assert_eq!(stats.connect_time_percentile(0.0), Duration::from_millis(5));
    }
}
