//! Runtime configuration for a Raft node: election timeout bounds and the
//! leader heartbeat rate.

use std::time::Duration;

use rand::Rng;

/// Lower bound of the randomized election timeout.
pub const DEFAULT_LOWER_TIMEOUT_MILLIS: u64 = 1_500;
/// Upper bound of the randomized election timeout.
pub const DEFAULT_UPPER_TIMEOUT_MILLIS: u64 = 3_000;
/// Leader heartbeat period. `LOWER_TIMEOUT` is kept comfortably above
/// `10 * HEARTBIT_RATE` so that a healthy leader's heartbeats never race a
/// follower's election timer.
pub const DEFAULT_HEARTBIT_RATE_MILLIS: u64 = 100;

/// Runtime-tunable knobs for a Raft node and its gateway.
///
/// Mirrors the teacher crate's `Config`/`ConfigBuilder` split: construct via
/// [`ConfigBuilder`], then treat the resulting `Config` as immutable for the
/// lifetime of the node.
#[derive(Clone, Debug)]
pub struct Config {
    /// Lower bound (inclusive) of the randomized election timeout.
    pub lower_timeout: Duration,
    /// Upper bound (inclusive) of the randomized election timeout.
    pub upper_timeout: Duration,
    /// Fixed period between leader heartbeats.
    pub heartbeat_rate: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lower_timeout: Duration::from_millis(DEFAULT_LOWER_TIMEOUT_MILLIS),
            upper_timeout: Duration::from_millis(DEFAULT_UPPER_TIMEOUT_MILLIS),
            heartbeat_rate: Duration::from_millis(DEFAULT_HEARTBIT_RATE_MILLIS),
        }
    }
}

impl Config {
    /// Draw a fresh election timeout uniformly from `[lower_timeout, upper_timeout]`.
    pub fn new_rand_election_timeout(&self) -> Duration {
        let lower = self.lower_timeout.as_millis() as u64;
        let upper = self.upper_timeout.as_millis() as u64;
        let millis = if lower >= upper {
            lower
        } else {
            rand::thread_rng().gen_range(lower..=upper)
        };
        Duration::from_millis(millis)
    }

    /// The window after which an outstanding quorum read is force-cleaned,
    /// per `spec.md` §4.2.1: `2 * HEARTBIT_RATE`.
    pub fn quorum_read_cleanup_after(&self) -> Duration {
        self.heartbeat_rate * 2
    }
}

/// Builder for [`Config`], following the teacher crate's builder convention.
#[derive(Clone, Debug, Default)]
pub struct ConfigBuilder {
    lower_timeout_millis: Option<u64>,
    upper_timeout_millis: Option<u64>,
    heartbeat_rate_millis: Option<u64>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lower_timeout_millis(mut self, v: u64) -> Self {
        self.lower_timeout_millis = Some(v);
        self
    }

    pub fn upper_timeout_millis(mut self, v: u64) -> Self {
        self.upper_timeout_millis = Some(v);
        self
    }

    pub fn heartbeat_rate_millis(mut self, v: u64) -> Self {
        self.heartbeat_rate_millis = Some(v);
        self
    }

    pub fn build(self) -> Config {
        let default = Config::default();
        Config {
            lower_timeout: self.lower_timeout_millis.map(Duration::from_millis).unwrap_or(default.lower_timeout),
            upper_timeout: self.upper_timeout_millis.map(Duration::from_millis).unwrap_or(default.upper_timeout),
            heartbeat_rate: self.heartbeat_rate_millis.map(Duration::from_millis).unwrap_or(default.heartbeat_rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand_election_timeout_stays_in_bounds() {
        let config = Config::default();
        for _ in 0..1000 {
            let t = config.new_rand_election_timeout();
            assert!(t >= config.lower_timeout);
            assert!(t <= config.upper_timeout);
        }
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = ConfigBuilder::new()
            .lower_timeout_millis(10)
            .upper_timeout_millis(20)
            .heartbeat_rate_millis(1)
            .build();
        assert_eq!(config.lower_timeout, Duration::from_millis(10));
        assert_eq!(config.upper_timeout, Duration::from_millis(20));
        assert_eq!(config.quorum_read_cleanup_after(), Duration::from_millis(2));
    }
}
