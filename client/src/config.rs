//! Tunables for one lockstep session

use crate::error::ClientError;
use crate::network::LinkConditioner;
use shared::INPUT_DELAY;
use std::time::Duration;

pub const MIN_PROBES: usize = 3;
pub const MAX_PROBES: usize = 10;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ticks between issuing a command and executing it
    pub input_delay: u32,
    /// Simulation frames per second
    pub tick_rate: u32,
    /// Period of the pending-store resend, also used for handshake probes
    pub retransmit_interval: Duration,
    /// Size of the hole-punch burst
    pub probe_count: usize,
    pub probe_interval: Duration,
    /// How long to linger for the peer's goodbye after the match ends
    pub goodbye_timeout: Duration,
    /// End the match at this tick even if nobody died
    pub max_ticks: Option<u32>,
    pub link: LinkConditioner,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_delay: INPUT_DELAY,
            tick_rate: 60,
            retransmit_interval: Duration::from_millis(100),
            probe_count: 5,
            probe_interval: Duration::from_millis(20),
            goodbye_timeout: Duration::from_secs(2),
            max_ticks: None,
            link: LinkConditioner::default(),
        }
    }
}

impl SessionConfig {
    /// Clamps the probe burst into range and rejects unusable values
    pub fn validated(mut self) -> Result<Self, ClientError> {
        if self.tick_rate == 0 {
            return Err(ClientError::InvalidConfig("tick rate must be positive".into()));
        }
        if self.input_delay == 0 {
            return Err(ClientError::InvalidConfig(
                "input delay must be at least one tick".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.link.loss_percent) {
            return Err(ClientError::InvalidConfig(format!(
                "packet loss {}% is out of range",
                self.link.loss_percent
            )));
        }
        self.probe_count = self.probe_count.clamp(MIN_PROBES, MAX_PROBES);
        Ok(self)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.input_delay, 5);
        assert_eq!(config.retransmit_interval, Duration::from_millis(100));
        assert_eq!(config.tick_rate, 60);
        assert!(config.max_ticks.is_none());
    }

    #[test]
    fn test_probe_count_is_clamped() {
        let low = SessionConfig {
            probe_count: 0,
            ..Default::default()
        };
        assert_eq!(low.validated().unwrap().probe_count, MIN_PROBES);

        let high = SessionConfig {
            probe_count: 50,
            ..Default::default()
        };
        assert_eq!(high.validated().unwrap().probe_count, MAX_PROBES);
    }

    #[test]
    fn test_rejects_zero_tick_rate_and_delay() {
        let config = SessionConfig {
            tick_rate: 0,
            ..Default::default()
        };
        assert!(matches!(config.validated(), Err(ClientError::InvalidConfig(_))));

        let config = SessionConfig {
            input_delay: 0,
            ..Default::default()
        };
        assert!(config.validated().is_err());
    }

    #[test]
    fn test_rejects_bad_loss() {
        let mut config = SessionConfig::default();
        config.link.loss_percent = 150.0;
        assert!(config.validated().is_err());
    }

    #[test]
    fn test_tick_duration() {
        let config = SessionConfig {
            tick_rate: 50,
            ..Default::default()
        };
        assert_eq!(config.tick_duration(), Duration::from_millis(20));
    }
}
