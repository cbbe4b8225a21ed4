/// Endpoint runtime configuration
///
/// Follows the builder-over-frozen-data split used by the `toad`
/// CoAP crate's `Config`/`ConfigData`: an optional-field builder that
/// applies RFC 7252 §4.8 defaults when turned into the immutable
/// `ConfigData` the rest of the core actually reads.
use std::time::Duration;

/// Frozen, validated configuration consumed by the reliability,
/// dedup, and observe components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigData {
    pub ack_timeout: Duration,
    pub ack_random_factor: f64,
    pub max_retransmit: u32,
    pub nstart: u8,
    pub default_leisure: Duration,
    pub probing_rate_bytes_per_sec: u32,
    pub exchange_lifetime: Duration,
    pub max_age_default: Duration,
    pub observe_heartbeat_interval: Duration,
}

impl Default for ConfigData {
    fn default() -> Self {
        Config::default().into()
    }
}

impl ConfigData {
    /// Largest possible span from first transmission to the final
    /// (MAX_RETRANSMIT-th) retry firing, using the unjittered upper
    /// bound (RFC 7252 §4.8.2).
    pub fn max_transmit_span(&self) -> Duration {
        let ack_timeout_ms = self.ack_timeout.as_millis() as f64;
        let span_ms = ack_timeout_ms * self.ack_random_factor * ((1u64 << self.max_retransmit) as f64 - 1.0);
        Duration::from_millis(span_ms.round() as u64)
    }
}

/// Builder for [`ConfigData`]. Unset fields fall back to the RFC 7252
/// §4.8 defaults on [`Into::into`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    ack_timeout: Option<Duration>,
    ack_random_factor: Option<f64>,
    max_retransmit: Option<u32>,
    nstart: Option<u8>,
    default_leisure: Option<Duration>,
    probing_rate_bytes_per_sec: Option<u32>,
    exchange_lifetime: Option<Duration>,
    max_age_default: Option<Duration>,
    observe_heartbeat_interval: Option<Duration>,
}

impl Config {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn ack_timeout(mut self, d: Duration) -> Self {
        self.ack_timeout = Some(d);
        self
    }

    pub fn ack_random_factor(mut self, f: f64) -> Self {
        self.ack_random_factor = Some(f);
        self
    }

    pub fn max_retransmit(mut self, n: u32) -> Self {
        self.max_retransmit = Some(n);
        self
    }

    /// Maximum outstanding Confirmable messages per remote endpoint.
    pub fn nstart(mut self, n: u8) -> Self {
        self.nstart = Some(n);
        self
    }

    pub fn default_leisure(mut self, d: Duration) -> Self {
        self.default_leisure = Some(d);
        self
    }

    pub fn probing_rate(mut self, bytes_per_sec: u32) -> Self {
        self.probing_rate_bytes_per_sec = Some(bytes_per_sec);
        self
    }

    pub fn exchange_lifetime(mut self, d: Duration) -> Self {
        self.exchange_lifetime = Some(d);
        self
    }

    pub fn max_age_default(mut self, d: Duration) -> Self {
        self.max_age_default = Some(d);
        self
    }

    pub fn observe_heartbeat_interval(mut self, d: Duration) -> Self {
        self.observe_heartbeat_interval = Some(d);
        self
    }
}

impl From<Config> for ConfigData {
    fn from(c: Config) -> Self {
        ConfigData {
            ack_timeout: c.ack_timeout.unwrap_or(Duration::from_secs(2)),
            ack_random_factor: c.ack_random_factor.unwrap_or(1.5),
            max_retransmit: c.max_retransmit.unwrap_or(4),
            nstart: c.nstart.unwrap_or(1),
            default_leisure: c.default_leisure.unwrap_or(Duration::from_secs(5)),
            probing_rate_bytes_per_sec: c.probing_rate_bytes_per_sec.unwrap_or(1),
            exchange_lifetime: c.exchange_lifetime.unwrap_or(Duration::from_secs(247)),
            max_age_default: c.max_age_default.unwrap_or(Duration::from_secs(60)),
            observe_heartbeat_interval: c
                .observe_heartbeat_interval
                .unwrap_or(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rfc_7252_section_4_8() {
        let data: ConfigData = Config::new().into();
        assert_eq!(data.ack_timeout, Duration::from_secs(2));
        assert_eq!(data.ack_random_factor, 1.5);
        assert_eq!(data.max_retransmit, 4);
        assert_eq!(data.nstart, 1);
        assert_eq!(data.default_leisure, Duration::from_secs(5));
        assert_eq!(data.exchange_lifetime, Duration::from_secs(247));
        assert_eq!(data.max_age_default, Duration::from_secs(60));
        assert_eq!(data.observe_heartbeat_interval, Duration::from_secs(86_400));
    }

    #[test]
    fn builder_overrides_apply() {
        let data: ConfigData = Config::new().max_retransmit(2).nstart(3).into();
        assert_eq!(data.max_retransmit, 2);
        assert_eq!(data.nstart, 3);
    }
}
