//! Quote Feed Configuration Settings
//!
//! Configuration types loaded from environment variables. Every numeric
//! setting has a default; unparsable values fall back to it.

use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::{
    FetcherConfig, MAX_PERTURBATION_BPS, OrchestratorConfig, SyntheticConfig,
};
use crate::infrastructure::kite::{
    DEFAULT_API_BASE_URL, DEFAULT_TICKER_URL, KiteCredentials, KiteRestConfig, ReconnectConfig,
    StreamConnectorConfig,
};

/// Kite endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KiteSettings {
    /// REST root.
    pub api_base_url: String,
    /// Ticker WebSocket endpoint.
    pub ticker_url: String,
}

impl Default for KiteSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ticker_url: DEFAULT_TICKER_URL.to_string(),
        }
    }
}

/// Quote cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// How long an entry stays fresh.
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(2000),
        }
    }
}

/// Background poll settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    /// Start the poller at boot.
    pub enabled: bool,
    /// Period between cycles.
    pub interval: Duration,
    /// Cap on non-registry keys kept in the poll set.
    pub max_extra_keys: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(4),
            max_extra_keys: 32,
        }
    }
}

/// Ticker connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Start the connector at boot.
    pub enabled: bool,
    /// Tick watchdog window.
    pub watchdog_window: Duration,
    /// Connect + subscribe deadline.
    pub handshake_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter fraction applied to each delay.
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Restart period for a failed connector (`None` = never).
    pub recovery_interval: Option<Duration>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            watchdog_window: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.1,
            max_reconnect_attempts: 5,
            recovery_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// Concurrent fetcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    /// Worker pool width.
    pub workers: usize,
    /// Per-call deadline.
    pub call_timeout: Duration,
    /// Per-refill deadline.
    pub refill_deadline: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            call_timeout: Duration::from_millis(1500),
            refill_deadline: Duration::from_millis(3000),
        }
    }
}

/// Synthetic generator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticSettings {
    /// Generator seed.
    pub seed: u64,
    /// Maximum perturbation in basis points.
    pub max_perturbation_bps: u32,
    /// Base price when nothing else is known.
    pub default_price: Option<Decimal>,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            max_perturbation_bps: 50,
            default_price: Some(Decimal::ONE_HUNDRED),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// HTTP API port.
    pub http_port: u16,
    /// Grace period for draining workers on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 5000,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Complete quote feed configuration.
#[derive(Debug, Clone, Default)]
pub struct FeedConfig {
    /// Kite credentials; `None` runs the service offline.
    pub credentials: Option<KiteCredentials>,
    /// Kite endpoints.
    pub kite: KiteSettings,
    /// Cache settings.
    pub cache: CacheSettings,
    /// Poll settings.
    pub poll: PollSettings,
    /// Stream settings.
    pub stream: StreamSettings,
    /// Fetcher settings.
    pub fetch: FetchSettings,
    /// Synthetic settings.
    pub synthetic: SyntheticSettings,
    /// Server settings.
    pub server: ServerSettings,
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if only one of the credential variables is set, or
    /// if either is set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`FeedConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let credentials = match (env.get("KITE_API_KEY"), env.get("KITE_ACCESS_TOKEN")) {
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::MissingEnvVar("KITE_ACCESS_TOKEN".to_string()));
            }
            (None, Some(_)) => return Err(ConfigError::MissingEnvVar("KITE_API_KEY".to_string())),
            (Some(key), Some(token)) => {
                if key.trim().is_empty() {
                    return Err(ConfigError::EmptyValue("KITE_API_KEY".to_string()));
                }
                if token.trim().is_empty() {
                    return Err(ConfigError::EmptyValue("KITE_ACCESS_TOKEN".to_string()));
                }
                Some(
                    KiteCredentials::new(key, token)
                        .map_err(|e| ConfigError::EmptyValue(e.to_string()))?,
                )
            }
        };

        let kite_defaults = KiteSettings::default();
        let kite = KiteSettings {
            api_base_url: env.string("KITE_API_BASE_URL", kite_defaults.api_base_url),
            ticker_url: env.string("KITE_TICKER_URL", kite_defaults.ticker_url),
        };

        let cache = CacheSettings {
            ttl: env.duration_millis("QUOTE_TTL_MS", CacheSettings::default().ttl),
        };

        let poll_defaults = PollSettings::default();
        let poll = PollSettings {
            enabled: env.bool("POLL_ENABLED", poll_defaults.enabled),
            interval: env.duration_secs("POLL_INTERVAL_SECS", poll_defaults.interval),
            max_extra_keys: env
                .parse("POLL_MAX_EXTRA_KEYS")
                .unwrap_or(poll_defaults.max_extra_keys),
        };

        let stream_defaults = StreamSettings::default();
        let recovery_secs = env.parse::<u64>("STREAM_RECOVERY_SECS");
        let stream = StreamSettings {
            enabled: env.bool("STREAM_ENABLED", stream_defaults.enabled),
            watchdog_window: env
                .duration_secs("STREAM_WATCHDOG_SECS", stream_defaults.watchdog_window),
            handshake_timeout: env.duration_secs(
                "STREAM_HANDSHAKE_TIMEOUT_SECS",
                stream_defaults.handshake_timeout,
            ),
            reconnect_delay_initial: env.duration_millis(
                "STREAM_RECONNECT_DELAY_INITIAL_MS",
                stream_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "STREAM_RECONNECT_DELAY_MAX_SECS",
                stream_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env
                .parse("STREAM_RECONNECT_MULTIPLIER")
                .filter(|m: &f64| m.is_finite() && *m >= 1.0)
                .unwrap_or(stream_defaults.reconnect_delay_multiplier),
            reconnect_jitter: env
                .parse("STREAM_RECONNECT_JITTER")
                .filter(|j: &f64| (0.0..1.0).contains(j))
                .unwrap_or(stream_defaults.reconnect_jitter),
            max_reconnect_attempts: env
                .parse("STREAM_MAX_RECONNECT_ATTEMPTS")
                .unwrap_or(stream_defaults.max_reconnect_attempts),
            recovery_interval: match recovery_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => stream_defaults.recovery_interval,
            },
        };

        let fetch_defaults = FetchSettings::default();
        let fetch = FetchSettings {
            workers: env
                .parse("FETCH_WORKERS")
                .filter(|w: &usize| *w > 0)
                .unwrap_or(fetch_defaults.workers),
            call_timeout: env.duration_millis("FETCH_CALL_TIMEOUT_MS", fetch_defaults.call_timeout),
            refill_deadline: env
                .duration_millis("REFILL_DEADLINE_MS", fetch_defaults.refill_deadline),
        };

        let synthetic_defaults = SyntheticSettings::default();
        let synthetic = SyntheticSettings {
            seed: env.parse("SYNTHETIC_SEED").unwrap_or(synthetic_defaults.seed),
            max_perturbation_bps: env
                .parse("SYNTHETIC_MAX_PERTURBATION_BPS")
                .filter(|b: &u32| *b <= MAX_PERTURBATION_BPS)
                .unwrap_or(synthetic_defaults.max_perturbation_bps),
            default_price: match env.parse::<Decimal>("SYNTHETIC_DEFAULT_PRICE") {
                Some(price) if price > Decimal::ZERO => Some(price),
                Some(_) => None,
                None => synthetic_defaults.default_price,
            },
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            http_port: env.parse("HTTP_PORT").unwrap_or(server_defaults.http_port),
            shutdown_grace: env.duration_secs("SHUTDOWN_GRACE_SECS", server_defaults.shutdown_grace),
        };

        Ok(Self {
            credentials,
            kite,
            cache,
            poll,
            stream,
            fetch,
            synthetic,
            server,
        })
    }

    /// Whether upstream credentials are configured.
    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.credentials.is_some()
    }

    /// REST client settings.
    #[must_use]
    pub fn rest_config(&self) -> KiteRestConfig {
        KiteRestConfig {
            base_url: self.kite.api_base_url.clone(),
            timeout: self.fetch.call_timeout,
        }
    }

    /// Backoff settings.
    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: self.stream.reconnect_delay_initial,
            max_delay: self.stream.reconnect_delay_max,
            multiplier: self.stream.reconnect_delay_multiplier,
            jitter_factor: self.stream.reconnect_jitter,
            max_attempts: self.stream.max_reconnect_attempts,
        }
    }

    /// Stream connector settings.
    #[must_use]
    pub fn connector_config(&self) -> StreamConnectorConfig {
        StreamConnectorConfig {
            handshake_timeout: self.stream.handshake_timeout,
            watchdog_window: self.stream.watchdog_window,
            reconnect: self.reconnect_config(),
            stop_grace: self.server.shutdown_grace,
        }
    }

    /// Fetcher settings.
    #[must_use]
    pub const fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            workers: self.fetch.workers,
            call_timeout: self.fetch.call_timeout,
        }
    }

    /// Orchestrator settings.
    #[must_use]
    pub const fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            refill_deadline: self.fetch.refill_deadline,
            poll_interval: self.poll.interval,
            recovery_interval: self.stream.recovery_interval,
            shutdown_grace: self.server.shutdown_grace,
            max_extra_keys: self.poll.max_extra_keys,
        }
    }

    /// Synthetic generator settings.
    #[must_use]
    pub const fn synthetic_config(&self) -> SyntheticConfig {
        SyntheticConfig {
            seed: self.synthetic.seed,
            max_perturbation_bps: self.synthetic.max_perturbation_bps,
            default_price: self.synthetic.default_price,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.trim().to_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            _ => default,
        }
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key)
            .filter(|secs| *secs > 0)
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key)
            .filter(|millis| *millis > 0)
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<FeedConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        FeedConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();
        assert!(!config.is_online());
        assert_eq!(config.cache.ttl, Duration::from_secs(2));
        assert_eq!(config.poll.interval, Duration::from_secs(4));
        assert!(config.poll.enabled);
        assert!(config.stream.enabled);
        assert_eq!(config.stream.watchdog_window, Duration::from_secs(10));
        assert_eq!(config.stream.reconnect_delay_max, Duration::from_secs(30));
        assert_eq!(config.stream.max_reconnect_attempts, 5);
        assert_eq!(config.stream.recovery_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.fetch.workers, 8);
        assert_eq!(config.fetch.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.fetch.refill_deadline, Duration::from_secs(3));
        assert_eq!(config.synthetic.seed, 42);
        assert_eq!(config.synthetic.default_price, Some(Decimal::ONE_HUNDRED));
        assert_eq!(config.server.http_port, 5000);
        assert_eq!(config.kite.ticker_url, DEFAULT_TICKER_URL);
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("KITE_API_KEY", "key"),
            ("KITE_ACCESS_TOKEN", "token"),
            ("QUOTE_TTL_MS", "500"),
            ("POLL_ENABLED", "false"),
            ("POLL_MAX_EXTRA_KEYS", "0"),
            ("STREAM_MAX_RECONNECT_ATTEMPTS", "0"),
            ("STREAM_RECOVERY_SECS", "0"),
            ("STREAM_RECONNECT_JITTER", "0.25"),
            ("FETCH_WORKERS", "3"),
            ("SYNTHETIC_DEFAULT_PRICE", "0"),
            ("HTTP_PORT", "8080"),
        ])
        .unwrap();

        assert!(config.is_online());
        assert_eq!(config.cache.ttl, Duration::from_millis(500));
        assert!(!config.poll.enabled);
        assert_eq!(config.poll.max_extra_keys, 0);
        assert_eq!(config.stream.max_reconnect_attempts, 0);
        assert_eq!(config.stream.recovery_interval, None);
        assert!((config.stream.reconnect_jitter - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.fetch.workers, 3);
        assert_eq!(config.synthetic.default_price, None);
        assert_eq!(config.server.http_port, 8080);
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let config = load(&[
            ("QUOTE_TTL_MS", "soon"),
            ("FETCH_WORKERS", "0"),
            ("STREAM_RECONNECT_MULTIPLIER", "0.5"),
            ("STREAM_ENABLED", "maybe"),
            ("HTTP_PORT", "99999"),
        ])
        .unwrap();

        assert_eq!(config.cache.ttl, Duration::from_secs(2));
        assert_eq!(config.fetch.workers, 8);
        assert!((config.stream.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.stream.enabled);
        assert_eq!(config.server.http_port, 5000);
    }

    #[test]
    fn perturbation_must_leave_prices_positive() {
        let config = load(&[("SYNTHETIC_MAX_PERTURBATION_BPS", "30000")]).unwrap();
        assert_eq!(config.synthetic.max_perturbation_bps, 50);

        let config = load(&[("SYNTHETIC_MAX_PERTURBATION_BPS", "5000")]).unwrap();
        assert_eq!(config.synthetic.max_perturbation_bps, 5_000);
    }

    #[test]
    fn partial_credentials_are_an_error() {
        assert!(matches!(
            load(&[("KITE_API_KEY", "key")]),
            Err(ConfigError::MissingEnvVar(var)) if var == "KITE_ACCESS_TOKEN"
        ));
        assert!(matches!(
            load(&[("KITE_API_KEY", ""), ("KITE_ACCESS_TOKEN", "t")]),
            Err(ConfigError::EmptyValue(var)) if var == "KITE_API_KEY"
        ));
    }

    #[test]
    fn credentials_redacted_debug() {
        let config = load(&[("KITE_API_KEY", "key123"), ("KITE_ACCESS_TOKEN", "secret456")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn derived_component_configs() {
        let config = load(&[("STREAM_RECONNECT_DELAY_INITIAL_MS", "250")]).unwrap();
        let reconnect = config.reconnect_config();
        assert_eq!(reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(reconnect.max_attempts, 5);
        assert_eq!(config.connector_config().stop_grace, Duration::from_secs(5));
        assert_eq!(config.fetcher_config().workers, 8);
        assert_eq!(config.orchestrator_config().poll_interval, Duration::from_secs(4));
        assert_eq!(config.synthetic_config().max_perturbation_bps, 50);
        assert_eq!(config.rest_config().timeout, Duration::from_millis(1500));
    }
}
