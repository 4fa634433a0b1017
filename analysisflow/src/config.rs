//! Engine configuration.
//!
//! [`FlowConfig`] is plain serde data with defaults for every field, so a
//! partial JSON file is enough to configure a deployment. A handful of
//! deployment-specific values can be overridden from the environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::errors::FlowError;
use crate::flow::RetryConfig;
use crate::observability::TracingConfig;

/// Environment variable overriding [`FlowConfig::callback_base_url`].
pub const ENV_CALLBACK_BASE_URL: &str = "ANALYSISFLOW_CALLBACK_BASE_URL";
/// Environment variable overriding [`FlowConfig::bucket_prefix`].
pub const ENV_BUCKET_PREFIX: &str = "ANALYSISFLOW_BUCKET_PREFIX";
/// Environment variable overriding [`FlowConfig::callback_timeout_seconds`].
pub const ENV_CALLBACK_TIMEOUT_SECONDS: &str = "ANALYSISFLOW_CALLBACK_TIMEOUT_SECONDS";

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Base URL the remote functions call back on completion.
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
    /// Prefix of the per-run bucket name.
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,
    /// Seconds a dispatched invocation may stay silent before it times out.
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_seconds: u64,
    /// Seconds between two timeout sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Retry policy for gateway transport errors.
    #[serde(default = "default_dispatch_retry")]
    pub dispatch_retry: RetryConfig,
    /// Resource metering.
    #[serde(default)]
    pub metering: MeteringConfig,
    /// HTTP gateway, when invocations go over the network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,
    /// Log subscriber settings.
    #[serde(default)]
    pub logging: TracingConfig,
}

fn default_callback_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_bucket_prefix() -> String {
    "analysis-".to_string()
}

fn default_callback_timeout() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_dispatch_retry() -> RetryConfig {
    RetryConfig::default()
        .with_max_attempts(3)
        .with_base_delay_ms(200)
        .with_max_delay_ms(5_000)
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            callback_base_url: default_callback_base_url(),
            bucket_prefix: default_bucket_prefix(),
            callback_timeout_seconds: default_callback_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
            dispatch_retry: default_dispatch_retry(),
            metering: MeteringConfig::default(),
            gateway: None,
            logging: TracingConfig::default(),
        }
    }
}

impl FlowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file and applies environment overrides.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.with_env_overrides()?.validated()
    }

    /// Builds a configuration from defaults plus environment overrides.
    pub fn from_env() -> Result<Self, FlowError> {
        Self::default().with_env_overrides()?.validated()
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, FlowError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up through `lookup`.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, FlowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_CALLBACK_BASE_URL) {
            self.callback_base_url = url;
        }
        if let Some(prefix) = lookup(ENV_BUCKET_PREFIX) {
            self.bucket_prefix = prefix;
        }
        if let Some(raw) = lookup(ENV_CALLBACK_TIMEOUT_SECONDS) {
            self.callback_timeout_seconds = raw.trim().parse().map_err(|_| {
                FlowError::Config(format!("{ENV_CALLBACK_TIMEOUT_SECONDS} must be an integer, got '{raw}'"))
            })?;
        }
        Ok(self)
    }

    /// Sets the callback base URL.
    #[must_use]
    pub fn with_callback_base_url(mut self, url: impl Into<String>) -> Self {
        self.callback_base_url = url.into();
        self
    }

    /// Sets the bucket prefix.
    #[must_use]
    pub fn with_bucket_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.bucket_prefix = prefix.into();
        self
    }

    /// Sets the callback timeout.
    #[must_use]
    pub fn with_callback_timeout_seconds(mut self, seconds: u64) -> Self {
        self.callback_timeout_seconds = seconds;
        self
    }

    /// Sets the dispatch retry policy.
    #[must_use]
    pub fn with_dispatch_retry(mut self, retry: RetryConfig) -> Self {
        self.dispatch_retry = retry;
        self
    }

    /// Sets the metering configuration.
    #[must_use]
    pub fn with_metering(mut self, metering: MeteringConfig) -> Self {
        self.metering = metering;
        self
    }

    /// Sets the HTTP gateway configuration.
    #[must_use]
    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Returns the URL a remote function calls when `task_id` completes.
    #[must_use]
    pub fn callback_url(&self, task_id: &str) -> String {
        format!(
            "{}/tasks/{task_id}/callback",
            self.callback_base_url.trim_end_matches('/')
        )
    }

    /// Returns the sweep interval as a Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }

    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.callback_base_url.trim().is_empty() {
            return Err(FlowError::Config("callback_base_url must not be empty".into()));
        }
        if self.callback_timeout_seconds == 0 {
            return Err(FlowError::Config("callback_timeout_seconds must be positive".into()));
        }
        if self.dispatch_retry.max_attempts == 0 {
            return Err(FlowError::Config("dispatch_retry.max_attempts must be at least 1".into()));
        }
        self.metering.validate()?;
        if let Some(gateway) = &self.gateway {
            gateway.validate()?;
        }
        Ok(())
    }

    fn validated(self) -> Result<Self, FlowError> {
        self.validate()?;
        Ok(self)
    }
}

/// Kind of metered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// CPU time, sampled in cpu-seconds.
    Cpu,
    /// Resident memory, sampled in bytes.
    Memory,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Conversion from a resource amount to quota units.
///
/// `rate` units are charged per `unit_size` of the resource held for
/// `window_seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// Resource this rate applies to.
    pub resource: ResourceKind,
    /// Name of the charged unit.
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Resource amount one rate step covers (cpu-seconds or bytes).
    pub unit_size: f64,
    /// Quota units charged per step.
    pub rate: f64,
    /// Billing window in seconds.
    #[serde(default = "default_window")]
    pub window_seconds: f64,
    /// Quota units charged when an invocation reported no samples of this kind.
    #[serde(default = "default_minimum_charge")]
    pub minimum_charge: f64,
}

fn default_unit() -> String {
    "quota".to_string()
}

fn default_window() -> f64 {
    1.0
}

fn default_minimum_charge() -> f64 {
    0.01
}

impl ExchangeRate {
    /// Default CPU rate: one unit per cpu-hour.
    #[must_use]
    pub fn cpu_default() -> Self {
        Self {
            resource: ResourceKind::Cpu,
            unit: default_unit(),
            unit_size: 3600.0,
            rate: 1.0,
            window_seconds: 1.0,
            minimum_charge: default_minimum_charge(),
        }
    }

    /// Default memory rate: one unit per GiB-hour.
    #[must_use]
    pub fn memory_default() -> Self {
        Self {
            resource: ResourceKind::Memory,
            unit: default_unit(),
            unit_size: 1024.0 * 1024.0 * 1024.0,
            rate: 1.0,
            window_seconds: 3600.0,
            minimum_charge: default_minimum_charge(),
        }
    }

    fn validate(&self) -> Result<(), FlowError> {
        if self.unit_size <= 0.0 || self.window_seconds <= 0.0 {
            return Err(FlowError::Config(format!(
                "{} exchange rate needs positive unit_size and window_seconds",
                self.resource
            )));
        }
        if self.rate < 0.0 || self.minimum_charge <= 0.0 {
            return Err(FlowError::Config(format!(
                "{} exchange rate needs a non-negative rate and a positive minimum_charge",
                self.resource
            )));
        }
        Ok(())
    }
}

/// Resource metering configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeteringConfig {
    /// Seconds between two samples reported by a remote function.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_seconds: f64,
    /// Exchange rates, one per resource kind.
    #[serde(default = "default_rates")]
    pub rates: Vec<ExchangeRate>,
}

fn default_sample_interval() -> f64 {
    1.0
}

fn default_rates() -> Vec<ExchangeRate> {
    vec![ExchangeRate::cpu_default(), ExchangeRate::memory_default()]
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            sample_interval_seconds: default_sample_interval(),
            rates: default_rates(),
        }
    }
}

impl MeteringConfig {
    /// Returns the rate for a resource kind.
    #[must_use]
    pub fn rate_for(&self, resource: ResourceKind) -> Option<&ExchangeRate> {
        self.rates.iter().find(|r| r.resource == resource)
    }

    /// Replaces the rate for its resource kind.
    #[must_use]
    pub fn with_rate(mut self, rate: ExchangeRate) -> Self {
        self.rates.retain(|r| r.resource != rate.resource);
        self.rates.push(rate);
        self
    }

    /// Sets the sample interval.
    #[must_use]
    pub fn with_sample_interval_seconds(mut self, seconds: f64) -> Self {
        self.sample_interval_seconds = seconds;
        self
    }

    /// Checks every rate and the sample interval.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.sample_interval_seconds <= 0.0 {
            return Err(FlowError::Config("sample_interval_seconds must be positive".into()));
        }
        for kind in [ResourceKind::Cpu, ResourceKind::Memory] {
            if self.rate_for(kind).is_none() {
                return Err(FlowError::Config(format!("missing exchange rate for {kind}")));
            }
        }
        self.rates.iter().try_for_each(ExchangeRate::validate)
    }
}

/// HTTP function gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway base URL.
    pub base_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: f64,
    /// Additional headers sent with every invocation.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_request_timeout() -> f64 {
    30.0
}

impl GatewayConfig {
    /// Creates a gateway configuration for a base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_seconds: default_request_timeout(),
            headers: HashMap::new(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Gets the request timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_seconds.max(0.0))
    }

    /// Returns the invocation URL of a function.
    #[must_use]
    pub fn function_url(&self, function_id: &str) -> String {
        format!("{}/async-function/{function_id}", self.base_url.trim_end_matches('/'))
    }

    fn validate(&self) -> Result<(), FlowError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(FlowError::Config(format!(
                "gateway base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.request_timeout_seconds <= 0.0 {
            return Err(FlowError::Config("gateway request_timeout_seconds must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = FlowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.callback_timeout_seconds, 3600);
        assert!(config.metering.rate_for(ResourceKind::Cpu).is_some());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FlowConfig =
            serde_json::from_str(r#"{"bucket_prefix": "run-", "metering": {"sample_interval_seconds": 5}}"#)
                .unwrap();
        assert_eq!(config.bucket_prefix, "run-");
        assert_eq!(config.callback_base_url, "http://localhost:8080");
        assert!((config.metering.sample_interval_seconds - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.metering.rates.len(), 2);
    }

    #[test]
    fn test_from_json_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{"callback_base_url": "https://flow.example.com/", "callback_timeout_seconds": 120,
                "gateway": {{"base_url": "https://faas.example.com"}}}}"#
        )?;

        let config = FlowConfig::from_json_file(file.path())?;
        assert_eq!(config.callback_timeout_seconds, 120);
        assert_eq!(
            config.callback_url("t1"),
            "https://flow.example.com/tasks/t1/callback"
        );
        let gateway = config.gateway.unwrap();
        assert_eq!(
            gateway.function_url("fn-1"),
            "https://faas.example.com/async-function/fn-1"
        );
        Ok(())
    }

    #[test]
    fn test_from_json_file_rejects_invalid() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{"callback_timeout_seconds": 0}}"#)?;
        assert!(matches!(
            FlowConfig::from_json_file(file.path()),
            Err(FlowError::Config(_))
        ));
        Ok(())
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_BUCKET_PREFIX, "prod-"),
            (ENV_CALLBACK_TIMEOUT_SECONDS, "90"),
        ]
        .into_iter()
        .collect();

        let config = FlowConfig::default()
            .with_overrides_from(|key| env.get(key).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.bucket_prefix, "prod-");
        assert_eq!(config.callback_timeout_seconds, 90);
        assert_eq!(config.callback_base_url, "http://localhost:8080");
    }

    #[test]
    fn test_override_with_bad_number() {
        let result = FlowConfig::default().with_overrides_from(|key| {
            (key == ENV_CALLBACK_TIMEOUT_SECONDS).then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(FlowError::Config(_))));
    }

    #[test]
    fn test_metering_requires_both_rates() {
        let metering = MeteringConfig {
            sample_interval_seconds: 1.0,
            rates: vec![ExchangeRate::cpu_default()],
        };
        assert!(metering.validate().is_err());

        let replaced = MeteringConfig::default().with_rate(ExchangeRate {
            rate: 2.0,
            ..ExchangeRate::cpu_default()
        });
        assert_eq!(replaced.rates.len(), 2);
        assert!((replaced.rate_for(ResourceKind::Cpu).unwrap().rate - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_gateway_validation() {
        let config = FlowConfig::default().with_gateway(GatewayConfig::new("ftp://nope"));
        assert!(config.validate().is_err());
    }
}
