//! Gateway configuration.
//!
//! Loaded from YAML or JSON. Environment variables override file values:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `AI_HTTP_TIMEOUT_SECS` | `http.timeout_secs` |
//! | `AI_HTTP_MAX_RETRIES` | `http.retry.max_retries` |
//! | `AI_METRICS_HISTOGRAM_CAPACITY` | `metrics.histogram_capacity` |
//!
//! ```yaml
//! default_provider: openai
//! metrics:
//!   histogram_capacity: 2000
//!   emit_chunk_events: true
//! load_balancers:
//!   - name: pool
//!     providers: [openai, anthropic]
//!     strategy: weighted
//!     weights: [3, 1]
//! extensions:
//!   content_filter:
//!     config:
//!       patterns: ["(?i)password"]
//! ```

use crate::extensions::ExtensionConfig;
use crate::metrics::CollectorConfig;
use crate::provider::ProviderConfig;
use crate::transport::HttpConfig;
use crate::virtual_providers::LoadBalanceStrategy;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    #[serde(flatten)]
    pub collector: CollectorConfig,
    /// Emit a `stream_chunk` event per streamed chunk.
    pub emit_chunk_events: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub name: String,
    pub providers: Vec<String>,
    #[serde(default)]
    pub strategy: LoadBalanceStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RacingConfig {
    pub name: String,
    pub providers: Vec<String>,
    #[serde(default = "default_race_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub grace_period_ms: u64,
}

fn default_race_timeout_ms() -> u64 {
    crate::virtual_providers::DEFAULT_RACE_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    pub metrics: MetricsConfig,
    pub http: HttpConfig,
    pub providers: Vec<ProviderConfig>,
    pub load_balancers: Vec<LoadBalancerConfig>,
    pub racing: Vec<RacingConfig>,
    pub extensions: HashMap<String, ExtensionConfig>,
}

impl GatewayConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let mut cfg: Self = serde_yaml::from_str(text)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let mut cfg: Self = serde_json::from_str(text)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(secs) = env_parse::<u64>("AI_HTTP_TIMEOUT_SECS") {
            self.http.timeout_secs = secs;
        }
        if let Some(n) = env_parse::<u32>("AI_HTTP_MAX_RETRIES") {
            self.http.retry.max_retries = n;
        }
        if let Some(cap) = env_parse::<usize>("AI_METRICS_HISTOGRAM_CAPACITY") {
            self.metrics.collector.histogram_capacity = cap;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.metrics.collector.histogram_capacity == 0 {
            return Err(invalid("metrics.histogram_capacity", "must be greater than zero"));
        }
        if self.http.timeout_secs == 0 {
            return Err(invalid("http.timeout_secs", "must be greater than zero"));
        }
        if !(self.http.retry.multiplier.is_finite() && self.http.retry.multiplier > 0.0) {
            return Err(invalid("http.retry.multiplier", "must be a positive number"));
        }
        if let Some(proxy) = &self.http.proxy_url {
            url::Url::parse(proxy)
                .map_err(|e| invalid("http.proxy_url", &format!("not a valid URL: {}", e)))?;
        }

        let mut names = HashSet::new();
        for (i, p) in self.providers.iter().enumerate() {
            if p.name.is_empty() {
                return Err(invalid(&format!("providers[{}].name", i), "must not be empty"));
            }
            if !names.insert(p.name.as_str()) {
                return Err(invalid(
                    &format!("providers[{}].name", i),
                    &format!("duplicate provider '{}'", p.name),
                ));
            }
        }
        for (i, lb) in self.load_balancers.iter().enumerate() {
            let field = format!("load_balancers[{}]", i);
            check_virtual(&field, &lb.name, &lb.providers, &mut names)?;
            if let Some(w) = &lb.weights {
                if w.len() != lb.providers.len() {
                    return Err(invalid(
                        &format!("{}.weights", field),
                        "must have one weight per provider",
                    ));
                }
            }
        }
        for (i, r) in self.racing.iter().enumerate() {
            check_virtual(&format!("racing[{}]", i), &r.name, &r.providers, &mut names)?;
        }
        Ok(())
    }
}

fn check_virtual<'a>(
    field: &str,
    name: &'a str,
    providers: &[String],
    names: &mut HashSet<&'a str>,
) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(&format!("{}.name", field), "must not be empty"));
    }
    if providers.is_empty() {
        return Err(invalid(
            &format!("{}.providers", field),
            "must list at least one provider",
        ));
    }
    if !names.insert(name) {
        return Err(invalid(
            &format!("{}.name", field),
            &format!("duplicate provider '{}'", name),
        ));
    }
    Ok(())
}

fn invalid(field: &str, details: &str) -> Error {
    Error::configuration_with_context(
        format!("invalid value for {}", field),
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("gateway_config"),
    )
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderType;

    const YAML: &str = r#"
default_provider: primary
metrics:
  histogram_capacity: 200
  emit_chunk_events: true
http:
  retry:
    max_retries: 1
providers:
  - name: primary
    type: openai
  - name: backup
    type: anthropic
load_balancers:
  - name: pool
    providers: [primary, backup]
    strategy: weighted
    weights: [2, 1]
racing:
  - name: fastest
    providers: [primary, backup]
    grace_period_ms: 50
extensions:
  content_filter:
    config:
      patterns: ["secret"]
  request_tag:
    enabled: false
"#;

    #[test]
    fn test_yaml_round_trip() {
        let cfg = GatewayConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(cfg.default_provider.as_deref(), Some("primary"));
        assert_eq!(cfg.metrics.collector.histogram_capacity, 200);
        assert!(cfg.metrics.emit_chunk_events);
        assert_eq!(cfg.http.retry.max_retries, 1);
        assert_eq!(cfg.http.timeout_secs, 60);
        assert_eq!(cfg.providers[1].provider_type, ProviderType::Anthropic);
        assert_eq!(cfg.load_balancers[0].strategy, LoadBalanceStrategy::Weighted);
        assert_eq!(cfg.racing[0].timeout_ms, 30_000);
        assert!(!cfg.extensions["request_tag"].enabled);
        assert!(cfg.extensions["content_filter"].enabled);

        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(GatewayConfig::from_json_str(&json).unwrap(), cfg);
    }

    #[test]
    fn test_empty_config_is_valid() {
        let cfg = GatewayConfig::from_yaml_str("{}").unwrap();
        assert!(cfg.providers.is_empty());
        assert_eq!(cfg.metrics.collector, CollectorConfig::default());
    }

    #[test]
    fn test_validation_reports_field() {
        let err = GatewayConfig::from_yaml_str(
            "providers:\n  - name: a\n    type: openai\n  - name: a\n    type: groq\n",
        )
        .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("providers[1].name")
        );

        let err = GatewayConfig::from_yaml_str(
            "load_balancers:\n  - name: lb\n    providers: [a, b]\n    weights: [1]\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let err = GatewayConfig::from_yaml_str("http:\n  proxy_url: not a url\n").unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("http.proxy_url")
        );
    }

    #[test]
    fn test_from_file_picks_format() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("gateway-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"default_provider": "x"}"#).unwrap();
        let cfg = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(cfg.default_provider.as_deref(), Some("x"));
        let _ = std::fs::remove_file(&path);
    }
}
