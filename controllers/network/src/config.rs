//! Process configuration.
//!
//! Read once from the environment at startup. The reconcilers only ever see
//! [`ReconcilerConfig`], handed to them explicitly.

use crate::error::ControllerError;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Settings the reconcilers act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Tags applied to every network interface the controller creates
    pub default_tags: BTreeMap<String, String>,
    /// Finalizer held on every owned record
    pub finalizer: String,
    /// Wait for the provider to settle secondary address changes
    pub settle_delay: Duration,
    /// Wait between detaching an interface and attaching it elsewhere
    pub detach_delay: Duration,
    /// Re-check of converged records for provider-side drift
    pub resync_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            default_tags: BTreeMap::new(),
            finalizer: crds::DEFAULT_FINALIZER.to_string(),
            settle_delay: Duration::from_secs(5),
            detach_delay: Duration::from_secs(3),
            resync_interval: Duration::from_secs(300),
        }
    }
}

/// Full process configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub cloud_api_url: String,
    pub cloud_api_token: String,
    /// `None` watches all namespaces
    pub namespace: Option<String>,
    pub probe_addr: SocketAddr,
    /// Quiet period after the last event before reconciling
    pub debounce: Duration,
    /// Concurrent reconciliations per kind
    pub concurrency: u16,
    pub reconciler: ReconcilerConfig,
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cloud_api_url = lookup("CLOUD_API_URL")
            .unwrap_or_else(|| "http://cloud-api.cloudops:80".to_string());
        let cloud_api_token = lookup("CLOUD_API_TOKEN").ok_or_else(|| {
            ControllerError::InvalidConfig("CLOUD_API_TOKEN environment variable is required".to_string())
        })?;
        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty());

        let probe_addr = lookup("PROBE_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let probe_addr = probe_addr.parse::<SocketAddr>().map_err(|e| {
            ControllerError::InvalidConfig(format!("PROBE_ADDR {}: {}", probe_addr, e))
        })?;

        let defaults = ReconcilerConfig::default();
        let reconciler = ReconcilerConfig {
            default_tags: match lookup("DEFAULT_TAGS") {
                Some(raw) => parse_tags(&raw)?,
                None => BTreeMap::new(),
            },
            finalizer: lookup("FINALIZER_NAME").unwrap_or(defaults.finalizer),
            settle_delay: seconds(&lookup, "SETTLE_DELAY_SECONDS", defaults.settle_delay)?,
            detach_delay: seconds(&lookup, "DETACH_DELAY_SECONDS", defaults.detach_delay)?,
            resync_interval: seconds(&lookup, "RESYNC_INTERVAL_SECONDS", defaults.resync_interval)?,
        };

        Ok(Self {
            cloud_api_url,
            cloud_api_token,
            namespace,
            probe_addr,
            debounce: seconds(&lookup, "DEBOUNCE_SECONDS", Duration::from_secs(1))?,
            concurrency: match lookup("CONCURRENCY") {
                Some(raw) => raw.parse::<u16>().map_err(|e| {
                    ControllerError::InvalidConfig(format!("CONCURRENCY {}: {}", raw, e))
                })?,
                None => 3,
            },
            reconciler,
        })
    }
}

fn seconds<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ControllerError::InvalidConfig(format!("{} {}: {}", key, raw, e))),
        None => Ok(default),
    }
}

/// Parse `k=v,k2=v2` into a tag map
pub fn parse_tags(raw: &str) -> Result<BTreeMap<String, String>, ControllerError> {
    let mut tags = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ControllerError::InvalidConfig(format!("DEFAULT_TAGS entry '{}' is not key=value", pair))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ControllerError::InvalidConfig(format!(
                "DEFAULT_TAGS entry '{}' has an empty key",
                pair
            )));
        }
        tags.insert(key.to_string(), value.trim().to_string());
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags("team=edge, env = prod,").unwrap();
        assert_eq!(tags.get("team").map(String::as_str), Some("edge"));
        assert_eq!(tags.get("env").map(String::as_str), Some("prod"));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_parse_tags_rejects_missing_separator() {
        let err = parse_tags("team").unwrap_err();
        assert!(err.is_config_error());
        assert!(parse_tags("=x").is_err());
    }

    #[test]
    fn test_token_is_required() {
        let err = ControllerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("CLOUD_API_TOKEN"));
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::from_lookup(lookup(&[("CLOUD_API_TOKEN", "t")])).unwrap();
        assert_eq!(config.cloud_api_url, "http://cloud-api.cloudops:80");
        assert_eq!(config.namespace, None);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.reconciler, ReconcilerConfig::default());
        assert_eq!(config.reconciler.settle_delay, Duration::from_secs(5));
        assert_eq!(config.reconciler.detach_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_overrides() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("CLOUD_API_TOKEN", "t"),
            ("WATCH_NAMESPACE", "edge"),
            ("DEFAULT_TAGS", "owner=cloudops"),
            ("SETTLE_DELAY_SECONDS", "2"),
            ("PROBE_ADDR", "127.0.0.1:9000"),
        ]))
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("edge"));
        assert_eq!(config.reconciler.settle_delay, Duration::from_secs(2));
        assert_eq!(config.reconciler.default_tags.len(), 1);
        assert_eq!(config.probe_addr.port(), 9000);
    }

    #[test]
    fn test_bad_delay_is_rejected() {
        let result = ControllerConfig::from_lookup(lookup(&[
            ("CLOUD_API_TOKEN", "t"),
            ("DETACH_DELAY_SECONDS", "soon"),
        ]));
        assert!(result.is_err());
    }
}
