//! Configuration management for Gatehouse.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{GatehouseError, Result};
use crate::ratelimit::EffectiveLimits;
use crate::response::ResponseShape;

/// Upper bound for any configured duration, in minutes (ten years).
pub const MAX_DURATION_MINUTES: u64 = 60 * 24 * 366 * 10;

/// Main configuration for the Gatehouse service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatehouseConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Retention sweep configuration
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Resolve the client IP from forwarding headers before the socket peer
    #[serde(default = "default_trust_forwarded_headers")]
    pub trust_forwarded_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            trust_forwarded_headers: default_trust_forwarded_headers(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_trust_forwarded_headers() -> bool {
    true
}

/// Admission limiter configuration.
///
/// Every field may be omitted from the source document, but a limiter can
/// only be constructed from a configuration that passes [`LimiterConfig::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Requests allowed per window; `0` disables limiting
    #[serde(default)]
    pub requests: Option<u64>,

    /// Window length in minutes
    #[serde(default, alias = "duration")]
    pub window_minutes: u64,

    /// Block length in minutes
    #[serde(default, alias = "block_duration")]
    pub block_minutes: u64,

    /// Resource fields that identify the protected resource, mapped to
    /// whether the field is required in every request
    #[serde(default, alias = "resource")]
    pub resource_fields: BTreeMap<String, bool>,

    /// User fields that switch tracking from IP to user, mapped to whether
    /// the field is enabled
    #[serde(default, alias = "user_data")]
    pub user_fields: BTreeMap<String, bool>,

    /// IPs that are always admitted without counting
    #[serde(default)]
    pub whitelist_ips: HashSet<String>,

    /// IPs that are always denied
    #[serde(default)]
    pub blacklist_ips: HashSet<String>,

    /// External shape of admission responses
    #[serde(default, alias = "response_type")]
    pub response_shape: ResponseShape,
}

impl LimiterConfig {
    /// Check that the configuration can drive a limiter.
    pub fn validate(&self) -> Result<()> {
        if self.requests.is_none() {
            return Err(GatehouseError::Config("limiter.requests is required".to_string()));
        }
        check_duration("limiter.window_minutes", self.window_minutes)?;
        check_duration("limiter.block_minutes", self.block_minutes)?;
        if self.resource_fields.is_empty() {
            return Err(GatehouseError::Config(
                "limiter.resource_fields must declare at least one field".to_string(),
            ));
        }
        if self.user_fields.is_empty() {
            return Err(GatehouseError::Config(
                "limiter.user_fields must declare at least one field".to_string(),
            ));
        }
        Ok(())
    }

    /// The process-wide limits before any per-call override.
    pub fn base_limits(&self) -> EffectiveLimits {
        EffectiveLimits::new(
            self.requests.unwrap_or(0),
            self.window_minutes,
            self.block_minutes,
        )
    }
}

fn check_duration(name: &str, minutes: u64) -> Result<()> {
    if minutes == 0 {
        return Err(GatehouseError::Config(format!("{} must be positive", name)));
    }
    if minutes > MAX_DURATION_MINUTES {
        return Err(GatehouseError::Config(format!(
            "{} must not exceed {} minutes",
            name, MAX_DURATION_MINUTES
        )));
    }
    Ok(())
}

/// Retention sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Run the periodic sweep inside the service
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// Age in minutes after which idle records are swept; defaults to the
    /// limiter window
    #[serde(default)]
    pub retention_minutes: Option<u64>,

    /// Records removed per store round trip
    #[serde(default = "default_batch_size", alias = "insert_chunk_size")]
    pub batch_size: usize,

    /// Copy swept records to the history table before deleting them
    #[serde(default, alias = "history_backup")]
    pub archive: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_sweep_interval(),
            retention_minutes: None,
            batch_size: default_batch_size(),
            archive: false,
        }
    }
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_batch_size() -> usize {
    500
}

impl GatehouseConfig {
    /// Load configuration from an optional YAML file layered with
    /// `GATEHOUSE__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path).format(::config::FileFormat::Yaml));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("GATEHOUSE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("limiter.whitelist_ips")
                    .with_list_parse_key("limiter.blacklist_ips")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Self = settings.try_deserialize()?;
        if let Some(path) = path {
            DeclaredFields::read(path)?.restore(&mut config.limiter);
        }
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatehouseError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Retention window for the sweeper, falling back to the limiter window.
    pub fn retention_minutes(&self) -> u64 {
        self.retention
            .retention_minutes
            .unwrap_or(self.limiter.window_minutes)
    }
}

/// Tracked field declarations as spelled in the configuration file.
///
/// The layered loader folds map keys to lowercase, while field names are
/// matched against request data verbatim, so the names are re-read from the
/// file itself.
#[derive(Debug, Default, Deserialize)]
struct DeclaredFields {
    #[serde(default)]
    limiter: DeclaredLimiterFields,
}

#[derive(Debug, Default, Deserialize)]
struct DeclaredLimiterFields {
    #[serde(default, alias = "resource")]
    resource_fields: Option<BTreeMap<String, bool>>,
    #[serde(default, alias = "user_data")]
    user_fields: Option<BTreeMap<String, bool>>,
}

impl DeclaredFields {
    fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw)
            .map_err(|e| GatehouseError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    fn restore(self, limiter: &mut LimiterConfig) {
        if let Some(fields) = self.limiter.resource_fields {
            limiter.resource_fields = fields;
        }
        if let Some(fields) = self.limiter.user_fields {
            limiter.user_fields = fields;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
server:
  listen_addr: "0.0.0.0:9000"
limiter:
  requests: 3
  window_minutes: 10
  block_minutes: 5
  resource_fields:
    class_name: true
    method_name: true
  user_fields:
    user_id: true
  whitelist_ips: ["10.0.0.1"]
  blacklist_ips: ["6.6.6.6"]
  response_shape: object
retention:
  enabled: true
  batch_size: 100
  archive: true
"#;

    #[test]
    fn test_parse_full_config() {
        let config = GatehouseConfig::from_yaml(FULL).unwrap();

        assert_eq!(config.server.listen_addr.port(), 9000);
        assert!(config.server.trust_forwarded_headers);
        assert_eq!(config.limiter.requests, Some(3));
        assert_eq!(config.limiter.resource_fields.len(), 2);
        assert!(config.limiter.whitelist_ips.contains("10.0.0.1"));
        assert_eq!(config.limiter.response_shape, ResponseShape::Object);
        assert!(config.retention.archive);
        assert_eq!(config.retention.batch_size, 100);
        assert_eq!(config.retention.interval_secs, 300);
        config.limiter.validate().unwrap();
    }

    #[test]
    fn test_legacy_key_aliases() {
        let yaml = r#"
limiter:
  requests: 0
  duration: 15
  block_duration: 30
  resource: { class_name: true }
  user_data: { user_id: true }
  response_type: json
retention:
  insert_chunk_size: 50
  history_backup: true
"#;
        let config = GatehouseConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.window_minutes, 15);
        assert_eq!(config.limiter.block_minutes, 30);
        assert_eq!(config.limiter.response_shape, ResponseShape::Emit);
        assert_eq!(config.retention.batch_size, 50);
        assert!(config.retention.archive);
        assert_eq!(config.retention_minutes(), 15);
        config.limiter.validate().unwrap();
    }

    #[test]
    fn test_missing_requests_is_rejected() {
        let mut config = GatehouseConfig::from_yaml(FULL).unwrap().limiter;
        config.requests = None;
        assert!(matches!(config.validate(), Err(GatehouseError::Config(_))));
    }

    #[test]
    fn test_zero_durations_are_rejected() {
        let base = GatehouseConfig::from_yaml(FULL).unwrap().limiter;

        let mut config = base.clone();
        config.window_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = base;
        config.block_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_field_declarations_are_rejected() {
        let base = GatehouseConfig::from_yaml(FULL).unwrap().limiter;

        let mut config = base.clone();
        config.resource_fields.clear();
        assert!(config.validate().is_err());

        let mut config = base;
        config.user_fields.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_layers_file_and_env_and_keeps_field_case() {
        let path = std::env::temp_dir().join(format!("gatehouse-load-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            r#"
limiter:
  requests: 3
  window_minutes: 10
  block_minutes: 5
  resource_fields:
    className: true
  user_data:
    userId: true
"#,
        )
        .unwrap();
        std::env::set_var("GATEHOUSE__LIMITER__REQUESTS", "7");
        std::env::set_var("GATEHOUSE__LIMITER__BLACKLIST_IPS", "6.6.6.6,7.7.7.7");

        let loaded = GatehouseConfig::load(Some(&path));

        std::env::remove_var("GATEHOUSE__LIMITER__REQUESTS");
        std::env::remove_var("GATEHOUSE__LIMITER__BLACKLIST_IPS");
        std::fs::remove_file(&path).unwrap();

        let config = loaded.unwrap();
        assert_eq!(config.limiter.requests, Some(7));
        assert_eq!(config.limiter.window_minutes, 10);
        assert!(config.limiter.blacklist_ips.contains("7.7.7.7"));
        assert_eq!(config.limiter.resource_fields, [("className".to_string(), true)].into());
        assert_eq!(config.limiter.user_fields, [("userId".to_string(), true)].into());
        config.limiter.validate().unwrap();
    }

    #[test]
    fn test_default_config_is_invalid() {
        assert!(GatehouseConfig::default().limiter.validate().is_err());
    }
}
