//! # Hub Configuration
//!
//! Configuration for the offline sync core, loaded once at startup.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     HARBOR_SYNC_INTERVAL=15                                            │
//! │     HARBOR_ENDPOINT_URL=https://ops.example.com/api                    │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     $HARBOR_CONFIG, or                                                 │
//! │     ~/.config/harbor-hub/hub.toml (Linux)                              │
//! │     ~/Library/Application Support/com.harbor.hub/hub.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # hub.toml
//! sync_interval_seconds = 30
//! cache_size_limit_bytes = 5242880
//! retry_attempts = 3
//! retry_base_delay_ms = 1000
//! health_check_interval_secs = 30
//! connection_timeout_ms = 5000
//!
//! [feature_flags]
//! offline_cache = true
//! realtime_sync = true
//! auto_recovery = false
//!
//! [endpoint]
//! base_url = "https://ops.example.com/api"
//! health_path = "/health"
//!
//! [database]
//! path = "/var/lib/harbor/harbor.db"
//!
//! [modules.mmi]
//! name = "Maritime Management"
//! enabled = true
//! priority = "high"
//! ```
//!
//! camelCase keys (`syncIntervalSeconds`, `featureFlags.offlineCache`, ...)
//! are accepted as aliases.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use harbor_core::validation::{validate_module_tag, validate_positive};
use harbor_core::Priority;

use crate::error::{HubError, HubResult};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "HARBOR_CONFIG";

// =============================================================================
// Feature Flags
// =============================================================================

/// Runtime feature switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Buffer writes locally. When off, `store_offline` is a logged no-op.
    #[serde(default = "default_true", alias = "offlineCache")]
    pub offline_cache: bool,

    /// Start the periodic auto-sync timer on `init`.
    #[serde(default = "default_true", alias = "realtimeSync")]
    pub realtime_sync: bool,

    /// Let the next health poll replace a registered module error.
    #[serde(default, alias = "autoRecovery")]
    pub auto_recovery: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        FeatureFlags {
            offline_cache: true,
            realtime_sync: true,
            auto_recovery: false,
        }
    }
}

// =============================================================================
// Module Declarations
// =============================================================================

/// Static declaration of one dashboard module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Human-readable module name.
    pub name: String,

    /// Only enabled modules are tracked by the health monitor.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Default delivery priority for entries tagged with this module.
    #[serde(default)]
    pub priority: Priority,
}

impl ModuleConfig {
    pub fn new(name: impl Into<String>, priority: Priority) -> Self {
        ModuleConfig {
            name: name.into(),
            enabled: true,
            priority,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

fn default_modules() -> BTreeMap<String, ModuleConfig> {
    BTreeMap::from([
        (
            "network".to_string(),
            ModuleConfig::new("Network Link", Priority::High),
        ),
        (
            "storage".to_string(),
            ModuleConfig::new("Local Cache", Priority::Medium),
        ),
        (
            "mmi".to_string(),
            ModuleConfig::new("Maritime Management", Priority::High),
        ),
        (
            "logistics".to_string(),
            ModuleConfig::new("Logistics", Priority::Medium),
        ),
    ])
}

// =============================================================================
// Endpoint & Database Settings
// =============================================================================

/// Remote delivery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Entries are delivered to `{base_url}/{module}`.
    #[serde(default = "default_base_url", alias = "baseUrl")]
    pub base_url: String,

    /// Reachability probe path, appended to `base_url`.
    #[serde(default = "default_health_path", alias = "healthPath")]
    pub health_path: String,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl Default for EndpointSettings {
    fn default() -> Self {
        EndpointSettings {
            base_url: default_base_url(),
            health_path: default_health_path(),
        }
    }
}

/// Local database location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("com", "harbor", "hub")
        .map(|dirs| dirs.data_dir().join("harbor.db"))
        .unwrap_or_else(|| PathBuf::from("harbor.db"))
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
        }
    }
}

// =============================================================================
// Defaults
// =============================================================================

fn default_true() -> bool {
    true
}
fn default_sync_interval() -> u64 {
    30
}
fn default_cache_limit() -> u64 {
    5 * 1024 * 1024
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    1000
}
fn default_health_check_interval() -> u64 {
    30
}
fn default_connection_timeout() -> u64 {
    5000
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete hub configuration. Shared as `Arc<HubConfiguration>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfiguration {
    /// Auto-sync period.
    #[serde(default = "default_sync_interval", alias = "syncIntervalSeconds")]
    pub sync_interval_seconds: u64,

    /// Capacity of the local cache store.
    #[serde(default = "default_cache_limit", alias = "cacheSizeLimitBytes")]
    pub cache_size_limit_bytes: u64,

    /// Delivery attempts per entry per cycle.
    #[serde(default = "default_retry_attempts", alias = "retryAttempts")]
    pub retry_attempts: u32,

    /// Base of the exponential backoff between attempts.
    #[serde(default = "default_retry_base_delay", alias = "retryBaseDelayMs")]
    pub retry_base_delay_ms: u64,

    /// Health poll period; 0 disables the periodic poll.
    #[serde(
        default = "default_health_check_interval",
        alias = "healthCheckInterval"
    )]
    pub health_check_interval_secs: u64,

    /// Budget for one reachability probe and one delivery request.
    #[serde(default = "default_connection_timeout", alias = "connectionTimeout")]
    pub connection_timeout_ms: u64,

    #[serde(default, alias = "featureFlags")]
    pub feature_flags: FeatureFlags,

    #[serde(default)]
    pub endpoint: EndpointSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    /// Declared modules, keyed by module tag.
    #[serde(default = "default_modules")]
    pub modules: BTreeMap<String, ModuleConfig>,
}

impl Default for HubConfiguration {
    fn default() -> Self {
        HubConfiguration {
            sync_interval_seconds: default_sync_interval(),
            cache_size_limit_bytes: default_cache_limit(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            health_check_interval_secs: default_health_check_interval(),
            connection_timeout_ms: default_connection_timeout(),
            feature_flags: FeatureFlags::default(),
            endpoint: EndpointSettings::default(),
            database: DatabaseSettings::default(),
            modules: default_modules(),
        }
    }
}

impl HubConfiguration {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`config_path`, else `$HARBOR_CONFIG`, else `hub.toml`
    ///    in the platform config dir)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> HubResult<Self> {
        let mut config = Self::default();

        let path = config_path
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .or_else(Self::default_config_path);

        if let Some(path) = path {
            if path.exists() {
                info!(?path, "Loading hub config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns defaults if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load hub config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a TOML document, then validates it. No environment overrides.
    pub fn from_toml_str(contents: &str) -> HubResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to file as pretty TOML.
    pub fn save(&self, config_path: Option<PathBuf>) -> HubResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| HubError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HubError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| HubError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Hub config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> HubResult<()> {
        validate_positive("sync_interval_seconds", self.sync_interval_seconds)?;
        validate_positive("cache_size_limit_bytes", self.cache_size_limit_bytes)?;
        validate_positive("retry_attempts", u64::from(self.retry_attempts))?;
        validate_positive("connection_timeout_ms", self.connection_timeout_ms)?;

        let base = url::Url::parse(&self.endpoint.base_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(HubError::InvalidUrl(format!(
                "Endpoint URL must use http:// or https://, got: {}",
                self.endpoint.base_url
            )));
        }

        if !self.endpoint.health_path.starts_with('/') {
            return Err(HubError::InvalidConfig(format!(
                "health_path must start with '/', got: {}",
                self.endpoint.health_path
            )));
        }

        for (key, module) in &self.modules {
            validate_module_tag(key)?;
            if module.name.trim().is_empty() {
                return Err(HubError::InvalidConfig(format!(
                    "module '{}' has an empty name",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Applies `HARBOR_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("HARBOR_SYNC_INTERVAL") {
            match v.parse() {
                Ok(secs) => {
                    debug!(secs, "Overriding sync interval from environment");
                    self.sync_interval_seconds = secs;
                }
                Err(_) => warn!(value = %v, "Ignoring invalid HARBOR_SYNC_INTERVAL"),
            }
        }

        if let Some(v) = lookup("HARBOR_CACHE_LIMIT_BYTES") {
            match v.parse() {
                Ok(bytes) => self.cache_size_limit_bytes = bytes,
                Err(_) => warn!(value = %v, "Ignoring invalid HARBOR_CACHE_LIMIT_BYTES"),
            }
        }

        if let Some(v) = lookup("HARBOR_RETRY_ATTEMPTS") {
            match v.parse() {
                Ok(attempts) => self.retry_attempts = attempts,
                Err(_) => warn!(value = %v, "Ignoring invalid HARBOR_RETRY_ATTEMPTS"),
            }
        }

        if let Some(url) = lookup("HARBOR_ENDPOINT_URL") {
            debug!(url = %url, "Overriding endpoint URL from environment");
            self.endpoint.base_url = url;
        }

        if let Some(path) = lookup("HARBOR_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }

        let flags = [
            ("HARBOR_OFFLINE_CACHE", &mut self.feature_flags.offline_cache),
            ("HARBOR_REALTIME_SYNC", &mut self.feature_flags.realtime_sync),
            ("HARBOR_AUTO_RECOVERY", &mut self.feature_flags.auto_recovery),
        ];
        for (name, flag) in flags {
            if let Some(v) = lookup(name) {
                match parse_bool(&v) {
                    Some(b) => *flag = b,
                    None => warn!(variable = name, value = %v, "Ignoring invalid boolean"),
                }
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "harbor", "hub")
            .map(|dirs| dirs.config_dir().join("hub.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Health poll period, or `None` when the periodic poll is disabled.
    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval_secs > 0)
            .then(|| Duration::from_secs(self.health_check_interval_secs))
    }

    /// Configured priority of the module named by `tag`.
    pub fn module_priority(&self, tag: &str) -> Option<Priority> {
        self.modules.get(tag).map(|m| m.priority)
    }

    /// Enabled modules in key order.
    pub fn enabled_modules(&self) -> impl Iterator<Item = (&String, &ModuleConfig)> {
        self.modules.iter().filter(|(_, m)| m.enabled)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = HubConfiguration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_base_delay(), Duration::from_secs(1));
        assert!(config.feature_flags.offline_cache);
        assert!(!config.feature_flags.auto_recovery);
        assert_eq!(config.module_priority("mmi"), Some(Priority::High));
        assert_eq!(config.module_priority("unknown"), None);
    }

    #[test]
    fn test_camel_case_aliases() {
        let config = HubConfiguration::from_toml_str(
            r#"
            syncIntervalSeconds = 10
            cacheSizeLimitBytes = 1000
            retryAttempts = 5
            healthCheckInterval = 0
            connectionTimeout = 2500

            [featureFlags]
            offlineCache = false
            realtimeSync = false
            autoRecovery = true

            [endpoint]
            baseUrl = "https://ops.example.com/api"
            healthPath = "/ping"

            [modules.crew]
            name = "Crew"
            priority = "low"

            [modules.bi]
            name = "BI"
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.sync_interval(), Duration::from_secs(10));
        assert_eq!(config.cache_size_limit_bytes, 1000);
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.health_check_interval(), None);
        assert_eq!(config.connection_timeout(), Duration::from_millis(2500));
        assert!(!config.feature_flags.offline_cache);
        assert!(!config.feature_flags.realtime_sync);
        assert!(config.feature_flags.auto_recovery);
        assert_eq!(config.endpoint.health_path, "/ping");
        assert_eq!(config.module_priority("crew"), Some(Priority::Low));

        let enabled: Vec<&String> = config.enabled_modules().map(|(k, _)| k).collect();
        assert_eq!(enabled, vec!["crew"]);
    }

    #[test]
    fn test_config_validation() {
        let mut config = HubConfiguration::default();

        config.retry_attempts = 0;
        assert!(config.validate().is_err());
        config.retry_attempts = 3;

        config.endpoint.base_url = "ftp://example.com".to_string();
        assert!(matches!(config.validate(), Err(HubError::InvalidUrl(_))));

        config.endpoint.base_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(HubError::InvalidUrl(_))));
        config.endpoint.base_url = default_base_url();

        config.endpoint.health_path = "health".to_string();
        assert!(config.validate().is_err());
        config.endpoint.health_path = default_health_path();

        config
            .modules
            .insert("bad key".to_string(), ModuleConfig::new("Bad", Priority::Low));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("HARBOR_SYNC_INTERVAL", "12"),
            ("HARBOR_CACHE_LIMIT_BYTES", "2048"),
            ("HARBOR_RETRY_ATTEMPTS", "not-a-number"),
            ("HARBOR_ENDPOINT_URL", "https://override.example.com"),
            ("HARBOR_DB_PATH", "/tmp/harbor-override.db"),
            ("HARBOR_OFFLINE_CACHE", "off"),
            ("HARBOR_AUTO_RECOVERY", "yes"),
        ]);

        let mut config = HubConfiguration::default();
        config.apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.sync_interval_seconds, 12);
        assert_eq!(config.cache_size_limit_bytes, 2048);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.endpoint.base_url, "https://override.example.com");
        assert_eq!(config.database.path, PathBuf::from("/tmp/harbor-override.db"));
        assert!(!config.feature_flags.offline_cache);
        assert!(config.feature_flags.realtime_sync);
        assert!(config.feature_flags.auto_recovery);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.toml");

        let mut config = HubConfiguration::default();
        config.sync_interval_seconds = 45;
        config.database.path = dir.path().join("harbor.db");
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[feature_flags]"));

        let loaded = HubConfiguration::from_toml_str(&contents).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfiguration::load_or_default(Some(dir.path().join("absent.toml")));
        assert_eq!(config.sync_interval_seconds, default_sync_interval());
    }
}
