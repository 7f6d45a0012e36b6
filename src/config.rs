//! Configuration loading helpers.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::auth::ApiKeyCacheConfig;
use crate::buffer_pool::BufferPoolConfig;
use crate::engine::RonDbConfig;
use crate::pipeline::PipelineConfig;
use crate::validation::ValidationLimits;

/// Env var naming the TOML file read by [`RdrsConfig::load_from_env`].
pub const CONFIG_PATH_ENV: &str = "RDRS_CONFIG";

const ENV_PREFIX: &str = "RDRS__";

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RdrsConfig {
    /// Buffer and validation limits.
    pub internal: Option<InternalConfig>,
    /// API key settings.
    pub security: Option<SecurityConfig>,
    /// Data cluster connection.
    pub rondb: Option<RonDbSection>,
}

impl RdrsConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from the `RDRS_CONFIG` env var (if set),
    /// then apply `RDRS__section__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var(CONFIG_PATH_ENV).ok() {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for (key, value) in env::vars() {
            let Some(path) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let path = path.to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim().to_string();

            match parts.as_slice() {
                ["internal", "buffer_size"] => {
                    self.internal_mut().buffer_size = Some(parse_value(&key, &value)?);
                }
                ["internal", "pre_allocated_buffers"] => {
                    self.internal_mut().pre_allocated_buffers = Some(parse_value(&key, &value)?);
                }
                ["internal", "operation_id_max_size"] => {
                    self.internal_mut().operation_id_max_size = Some(parse_value(&key, &value)?);
                }
                ["internal", "batch_max_operations"] => {
                    self.internal_mut().batch_max_operations = Some(parse_value(&key, &value)?);
                }
                ["internal", "max_filters"] => {
                    self.internal_mut().max_filters = Some(parse_value(&key, &value)?);
                }
                ["internal", "max_read_columns"] => {
                    self.internal_mut().max_read_columns = Some(parse_value(&key, &value)?);
                }
                ["security", "use_api_keys"] => {
                    self.security_mut().use_api_keys = Some(parse_value(&key, &value)?);
                }
                ["security", "cache_refresh_interval_ms"] => {
                    self.security_mut().cache_refresh_interval_ms =
                        Some(parse_value(&key, &value)?);
                }
                ["security", "cache_refresh_interval_jitter_ms"] => {
                    self.security_mut().cache_refresh_interval_jitter_ms =
                        Some(parse_value(&key, &value)?);
                }
                ["security", "cache_unused_entries_eviction_ms"] => {
                    self.security_mut().cache_unused_entries_eviction_ms =
                        Some(parse_value(&key, &value)?);
                }
                ["security", "cache_sweep_interval_ms"] => {
                    self.security_mut().cache_sweep_interval_ms = Some(parse_value(&key, &value)?);
                }
                ["rondb", "connect_string"] => {
                    self.rondb_mut().connect_string = Some(value);
                }
                ["rondb", "connection_retries"] => {
                    self.rondb_mut().connection_retries = Some(parse_value(&key, &value)?);
                }
                ["rondb", "connection_retry_delay_ms"] => {
                    self.rondb_mut().connection_retry_delay_ms = Some(parse_value(&key, &value)?);
                }
                ["rondb", "op_retry_on_transient_errors_count"] => {
                    self.rondb_mut().op_retry_on_transient_errors_count =
                        Some(parse_value(&key, &value)?);
                }
                ["rondb", "op_retry_initial_delay_ms"] => {
                    self.rondb_mut().op_retry_initial_delay_ms = Some(parse_value(&key, &value)?);
                }
                ["rondb", "op_retry_jitter_ms"] => {
                    self.rondb_mut().op_retry_jitter_ms = Some(parse_value(&key, &value)?);
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Build a validated `BufferPoolConfig` using defaults plus overrides.
    pub fn to_buffer_pool_config(&self) -> Result<BufferPoolConfig, ConfigError> {
        let mut config = BufferPoolConfig::default();
        if let Some(internal) = &self.internal {
            if let Some(value) = internal.buffer_size {
                config.buffer_size = value;
            }
            if let Some(value) = internal.pre_allocated_buffers {
                config.pre_allocated = value;
            }
        }
        config.validate().map_err(|_| ConfigError::InvalidValue {
            key: "internal.buffer_size".into(),
            value: config.buffer_size.to_string(),
        })?;
        Ok(config)
    }

    /// Build `ValidationLimits` using defaults plus overrides.
    pub fn to_validation_limits(&self) -> ValidationLimits {
        let mut limits = ValidationLimits::default();
        if let Some(internal) = &self.internal {
            internal.apply_to(&mut limits);
        }
        limits
    }

    /// Build a `PipelineConfig`. API keys are required unless disabled.
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        let use_api_keys = self
            .security
            .as_ref()
            .and_then(|s| s.use_api_keys)
            .unwrap_or(true);
        PipelineConfig::new()
            .with_limits(self.to_validation_limits())
            .with_api_keys(use_api_keys)
    }

    /// Build an `ApiKeyCacheConfig` using defaults plus overrides.
    pub fn to_api_key_cache_config(&self) -> ApiKeyCacheConfig {
        let mut config = ApiKeyCacheConfig::default();
        if let Some(security) = &self.security {
            security.apply_to(&mut config);
        }
        config
    }

    /// Build the engine connection settings.
    pub fn rondb_config(&self) -> RonDbConfig {
        let mut config = RonDbConfig::default();
        if let Some(rondb) = &self.rondb {
            rondb.apply_to(&mut config);
        }
        config
    }

    fn internal_mut(&mut self) -> &mut InternalConfig {
        self.internal.get_or_insert_with(InternalConfig::default)
    }

    fn security_mut(&mut self) -> &mut SecurityConfig {
        self.security.get_or_insert_with(SecurityConfig::default)
    }

    fn rondb_mut(&mut self) -> &mut RonDbSection {
        self.rondb.get_or_insert_with(RonDbSection::default)
    }
}

/// Buffer and validation overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InternalConfig {
    /// Bytes per native buffer.
    pub buffer_size: Option<u32>,
    /// Buffers allocated at startup.
    pub pre_allocated_buffers: Option<u32>,
    /// Longest operation id.
    pub operation_id_max_size: Option<usize>,
    /// Most sub-operations per batch.
    pub batch_max_operations: Option<usize>,
    /// Most filters per read.
    pub max_filters: Option<usize>,
    /// Most read columns per read.
    pub max_read_columns: Option<usize>,
}

impl InternalConfig {
    fn apply_to(&self, limits: &mut ValidationLimits) {
        if let Some(value) = self.operation_id_max_size {
            limits.operation_id_max_size = value;
        }
        if let Some(value) = self.batch_max_operations {
            limits.batch_max_operations = value;
        }
        if let Some(value) = self.max_filters {
            limits.max_filters = value;
        }
        if let Some(value) = self.max_read_columns {
            limits.max_read_columns = value;
        }
    }
}

/// API key overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Require API keys.
    pub use_api_keys: Option<bool>,
    /// Entry refresh interval.
    pub cache_refresh_interval_ms: Option<u64>,
    /// Spread applied to the refresh interval.
    pub cache_refresh_interval_jitter_ms: Option<u64>,
    /// Idle time after which entries are evicted.
    pub cache_unused_entries_eviction_ms: Option<u64>,
    /// Period of the eviction sweep.
    pub cache_sweep_interval_ms: Option<u64>,
}

impl SecurityConfig {
    fn apply_to(&self, config: &mut ApiKeyCacheConfig) {
        if let Some(value) = self.cache_refresh_interval_ms {
            config.refresh_interval = Duration::from_millis(value);
        }
        if let Some(value) = self.cache_refresh_interval_jitter_ms {
            config.refresh_jitter = Duration::from_millis(value);
        }
        if let Some(value) = self.cache_unused_entries_eviction_ms {
            config.eviction_window = Duration::from_millis(value);
        }
        if let Some(value) = self.cache_sweep_interval_ms {
            config.sweep_interval = Duration::from_millis(value.max(1));
        }
    }
}

/// Data cluster overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RonDbSection {
    /// Management server address.
    pub connect_string: Option<String>,
    /// Connection attempts.
    pub connection_retries: Option<u32>,
    /// Delay between connection attempts.
    pub connection_retry_delay_ms: Option<u64>,
    /// Retries of transient operation failures.
    pub op_retry_on_transient_errors_count: Option<u32>,
    /// First retry backoff.
    pub op_retry_initial_delay_ms: Option<u64>,
    /// Retry jitter.
    pub op_retry_jitter_ms: Option<u64>,
}

impl RonDbSection {
    fn apply_to(&self, config: &mut RonDbConfig) {
        if let Some(value) = &self.connect_string {
            config.connect_string = value.clone();
        }
        if let Some(value) = self.connection_retries {
            config.connection_retries = value;
        }
        if let Some(value) = self.connection_retry_delay_ms {
            config.connection_retry_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.op_retry_on_transient_errors_count {
            config.op_retry_count = value;
        }
        if let Some(value) = self.op_retry_initial_delay_ms {
            config.op_retry_initial_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.op_retry_jitter_ms {
            config.op_retry_jitter = Duration::from_millis(value);
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = RdrsConfig::default();
        let pool = config.to_buffer_pool_config().unwrap();
        assert_eq!(pool.buffer_size, 320 * 1024);
        assert_eq!(pool.pre_allocated, 1024);
        assert!(config.to_pipeline_config().use_api_keys);
        assert_eq!(
            config.to_api_key_cache_config().refresh_interval,
            Duration::from_secs(10)
        );
        assert_eq!(config.rondb_config().connect_string, "localhost:1186");
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[internal]
buffer_size = 4096
batch_max_operations = 16

[security]
use_api_keys = false
cache_refresh_interval_ms = 250

[rondb]
connect_string = "mgmd:1186"
op_retry_jitter_ms = 5
"#
        )
        .unwrap();

        let config = RdrsConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.to_buffer_pool_config().unwrap().buffer_size, 4096);
        let pipeline = config.to_pipeline_config();
        assert!(!pipeline.use_api_keys);
        assert_eq!(pipeline.limits.batch_max_operations, 16);
        assert_eq!(pipeline.limits.max_filters, 4096);
        assert_eq!(
            config.to_api_key_cache_config().refresh_interval,
            Duration::from_millis(250)
        );
        let rondb = config.rondb_config();
        assert_eq!(rondb.connect_string, "mgmd:1186");
        assert_eq!(rondb.op_retry_jitter, Duration::from_millis(5));
    }

    #[test]
    fn test_every_field_falls_back_to_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[security]\nuse_api_keys = false").unwrap();

        let config = RdrsConfig::load_from_path(file.path()).unwrap();
        assert!(config.internal.is_none());
        assert!(config.rondb.is_none());
        assert_eq!(config.to_buffer_pool_config().unwrap().buffer_size, 320 * 1024);
        assert_eq!(config.rondb_config().connect_string, "localhost:1186");
    }

    #[test]
    fn test_rejects_unaligned_buffer_size() {
        let config = RdrsConfig {
            internal: Some(InternalConfig {
                buffer_size: Some(1001),
                ..InternalConfig::default()
            }),
            ..RdrsConfig::default()
        };
        assert!(matches!(
            config.to_buffer_pool_config(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();

        env::set_var("RDRS__internal__pre_allocated_buffers", "8");
        env::set_var("RDRS__security__cache_unused_entries_eviction_ms", "1500");
        env::set_var("RDRS__rondb__connect_string", "cluster:1186");

        let mut config = RdrsConfig::default();
        let result = config.apply_env_overrides();

        env::remove_var("RDRS__internal__pre_allocated_buffers");
        env::remove_var("RDRS__security__cache_unused_entries_eviction_ms");
        env::remove_var("RDRS__rondb__connect_string");

        result.unwrap();
        assert_eq!(config.to_buffer_pool_config().unwrap().pre_allocated, 8);
        assert_eq!(
            config.to_api_key_cache_config().eviction_window,
            Duration::from_millis(1500)
        );
        assert_eq!(config.rondb_config().connect_string, "cluster:1186");
    }

    #[test]
    fn test_env_override_errors() {
        let _guard = ENV_LOCK.lock().unwrap();

        env::set_var("RDRS__internal__buffer_size", "lots");
        let result = RdrsConfig::default().apply_env_overrides();
        env::remove_var("RDRS__internal__buffer_size");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        env::set_var("RDRS__internal__no_such_field", "1");
        let result = RdrsConfig::default().apply_env_overrides();
        env::remove_var("RDRS__internal__no_such_field");
        assert!(matches!(result, Err(ConfigError::UnknownKey(_))));
    }
}
