use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (vigil.toml + VIGIL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Remote session and command settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Raw TCP reachability probe (network gate).
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,
    /// Session establishment (TCP + handshake + authentication).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Per check command.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Stored output beyond this is truncated with middle-omission.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    /// Upper bound on concurrently dispatched blocking connector calls.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Accept self-signed certificates on WinRM over HTTPS.
    #[serde(default)]
    pub winrm_accept_invalid_certs: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            network_timeout_secs: default_network_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            max_output_chars: default_max_output_chars(),
            worker_threads: default_worker_threads(),
            winrm_accept_invalid_certs: false,
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff for transient connection failures. Authentication failures are
/// never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Local processor script execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Interpreter used when the processor has no shebang line.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_processor_timeout")]
    pub timeout_secs: u64,
    /// Upper bound on processor processes running at once.
    #[serde(default = "default_max_processors")]
    pub max_concurrent: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_secs: default_processor_timeout(),
            max_concurrent: default_max_processors(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Due jobs fetched per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How long shutdown waits for an in-flight job before giving up.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.vigil/vigil.db", home)
}
fn default_network_timeout() -> u64 {
    5
}
fn default_connect_timeout() -> u64 {
    15
}
fn default_command_timeout() -> u64 {
    60
}
fn default_max_output_chars() -> usize {
    200_000
}
fn default_worker_threads() -> usize {
    8
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_interpreter() -> String {
    "sh".to_string()
}
fn default_processor_timeout() -> u64 {
    30
}
fn default_max_processors() -> usize {
    4
}
fn default_poll_interval() -> u64 {
    5
}
fn default_batch_size() -> usize {
    20
}
fn default_shutdown_grace() -> u64 {
    10
}

impl VigilConfig {
    /// Load config from a TOML file with VIGIL_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `VIGIL_CONNECTOR__COMMAND_TIMEOUT_SECS=120`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: VigilConfig = Figment::from(Serialized::defaults(VigilConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("VIGIL_").split("__"))
            .extract()
            .map_err(|e| crate::error::VigilError::Config(e.to_string()))?;

        tracing::debug!(path = %path, "configuration loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.vigil/vigil.toml", home)
}
