//! Gateway configuration – reads `~/.camgate/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camgate_device::CameraConfig;
use camgate_supervisor::SupervisorConfig;
use camgate_types::{CameraId, CaptureProfile, GatewayError, StreamProfile};
use serde::{Deserialize, Serialize};

/// Broker endpoint settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// Stored as plain text – users should restrict file permissions on
    /// `~/.camgate/config.toml`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: String::new(),
            password: String::new(),
        }
    }
}

/// Persisted gateway configuration stored in `~/.camgate/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Directory recordings are written into.
    #[serde(default = "default_video_dir")]
    pub video_dir: PathBuf,

    /// Bound on frames queued ahead of each recording sink.
    #[serde(default = "default_queue_capacity")]
    pub record_queue_capacity: usize,

    /// How long a stopping recording may take to drain and finalize.
    #[serde(default = "default_stop_timeout_ms")]
    pub record_stop_timeout_ms: u64,

    /// Heartbeat counter silence that counts as controller loss.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,

    /// TCP port of the MJPEG preview server.
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,

    /// Capture settings requested from every camera.
    #[serde(default)]
    pub capture: CaptureProfile,

    /// Preview encoding settings.
    #[serde(default)]
    pub stream: StreamProfile,

    /// Static camera map: camera id -> device node (`/dev/videoN`) or USB
    /// serial to resolve at startup.
    #[serde(default = "default_cameras")]
    pub cameras: BTreeMap<String, String>,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_video_dir() -> PathBuf {
    PathBuf::from("/var/lib/camgate/video")
}
fn default_queue_capacity() -> usize {
    12
}
fn default_stop_timeout_ms() -> u64 {
    3000
}
fn default_heartbeat_timeout_ms() -> u64 {
    5000
}
fn default_status_interval_ms() -> u64 {
    1000
}
fn default_tick_interval_ms() -> u64 {
    1
}
fn default_connect_retry_delay_ms() -> u64 {
    1000
}
fn default_stream_port() -> u16 {
    camgate_stream::DEFAULT_PORT
}
fn default_cameras() -> BTreeMap<String, String> {
    BTreeMap::from([("1".to_string(), "/dev/video0".to_string())])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            video_dir: default_video_dir(),
            record_queue_capacity: default_queue_capacity(),
            record_stop_timeout_ms: default_stop_timeout_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            status_interval_ms: default_status_interval_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            stream_port: default_stream_port(),
            capture: CaptureProfile::default(),
            stream: StreamProfile::default(),
            cameras: default_cameras(),
        }
    }
}

impl Config {
    /// Supervisor cadence derived from the millisecond fields.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            status_interval: Duration::from_millis(self.status_interval_ms),
            connect_retry_delay: Duration::from_millis(self.connect_retry_delay_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
        }
    }

    /// Build one [`CameraConfig`] per camera map entry, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when a map key is not a camera id.
    pub fn camera_configs(&self) -> Result<Vec<CameraConfig>, GatewayError> {
        let mut configs = Vec::with_capacity(self.cameras.len());
        for (key, node) in &self.cameras {
            let id: CameraId = key
                .parse()
                .map_err(|_| GatewayError::Config(format!("invalid camera id key: {key:?}")))?;
            configs.push(CameraConfig {
                id,
                node: node.clone(),
                capture: self.capture.clone(),
                video_dir: self.video_dir.clone(),
                queue_capacity: self.record_queue_capacity,
                stop_timeout: Duration::from_millis(self.record_stop_timeout_ms),
            });
        }
        configs.sort_by_key(|c| c.id);
        Ok(configs)
    }
}

/// Return the path to `~/.camgate/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".camgate").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, GatewayError> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, GatewayError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| GatewayError::Config(format!("parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `CAMGATE_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `CAMGATE_BROKER_HOST` | `broker.host` |
/// | `CAMGATE_BROKER_PORT` | `broker.port` |
/// | `CAMGATE_VIDEO_DIR` | `video_dir` |
/// | `CAMGATE_STREAM_PORT` | `stream_port` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("CAMGATE_BROKER_HOST") {
        cfg.broker.host = v;
    }
    if let Ok(v) = std::env::var("CAMGATE_BROKER_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.broker.port = port;
    }
    if let Ok(v) = std::env::var("CAMGATE_VIDEO_DIR") {
        cfg.video_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("CAMGATE_STREAM_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.stream_port = port;
    }
}
