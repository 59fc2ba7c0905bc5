use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_lookup_timeout_ms() -> u64 {
    3000
}

fn default_submit_timeout_ms() -> u64 {
    5000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
        }
    }
}

impl BackendConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: i32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,
    #[serde(default = "default_heartbeat_frames")]
    pub heartbeat_frames: u64,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_frame_interval_ms() -> u64 {
    100
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_max_reconnects() -> u32 {
    3
}

fn default_heartbeat_frames() -> u64 {
    100
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_width(),
            height: default_height(),
            frame_interval_ms: default_frame_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnects: default_max_reconnects(),
            heartbeat_frames: default_heartbeat_frames(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Upper bound on remembered codes; unbounded when absent.
    #[serde(default)]
    pub max_tracked_codes: Option<usize>,
}

fn default_cooldown_secs() -> u64 {
    5
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            max_tracked_codes: None,
        }
    }
}

impl DetectionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_client_id() -> String {
    "qrgate-detector".to_string()
}

fn default_topic() -> String {
    "estacionamento/qr/cancela".to_string()
}

fn default_command() -> String {
    "abrir".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_reconnect_interval_secs() -> u64 {
    30
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            tls: true,
            client_id: default_client_id(),
            topic: default_topic(),
            command: default_command(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// At least one second.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("detections")
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    /// Reads `config.toml` when present, then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from(DEFAULT_CONFIG_PATH)?
        } else {
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("API_URL") {
            self.backend.url = url;
        }
        if let Some(value) = lookup("CAMERA_INDEX") {
            self.camera.index = parse_env("CAMERA_INDEX", value)?;
        }
        if let Some(value) = lookup("DETECTION_COOLDOWN") {
            self.detection.cooldown_secs = parse_env("DETECTION_COOLDOWN", value)?;
        }
        if let Some(host) = lookup("MQTT_BROKER") {
            self.mqtt.host = host;
        }
        if let Some(value) = lookup("MQTT_PORT") {
            self.mqtt.port = parse_env("MQTT_PORT", value)?;
        }
        if let Some(user) = lookup("MQTT_USER") {
            self.mqtt.username = Some(user);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend.url, "http://127.0.0.1:3000");
        assert_eq!(config.camera.index, 0);
        assert_eq!(config.detection.cooldown(), Duration::from_secs(5));
        assert_eq!(config.camera.frame_interval_ms, 100);
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.topic, "estacionamento/qr/cancela");
        assert_eq!(config.mqtt.command, "abrir");
        assert!(config.mqtt.tls);
        assert!(!config.http.enabled);
        assert_eq!(config.artifacts.dir, PathBuf::from("detections"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [camera]
            index = 2

            [mqtt]
            host = "broker.local"
            tls = false
            "#,
        )
        .unwrap();

        assert_eq!(config.camera.index, 2);
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.mqtt.host, "broker.local");
        assert!(!config.mqtt.tls);
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.backend.submit_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup_from(&[
                ("API_URL", "http://backend:3000"),
                ("CAMERA_INDEX", "1"),
                ("DETECTION_COOLDOWN", "12"),
                ("MQTT_BROKER", "mqtt.example"),
                ("MQTT_PORT", " 1883 "),
                ("MQTT_USER", "gate"),
                ("MQTT_PASSWORD", "secret"),
            ]))
            .unwrap();

        assert_eq!(config.backend.url, "http://backend:3000");
        assert_eq!(config.camera.index, 1);
        assert_eq!(config.detection.cooldown_secs, 12);
        assert_eq!(config.mqtt.host, "mqtt.example");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.username.as_deref(), Some("gate"));
        assert_eq!(config.mqtt.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup_from(&[("MQTT_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name: "MQTT_PORT", .. }));
    }

    #[test]
    fn test_zero_reconnect_interval_is_clamped() {
        let config: Config = toml::from_str("[mqtt]\nreconnect_interval_secs = 0\n").unwrap();
        assert_eq!(config.mqtt.reconnect_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[detection]\ncooldown_secs = 30\nmax_tracked_codes = 500\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.detection.cooldown_secs, 30);
        assert_eq!(config.detection.max_tracked_codes, Some(500));
    }
}
