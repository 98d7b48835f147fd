use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VisionConfig {
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
    pub capture: CaptureConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Base URL of the HTTP API
    #[serde(default = "default_http_url")]
    pub http_url: String,

    /// URL of the persistent WebSocket endpoint
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConnectionConfig {
    /// Base delay for linear reconnect backoff, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Consecutive failed attempts before reconnection is abandoned
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Target canvas width in pixels
    #[serde(default = "default_capture_width")]
    pub width: u32,

    /// Target canvas height in pixels
    #[serde(default = "default_capture_height")]
    pub height: u32,

    /// Capture cadence in frames per second
    #[serde(default = "default_capture_fps")]
    pub fps: u32,

    /// Primary JPEG quality (1-100)
    #[serde(default = "default_primary_quality")]
    pub primary_quality: u8,

    /// Fallback JPEG quality used when the primary encoding is over budget
    #[serde(default = "default_fallback_quality")]
    pub fallback_quality: u8,

    /// Per-frame payload budget in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    /// Directory for persisted tokens; resolved from the platform data dir when unset
    pub state_dir: Option<String>,
}

impl VisionConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("visionlink.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("server.http_url", default_http_url())?
            .set_default("server.ws_url", default_ws_url())?
            .set_default("connection.base_delay_ms", default_base_delay_ms())?
            .set_default("connection.max_attempts", default_max_attempts())?
            .set_default("capture.width", default_capture_width())?
            .set_default("capture.height", default_capture_height())?
            .set_default("capture.fps", default_capture_fps())?
            .set_default("capture.primary_quality", default_primary_quality() as i64)?
            .set_default("capture.fallback_quality", default_fallback_quality() as i64)?
            .set_default("capture.max_payload_bytes", default_max_payload_bytes() as i64)?
            .set_default("auth.state_dir", None::<String>)?
            // Layer the file on top when present
            .add_source(File::with_name(&path_str).required(false))
            // Environment variables override everything (VISIONLINK_SERVER__HTTP_URL, ...)
            .add_source(Environment::with_prefix("VISIONLINK").separator("__"))
            .build()?;

        let config: VisionConfig = settings.try_deserialize()?;
        config.validate().map_err(ConfigError::Message)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.server.http_url.is_empty() {
            return Err("server.http_url must not be empty".to_string());
        }
        if !self.server.ws_url.starts_with("ws://") && !self.server.ws_url.starts_with("wss://") {
            return Err(format!(
                "server.ws_url must be a ws:// or wss:// URL, got '{}'",
                self.server.ws_url
            ));
        }
        if self.connection.max_attempts == 0 {
            return Err("connection.max_attempts must be at least 1".to_string());
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err("capture dimensions must be positive".to_string());
        }
        if self.capture.fps == 0 {
            return Err("capture.fps must be at least 1".to_string());
        }
        for (name, quality) in [
            ("capture.primary_quality", self.capture.primary_quality),
            ("capture.fallback_quality", self.capture.fallback_quality),
        ] {
            if quality == 0 || quality > 100 {
                return Err(format!("{} must be within 1-100, got {}", name, quality));
            }
        }
        if self.capture.fallback_quality >= self.capture.primary_quality {
            return Err("capture.fallback_quality must be below primary_quality".to_string());
        }
        if self.capture.max_payload_bytes == 0 {
            return Err("capture.max_payload_bytes must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                http_url: default_http_url(),
                ws_url: default_ws_url(),
            },
            connection: ConnectionConfig {
                base_delay_ms: default_base_delay_ms(),
                max_attempts: default_max_attempts(),
            },
            capture: CaptureConfig {
                width: default_capture_width(),
                height: default_capture_height(),
                fps: default_capture_fps(),
                primary_quality: default_primary_quality(),
                fallback_quality: default_fallback_quality(),
                max_payload_bytes: default_max_payload_bytes(),
            },
            auth: AuthConfig { state_dir: None },
        }
    }
}

impl ConnectionConfig {
    pub fn base_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.base_delay_ms)
    }
}

impl CaptureConfig {
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(1000 / self.fps.max(1) as u64)
    }
}

fn default_http_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8000/ws".to_string()
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_capture_width() -> u32 {
    640
}

fn default_capture_height() -> u32 {
    480
}

fn default_capture_fps() -> u32 {
    15
}

fn default_primary_quality() -> u8 {
    60
}

fn default_fallback_quality() -> u8 {
    50
}

fn default_max_payload_bytes() -> usize {
    500 * 1024
}
