use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_sync::channel::ChannelConfig;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [api]
//                    base_url = "http://10.0.0.5:8000/api"
//
//   env var:         RAGCHAT_API__BASE_URL=http://10.0.0.5:8000/api
//
//   (single underscore stays within field names: RAGCHAT_REALTIME__RECONNECT_DELAY_MS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub api: ApiFileConfig,
    #[serde(default)]
    pub realtime: RealtimeFileConfig,
}

/// Backend location (lives under `[api]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Direct chat requests wait on the model, so this is generous.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Realtime channel tunables (lives under `[realtime]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RealtimeFileConfig {
    /// When false every message goes through the direct request path.
    #[serde(default = "default_realtime_enabled")]
    pub enabled: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

impl Default for RealtimeFileConfig {
    fn default() -> Self {
        Self {
            enabled: default_realtime_enabled(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            send_buffer: default_send_buffer(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_realtime_enabled() -> bool {
    true
}
fn default_reconnect_delay_ms() -> u64 {
    3000
}
fn default_send_buffer() -> usize {
    64
}

/// Build a figment that layers: defaults → config.toml → RAGCHAT_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `RAGCHAT_API__TIMEOUT_SECS=30`  →  `api.timeout_secs = 30`
///   `RAGCHAT_REALTIME__ENABLED=false`  →  `realtime.enabled = false`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("RAGCHAT_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

/// Backend client configuration (runtime view).
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn from_file(fc: &ApiFileConfig) -> Self {
        Self {
            base_url: fc.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(fc.timeout_secs.max(1)),
        }
    }
}

/// Realtime channel configuration (runtime view).
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    pub enabled: bool,
    pub channel: ChannelConfig,
}

impl RealtimeConfig {
    pub fn from_file(fc: &RealtimeFileConfig) -> Self {
        Self {
            enabled: fc.enabled,
            channel: ChannelConfig {
                reconnect_delay: Duration::from_millis(fc.reconnect_delay_ms),
                send_buffer: fc.send_buffer.max(1),
            },
        }
    }
}

// =============================================================================
// Directory layout (not tunable via figment, derived from --config-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub config_dir: PathBuf,
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
}

impl ClientConfig {
    /// Resolve the config directory, create it, and load the layered config.
    /// `api_url` (from the command line) wins over every other source.
    pub fn new(custom_dir: Option<PathBuf>, api_url: Option<String>) -> Result<Self> {
        let config_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::config_dir()
                .context("Could not find a config directory")?
                .join("ragchat"),
        };

        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;

        let mut fc: FileConfig = load_config(&config_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {:?}", config_dir))?;
        if let Some(url) = api_url {
            fc.api.base_url = url;
        }

        Ok(Self {
            api: ApiConfig::from_file(&fc.api),
            realtime: RealtimeConfig::from_file(&fc.realtime),
            config_dir,
        })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_api_file_config_defaults() {
        let d = ApiFileConfig::default();
        assert_eq!(d.base_url, "http://localhost:8000/api");
        assert_eq!(d.timeout_secs, 120);
    }

    #[test]
    fn test_realtime_file_config_defaults() {
        let d = RealtimeFileConfig::default();
        assert!(d.enabled);
        assert_eq!(d.reconnect_delay_ms, 3000);
        assert_eq!(d.send_buffer, 64);
    }

    // ── from_file ───────────────────────────────────────────────────────

    #[test]
    fn test_api_config_trims_trailing_slash() {
        let fc = ApiFileConfig {
            base_url: "http://chat.internal/api/".to_string(),
            timeout_secs: 0,
        };
        let ac = ApiConfig::from_file(&fc);
        assert_eq!(ac.base_url, "http://chat.internal/api");
        assert_eq!(ac.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_realtime_config_from_file() {
        let fc = RealtimeFileConfig {
            enabled: false,
            reconnect_delay_ms: 250,
            send_buffer: 0,
        };
        let rc = RealtimeConfig::from_file(&fc);
        assert!(!rc.enabled);
        assert_eq!(rc.channel.reconnect_delay, Duration::from_millis(250));
        assert_eq!(rc.channel.send_buffer, 1);
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.api.base_url, "http://localhost:8000/api");
        assert!(fc.realtime.enabled);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[api]\nbase_url = \"http://10.0.0.5:8000/api\"\n\n[realtime]\nreconnect_delay_ms = 500\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.api.base_url, "http://10.0.0.5:8000/api");
        assert_eq!(fc.api.timeout_secs, 120);
        assert_eq!(fc.realtime.reconnect_delay_ms, 500);
        assert!(fc.realtime.enabled);
    }

    // ── ClientConfig ────────────────────────────────────────────────────

    #[test]
    fn test_client_config_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested");
        let config = ClientConfig::new(Some(dir.clone()), None).unwrap();

        assert!(dir.exists());
        assert_eq!(config.config_dir, dir);
        assert_eq!(config.config_toml_path(), dir.join("config.toml"));
        assert_eq!(config.realtime.channel.reconnect_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_cli_api_url_overrides_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[api]\nbase_url = \"http://from-file/api\"\n",
        )
        .unwrap();
        let config = ClientConfig::new(
            Some(tmp.path().to_path_buf()),
            Some("http://from-cli:9000/api".to_string()),
        )
        .unwrap();
        assert_eq!(config.api.base_url, "http://from-cli:9000/api");
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "[realtime]\nenabled = \"maybe\"\n")
            .unwrap();
        assert!(ClientConfig::new(Some(tmp.path().to_path_buf()), None).is_err());
    }
}
