//! Configuration types and loading.
//!
//! Config is loaded once at startup from a JSON file (default `./config.json`).
//! A missing or malformed config is fatal; there is no default account token.

use crate::wechat::MessageCrypto;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ADDR: &str = ":8080";
pub const DEFAULT_WECHAT_API: &str = "https://api.weixin.qq.com";
pub const DEFAULT_OCR_ENDPOINT: &str = "https://ocr.tencentcloudapi.com";
pub const DEFAULT_OCR_REGION: &str = "ap-beijing";
pub const DEFAULT_ANIMAL_API: &str = "https://zoo-animal-api.herokuapp.com/animals/rand";

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address. Accepts `host:port` or the short `:port` form (all interfaces).
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Official account credentials.
    #[serde(default)]
    pub wechat: WechatConfig,

    /// Tencent Cloud credentials for OCR.
    #[serde(default)]
    pub tencent: TencentConfig,

    /// Outbound call timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Upstream base URLs. Only overridden for tests or proxies.
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WechatConfig {
    #[serde(default)]
    pub app_id: String,
    /// Overridden by WECHAT_APP_SECRET env.
    #[serde(default)]
    pub app_secret: String,
    /// Token configured in the official account console; used for callback signatures.
    #[serde(default)]
    pub token: String,
    /// Console key for compatible and safe mode (43 base64 characters). Empty for plaintext mode.
    #[serde(default)]
    pub encoding_aes_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TencentConfig {
    /// Overridden by TENCENTCLOUD_SECRET_ID env.
    #[serde(default)]
    pub secret_id: String,
    /// Overridden by TENCENTCLOUD_SECRET_KEY env.
    #[serde(default)]
    pub secret_key: String,
}

/// Per-call timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Animal fact request, image download and the media library calls.
    #[serde(default = "default_timeout_secs")]
    pub fetch_secs: u64,
    /// OCR request.
    #[serde(default = "default_timeout_secs")]
    pub ocr_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_wechat_api")]
    pub wechat_api: String,
    #[serde(default = "default_ocr_endpoint")]
    pub ocr: String,
    #[serde(default = "default_ocr_region")]
    pub ocr_region: String,
    #[serde(default = "default_animal_api")]
    pub animal_api: String,
}

fn default_addr() -> String {
    DEFAULT_ADDR.to_string()
}

fn default_timeout_secs() -> u64 {
    3
}

fn default_wechat_api() -> String {
    DEFAULT_WECHAT_API.to_string()
}

fn default_ocr_endpoint() -> String {
    DEFAULT_OCR_ENDPOINT.to_string()
}

fn default_ocr_region() -> String {
    DEFAULT_OCR_REGION.to_string()
}

fn default_animal_api() -> String {
    DEFAULT_ANIMAL_API.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            wechat: WechatConfig::default(),
            tencent: TencentConfig::default(),
            timeouts: TimeoutsConfig::default(),
            endpoints: EndpointsConfig::default(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            fetch_secs: default_timeout_secs(),
            ocr_secs: default_timeout_secs(),
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            wechat_api: default_wechat_api(),
            ocr: default_ocr_endpoint(),
            ocr_region: default_ocr_region(),
            animal_api: default_animal_api(),
        }
    }
}

impl TimeoutsConfig {
    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn ocr(&self) -> Duration {
        Duration::from_secs(self.ocr_secs)
    }
}

impl Config {
    /// Socket address to bind. `:8080` becomes `0.0.0.0:8080`.
    pub fn bind_addr(&self) -> String {
        let addr = self.addr.trim();
        if addr.starts_with(':') {
            format!("0.0.0.0{}", addr)
        } else {
            addr.to_string()
        }
    }

    /// Reject configs the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.addr.trim().is_empty() {
            bail!("addr must not be empty");
        }
        if self.wechat.token.trim().is_empty() {
            bail!("wechat.token must be set to verify callbacks");
        }
        if self.timeouts.fetch_secs == 0 || self.timeouts.ocr_secs == 0 {
            bail!("timeouts must be at least one second");
        }
        if !self.wechat.encoding_aes_key.trim().is_empty() {
            if self.wechat.app_id.trim().is_empty() {
                bail!("wechat.app_id must be set when encoding_aes_key is set");
            }
            self.message_crypto()?;
        }
        Ok(())
    }

    /// Cipher for encrypted callbacks, or `None` when the account runs in plaintext mode.
    pub fn message_crypto(&self) -> Result<Option<MessageCrypto>> {
        let key = self.wechat.encoding_aes_key.trim();
        if key.is_empty() {
            return Ok(None);
        }
        let crypto = MessageCrypto::new(key, self.wechat.app_id.trim())
            .context("invalid wechat.encoding_aes_key")?;
        Ok(Some(crypto))
    }

    /// Apply env overrides for secrets.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_override("WECHAT_APP_SECRET") {
            self.wechat.app_secret = v;
        }
        if let Some(v) = env_override("TENCENTCLOUD_SECRET_ID") {
            self.tencent.secret_id = v;
        }
        if let Some(v) = env_override("TENCENTCLOUD_SECRET_KEY") {
            self.tencent.secret_key = v;
        }
    }
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("WXBOT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"))
}

/// Parse and validate config JSON without touching the environment.
pub fn parse_config(s: &str) -> Result<Config> {
    let config: Config = serde_json::from_str(s).context("parsing config")?;
    config.validate()?;
    Ok(config)
}

/// Load config from the given path (or WXBOT_CONFIG_PATH, or ./config.json).
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let s = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let mut config: Config = serde_json::from_str(&s)
        .with_context(|| format!("parsing config from {}", path.display()))?;
    config.apply_env();
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    log::debug!("loaded config from {}", path.display());
    Ok((config, path))
}

/// Write a template config for `wxbot init`. Existing files are left alone.
pub fn write_template(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;
    }
    let body = serde_json::to_string_pretty(&Config::default()).context("serializing template")?;
    std::fs::write(path, body)
        .with_context(|| format!("writing template config to {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config(r#"{"wechat": {"token": "t0k"}}"#).unwrap();
        assert_eq!(config.addr, ":8080");
        assert_eq!(config.timeouts.fetch(), Duration::from_secs(3));
        assert_eq!(config.timeouts.ocr(), Duration::from_secs(3));
        assert_eq!(config.endpoints.ocr, DEFAULT_OCR_ENDPOINT);
        assert_eq!(config.endpoints.ocr_region, "ap-beijing");
    }

    #[test]
    fn full_config_keeps_snake_case_keys() {
        let config = parse_config(
            r#"{
                "addr": "127.0.0.1:9000",
                "wechat": {"app_id": "wx1", "app_secret": "s", "token": "tok", "encoding_aes_key": "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFG"},
                "tencent": {"secret_id": "id", "secret_key": "key"},
                "timeouts": {"fetch_secs": 5, "ocr_secs": 7}
            }"#,
        )
        .unwrap();
        assert_eq!(config.wechat.app_id, "wx1");
        assert_eq!(config.tencent.secret_key, "key");
        assert_eq!(config.timeouts.fetch_secs, 5);
        assert_eq!(config.timeouts.ocr_secs, 7);
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert!(config.message_crypto().unwrap().is_some());
    }

    #[test]
    fn plaintext_mode_has_no_cipher() {
        let config = parse_config(r#"{"wechat": {"token": "t0k"}}"#).unwrap();
        assert!(config.message_crypto().unwrap().is_none());
    }

    #[test]
    fn bad_aes_key_is_rejected() {
        let err = parse_config(
            r#"{"wechat": {"app_id": "wx1", "token": "t", "encoding_aes_key": "too-short"}}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("encoding_aes_key"));
    }

    #[test]
    fn aes_key_needs_app_id() {
        let err = parse_config(
            r#"{"wechat": {"token": "t", "encoding_aes_key": "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFG"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("app_id"));
    }

    #[test]
    fn short_addr_binds_all_interfaces() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn missing_token_is_rejected() {
        assert!(parse_config("{}").is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(parse_config("{ not json").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(dir.path().join("absent.json")));
        assert!(result.is_err());
    }

    #[test]
    fn template_parses_but_needs_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        assert!(write_template(&path).unwrap());
        assert!(!write_template(&path).unwrap());
        let s = std::fs::read_to_string(&path).unwrap();
        let config: Config = serde_json::from_str(&s).unwrap();
        // The template has no token, so it must be filled in before serving.
        assert!(config.validate().is_err());
    }
}
