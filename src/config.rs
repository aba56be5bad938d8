//! Configuration loader and validator for the EquipQR client.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::api::session::Credentials;
use crate::offline::policy::{
    CachePolicy, Strategy, BACKEND_API_PATTERN, IMMUTABLE_BUNDLE_PATTERN,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Invalid offline rule pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub backend: Backend,
    #[serde(default)]
    pub scanner: Scanner,
    #[serde(default)]
    pub offline: Offline,
    #[serde(default)]
    pub admin: Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Where the EquipQR backend lives and how to sign in to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub base_url: String,
    #[serde(default)]
    pub email: String,
    /// Name of the environment variable holding the password.
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scanner {
    #[serde(default = "default_device")]
    pub device: String,
    /// Decoder program and its arguments; the device path is appended.
    #[serde(default = "default_decoder_command")]
    pub decoder_command: Vec<String>,
    #[serde(default = "default_dedupe_window_ms")]
    pub dedupe_window_ms: u64,
    /// sysfs LED directory used as flashlight, e.g. `/sys/class/leds/white:flash`.
    #[serde(default)]
    pub torch_led: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Offline {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_name")]
    pub cache_name: String,
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,
    #[serde(default = "default_rules")]
    pub rules: Vec<Rule>,
}

/// One row of the offline policy table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub pattern: String,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Admin {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_password_env() -> String {
    "EQUIPQR_PASSWORD".into()
}

fn default_device() -> String {
    "/dev/video0".into()
}

fn default_decoder_command() -> Vec<String> {
    vec!["zbarcam".into(), "--raw".into(), "--nodisplay".into()]
}

fn default_dedupe_window_ms() -> u64 {
    1500
}

fn default_true() -> bool {
    true
}

fn default_cache_name() -> String {
    "equipqr-cache-v1".into()
}

fn default_precache() -> Vec<String> {
    ["/", "/index.html", "/favicon.ico", "/manifest.webmanifest"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_rules() -> Vec<Rule> {
    [IMMUTABLE_BUNDLE_PATTERN, BACKEND_API_PATTERN]
        .into_iter()
        .map(|pattern| Rule {
            pattern: pattern.into(),
            strategy: Strategy::NetworkFirst,
        })
        .collect()
}

fn default_page_size() -> usize {
    20
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            device: default_device(),
            decoder_command: default_decoder_command(),
            dedupe_window_ms: default_dedupe_window_ms(),
            torch_led: None,
        }
    }
}

impl Default for Offline {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_name: default_cache_name(),
            precache: default_precache(),
            rules: default_rules(),
        }
    }
}

impl Default for Admin {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl App {
    /// `data_dir` with a leading `~/` expanded to `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.backend.base_url)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        Credentials::from_env(&self.backend.email, &self.backend.password_env)
    }

    /// SQLite URL of the persistent offline cache.
    pub fn cache_db_url(&self) -> String {
        format!("sqlite://{}/offline.db", self.app.resolved_data_dir())
    }

    pub fn cache_policy(&self) -> Result<CachePolicy, ConfigError> {
        let mut policy = CachePolicy::new(Strategy::CacheFirst);
        for rule in &self.offline.rules {
            policy = policy.with_rule(&rule.pattern, rule.strategy)?;
        }
        Ok(policy)
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|_| ConfigError::Invalid("backend.base_url must be an absolute URL"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Invalid("backend.base_url must use http or https"));
    }
    if url.cannot_be_a_base() {
        return Err(ConfigError::Invalid("backend.base_url must be an absolute URL"));
    }
    Ok(url)
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    parse_base_url(&cfg.backend.base_url)?;
    if cfg.backend.password_env.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.password_env must be non-empty"));
    }

    if cfg.scanner.device.trim().is_empty() {
        return Err(ConfigError::Invalid("scanner.device must be non-empty"));
    }
    match cfg.scanner.decoder_command.first() {
        Some(program) if !program.trim().is_empty() => {}
        _ => {
            return Err(ConfigError::Invalid(
                "scanner.decoder_command must name a program",
            ))
        }
    }

    if cfg.offline.enabled {
        if cfg.offline.cache_name.trim().is_empty() {
            return Err(ConfigError::Invalid("offline.cache_name must be non-empty"));
        }
        if cfg.offline.precache.iter().any(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid(
                "offline.precache entries must be absolute paths",
            ));
        }
        cfg.cache_policy()?;
    }

    if cfg.admin.page_size == 0 {
        return Err(ConfigError::Invalid("admin.page_size must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

backend:
  base_url: "https://192.168.0.102:8080/"
  email: "admin@example.com"
  password_env: "EQUIPQR_PASSWORD"

scanner:
  device: "/dev/video0"
  decoder_command: ["zbarcam", "--raw", "--nodisplay"]
  dedupe_window_ms: 1500
  torch_led: null

offline:
  enabled: true
  cache_name: "equipqr-cache-v1"
  precache:
    - "/"
    - "/index.html"
    - "/favicon.ico"
    - "/manifest.webmanifest"
  rules:
    - pattern: "/_app/immutable/"
      strategy: network-first
    # Backend data: always ask the server, fall back to the last copy offline.
    - pattern: "^/(api|equipment)/"
      strategy: network-first

admin:
  page_size: 20
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.offline.rules[0].strategy, Strategy::NetworkFirst);
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg: Config = serde_yaml::from_str(
            "app:\n  data_dir: ./data\nbackend:\n  base_url: http://localhost:8080/\n",
        )
        .unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.scanner.decoder_command[0], "zbarcam");
        assert_eq!(cfg.offline.cache_name, "equipqr-cache-v1");
        assert_eq!(cfg.offline.precache.len(), 4);
        assert_eq!(cfg.admin.page_size, 20);
        assert_eq!(cfg.backend.password_env, "EQUIPQR_PASSWORD");
        assert_eq!(cfg.offline.rules, default_rules());
    }

    #[test]
    fn backend_paths_are_network_first_in_shipped_configs() {
        let example: Config = serde_yaml::from_str(example()).unwrap();
        let minimal: Config = serde_yaml::from_str(
            "app:\n  data_dir: ./data\nbackend:\n  base_url: http://localhost:8080/\n",
        )
        .unwrap();
        for cfg in [example, minimal] {
            let policy = cfg.cache_policy().unwrap();
            let base = cfg.base_url().unwrap();
            for path in ["api/user", "api/pending/b-1", "equipment/eq-1"] {
                let url = base.join(path).unwrap();
                assert_eq!(policy.strategy_for(&url), Strategy::NetworkFirst, "{}", path);
            }
            let shell = base.join("favicon.ico").unwrap();
            assert_eq!(policy.strategy_for(&shell), Strategy::CacheFirst);
        }
    }

    #[test]
    fn invalid_base_url() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.backend.base_url = "not a url".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("backend.base_url")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.backend.base_url = "ftp://files.example.com/".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_scanner_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.scanner.decoder_command.clear();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("decoder_command")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.scanner.device = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_offline_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.offline.rules[0].pattern = "(unclosed".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Pattern(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.offline.precache.push("relative.js".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        // Disabled cache is not validated.
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.offline.enabled = false;
        cfg.offline.cache_name.clear();
        validate(&cfg).unwrap();
    }

    #[test]
    fn zero_page_size_rejected() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.admin.page_size = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
        assert!(cfg.cache_db_url().ends_with("/data/offline.db"));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.backend.email, "admin@example.com");
        assert_eq!(cfg.base_url().unwrap().port(), Some(8080));
    }
}
