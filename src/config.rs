use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const ENV_API_URL: &str = "COURIER_API_URL";
pub const ENV_POLLING_INTERVAL: &str = "COURIER_POLLING_INTERVAL";
pub const ENV_USE_MOCK_API: &str = "COURIER_USE_MOCK_API";

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiSettings,
    pub upload: UploadSettings,
    pub polling: PollingSettings,
    pub mock: MockSettings,
    /// 终端里按 `u` 上传的文件
    pub file_path: Option<PathBuf>,
}

/// 后端地址
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub upload_path: String,
    pub jobs_path: String,
    /// 请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            upload_path: "/api/v1/feedback/upload".to_string(),
            jobs_path: "/api/v1/jobs".to_string(),
            timeout_secs: 300,
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct UploadSettings {
    /// 允许的扩展名
    pub extension: String,
    /// 超过该大小的文件只检查扩展名，不解析内容
    pub inspect_limit: u64,
    /// 上传成功后回到空闲状态的延迟（毫秒）
    pub reset_delay_ms: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            extension: ".json".to_string(),
            inspect_limit: 10 * 1024 * 1024, // 10MB
            reset_delay_ms: 1500,
        }
    }
}

impl UploadSettings {
    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct PollingSettings {
    pub interval_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self { interval_ms: 10_000 }
    }
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// 本地模拟后端，仅用于开发
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct MockSettings {
    pub enabled: bool,
    pub upload_failure_rate: f64,
    pub job_failure_rate: f64,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            upload_failure_rate: 0.1,
            job_failure_rate: 0.2,
        }
    }
}

impl Config {
    pub const DEFAULT_PATH: &'static str = "courier.toml";

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&config_str)
            .with_context(|| format!("Can't load {}", path.display()))
    }

    /// 读取配置文件（不存在时使用默认值），再应用环境变量
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Config::from_file(path)?
        } else {
            debug!(path = %path.display(), "Config file not found, using defaults");
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        info!(
            api_base_url = %config.api.base_url,
            use_mock_api = config.mock.enabled,
            polling_interval_ms = config.polling.interval_ms,
            "Client configuration"
        );

        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|url| !url.is_empty()) {
            self.api.base_url = url;
        }

        if let Some(raw) = lookup(ENV_POLLING_INTERVAL) {
            match raw.trim().parse::<u64>() {
                Ok(interval_ms) if interval_ms > 0 => self.polling.interval_ms = interval_ms,
                _ => warn!(value = %raw, "Ignoring invalid polling interval"),
            }
        }

        if let Some(flag) = lookup(ENV_USE_MOCK_API) {
            self.mock.enabled = flag == "true";
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:8080");
        assert_eq!(config.api.jobs_path, "/api/v1/jobs");
        assert_eq!(config.upload.inspect_limit, 10 * 1024 * 1024);
        assert_eq!(config.upload.reset_delay(), Duration::from_millis(1500));
        assert_eq!(config.polling.interval(), Duration::from_secs(10));
        assert!(!config.mock.enabled);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        fs::write(&path, "file_path = \"feedback.json\"\n[polling]\ninterval_ms = 2500\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.polling.interval_ms, 2500);
        assert_eq!(config.file_path, Some(PathBuf::from("feedback.json")));
        assert_eq!(config.api.upload_path, "/api/v1/feedback/upload");
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        fs::write(&path, "[polling\ninterval_ms = ").unwrap();

        assert!(Config::from_file(&path).is_err());
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.api.jobs_path, "/api/v1/jobs");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "http://api.internal:9000"),
            (ENV_POLLING_INTERVAL, "3000"),
            (ENV_USE_MOCK_API, "true"),
        ]);

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api.base_url, "http://api.internal:9000");
        assert_eq!(config.polling.interval_ms, 3000);
        assert!(config.mock.enabled);
    }

    #[test]
    fn test_invalid_interval_keeps_default() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == ENV_POLLING_INTERVAL).then(|| "soon".to_string()));
        assert_eq!(config.polling.interval_ms, 10_000);

        config.apply_overrides(|key| (key == ENV_USE_MOCK_API).then(|| "yes".to_string()));
        assert!(!config.mock.enabled);
    }
}
