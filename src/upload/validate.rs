use async_trait::async_trait;
use serde::de::IgnoredAny;
use tracing::{debug, warn};
use crate::config::UploadSettings;
use crate::core::{ClientError, FileValidator, Result, UploadFile};

pub const DEFAULT_INSPECT_LIMIT: u64 = 10 * 1024 * 1024;

/// JSON 文件校验器
///
/// - 扩展名不区分大小写
/// - 超过 `inspect_limit` 的文件只检查扩展名
/// - 其余文件读取全部内容并尝试解析
#[derive(Debug, Clone)]
pub struct JsonFileValidator {
    extension: String,
    inspect_limit: u64,
}

impl JsonFileValidator {
    pub fn new() -> Self {
        Self {
            extension: ".json".to_string(),
            inspect_limit: DEFAULT_INSPECT_LIMIT,
        }
    }

    pub fn from_settings(settings: &UploadSettings) -> Self {
        Self::new()
            .with_extension(&settings.extension)
            .with_inspect_limit(settings.inspect_limit)
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        let extension = extension.trim().to_lowercase();
        self.extension = if extension.starts_with('.') {
            extension
        } else {
            format!(".{extension}")
        };
        self
    }

    pub fn with_inspect_limit(mut self, inspect_limit: u64) -> Self {
        self.inspect_limit = inspect_limit;
        self
    }
}

impl Default for JsonFileValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileValidator for JsonFileValidator {
    async fn validate(&self, file: &UploadFile) -> Result<()> {
        if !file.name.to_lowercase().ends_with(&self.extension) {
            return Err(ClientError::validation(format!(
                "File must have a {} extension",
                self.extension
            )));
        }

        if file.size > self.inspect_limit {
            debug!(file = %file.name, size = file.size, "Skipping content check for large file");
            return Ok(());
        }

        let content = file.read_all().await.map_err(|err| {
            warn!(file = %file.name, error = %err, "Failed to read file for validation");
            ClientError::validation("Error reading the file")
        })?;

        serde_json::from_slice::<IgnoredAny>(&content).map_err(|err| {
            debug!(file = %file.name, error = %err, "File content is not JSON");
            ClientError::validation("The file does not contain valid JSON")
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn rejection(validator: &JsonFileValidator, file: UploadFile) -> String {
        match validator.validate(&file).await {
            Err(ClientError::Validation(reason)) => reason,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accepts_valid_json() {
        let validator = JsonFileValidator::new();
        let file = UploadFile::from_bytes("data.json", &br#"{"a":1}"#[..]);
        assert!(validator.validate(&file).await.is_ok());

        // 扩展名不区分大小写
        let file = UploadFile::from_bytes("DATA.JSON", &b"[1, 2, 3]"[..]);
        assert!(validator.validate(&file).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_wrong_extension() {
        let validator = JsonFileValidator::new();
        let reason = rejection(&validator, UploadFile::from_bytes("data.txt", &b"{}"[..])).await;
        assert_eq!(reason, "File must have a .json extension");

        let reason = rejection(&validator, UploadFile::from_bytes("json", &b"{}"[..])).await;
        assert_eq!(reason, "File must have a .json extension");
    }

    #[tokio::test]
    async fn test_rejects_invalid_json() {
        let validator = JsonFileValidator::new();
        let reason = rejection(&validator, UploadFile::from_bytes("data.json", &b"{\"a\":"[..])).await;
        assert_eq!(reason, "The file does not contain valid JSON");
    }

    #[tokio::test]
    async fn test_large_files_skip_content_check() {
        let validator = JsonFileValidator::new().with_inspect_limit(4);

        // 超过阈值：不解析
        let file = UploadFile::from_bytes("big.json", &b"not json at all"[..]);
        assert!(validator.validate(&file).await.is_ok());

        // 等于阈值：仍然解析
        let file = UploadFile::from_bytes("edge.json", &b"nope"[..]);
        assert_eq!(
            rejection(&validator, file).await,
            "The file does not contain valid JSON"
        );
    }

    #[tokio::test]
    async fn test_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.json");
        tokio::fs::write(&path, b"{}").await.unwrap();
        let file = UploadFile::from_path(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        let reason = rejection(&JsonFileValidator::new(), file).await;
        assert_eq!(reason, "Error reading the file");
    }

    #[tokio::test]
    async fn test_custom_extension() {
        let validator = JsonFileValidator::new().with_extension("NDJSON");
        let file = UploadFile::from_bytes("events.ndjson", &b"{}"[..]);
        assert!(validator.validate(&file).await.is_ok());

        let reason = rejection(&validator, UploadFile::from_bytes("events.json", &b"{}"[..])).await;
        assert_eq!(reason, "File must have a .ndjson extension");
    }
}
