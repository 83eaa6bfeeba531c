use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;
use uuid::Uuid;
use super::errors::{ClientError, Result};

// 后端可能返回 RFC 3339，也可能返回不带时区的本地时间（按 UTC 处理）
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_timestamp(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {value}")))
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(value) => parse_timestamp(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {value}"))),
        None => Ok(None),
    }
}

/// 上传会话唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct UploadId(pub Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 文件内容来源
#[derive(Debug, Clone)]
pub enum FileSource {
    /// 磁盘文件，按需读取
    Path(PathBuf),
    /// 内存中的内容
    Memory(Bytes),
}

/// 待上传的文件
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// 文件名（含扩展名）
    pub name: String,
    /// 文件大小（字节）
    pub size: u64,
    pub source: FileSource,
}

impl UploadFile {
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(ClientError::validation(format!("{} is not a file", path.display())));
        }

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ClientError::validation("The file name can't be read"))?
            .to_string();

        Ok(Self {
            name,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            size: content.len() as u64,
            source: FileSource::Memory(content),
        }
    }

    /// 读取全部内容
    pub async fn read_all(&self) -> std::io::Result<Bytes> {
        match &self.source {
            FileSource::Path(path) => tokio::fs::read(path).await.map(Bytes::from),
            FileSource::Memory(content) => Ok(content.clone()),
        }
    }
}

/// 上传状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadStatus {
    /// 空闲，可以接受新的上传
    Idle,
    /// 校验文件中
    Validating,
    /// 上传中
    Uploading,
    /// 上传成功
    Succeeded,
    /// 失败
    Failed,
}

impl UploadStatus {
    /// 是否有上传正在进行
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Validating | Self::Uploading)
    }
}

/// 单次上传的会话状态
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: UploadId,
    pub file: Option<UploadFile>,
    /// 0..=100
    pub progress_percent: u8,
    pub status: UploadStatus,
    /// 仅在 `Failed` 时存在
    pub error_detail: Option<String>,
}

impl UploadSession {
    pub fn idle() -> Self {
        Self {
            id: UploadId::new(),
            file: None,
            progress_percent: 0,
            status: UploadStatus::Idle,
            error_detail: None,
        }
    }

    pub(crate) fn validating(file: UploadFile) -> Self {
        Self {
            id: UploadId::new(),
            file: Some(file),
            progress_percent: 0,
            status: UploadStatus::Validating,
            error_detail: None,
        }
    }
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::idle()
    }
}

/// 上传成功后服务端返回的回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub job_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// 状态变更
    StateChanged {
        upload_id: UploadId,
        from: UploadStatus,
        to: UploadStatus,
    },

    /// 进度更新
    Progress {
        upload_id: UploadId,
        percent: u8,
    },
}

/// 任务状态，未知的服务端取值原样保留
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Other(String),
}

impl JobStatus {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "PROCESSING" => Self::Processing,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            _ => Self::Other(value.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Other(value) => value,
        }
    }

    /// 终态任务才会有 `end_time`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// 服务端的处理任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(alias = "jobId")]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    pub status: JobStatus,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, alias = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl Job {
    /// 去掉早于开始时间的结束时间
    pub fn normalized(mut self) -> Self {
        if let Some(end_time) = self.end_time {
            if end_time < self.start_time {
                warn!(job_id = %self.id, %end_time, start_time = %self.start_time, "Job ends before it starts, dropping end time");
                self.end_time = None;
            }
        }
        self
    }

    /// 运行时长，未结束的任务返回 None
    pub fn elapsed(&self) -> Option<Duration> {
        self.end_time
            .and_then(|end_time| (end_time - self.start_time).to_std().ok())
    }
}

/// 后端统一的响应包装
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// 缺失时为 None
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

/// 轮询定时器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Running { interval: Duration },
}

/// 任务列表轮询状态
#[derive(Debug, Clone, PartialEq)]
pub struct PollingState {
    /// 最近一次成功拉取的任务
    pub jobs: Vec<Job>,
    /// 是否有请求在进行
    pub loading: bool,
    /// 最近一次失败的错误信息，下次成功时清空
    pub error: Option<String>,
    /// 自动轮询是否开启
    pub polling: bool,
    pub timer: TimerState,
}

impl Default for PollingState {
    fn default() -> Self {
        Self {
            jobs: Vec::new(),
            loading: false,
            error: None,
            polling: false,
            timer: TimerState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Success,
    Error,
}

/// 展示给用户的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotifyKind,
    pub text: String,
}
