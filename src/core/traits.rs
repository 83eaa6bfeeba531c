use std::sync::Arc;
use async_trait::async_trait;
use super::errors::Result;
use super::types::{ApiResponse, Job, NotifyKind, UploadFile, UploadReceipt};

/// 进度回调，参数为 (已上传字节, 总字节)
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// 文件校验
#[async_trait]
pub trait FileValidator: Send + Sync {
    /// 文件不合法时返回 `ClientError::Validation`，内容为原因
    async fn validate(&self, file: &UploadFile) -> Result<()>;
}

/// 上传通道
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// 上传文件，`on_progress` 在完成前可能被调用零次或多次
    async fn upload(&self, file: &UploadFile, on_progress: ProgressFn) -> Result<UploadReceipt>;
}

/// 任务列表来源
#[async_trait]
pub trait JobSource: Send + Sync {
    /// 获取所有任务
    async fn list_jobs(&self) -> Result<ApiResponse<Vec<Job>>>;

    /// 获取单个任务
    async fn job_status(&self, job_id: &str) -> Result<Job>;
}

/// 通知接收方，发出即忘
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotifyKind, text: &str);
}
