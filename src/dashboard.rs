use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use crate::config::Config;
use crate::core::{
    FileValidator,
    Job,
    JobSource,
    Notifier,
    PollingState,
    Result,
    UploadFile,
    UploadSession,
    UploadStatus,
    UploadTransport,
};
use crate::notify::LogNotifier;
use crate::polling::{JobPoller, JobPollerHandle, DEFAULT_POLL_INTERVAL};
use crate::transport::{HttpTransport, MockBackend};
use crate::upload::{JsonFileValidator, UploadController, DEFAULT_RESET_DELAY};

/// 上传与任务列表的组合
///
/// 上传成功后 epoch 加一，任务列表按重新挂载处理：重建定时器、
/// 打开轮询并立即拉取。这是两个组件之间唯一的联系。
pub struct Dashboard {
    uploader: UploadController,
    poller_handle: JobPollerHandle,
    job_source: Arc<dyn JobSource>,
    epoch_tx: Arc<watch::Sender<u64>>,
}

pub struct DashboardBuilder {
    validator: Arc<dyn FileValidator>,
    upload_transport: Arc<dyn UploadTransport>,
    job_source: Arc<dyn JobSource>,
    notifier: Arc<dyn Notifier>,
    poll_interval: Duration,
    reset_delay: Duration,
}

impl DashboardBuilder {
    pub fn new(upload_transport: Arc<dyn UploadTransport>, job_source: Arc<dyn JobSource>) -> Self {
        Self {
            validator: Arc::new(JsonFileValidator::new()),
            upload_transport,
            job_source,
            notifier: Arc::new(LogNotifier),
            poll_interval: DEFAULT_POLL_INTERVAL,
            reset_delay: DEFAULT_RESET_DELAY,
        }
    }

    /// 同一个后端同时负责上传和任务查询
    pub fn with_backend<T>(backend: Arc<T>) -> Self
    where
        T: UploadTransport + JobSource + 'static,
    {
        Self::new(backend.clone(), backend)
    }

    /// 按配置选择 HTTP 后端或模拟后端
    pub fn from_config(config: &Config) -> Result<Self> {
        let builder = if config.mock.enabled {
            info!("Using mock API");
            Self::with_backend(Arc::new(MockBackend::from_settings(&config.mock)))
        } else {
            Self::with_backend(Arc::new(HttpTransport::from_settings(&config.api)?))
        };

        Ok(builder
            .validator(Arc::new(JsonFileValidator::from_settings(&config.upload)))
            .poll_interval(config.polling.interval())
            .reset_delay(config.upload.reset_delay()))
    }

    pub fn validator(mut self, validator: Arc<dyn FileValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn reset_delay(mut self, reset_delay: Duration) -> Self {
        self.reset_delay = reset_delay;
        self
    }

    /// 启动轮询 worker 并立即拉取一次，需要在 tokio 运行时中调用
    pub fn build(self) -> Result<Dashboard> {
        let poller_handle = JobPoller::spawn_with_interval(self.job_source.clone(), self.poll_interval);
        let poller = poller_handle.poller().clone();
        let (epoch_tx, _) = watch::channel(0u64);
        let epoch_tx = Arc::new(epoch_tx);

        let uploader = UploadController::new(self.validator, self.upload_transport, self.notifier)
            .with_reset_delay(self.reset_delay)
            .on_success({
                let epoch_tx = epoch_tx.clone();
                let poller = poller.clone();
                move |receipt| {
                    epoch_tx.send_modify(|epoch| *epoch += 1);
                    debug!(job_id = %receipt.job_id, epoch = *epoch_tx.borrow(), "Remounting job list");
                    if poller.restart().is_err() {
                        warn!("Job poller already shut down, skipping refresh");
                    }
                }
            });

        poller.restart()?;

        Ok(Dashboard {
            uploader,
            poller_handle,
            job_source: self.job_source,
            epoch_tx,
        })
    }
}

impl Dashboard {
    pub async fn submit(&self, file: UploadFile) -> Result<UploadStatus> {
        self.uploader.submit(file).await
    }

    pub async fn submit_path(&self, path: impl AsRef<Path>) -> Result<UploadStatus> {
        let file = UploadFile::from_path(path).await?;
        self.submit(file).await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.poller().refresh().await
    }

    pub async fn toggle_polling(&self) -> Result<bool> {
        self.poller().toggle_polling().await
    }

    pub async fn job_status(&self, job_id: &str) -> Result<Job> {
        self.job_source.job_status(job_id).await
    }

    pub fn jobs_state(&self) -> PollingState {
        self.poller().state()
    }

    pub fn upload_session(&self) -> UploadSession {
        self.uploader.session()
    }

    /// 成功上传的次数
    pub fn epoch(&self) -> u64 {
        *self.epoch_tx.borrow()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_tx.subscribe()
    }

    pub fn uploader(&self) -> &UploadController {
        &self.uploader
    }

    pub fn poller(&self) -> &JobPoller {
        self.poller_handle.poller()
    }

    pub async fn shutdown(self) {
        self.poller_handle.shutdown().await;
        debug!("Dashboard shut down");
    }
}
