use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use crate::core::{ClientError, JobSource, PollingState, Result};
use super::worker::PollerWorker;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// 轮询命令
pub(crate) enum PollerCommand {
    /// 设置间隔并开启轮询
    Start {
        interval: Duration,
        reply: oneshot::Sender<()>,
    },

    /// 立即拉取一次
    Refresh {
        reply: oneshot::Sender<()>,
    },

    /// 切换轮询开关，返回新的开关状态
    Toggle {
        reply: oneshot::Sender<bool>,
    },

    SetPolling {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },

    /// 相当于重新挂载：清除错误，重建定时器并立即拉取
    Restart,

    /// 停止定时器
    Stop {
        reply: oneshot::Sender<()>,
    },

    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// 任务列表轮询器
///
/// 可以随意克隆，所有克隆共享同一个后台 worker。
#[derive(Clone)]
pub struct JobPoller {
    command_tx: mpsc::UnboundedSender<PollerCommand>,
    state_rx: watch::Receiver<PollingState>,
}

pub struct JobPollerHandle {
    poller: JobPoller,
    worker_handle: JoinHandle<()>,
}

impl JobPoller {
    /// 启动后台 worker，轮询默认关闭
    pub fn spawn(source: Arc<dyn JobSource>) -> JobPollerHandle {
        Self::spawn_with_interval(source, DEFAULT_POLL_INTERVAL)
    }

    pub fn spawn_with_interval(source: Arc<dyn JobSource>, interval: Duration) -> JobPollerHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PollingState::default());

        let worker_handle = tokio::spawn(PollerWorker::run(source, interval, command_rx, state_tx));

        JobPollerHandle {
            poller: Self { command_tx, state_rx },
            worker_handle,
        }
    }

    fn send(&self, command: PollerCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| ClientError::Shutdown)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> PollerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(command(reply_tx))?;

        reply_rx.await.map_err(|_| ClientError::Shutdown)
    }

    /// 立即拉取一次，然后每隔 `interval` 拉取
    pub async fn start(&self, interval: Duration) -> Result<()> {
        self.request(|reply| PollerCommand::Start { interval, reply }).await
    }

    /// 拉取一次，无论轮询是否开启
    ///
    /// 在请求完成（成功或失败）后返回，结果体现在 `state()` 中。
    /// 只有 worker 已关闭时返回 `Err`。
    pub async fn refresh(&self) -> Result<()> {
        self.request(|reply| PollerCommand::Refresh { reply }).await
    }

    /// 返回切换后的开关状态
    pub async fn toggle_polling(&self) -> Result<bool> {
        self.request(|reply| PollerCommand::Toggle { reply }).await
    }

    pub async fn set_polling(&self, enabled: bool) -> Result<()> {
        self.request(|reply| PollerCommand::SetPolling { enabled, reply }).await
    }

    /// 不等待结果
    pub fn restart(&self) -> Result<()> {
        self.send(PollerCommand::Restart)
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| PollerCommand::Stop { reply }).await
    }

    pub fn state(&self) -> PollingState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollingState> {
        self.state_rx.clone()
    }
}

impl JobPollerHandle {
    pub fn poller(&self) -> &JobPoller {
        &self.poller
    }

    /// 停止定时器并结束 worker，进行中的请求被丢弃
    pub async fn shutdown(self) {
        if self.poller.request(|reply| PollerCommand::Shutdown { reply }).await.is_ok() {
            let _ = self.worker_handle.await;
        }
    }
}
