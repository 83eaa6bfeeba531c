use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use crate::core::{ApiResponse, ClientError, Job, JobSource, PollingState, Result, TimerState};
use super::poller::PollerCommand;

/// 定时器最短间隔
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

type FetchOutcome = Result<ApiResponse<Vec<Job>>>;

/// 轮询状态的唯一持有者
///
/// 所有状态修改都发生在 `run` 的事件循环里：命令、请求完成、定时器
/// 三个来源串行处理。同一时间最多一个请求在进行，期间到达的
/// `Refresh` 合并成一次后续请求。
pub(crate) struct PollerWorker {
    source: Arc<dyn JobSource>,
    state_tx: watch::Sender<PollingState>,
    interval: Duration,
    timer: Option<Interval>,

    fetch_handle: Option<JoinHandle<()>>,
    /// 当前请求完成后通知
    current_waiters: Vec<oneshot::Sender<()>>,
    /// 后续请求完成后通知
    queued_waiters: Vec<oneshot::Sender<()>>,
    follow_up: bool,

    completion_tx: mpsc::UnboundedSender<FetchOutcome>,
    completion_rx: mpsc::UnboundedReceiver<FetchOutcome>,
}

async fn next_tick(timer: &mut Option<Interval>) -> Instant {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

impl PollerWorker {
    pub(crate) async fn run(
        source: Arc<dyn JobSource>,
        interval: Duration,
        mut command_rx: mpsc::UnboundedReceiver<PollerCommand>,
        state_tx: watch::Sender<PollingState>,
    ) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            source,
            state_tx,
            interval: interval.max(MIN_INTERVAL),
            timer: None,
            fetch_handle: None,
            current_waiters: Vec::new(),
            queued_waiters: Vec::new(),
            follow_up: false,
            completion_tx,
            completion_rx,
        };

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(PollerCommand::Shutdown { reply }) => {
                        worker.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => worker.handle_command(command),
                    None => {
                        worker.teardown();
                        break;
                    }
                },
                Some(outcome) = worker.completion_rx.recv() => {
                    worker.handle_completion(outcome);
                }
                _ = next_tick(&mut worker.timer) => {
                    worker.handle_tick();
                }
            }
        }

        debug!("Job poller stopped");
    }

    fn handle_command(&mut self, command: PollerCommand) {
        match command {
            PollerCommand::Start { interval, reply } => {
                self.set_interval(interval);
                self.enable();
                let _ = reply.send(());
            }
            PollerCommand::Refresh { reply } => {
                self.request_fetch(Some(reply));
            }
            PollerCommand::Toggle { reply } => {
                let enabled = !self.state_tx.borrow().polling;
                self.set_polling(enabled);
                let _ = reply.send(enabled);
            }
            PollerCommand::SetPolling { enabled, reply } => {
                self.set_polling(enabled);
                let _ = reply.send(());
            }
            PollerCommand::Restart => {
                info!("Restarting job poller");
                self.state_tx.send_modify(|state| state.error = None);
                self.enable();
            }
            PollerCommand::Stop { reply } => {
                self.disable();
                let _ = reply.send(());
            }
            PollerCommand::Shutdown { reply } => {
                // 在 run 中处理
                let _ = reply.send(());
            }
        }
    }

    fn set_interval(&mut self, interval: Duration) {
        if interval < MIN_INTERVAL {
            warn!(?interval, min = ?MIN_INTERVAL, "Polling interval too short, using minimum");
        }
        self.interval = interval.max(MIN_INTERVAL);
    }

    fn set_polling(&mut self, enabled: bool) {
        let polling = self.state_tx.borrow().polling;
        match (polling, enabled) {
            (false, true) => self.enable(),
            (true, false) => self.disable(),
            _ => {}
        }
    }

    /// 重新创建唯一的定时器并立即拉取一次
    fn enable(&mut self) {
        let interval = self.interval;
        let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // 旧定时器在这里被丢弃
        self.timer = Some(timer);
        self.state_tx.send_modify(|state| {
            state.polling = true;
            state.timer = TimerState::Running { interval };
        });
        info!(?interval, "Polling enabled");

        self.request_fetch(None);
    }

    /// 只停止定时器，进行中的请求照常完成
    fn disable(&mut self) {
        let was_running = self.timer.take().is_some();
        self.state_tx.send_modify(|state| {
            state.polling = false;
            state.timer = TimerState::Stopped;
        });

        if was_running {
            info!("Polling disabled");
        }
    }

    fn teardown(&mut self) {
        self.disable();
        if let Some(handle) = self.fetch_handle.take() {
            handle.abort();
        }
        // 未完成的 refresh 会收到 Shutdown
        self.current_waiters.clear();
        self.queued_waiters.clear();
    }

    fn handle_tick(&mut self) {
        if self.fetch_handle.is_some() {
            debug!("Fetch still in flight, skipping tick");
            return;
        }

        self.begin_fetch();
    }

    fn request_fetch(&mut self, waiter: Option<oneshot::Sender<()>>) {
        if self.fetch_handle.is_some() {
            // 合并到下一次请求
            self.follow_up = true;
            self.queued_waiters.extend(waiter);
            return;
        }

        self.current_waiters.extend(waiter);
        self.begin_fetch();
    }

    fn begin_fetch(&mut self) {
        debug!("Fetching jobs");
        self.state_tx.send_modify(|state| state.loading = true);

        let source = self.source.clone();
        let completion_tx = self.completion_tx.clone();
        self.fetch_handle = Some(tokio::spawn(async move {
            // panic 也作为失败结果回报
            let outcome = AssertUnwindSafe(source.list_jobs())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    error!("Job source panicked while fetching jobs");
                    Err(ClientError::Request(None))
                });
            let _ = completion_tx.send(outcome);
        }));
    }

    fn handle_completion(&mut self, outcome: FetchOutcome) {
        self.fetch_handle = None;

        match outcome {
            Ok(response) => {
                if !response.success {
                    warn!(message = ?response.message, "Job list response reported failure");
                }

                let jobs: Vec<Job> = response
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(Job::normalized)
                    .collect();
                debug!(count = jobs.len(), "Jobs fetched");

                self.state_tx.send_modify(|state| {
                    state.jobs = jobs;
                    state.error = None;
                    state.loading = false;
                });
            }
            Err(err) => {
                let message = err.to_string();
                warn!(error = %message, "Error fetching jobs");

                self.state_tx.send_modify(|state| {
                    state.error = Some(message);
                    state.loading = false;
                });
            }
        }

        for waiter in self.current_waiters.drain(..) {
            let _ = waiter.send(());
        }

        if std::mem::take(&mut self.follow_up) {
            self.current_waiters = std::mem::take(&mut self.queued_waiters);
            self.begin_fetch();
        }
    }
}
