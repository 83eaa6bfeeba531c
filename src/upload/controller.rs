use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use crate::core::{
    ClientError,
    FileValidator,
    Notifier,
    NotifyKind,
    ProgressFn,
    Result,
    UploadEvent,
    UploadFile,
    UploadId,
    UploadReceipt,
    UploadSession,
    UploadStatus,
    UploadTransport,
};
use crate::utils::{format_kib, percentage};

pub const DEFAULT_RESET_DELAY: Duration = Duration::from_millis(1500);
pub const UPLOAD_SUCCESS_MESSAGE: &str = "File uploaded successfully!";
pub const API_UNREACHABLE_MESSAGE: &str =
    "API server not reachable. Please ensure the API service is running.";
pub const UPLOAD_CANCELLED_MESSAGE: &str = "Upload cancelled";

/// 上传成功回调
pub type SuccessHook = Arc<dyn Fn(&UploadReceipt) + Send + Sync>;
/// 上传失败回调，参数为展示给用户的错误文本
pub type FailureHook = Arc<dyn Fn(&str) + Send + Sync>;

struct Shared {
    session: Mutex<UploadSession>,
    event_tx: broadcast::Sender<UploadEvent>,
    pending_reset: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, UploadSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_reset(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending_reset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: UploadEvent) {
        // 没有订阅者时发送失败是正常的
        let _ = self.event_tx.send(event);
    }

    fn apply_progress(&self, upload_id: UploadId, loaded: u64, total: u64) {
        let Some(percent) = percentage(loaded, total) else {
            return;
        };

        let mut session = self.session();
        if session.id != upload_id || session.status != UploadStatus::Uploading {
            return;
        }

        // 进度只增不减
        if percent <= session.progress_percent {
            return;
        }

        session.progress_percent = percent;
        debug!(%upload_id, percent, "Upload progress");
        self.emit(UploadEvent::Progress { upload_id, percent });
    }

    /// `submit` 被中途丢弃时把会话从忙碌状态移到 `Failed`
    fn cancel(&self, upload_id: UploadId) {
        let mut session = self.session();
        if session.id != upload_id || !session.status.is_busy() {
            return;
        }

        let from = session.status;
        session.status = UploadStatus::Failed;
        session.error_detail = Some(UPLOAD_CANCELLED_MESSAGE.to_string());
        warn!(%upload_id, ?from, "Upload cancelled before completion");
        self.emit(UploadEvent::StateChanged {
            upload_id,
            from,
            to: UploadStatus::Failed,
        });
    }

    fn reset(&self, upload_id: UploadId) {
        let mut session = self.session();
        if session.id != upload_id || session.status != UploadStatus::Succeeded {
            return;
        }

        *session = UploadSession::idle();
        debug!(%upload_id, "Upload state reset");
        self.emit(UploadEvent::StateChanged {
            upload_id,
            from: UploadStatus::Succeeded,
            to: UploadStatus::Idle,
        });
    }
}

/// 随 `submit` 的 future 一起存活，正常结束时会话已是终态，drop 不做任何事
struct SubmitGuard {
    shared: Arc<Shared>,
    upload_id: UploadId,
}

impl Drop for SubmitGuard {
    fn drop(&mut self) {
        self.shared.cancel(self.upload_id);
    }
}

/// 单文件上传控制器
///
/// 同一时间只允许一个上传：校验或上传进行中时 `submit` 直接返回
/// `ClientError::UploadInProgress`。会话在进入终态后不再修改，下次
/// `submit` 时整体替换。
#[derive(Clone)]
pub struct UploadController {
    shared: Arc<Shared>,
    validator: Arc<dyn FileValidator>,
    transport: Arc<dyn UploadTransport>,
    notifier: Arc<dyn Notifier>,
    on_success: Option<SuccessHook>,
    on_failure: Option<FailureHook>,
    reset_delay: Duration,
}

impl UploadController {
    pub fn new(
        validator: Arc<dyn FileValidator>,
        transport: Arc<dyn UploadTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);

        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(UploadSession::idle()),
                event_tx,
                pending_reset: Mutex::new(None),
            }),
            validator,
            transport,
            notifier,
            on_success: None,
            on_failure: None,
            reset_delay: DEFAULT_RESET_DELAY,
        }
    }

    /// 设置成功后回到空闲状态的延迟
    pub fn with_reset_delay(mut self, reset_delay: Duration) -> Self {
        self.reset_delay = reset_delay;
        self
    }

    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&UploadReceipt) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// 当前会话快照
    pub fn session(&self) -> UploadSession {
        self.shared.session().clone()
    }

    /// 订阅状态与进度事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.shared.event_tx.subscribe()
    }

    /// 校验并上传文件，返回会话的终态
    ///
    /// 失败不会以 `Err` 返回，而是体现在会话的 `Failed` 状态和
    /// `error_detail` 中；`Err` 只表示调用本身被拒绝。
    /// 返回前丢弃 future 会把会话标记为 `Failed`（"Upload cancelled"）。
    pub async fn submit(&self, file: UploadFile) -> Result<UploadStatus> {
        let upload_id = self.begin(file.clone())?;
        let _guard = SubmitGuard {
            shared: self.shared.clone(),
            upload_id,
        };
        info!(%upload_id, file = %file.name, size = %format_kib(file.size), "Attempting to upload file");

        if let Err(err) = self.validator.validate(&file).await {
            return Ok(self.fail(upload_id, err));
        }

        self.transition(upload_id, UploadStatus::Uploading);

        match self.transport.upload(&file, self.progress_fn(upload_id)).await {
            Ok(receipt) => {
                self.succeed(upload_id, receipt);
                Ok(UploadStatus::Succeeded)
            }
            Err(err) => Ok(self.fail(upload_id, err)),
        }
    }

    fn begin(&self, file: UploadFile) -> Result<UploadId> {
        let mut session = self.shared.session();
        if session.status.is_busy() {
            warn!(upload_id = %session.id, "Upload already in progress, rejecting submit");
            return Err(ClientError::UploadInProgress);
        }

        // 上一次成功后的延迟重置不能覆盖新的会话
        if let Some(pending) = self.shared.pending_reset().take() {
            pending.abort();
        }

        let from = session.status;
        *session = UploadSession::validating(file);
        let upload_id = session.id;
        self.shared.emit(UploadEvent::StateChanged {
            upload_id,
            from,
            to: UploadStatus::Validating,
        });

        Ok(upload_id)
    }

    fn transition(&self, upload_id: UploadId, to: UploadStatus) {
        let mut session = self.shared.session();
        if session.id != upload_id {
            return;
        }

        let from = session.status;
        session.status = to;
        if to == UploadStatus::Uploading {
            session.progress_percent = 0;
        }
        self.shared.emit(UploadEvent::StateChanged { upload_id, from, to });
    }

    fn progress_fn(&self, upload_id: UploadId) -> ProgressFn {
        let shared = self.shared.clone();
        Arc::new(move |loaded, total| shared.apply_progress(upload_id, loaded, total))
    }

    fn succeed(&self, upload_id: UploadId, receipt: UploadReceipt) {
        {
            let mut session = self.shared.session();
            if session.id != upload_id {
                return;
            }

            if session.progress_percent < 100 {
                session.progress_percent = 100;
                self.shared.emit(UploadEvent::Progress { upload_id, percent: 100 });
            }

            let from = session.status;
            session.status = UploadStatus::Succeeded;
            self.shared.emit(UploadEvent::StateChanged {
                upload_id,
                from,
                to: UploadStatus::Succeeded,
            });
        }

        info!(%upload_id, job_id = %receipt.job_id, message = %receipt.message, "Upload successful");
        self.notifier.notify(NotifyKind::Success, UPLOAD_SUCCESS_MESSAGE);
        if let Some(hook) = &self.on_success {
            hook(&receipt);
        }

        self.schedule_reset(upload_id);
    }

    fn schedule_reset(&self, upload_id: UploadId) {
        let shared = self.shared.clone();
        let delay = self.reset_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.reset(upload_id);
        });

        if let Some(previous) = self.shared.pending_reset().replace(handle) {
            previous.abort();
        }
    }

    fn fail(&self, upload_id: UploadId, err: ClientError) -> UploadStatus {
        let message = err.to_string();
        error!(%upload_id, error = %message, "Error uploading file");

        {
            let mut session = self.shared.session();
            if session.id == upload_id {
                let from = session.status;
                session.status = UploadStatus::Failed;
                session.error_detail = Some(message.clone());
                self.shared.emit(UploadEvent::StateChanged {
                    upload_id,
                    from,
                    to: UploadStatus::Failed,
                });
            }
        }

        if err.is_api_unreachable() {
            self.notifier.notify(NotifyKind::Error, API_UNREACHABLE_MESSAGE);
            error!("The API server is not reachable: requests are being handled as static files instead of API calls");
            error!("Ensure the API service is running, check the base URL, or enable the mock API while troubleshooting");
        } else {
            self.notifier.notify(NotifyKind::Error, &format!("Error: {message}"));
        }

        if let Some(hook) = &self.on_failure {
            hook(&message);
        }

        UploadStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use serde_json::json;
    use tokio::sync::{mpsc, Notify};
    use crate::core::{Notification, ResponseBody};
    use crate::upload::JsonFileValidator;
    use super::*;

    /// 按脚本回放进度的上传通道
    struct ScriptedTransport {
        steps: Vec<(u64, u64)>,
        outcome: std::result::Result<UploadReceipt, fn() -> ClientError>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedTransport {
        fn succeeding(steps: Vec<(u64, u64)>) -> Self {
            Self {
                steps,
                outcome: Ok(UploadReceipt {
                    job_id: "job-42".to_string(),
                    message: "File uploaded successfully".to_string(),
                }),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn failing(steps: Vec<(u64, u64)>, err: fn() -> ClientError) -> Self {
            Self {
                steps,
                outcome: Err(err),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    #[async_trait]
    impl UploadTransport for ScriptedTransport {
        async fn upload(&self, _file: &UploadFile, on_progress: ProgressFn) -> Result<UploadReceipt> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for (loaded, total) in &self.steps {
                on_progress(*loaded, *total);
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match &self.outcome {
                Ok(receipt) => Ok(receipt.clone()),
                Err(make_err) => Err(make_err()),
            }
        }
    }

    struct RecordingNotifier {
        tx: mpsc::UnboundedSender<Notification>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, kind: NotifyKind, text: &str) {
            let _ = self.tx.send(Notification { kind, text: text.to_string() });
        }
    }

    fn controller(
        transport: Arc<ScriptedTransport>,
    ) -> (UploadController, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = UploadController::new(
            Arc::new(JsonFileValidator::new()),
            transport,
            Arc::new(RecordingNotifier { tx }),
        );
        (controller, rx)
    }

    fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    fn drain_notifications(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    fn json_file() -> UploadFile {
        UploadFile::from_bytes("data.json", &br#"{"a":1}"#[..])
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_upload() {
        let transport = Arc::new(ScriptedTransport::succeeding(vec![(20, 100), (100, 100)]));
        let (controller, mut notifications) = controller(transport.clone());
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let controller = controller.on_success({
            let hook_calls = hook_calls.clone();
            move |receipt| {
                assert_eq!(receipt.job_id, "job-42");
                hook_calls.fetch_add(1, Ordering::SeqCst);
            }
        });
        let mut events = controller.subscribe();

        let status = controller.submit(json_file()).await.unwrap();
        assert_eq!(status, UploadStatus::Succeeded);

        let session = controller.session();
        assert_eq!(session.status, UploadStatus::Succeeded);
        assert_eq!(session.progress_percent, 100);
        assert!(session.error_detail.is_none());
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);

        let states: Vec<_> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                UploadEvent::StateChanged { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                (UploadStatus::Idle, UploadStatus::Validating),
                (UploadStatus::Validating, UploadStatus::Uploading),
                (UploadStatus::Uploading, UploadStatus::Succeeded),
            ]
        );

        assert_eq!(
            drain_notifications(&mut notifications),
            vec![Notification {
                kind: NotifyKind::Success,
                text: "File uploaded successfully!".to_string(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_delay() {
        let transport = Arc::new(ScriptedTransport::succeeding(vec![(50, 100)]));
        let (controller, _notifications) = controller(transport);
        let mut events = controller.subscribe();

        controller.submit(json_file()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert_eq!(controller.session().status, UploadStatus::Succeeded);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let session = controller.session();
        assert_eq!(session.status, UploadStatus::Idle);
        assert_eq!(session.progress_percent, 0);
        assert!(session.file.is_none());

        let last = drain(&mut events).pop().unwrap();
        assert!(matches!(
            last,
            UploadEvent::StateChanged { from: UploadStatus::Succeeded, to: UploadStatus::Idle, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic() {
        let transport = Arc::new(ScriptedTransport::succeeding(vec![
            (10, 100),
            (40, 100),
            (30, 100),
            (40, 100),
            (0, 0),
            (250, 100),
        ]));
        let (controller, _notifications) = controller(transport);
        let mut events = controller.subscribe();

        controller.submit(json_file()).await.unwrap();

        let progress: Vec<u8> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                UploadEvent::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![10, 40, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_extension_skips_transport() {
        let transport = Arc::new(ScriptedTransport::succeeding(vec![]));
        let (controller, mut notifications) = controller(transport.clone());
        let failures = Arc::new(Mutex::new(Vec::new()));
        let controller = controller.on_failure({
            let failures = failures.clone();
            move |message| failures.lock().unwrap().push(message.to_string())
        });

        let status = controller
            .submit(UploadFile::from_bytes("data.txt", &b"{}"[..]))
            .await
            .unwrap();

        assert_eq!(status, UploadStatus::Failed);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        let session = controller.session();
        assert_eq!(session.status, UploadStatus::Failed);
        assert_eq!(session.error_detail.as_deref(), Some("File must have a .json extension"));
        assert_eq!(*failures.lock().unwrap(), vec!["File must have a .json extension".to_string()]);
        assert_eq!(
            drain_notifications(&mut notifications),
            vec![Notification {
                kind: NotifyKind::Error,
                text: "Error: File must have a .json extension".to_string(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_stays_visible() {
        let transport = Arc::new(ScriptedTransport::failing(vec![(60, 100)], || {
            ClientError::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ResponseBody::Json(json!({ "message": "Simulated server error during file upload" })),
            )
        }));
        let (controller, mut notifications) = controller(transport);

        let status = controller.submit(json_file()).await.unwrap();
        assert_eq!(status, UploadStatus::Failed);

        // 失败状态不会自动重置
        tokio::time::sleep(Duration::from_secs(10)).await;
        let session = controller.session();
        assert_eq!(session.status, UploadStatus::Failed);
        assert_eq!(session.progress_percent, 60);
        assert_eq!(
            session.error_detail.as_deref(),
            Some("Simulated server error during file upload")
        );
        assert_eq!(
            drain_notifications(&mut notifications),
            vec![Notification {
                kind: NotifyKind::Error,
                text: "Error: Simulated server error during file upload".to_string(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_api_notification() {
        let transport = Arc::new(ScriptedTransport::failing(vec![], || {
            ClientError::response(
                StatusCode::NOT_FOUND,
                ResponseBody::Json(json!({ "message": "No static resource api/v1/feedback/upload." })),
            )
        }));
        let (controller, mut notifications) = controller(transport);

        controller.submit(json_file()).await.unwrap();

        let notifications = drain_notifications(&mut notifications);
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].text, API_UNREACHABLE_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_submit_while_uploading() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(ScriptedTransport::succeeding(vec![(5, 100)]).gated(gate.clone()));
        let (controller, _notifications) = controller(transport.clone());

        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.submit(json_file()).await }
        });

        while controller.session().status != UploadStatus::Uploading {
            tokio::task::yield_now().await;
        }

        let second = controller.submit(json_file()).await;
        assert!(matches!(second, Err(ClientError::UploadInProgress)));

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), UploadStatus::Succeeded);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_submit_frees_controller() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(ScriptedTransport::succeeding(vec![(30, 100)]).gated(gate.clone()));
        let (controller, mut notifications) = controller(transport.clone());
        let mut events = controller.subscribe();

        let timed_out = tokio::time::timeout(Duration::from_secs(1), controller.submit(json_file())).await;
        assert!(timed_out.is_err());

        let session = controller.session();
        assert_eq!(session.status, UploadStatus::Failed);
        assert_eq!(session.progress_percent, 30);
        assert_eq!(session.error_detail.as_deref(), Some(UPLOAD_CANCELLED_MESSAGE));
        assert!(matches!(
            drain(&mut events).pop(),
            Some(UploadEvent::StateChanged { from: UploadStatus::Uploading, to: UploadStatus::Failed, .. })
        ));
        assert!(drain_notifications(&mut notifications).is_empty());

        // 下一次上传不会被拒绝
        gate.notify_one();
        let status = controller.submit(json_file()).await.unwrap();
        assert_eq!(status, UploadStatus::Succeeded);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_submit_cancels_pending_reset() {
        let transport = Arc::new(ScriptedTransport::succeeding(vec![]));
        let (controller, _notifications) = controller(transport);

        controller.submit(json_file()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        // 重置前再次上传，失败结果不能被旧的重置覆盖
        controller
            .submit(UploadFile::from_bytes("broken.json", &b"{"[..]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let session = controller.session();
        assert_eq!(session.status, UploadStatus::Failed);
        assert_eq!(
            session.error_detail.as_deref(),
            Some("The file does not contain valid JSON")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_then_retry_replaces_session() {
        let transport = Arc::new(ScriptedTransport::succeeding(vec![(100, 100)]));
        let (controller, _notifications) = controller(transport);

        controller
            .submit(UploadFile::from_bytes("data.csv", &b""[..]))
            .await
            .unwrap();
        let failed = controller.session();

        controller.submit(json_file()).await.unwrap();
        let session = controller.session();
        assert_ne!(session.id, failed.id);
        assert_eq!(session.status, UploadStatus::Succeeded);
        assert!(session.error_detail.is_none());
    }
}
