use tokio::sync::mpsc;
use tracing::{error, info};
use crate::core::{Notification, Notifier, NotifyKind};

/// 把通知写进日志
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: NotifyKind, text: &str) {
        match kind {
            NotifyKind::Success => info!(notification = %text),
            NotifyKind::Error => error!(notification = %text),
        }
    }
}

/// 把通知转发到 channel，由界面自行展示
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, kind: NotifyKind, text: &str) {
        // 接收方已关闭时直接丢弃
        let _ = self.tx.send(Notification {
            kind,
            text: text.to_string(),
        });
    }
}
