pub mod config;
pub mod core;
pub mod dashboard;
pub mod notify;
pub mod polling;
pub mod transport;
pub mod upload;
pub mod utils;

// 重新导出常用类型
pub use crate::config::Config;
pub use crate::core::{
    ApiResponse,
    ClientError,
    Job,
    JobStatus,
    Notification,
    NotifyKind,
    PollingState,
    Result,
    TimerState,
    UploadEvent,
    UploadFile,
    UploadId,
    UploadReceipt,
    UploadSession,
    UploadStatus,
};
pub use crate::dashboard::{Dashboard, DashboardBuilder};
pub use crate::notify::{ChannelNotifier, LogNotifier};
pub use crate::polling::{JobPoller, JobPollerHandle};
pub use crate::transport::{HttpTransport, MockBackend};
pub use crate::upload::{JsonFileValidator, UploadController};
