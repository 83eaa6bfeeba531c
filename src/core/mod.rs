mod errors;
mod traits;
mod types;

pub use errors::{ClientError, ResponseBody, Result, NO_STATIC_RESOURCE};
pub use traits::{FileValidator, JobSource, Notifier, ProgressFn, UploadTransport};
pub use types::{
    ApiResponse,
    FileSource,
    Job,
    JobStatus,
    Notification,
    NotifyKind,
    PollingState,
    TimerState,
    UploadEvent,
    UploadFile,
    UploadId,
    UploadReceipt,
    UploadSession,
    UploadStatus,
};
