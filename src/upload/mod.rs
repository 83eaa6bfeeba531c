pub mod controller;
pub mod validate;

pub use controller::{
    FailureHook,
    SuccessHook,
    UploadController,
    API_UNREACHABLE_MESSAGE,
    DEFAULT_RESET_DELAY,
    UPLOAD_CANCELLED_MESSAGE,
    UPLOAD_SUCCESS_MESSAGE,
};
pub use validate::{JsonFileValidator, DEFAULT_INSPECT_LIMIT};
