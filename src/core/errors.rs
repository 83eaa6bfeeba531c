use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// 服务端在资源未映射到 API 时返回的错误片段
pub const NO_STATIC_RESOURCE: &str = "No static resource";

/// 非 2xx 响应的响应体
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// 可解析为 JSON 的响应体
    Json(Value),
    /// 纯文本响应体
    Text(String),
    /// 空响应体
    Empty,
}

impl ResponseBody {
    pub fn from_text(text: String) -> Self {
        if text.trim().is_empty() {
            return Self::Empty;
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(text),
        }
    }

    /// 响应体中可以直接展示给用户的消息
    fn message(&self) -> Option<&str> {
        let message = match self {
            Self::Json(Value::Object(map)) => map.get("message").and_then(Value::as_str),
            Self::Json(Value::String(text)) | Self::Text(text) => Some(text.as_str()),
            _ => None,
        };

        message.filter(|m| !m.is_empty())
    }
}

fn response_message(status: &u16, status_text: &str, body: &ResponseBody) -> String {
    match body.message() {
        Some(message) => message.to_string(),
        None => format!("Error: {} {}", status, status_text).trim_end().to_string(),
    }
}

/// 客户端错误
///
/// `Display` 的输出就是展示给用户的错误文本，调用方只需要 `to_string()`。
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{0}")]
    Validation(String),

    #[error("{}", response_message(.status, .status_text, .body))]
    Response {
        status: u16,
        status_text: String,
        body: ResponseBody,
    },

    #[error("Server did not respond. Please check your connection.")]
    NoResponse,

    #[error("{}", .0.as_deref().unwrap_or("An unknown error occurred"))]
    Request(Option<String>),

    #[error("Invalid server response: {0}")]
    Decode(String),

    #[error("An upload is already in progress")]
    UploadInProgress,

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("Job poller shut down")]
    Shutdown,
}

impl ClientError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn request(message: impl Into<String>) -> Self {
        Self::Request(Some(message.into()))
    }

    pub fn response(status: StatusCode, body: ResponseBody) -> Self {
        Self::Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        }
    }

    /// 请求被当作静态资源处理，说明 API 服务没有在运行
    pub fn is_api_unreachable(&self) -> bool {
        self.to_string().contains(NO_STATIC_RESOURCE)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::Request(Some(err.to_string()))
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            // connect / timeout / body 错误：请求已发出但没有拿到响应
            Self::NoResponse
        }
    }
}

/// Error alias
pub type Result<T, E = ClientError> = std::result::Result<T, E>;
