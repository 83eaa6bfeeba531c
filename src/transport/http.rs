use std::io;
use std::pin::Pin;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;
use crate::config::ApiSettings;
use crate::core::{
    ApiResponse,
    ClientError,
    FileSource,
    Job,
    JobSource,
    ProgressFn,
    ResponseBody,
    Result,
    UploadFile,
    UploadReceipt,
    UploadTransport,
};
use super::progress_stream::ProgressStream;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

type FileStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// 上传接口的响应
///
/// 后端返回 `{success, message, data: {jobId, ..}}`，模拟接口返回
/// `{jobId, message}`，两种都接受。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, alias = "id")]
    job_id: Option<String>,
    #[serde(default)]
    data: Option<UploadedJob>,
}

#[derive(Debug, Deserialize)]
struct UploadedJob {
    #[serde(alias = "jobId")]
    id: String,
}

impl UploadResponse {
    fn into_receipt(self) -> Result<UploadReceipt> {
        if self.success == Some(false) {
            warn!(message = ?self.message, "Upload response reported failure");
        }

        let job_id = self
            .job_id
            .or_else(|| self.data.map(|job| job.id))
            .ok_or_else(|| ClientError::Decode("missing job id in upload response".to_string()))?;

        Ok(UploadReceipt {
            job_id,
            message: self.message.unwrap_or_default(),
        })
    }
}

/// 基于 reqwest 的 HTTP 通道，同时实现上传和任务查询
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    upload_path: String,
    jobs_path: String,
    chunk_size: usize,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::from_settings(&ApiSettings {
            base_url: base_url.to_string(),
            ..ApiSettings::default()
        })
    }

    pub fn from_settings(settings: &ApiSettings) -> Result<Self> {
        Url::parse(&settings.base_url)
            .map_err(|err| ClientError::request(format!("Invalid url {:?}: {}", settings.base_url, err)))?;

        let client = Client::builder().timeout(settings.timeout()).build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            upload_path: settings.upload_path.clone(),
            jobs_path: settings.jobs_path.clone(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let url = format!("{}{}", self.base_url, path);
        Url::parse(&url).map_err(|err| ClientError::request(format!("Invalid url {url:?}: {err}")))
    }

    async fn open_stream(&self, file: &UploadFile) -> Result<FileStream> {
        match &file.source {
            FileSource::Path(path) => {
                let handle = tokio::fs::File::open(path)
                    .await
                    .map_err(|err| ClientError::request(format!("Error reading the file: {err}")))?;
                Ok(Box::pin(ReaderStream::with_capacity(handle, self.chunk_size)))
            }
            FileSource::Memory(content) => {
                let content = content.clone();
                let chunks: Vec<io::Result<Bytes>> = (0..content.len())
                    .step_by(self.chunk_size)
                    .map(|start| Ok(content.slice(start..(start + self.chunk_size).min(content.len()))))
                    .collect();
                Ok(Box::pin(stream::iter(chunks)))
            }
        }
    }
}

/// 非 2xx 响应转换为 `ClientError::Response`
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        debug!(%status, body = %text, "Request rejected");
        return Err(ClientError::response(status, ResponseBody::from_text(text)));
    }

    Ok(response.json::<T>().await?)
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload(&self, file: &UploadFile, on_progress: ProgressFn) -> Result<UploadReceipt> {
        let url = self.endpoint(&self.upload_path)?;
        let body = ProgressStream::new(self.open_stream(file).await?, file.size, on_progress);

        let part = Part::stream_with_length(Body::wrap_stream(body), file.size)
            .file_name(file.name.clone())
            .mime_str("application/json")?;
        let form = Form::new().part("file", part);

        info!(%url, file = %file.name, "Uploading file");
        let response = self.client.post(url).multipart(form).send().await?;

        decode::<UploadResponse>(response).await?.into_receipt()
    }
}

#[async_trait]
impl JobSource for HttpTransport {
    async fn list_jobs(&self) -> Result<ApiResponse<Vec<Job>>> {
        let url = self.endpoint(&self.jobs_path)?;
        let response = self.client.get(url).send().await?;

        decode(response).await
    }

    async fn job_status(&self, job_id: &str) -> Result<Job> {
        let mut url = self.endpoint(&self.jobs_path)?;
        url.path_segments_mut()
            .map_err(|_| ClientError::request("Jobs endpoint can't take a job id"))?
            .pop_if_empty()
            .push(job_id);

        let response = self.client.get(url).send().await?;
        let envelope: ApiResponse<Job> = decode(response).await?;

        envelope
            .data
            .map(Job::normalized)
            .ok_or_else(|| ClientError::Decode(envelope.message.unwrap_or_else(|| format!("Job {job_id} not found"))))
    }
}
