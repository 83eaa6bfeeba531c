use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, info};
use crate::config::MockSettings;
use crate::core::{
    ApiResponse,
    ClientError,
    Job,
    JobSource,
    JobStatus,
    ProgressFn,
    ResponseBody,
    Result,
    UploadFile,
    UploadReceipt,
    UploadTransport,
};

const STEP_DELAY: Duration = Duration::from_millis(200);
const FAILING_STEP_DELAY: Duration = Duration::from_millis(300);
/// 超过该大小的文件用更小的进度步长
const LARGE_FILE: u64 = 1_000_000;

fn roll(probability: f64) -> bool {
    rand::rng().random_bool(probability.clamp(0.0, 1.0))
}

fn processing_time() -> Duration {
    Duration::from_millis(rand::rng().random_range(5_000..15_000))
}

fn seed_jobs() -> Vec<Job> {
    let now = Utc::now();
    let minutes = chrono::Duration::minutes;

    vec![
        Job {
            id: "job-001".to_string(),
            filename: "Feedback_50k_1.json".to_string(),
            status: JobStatus::Completed,
            start_time: now - minutes(60),
            end_time: Some(now - minutes(59)),
            message: Some("Processed 50,000 records successfully".to_string()),
            error_details: None,
        },
        Job {
            id: "job-002".to_string(),
            filename: "Feedback_50k_2.json".to_string(),
            status: JobStatus::Processing,
            start_time: now - minutes(10),
            end_time: None,
            message: None,
            error_details: None,
        },
        Job {
            id: "job-003".to_string(),
            filename: "Feedback_50k_3.json".to_string(),
            status: JobStatus::Failed,
            start_time: now - minutes(30),
            end_time: Some(now - minutes(30) + chrono::Duration::seconds(10)),
            message: None,
            error_details: Some("Invalid JSON format in line 42135".to_string()),
        },
    ]
}

/// 进程内的模拟后端，用于没有 API 服务时的本地开发
///
/// 上传按固定节奏汇报进度，按 `upload_failure_rate` 随机失败；
/// 新任务在 5 到 15 秒后结束，按 `job_failure_rate` 随机失败。
#[derive(Clone)]
pub struct MockBackend {
    jobs: Arc<Mutex<Vec<Job>>>,
    next_id: Arc<AtomicU64>,
    upload_failure_rate: f64,
    job_failure_rate: f64,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::from_settings(&MockSettings::default())
    }

    pub fn from_settings(settings: &MockSettings) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(seed_jobs())),
            next_id: Arc::new(AtomicU64::new(Utc::now().timestamp_millis().unsigned_abs())),
            upload_failure_rate: settings.upload_failure_rate,
            job_failure_rate: settings.job_failure_rate,
        }
    }

    pub fn with_failure_rates(mut self, upload_failure_rate: f64, job_failure_rate: f64) -> Self {
        self.upload_failure_rate = upload_failure_rate;
        self.job_failure_rate = job_failure_rate;
        self
    }

    fn jobs(&self) -> MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fail_upload(&self, on_progress: &ProgressFn) -> ClientError {
        let mut progress = 0;
        while progress < 60 {
            tokio::time::sleep(FAILING_STEP_DELAY).await;
            progress += 10;
            on_progress(progress, 100);
        }

        ClientError::response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ResponseBody::Json(json!({ "message": "Simulated server error during file upload" })),
        )
    }

    fn spawn_processing(&self, job_id: String, file_size: u64) {
        let jobs = self.jobs.clone();
        let fails = roll(self.job_failure_rate);
        let delay = processing_time();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let mut jobs = jobs.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(job) = jobs.iter_mut().find(|job| job.id == job_id) else {
                return;
            };

            job.end_time = Some(Utc::now());
            if fails {
                job.status = JobStatus::Failed;
                job.error_details = Some("Simulated processing error: Invalid data format in file".to_string());
            } else {
                job.status = JobStatus::Completed;
                job.message = Some(format!("Processed {} records successfully", file_size / 1000));
            }
            debug!(%job_id, status = %job.status, "Mock job finished");
        });
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadTransport for MockBackend {
    async fn upload(&self, file: &UploadFile, on_progress: ProgressFn) -> Result<UploadReceipt> {
        if !file.name.ends_with(".json") {
            return Err(ClientError::request("Only JSON files are allowed"));
        }

        if roll(self.upload_failure_rate) {
            return Err(self.fail_upload(&on_progress).await);
        }

        let step = if file.size > LARGE_FILE { 2 } else { 5 };
        let mut progress = 0;
        while progress < 100 {
            tokio::time::sleep(STEP_DELAY).await;
            progress = (progress + step).min(100);
            on_progress(progress, 100);
        }

        let job_id = format!("job-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.jobs().push(Job {
            id: job_id.clone(),
            filename: file.name.clone(),
            status: JobStatus::Processing,
            start_time: Utc::now(),
            end_time: None,
            message: None,
            error_details: None,
        });
        info!(%job_id, file = %file.name, "Mock upload accepted");

        self.spawn_processing(job_id.clone(), file.size);

        Ok(UploadReceipt {
            job_id,
            message: "File uploaded successfully".to_string(),
        })
    }
}

#[async_trait]
impl JobSource for MockBackend {
    async fn list_jobs(&self) -> Result<ApiResponse<Vec<Job>>> {
        Ok(ApiResponse::success("Jobs retrieved successfully", self.jobs().clone()))
    }

    async fn job_status(&self, job_id: &str) -> Result<Job> {
        self.jobs()
            .iter()
            .find(|job| job.id == job_id)
            .cloned()
            .ok_or_else(|| {
                ClientError::response(
                    StatusCode::NOT_FOUND,
                    ResponseBody::Json(json!({
                        "success": false,
                        "message": format!("Job {job_id} not found"),
                        "data": null
                    })),
                )
            })
    }
}
