//! Scripted in-memory transport shared by the pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{DynamicImage, Rgb, RgbImage};
use tokio::sync::{Notify, Semaphore};
use tona_core::imaging::EncodedImage;
use tona_core::job::JobStatus;
use tona_core::transport::{Transport, TransportError};
use tona_core::types::{GroupSlot, SharedImage};
use tona_core::wire::{
    CancelResponse, ProcessingRequest, ProcessingResponse, ResultResponse, StatusResponse,
    UploadGroupResponse,
};
use tona_pipeline::{JobOrchestrator, PipelineConfig, ResultMaterializer, SessionStore, UploadPipeline};

/// A request the fake transport received.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Upload {
        slot: GroupSlot,
        parts: Vec<String>,
        staged: bool,
    },
    Start(ProcessingRequest),
    Status(String),
    Result(String),
    Cancel(String),
    Download(String),
}

/// Blocks a request until the test releases it.
pub struct Hold {
    pub entered: Notify,
    pub release: Semaphore,
}

impl Hold {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.acquire().await.expect("semaphore open").forget();
    }

    pub fn release_one(&self) {
        self.release.add_permits(1);
    }
}

/// A [`Transport`] answering from per-endpoint queues.
///
/// Unscripted status checks report `processing`; other unscripted calls fail
/// with a connection error.
#[derive(Default)]
pub struct FakeTransport {
    uploads: Mutex<VecDeque<Result<UploadGroupResponse, TransportError>>>,
    starts: Mutex<VecDeque<Result<ProcessingResponse, TransportError>>>,
    statuses: Mutex<VecDeque<Result<StatusResponse, TransportError>>>,
    results: Mutex<VecDeque<Result<ResultResponse, TransportError>>>,
    cancels: Mutex<VecDeque<Result<CancelResponse, TransportError>>>,
    downloads: Mutex<HashMap<String, Result<Vec<u8>, TransportError>>>,
    calls: Mutex<Vec<Call>>,
    status_hold: Mutex<Option<Arc<Hold>>>,
    upload_hold: Mutex<Option<Arc<Hold>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload(&self, response: Result<UploadGroupResponse, TransportError>) -> &Self {
        self.uploads.lock().unwrap().push_back(response);
        self
    }

    pub fn start(&self, response: Result<ProcessingResponse, TransportError>) -> &Self {
        self.starts.lock().unwrap().push_back(response);
        self
    }

    pub fn status(&self, response: Result<StatusResponse, TransportError>) -> &Self {
        self.statuses.lock().unwrap().push_back(response);
        self
    }

    pub fn result(&self, response: Result<ResultResponse, TransportError>) -> &Self {
        self.results.lock().unwrap().push_back(response);
        self
    }

    pub fn cancel(&self, response: Result<CancelResponse, TransportError>) -> &Self {
        self.cancels.lock().unwrap().push_back(response);
        self
    }

    pub fn file(&self, url: &str, response: Result<Vec<u8>, TransportError>) -> &Self {
        self.downloads.lock().unwrap().insert(url.to_string(), response);
        self
    }

    /// Make every status check wait for [`Hold::release_one`].
    pub fn hold_status(&self) -> Arc<Hold> {
        let hold = Hold::new();
        *self.status_hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    /// Make every upload wait for [`Hold::release_one`].
    pub fn hold_uploads(&self) -> Arc<Hold> {
        let hold = Hold::new();
        *self.upload_hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn status_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Status(_)))
    }

    pub fn start_requests(&self) -> Vec<ProcessingRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Start(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn send_upload(
        &self,
        slot: GroupSlot,
        images: &[EncodedImage],
        staged: bool,
    ) -> Result<UploadGroupResponse, TransportError> {
        self.record(Call::Upload {
            slot,
            parts: images.iter().map(|i| i.file_name.clone()).collect(),
            staged,
        });
        let hold = self.upload_hold.lock().unwrap().clone();
        if let Some(hold) = hold {
            hold.pass().await;
        }
        pop(&self.uploads)
    }
}

fn pop<T>(queue: &Mutex<VecDeque<Result<T, TransportError>>>) -> Result<T, TransportError> {
    queue
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(TransportError::NoConnection("unscripted".into())))
}

impl Transport for FakeTransport {
    async fn upload_group(
        &self,
        slot: GroupSlot,
        images: &[EncodedImage],
    ) -> Result<UploadGroupResponse, TransportError> {
        self.send_upload(slot, images, false).await
    }

    async fn upload_group_staged(
        &self,
        slot: GroupSlot,
        images: &[EncodedImage],
    ) -> Result<UploadGroupResponse, TransportError> {
        self.send_upload(slot, images, true).await
    }

    async fn start_processing(
        &self,
        request: &ProcessingRequest,
    ) -> Result<ProcessingResponse, TransportError> {
        self.record(Call::Start(request.clone()));
        pop(&self.starts)
    }

    async fn check_status(&self, job_id: &str) -> Result<StatusResponse, TransportError> {
        self.record(Call::Status(job_id.to_string()));
        let hold = self.status_hold.lock().unwrap().clone();
        if let Some(hold) = hold {
            hold.pass().await;
        }
        let next = self.statuses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(status(JobStatus::Processing, None)))
    }

    async fn get_result(&self, job_id: &str) -> Result<ResultResponse, TransportError> {
        self.record(Call::Result(job_id.to_string()));
        pop(&self.results)
    }

    async fn cancel_job(&self, job_id: &str) -> Result<CancelResponse, TransportError> {
        self.record(Call::Cancel(job_id.to_string()));
        pop(&self.cancels)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        self.record(Call::Download(url.to_string()));
        self.downloads
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(TransportError::RequestFailed("Not found".into())))
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn uploaded(group_id: &str) -> Result<UploadGroupResponse, TransportError> {
    Ok(UploadGroupResponse {
        success: true,
        message: None,
        group_id: Some(group_id.to_string()),
    })
}

pub fn started(job_id: &str) -> Result<ProcessingResponse, TransportError> {
    Ok(ProcessingResponse {
        success: true,
        job_id: Some(job_id.to_string()),
        message: None,
    })
}

pub fn status(status: JobStatus, progress: Option<f64>) -> StatusResponse {
    StatusResponse {
        status,
        progress,
        message: None,
    }
}

pub fn cancelled_ok() -> Result<CancelResponse, TransportError> {
    Ok(CancelResponse {
        success: true,
        message: None,
    })
}

pub fn server_error(status: u16) -> TransportError {
    TransportError::ServerError {
        status,
        body: String::new(),
    }
}

pub fn sample_images(count: usize) -> Vec<SharedImage> {
    (0..count)
        .map(|i| Arc::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([i as u8, 90, 200])))))
        .collect()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 20, 30])));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("png encodes");
    bytes
}

/// Let spawned tasks run until they block on a timer or a hold.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// All pipeline components wired to one fake transport and one session.
pub struct Harness {
    pub transport: Arc<FakeTransport>,
    pub session: Arc<SessionStore>,
    pub uploads: Arc<UploadPipeline<FakeTransport>>,
    pub results: Arc<ResultMaterializer<FakeTransport>>,
    pub orchestrator: Arc<JobOrchestrator<FakeTransport>>,
}

impl Harness {
    pub fn new(transport: FakeTransport) -> Self {
        Self::with_config(transport, PipelineConfig::default())
    }

    pub fn with_config(transport: FakeTransport, config: PipelineConfig) -> Self {
        let transport = Arc::new(transport);
        let session = Arc::new(SessionStore::new());
        let uploads = UploadPipeline::new(transport.clone(), session.clone(), config.upload.clone());
        let results = ResultMaterializer::new(
            transport.clone(),
            session.clone(),
            config.download_concurrency,
        );
        let orchestrator = JobOrchestrator::new(
            transport.clone(),
            session.clone(),
            results.clone(),
            config.poll.clone(),
        );
        Self {
            transport,
            session,
            uploads,
            results,
            orchestrator,
        }
    }

    /// Upload both groups, answered with `G1` and `G2`.
    pub async fn upload_both(&self) {
        self.transport.upload(uploaded("G1")).upload(uploaded("G2"));
        self.uploads
            .upload(GroupSlot::First, &sample_images(2))
            .await
            .expect("first group uploads");
        self.uploads
            .upload(GroupSlot::Second, &sample_images(1))
            .await
            .expect("second group uploads");
    }
}
