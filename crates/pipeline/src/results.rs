//! Fetching, downloading and saving the results of a completed job.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use base64::Engine;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tona_core::classify::{classify, rejected};
use tona_core::error::{DomainError, ProcessingError, StorageError};
use tona_core::imaging::decode_image;
use tona_core::transport::Transport;
use tona_core::types::{JobId, SharedImage};
use tona_core::wire::ResultResponse;

use crate::retry::{RetryFn, RetryableAction};
use crate::session::{ResultSet, ResultsClaim, SessionStore};

/// Turns a completed job's result descriptor into decoded images.
pub struct ResultMaterializer<T: Transport + 'static> {
    transport: Arc<T>,
    session: Arc<SessionStore>,
    concurrency: usize,
    this: Weak<Self>,
}

impl<T: Transport + 'static> ResultMaterializer<T> {
    pub fn new(transport: Arc<T>, session: Arc<SessionStore>, concurrency: usize) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            transport,
            session,
            concurrency: concurrency.max(1),
            this: this.clone(),
        })
    }

    /// Materialize the results of `job_id`.
    ///
    /// Inline data wins over URLs. URL downloads run with bounded
    /// concurrency but are accounted for strictly in index order, so
    /// progress only moves forward. A download that fails is skipped and
    /// still counts towards progress. Calling this while results are present
    /// or loading returns the current set without a request.
    pub async fn fetch(&self, job_id: &str) -> Result<ResultSet, DomainError> {
        match self.session.begin_results(job_id).await {
            ResultsClaim::Started => {}
            ResultsClaim::Existing(set) => return Ok(set),
            ResultsClaim::Stale => return Err(ProcessingError::InvalidJobId.into()),
        }

        let response = match self.transport.get_result(job_id).await {
            Ok(r) if r.success => r,
            Ok(r) => return Err(self.fail(job_id, rejected(r.message, "Failed to fetch results")).await),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Result request failed");
                return Err(self.fail(job_id, classify(&e)).await);
            }
        };

        let inline = decode_inline(job_id, &response);
        if let Ok(Some(image)) = inline {
            self.session.set_results_total(job_id, 1).await;
            self.session.record_download(job_id, Some(image)).await;
            return self.finish(job_id).await;
        }

        if response.result_urls.is_none() && response.result_url.is_none() {
            let error = match inline {
                Err(error) => error,
                Ok(_) => DomainError::Unknown("No data received".into()),
            };
            return Err(self.fail(job_id, error).await);
        }

        let urls = response.urls();
        self.session.set_results_total(job_id, urls.len()).await;
        tracing::info!(job_id = %job_id, count = urls.len(), "Downloading results");

        let mut downloads = futures::stream::iter(urls.into_iter().enumerate().map(|(index, url)| {
            let transport = self.transport.clone();
            async move {
                let image = download_image(&*transport, &url).await;
                (index, url, image)
            }
        }))
        .buffered(self.concurrency);

        while let Some((index, url, image)) = downloads.next().await {
            let image = match image {
                Ok(image) => Some(image),
                Err(e) => {
                    tracing::warn!(job_id = %job_id, index, url = %url, error = %e, "Skipping result");
                    None
                }
            };
            if !self.session.record_download(job_id, image).await {
                break;
            }
        }

        self.finish(job_id).await
    }

    /// Write every result image of the session to `dir` as
    /// `result_{index}.png`.
    pub async fn save_results(&self, dir: &Path) -> Result<Vec<PathBuf>, DomainError> {
        let Some(results) = self.session.results().await.filter(|r| !r.is_loading) else {
            return Ok(Vec::new());
        };

        match write_pngs(&results.images, dir).await {
            Ok(paths) => {
                tracing::info!(dir = %dir.display(), count = paths.len(), "Results saved");
                Ok(paths)
            }
            Err(error) => {
                self.session.add_error(error.clone()).await;
                Err(error)
            }
        }
    }

    async fn finish(&self, job_id: &str) -> Result<ResultSet, DomainError> {
        // The session moved on (reset or a new job) while we were loading.
        self.session
            .finish_results(job_id)
            .await
            .ok_or_else(|| ProcessingError::InvalidJobId.into())
    }

    async fn fail(&self, job_id: &str, error: DomainError) -> DomainError {
        self.session.abort_results(job_id).await;
        let retry = error.can_retry().then(|| self.retry_action(job_id.to_string()));
        self.session.add_error_with_retry(error.clone(), retry).await;
        error
    }

    fn retry_action(&self, job_id: JobId) -> Arc<dyn RetryableAction> {
        let this = self.this.clone();
        Arc::new(RetryFn::new("fetch results", move || match this.upgrade() {
            Some(materializer) => materializer.retry_fetch(job_id.clone()),
            None => async {}.boxed(),
        }))
    }

    fn retry_fetch(self: Arc<Self>, job_id: JobId) -> BoxFuture<'static, ()> {
        async move {
            let _ = self.fetch(&job_id).await;
        }
        .boxed()
    }
}

/// The inline result image, `Ok(None)` when the descriptor carries no
/// `data`.
fn decode_inline(job_id: &str, response: &ResultResponse) -> Result<Option<SharedImage>, DomainError> {
    let Some(data) = response.data.as_deref() else {
        return Ok(None);
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| {
            tracing::warn!(job_id = %job_id, error = %e, "Inline result is not valid base64");
            DomainError::Unknown(format!("Failed to decode inline result: {e}"))
        })?;
    match decode_image(&bytes) {
        Ok(image) => Ok(Some(Arc::new(image))),
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Inline result is not a decodable image");
            Err(DomainError::Unknown(format!("Failed to decode image: {e}")))
        }
    }
}

async fn download_image<T: Transport>(transport: &T, url: &str) -> Result<SharedImage, DomainError> {
    let bytes = transport.download(url).await.map_err(|e| classify(&e))?;
    decode_image(&bytes)
        .map(Arc::new)
        .map_err(|e| DomainError::Unknown(format!("Failed to decode image: {e}")))
}

async fn write_pngs(images: &[SharedImage], dir: &Path) -> Result<Vec<PathBuf>, DomainError> {
    tokio::fs::create_dir_all(dir).await.map_err(storage_error)?;

    let mut paths = Vec::with_capacity(images.len());
    for (index, image) in images.iter().enumerate() {
        let mut png = Vec::new();
        image
            .write_to(&mut io::Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| {
                tracing::error!(index, error = %e, "Failed to encode result");
                DomainError::from(StorageError::SaveFailed)
            })?;

        let path = dir.join(format!("result_{index}.png"));
        tokio::fs::write(&path, &png).await.map_err(storage_error)?;
        paths.push(path);
    }
    Ok(paths)
}

fn storage_error(error: io::Error) -> DomainError {
    tracing::error!(error = %error, "Failed to write results");
    match error.kind() {
        io::ErrorKind::StorageFull => StorageError::InsufficientSpace.into(),
        _ => StorageError::SaveFailed.into(),
    }
}
