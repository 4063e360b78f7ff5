//! Turning an image batch into a server-side group.

use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tona_core::classify::{classify, rejected};
use tona_core::error::{DomainError, ValidationError};
use tona_core::imaging::{encode_batch, payload_size, EncodedImage};
use tona_core::transport::Transport;
use tona_core::types::{GroupId, GroupSlot, SharedImage};

use crate::config::UploadConfig;
use crate::retry::{RetryFn, RetryableAction};
use crate::session::SessionStore;

/// Validates, encodes and uploads image batches, one at a time.
pub struct UploadPipeline<T: Transport + 'static> {
    transport: Arc<T>,
    session: Arc<SessionStore>,
    config: UploadConfig,
    /// Serializes uploads: a second batch waits for the first to finish.
    gate: Mutex<()>,
    this: Weak<Self>,
}

impl<T: Transport + 'static> UploadPipeline<T> {
    pub fn new(transport: Arc<T>, session: Arc<SessionStore>, config: UploadConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            transport,
            session,
            config,
            gate: Mutex::new(()),
            this: this.clone(),
        })
    }

    /// Upload `images` as the group for `slot` and return its server id.
    ///
    /// Validation failures are recorded without touching the orchestration
    /// state and never reach the network. That includes offering a batch
    /// while a job is running ([`ValidationError::JobInProgress`]). Every
    /// other failure leaves the session in `Failed`, and a retryable one
    /// stores a re-upload of the same encoded batch in the retry slot.
    pub async fn upload(&self, slot: GroupSlot, images: &[SharedImage]) -> Result<GroupId, DomainError> {
        if let Err(error) = self.validate(images) {
            self.session.add_error(error.clone()).await;
            return Err(error);
        }

        let _gate = self.gate.lock().await;
        self.session.begin_upload(slot).await?;

        let encoded = match encode_batch(images) {
            Ok(encoded) => encoded,
            Err(error) => {
                self.session.fail(error.clone()).await;
                return Err(error);
            }
        };

        self.transfer(slot, encoded).await
    }

    /// Send an already encoded batch again.
    pub async fn reupload(&self, slot: GroupSlot, encoded: Vec<EncodedImage>) -> Result<GroupId, DomainError> {
        let _gate = self.gate.lock().await;
        self.session.begin_upload(slot).await?;
        self.transfer(slot, encoded).await
    }

    fn validate(&self, images: &[SharedImage]) -> Result<(), DomainError> {
        if images.is_empty() {
            return Err(ValidationError::NoImagesSelected.into());
        }
        if images.len() > self.config.max_images {
            return Err(ValidationError::TooManyImages(self.config.max_images).into());
        }
        Ok(())
    }

    /// Must be called with the gate held.
    async fn transfer(&self, slot: GroupSlot, encoded: Vec<EncodedImage>) -> Result<GroupId, DomainError> {
        let size = payload_size(&encoded);
        let staged = size > self.config.staged_threshold_bytes;
        tracing::info!(slot = %slot, parts = encoded.len(), bytes = size, staged, "Sending group");

        let response = if staged {
            self.transport.upload_group_staged(slot, &encoded).await
        } else {
            self.transport.upload_group(slot, &encoded).await
        };

        let outcome = match response {
            Ok(r) if r.success => match r.group_id {
                Some(group_id) => Ok(group_id),
                None => Err(rejected(r.message, "Upload failed")),
            },
            Ok(r) => Err(rejected(r.message, "Upload failed")),
            Err(e) => {
                tracing::error!(slot = %slot, error = %e, "Group upload failed");
                Err(classify(&e))
            }
        };

        match outcome {
            Ok(group_id) => {
                self.session.record_upload(slot, encoded, group_id.clone()).await;
                Ok(group_id)
            }
            Err(error) => {
                let retry = error.can_retry().then(|| self.retry_action(slot, encoded));
                self.session.fail_with_retry(error.clone(), retry).await;
                Err(error)
            }
        }
    }

    fn retry_action(&self, slot: GroupSlot, encoded: Vec<EncodedImage>) -> Arc<dyn RetryableAction> {
        let this = self.this.clone();
        Arc::new(RetryFn::new(format!("upload {slot} group"), move || match this.upgrade() {
            Some(pipeline) => pipeline.retry_upload(slot, encoded.clone()),
            None => async {}.boxed(),
        }))
    }

    fn retry_upload(self: Arc<Self>, slot: GroupSlot, encoded: Vec<EncodedImage>) -> BoxFuture<'static, ()> {
        async move {
            let _ = self.reupload(slot, encoded).await;
        }
        .boxed()
    }
}
