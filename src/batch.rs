//! Drives upload-then-associate for every photo of one request and collects
//! a per-item outcome. Item failures never abort the batch.

use crate::{
    domain::{AssociationRepository, ByteChunks},
    errors::{ItemError, ValidationError},
    models::{AssociationRecord, ImageRecord, MediaObject, NewAssociation, NewImage, ParentRef},
    upload::MediaUploader,
};
use futures::{stream, StreamExt};
use std::{fmt, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing;

/// One photo of a batch: its payload, original filename and optional caption.
pub struct BatchItem {
    pub filename: String,
    pub caption: Option<String>,
    /// Content type declared by the client, if any.
    pub content_type: Option<String>,
    pub stream: ByteChunks,
}

impl BatchItem {
    pub fn new(filename: impl Into<String>, caption: Option<String>, stream: ByteChunks) -> Self {
        Self {
            filename: filename.into(),
            caption,
            content_type: None,
            stream,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }
}

impl fmt::Debug for BatchItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchItem")
            .field("filename", &self.filename)
            .field("caption", &self.caption)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchStrategy {
    /// Items run one after another in input order.
    #[default]
    Sequential,
    /// Up to `max_in_flight` items run at once. Outcomes keep input order.
    Concurrent { max_in_flight: usize },
}

impl BatchStrategy {
    pub fn from_concurrency(limit: usize) -> Self {
        if limit <= 1 {
            BatchStrategy::Sequential
        } else {
            BatchStrategy::Concurrent { max_in_flight: limit }
        }
    }
}

/// What to do with an uploaded object whose association write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    /// Delete the object right away (best effort).
    #[default]
    Delete,
    /// Keep the object and report it for out-of-band cleanup.
    Retain,
}

#[derive(Debug)]
pub enum ItemOutcome {
    Succeeded {
        index: usize,
        record: AssociationRecord,
    },
    Failed {
        index: usize,
        filename: String,
        error: ItemError,
        /// Uploaded object left behind without an association record.
        orphan: Option<MediaObject>,
    },
    /// Cancellation was requested before the item started.
    Skipped { index: usize, filename: String },
}

impl ItemOutcome {
    pub fn index(&self) -> usize {
        match self {
            ItemOutcome::Succeeded { index, .. }
            | ItemOutcome::Failed { index, .. }
            | ItemOutcome::Skipped { index, .. } => *index,
        }
    }

    pub fn record(&self) -> Option<&AssociationRecord> {
        match self {
            ItemOutcome::Succeeded { record, .. } => Some(record),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ItemError> {
        match self {
            ItemOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Ordered outcomes of one batch, one per input item.
#[derive(Debug)]
pub struct BatchResult {
    pub parent: ParentRef,
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchResult {
    pub fn records(&self) -> impl Iterator<Item = &AssociationRecord> {
        self.outcomes.iter().filter_map(ItemOutcome::record)
    }

    pub fn success_count(&self) -> usize {
        self.records().count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, ItemOutcome::Failed { .. })).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, ItemOutcome::Skipped { .. })).count()
    }

    pub fn is_complete_success(&self) -> bool {
        self.success_count() == self.outcomes.len()
    }
}

#[derive(Clone)]
pub struct BatchOrchestrator {
    uploader: MediaUploader,
    repo: Arc<dyn AssociationRepository>,
    strategy: BatchStrategy,
    orphan_policy: OrphanPolicy,
}

impl BatchOrchestrator {
    pub fn new(uploader: MediaUploader, repo: Arc<dyn AssociationRepository>) -> Self {
        Self {
            uploader,
            repo,
            strategy: BatchStrategy::default(),
            orphan_policy: OrphanPolicy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: BatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_orphan_policy(mut self, orphan_policy: OrphanPolicy) -> Self {
        self.orphan_policy = orphan_policy;
        self
    }

    pub async fn process_batch(
        &self,
        parent: ParentRef,
        uploading_user_id: i64,
        items: Vec<BatchItem>,
    ) -> Result<BatchResult, ValidationError> {
        self.process_batch_until(parent, uploading_user_id, items, &CancellationToken::new())
            .await
    }

    /// Like [`Self::process_batch`], but items that have not started when
    /// `cancel` fires are reported as skipped. Started items run to completion.
    ///
    /// An item counts as started once it is admitted: sequentially that is
    /// when its turn comes, concurrently when it takes an in-flight slot.
    pub async fn process_batch_until(
        &self,
        parent: ParentRef,
        uploading_user_id: i64,
        items: Vec<BatchItem>,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, ValidationError> {
        validate(parent, uploading_user_id, &items)?;
        tracing::info!(%parent, user_id = uploading_user_id, items = items.len(), strategy = ?self.strategy, "Processing media batch");

        let outcomes: Vec<ItemOutcome> = match self.strategy {
            BatchStrategy::Sequential => {
                let mut outcomes = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let outcome = if cancel.is_cancelled() {
                        skipped(parent, index, item)
                    } else {
                        self.run_item(parent, uploading_user_id, index, item).await
                    };
                    outcomes.push(outcome);
                }
                outcomes
            }
            BatchStrategy::Concurrent { max_in_flight } => {
                stream::iter(items.into_iter().enumerate())
                    .map(|(index, item)| {
                        // Evaluated when `buffered` pulls the item into a free slot.
                        let admitted = !cancel.is_cancelled();
                        async move {
                            if admitted {
                                self.run_item(parent, uploading_user_id, index, item).await
                            } else {
                                skipped(parent, index, item)
                            }
                        }
                    })
                    .buffered(max_in_flight.max(1))
                    .collect()
                    .await
            }
        };

        let result = BatchResult { parent, outcomes };
        tracing::info!(
            %parent,
            succeeded = result.success_count(),
            failed = result.failure_count(),
            skipped = result.skipped_count(),
            "Media batch finished"
        );
        Ok(result)
    }

    /// Uploads one photo and records it against the uploading user only,
    /// with no parent link. The orphan policy applies as it does for batches.
    pub async fn upload_unlinked(&self, uploading_user_id: i64, item: BatchItem) -> Result<ImageRecord, ItemError> {
        let BatchItem { filename, caption, content_type, stream } = item;

        let object = self
            .uploader
            .upload_as(stream, &filename, content_type.as_deref())
            .await
            .map_err(|err| {
                tracing::warn!(user_id = uploading_user_id, %filename, error = ?err, "Unlinked upload failed");
                ItemError::from(err)
            })?;

        match self.repo.create_image(NewImage::for_object(&object, caption, uploading_user_id)).await {
            Ok(record) => {
                tracing::info!(record_id = record.id, user_id = uploading_user_id, s3_key = %record.object_key, "Unlinked image recorded");
                Ok(record)
            }
            Err(err) => {
                tracing::warn!(user_id = uploading_user_id, s3_key = %object.key, error = ?err, "Recording unlinked image failed after upload");
                self.handle_orphan(object).await;
                Err(err.into())
            }
        }
    }

    async fn run_item(
        &self,
        parent: ParentRef,
        uploading_user_id: i64,
        index: usize,
        item: BatchItem,
    ) -> ItemOutcome {
        let BatchItem { filename, caption, content_type, stream } = item;

        let object = match self.uploader.upload_as(stream, &filename, content_type.as_deref()).await {
            Ok(object) => object,
            Err(err) => {
                tracing::warn!(%parent, index, %filename, error = ?err, "Upload failed; continuing with next item");
                return ItemOutcome::Failed { index, filename, error: err.into(), orphan: None };
            }
        };

        let new = NewAssociation::for_object(parent, &object, caption, uploading_user_id);
        match self.repo.associate(new).await {
            Ok(record) => {
                tracing::debug!(%parent, index, record_id = record.id, s3_key = %record.object_key, "Item associated");
                ItemOutcome::Succeeded { index, record }
            }
            Err(err) => {
                tracing::warn!(%parent, index, s3_key = %object.key, error = ?err, "Association failed after upload");
                let orphan = self.handle_orphan(object).await;
                ItemOutcome::Failed { index, filename, error: err.into(), orphan }
            }
        }
    }

    /// Applies the orphan policy. Returns the object if it is still in the store.
    async fn handle_orphan(&self, object: MediaObject) -> Option<MediaObject> {
        match self.orphan_policy {
            OrphanPolicy::Retain => {
                tracing::warn!(s3_key = %object.key, "Retaining orphaned object");
                Some(object)
            }
            OrphanPolicy::Delete => match self.uploader.storage().delete(&object.key).await {
                Ok(()) => {
                    tracing::info!(s3_key = %object.key, "Deleted orphaned object");
                    None
                }
                Err(err) => {
                    tracing::error!(s3_key = %object.key, error = ?err, "Failed to delete orphaned object");
                    Some(object)
                }
            },
        }
    }
}

fn skipped(parent: ParentRef, index: usize, item: BatchItem) -> ItemOutcome {
    tracing::debug!(%parent, index, filename = %item.filename, "Batch cancelled; skipping item");
    ItemOutcome::Skipped { index, filename: item.filename }
}

fn validate(parent: ParentRef, uploading_user_id: i64, items: &[BatchItem]) -> Result<(), ValidationError> {
    if parent.id <= 0 {
        return Err(ValidationError::InvalidParentId(parent.id));
    }
    if uploading_user_id <= 0 {
        return Err(ValidationError::InvalidUserId(uploading_user_id));
    }
    if items.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    if let Some(index) = items.iter().position(|item| item.filename.trim().is_empty()) {
        return Err(ValidationError::EmptyFilename { index });
    }
    Ok(())
}
