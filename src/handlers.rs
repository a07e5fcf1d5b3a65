use crate::{
    batch::{BatchItem, BatchResult, ItemOutcome},
    domain::ByteChunks,
    errors::{AppError, ValidationError},
    models::{AssociationRecord, ParentKind, ParentRef},
    AppState,
};
use axum::{
    extract::{multipart::Field, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Serialize;
use std::{error::Error as StdError, io::SeekFrom, sync::Arc};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing;

/// JSON view of a [`BatchResult`].
#[derive(Serialize, Debug)]
pub struct BatchReport {
    pub parent: ParentRef,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub items: Vec<ItemReport>,
}

#[derive(Serialize, Debug)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemReport {
    Succeeded {
        index: usize,
        record: AssociationRecord,
    },
    Failed {
        index: usize,
        filename: String,
        error_kind: &'static str,
        error: String,
        orphan_key: Option<String>,
    },
    Skipped {
        index: usize,
        filename: String,
    },
}

impl From<&BatchResult> for BatchReport {
    fn from(result: &BatchResult) -> Self {
        let items = result
            .outcomes
            .iter()
            .map(|outcome| match outcome {
                ItemOutcome::Succeeded { index, record } => ItemReport::Succeeded {
                    index: *index,
                    record: record.clone(),
                },
                ItemOutcome::Failed { index, filename, error, orphan } => ItemReport::Failed {
                    index: *index,
                    filename: filename.clone(),
                    error_kind: error.kind(),
                    error: describe(error),
                    orphan_key: orphan.as_ref().map(|o| o.key.clone()),
                },
                ItemOutcome::Skipped { index, filename } => ItemReport::Skipped {
                    index: *index,
                    filename: filename.clone(),
                },
            })
            .collect();

        BatchReport {
            parent: result.parent,
            succeeded: result.success_count(),
            failed: result.failure_count(),
            skipped: result.skipped_count(),
            items,
        }
    }
}

// Flattens an error and its sources into one line.
fn describe(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Writes a multipart file field to an anonymous temp file and hands it back as a stream.
///
/// Multipart fields can only be read in order, so every file is spooled before
/// the batch starts. The temp file is removed when the stream is dropped.
async fn spool_field(field: &mut Field<'_>) -> Result<ByteChunks, AppError> {
    let std_file = tokio::task::spawn_blocking(tempfile::tempfile)
        .await
        .map_err(|e| AppError::InternalServerError(format!("Temp file task failed: {}", e)))??;
    let mut file = tokio::fs::File::from_std(std_file);

    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.seek(SeekFrom::Start(0)).await?;

    Ok(ReaderStream::new(file).boxed())
}

/// POST /{kind}/{id}/images
///
/// Fields: `pkuser` (required), `caption` (applies to the image fields after it),
/// and one or more `image` file fields.
pub async fn upload_images(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, i64)>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let kind = kind.parse::<ParentKind>().map_err(AppError::InvalidInput)?;
    let parent = ParentRef { kind, id };

    let mut uploading_user_id = None;
    let mut caption: Option<String> = None;
    let mut items = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        let field_name = match field.name() {
            Some(name) => name.to_string(),
            None => continue,
        };
        match field_name.as_str() {
            "pkuser" => {
                let raw = field.text().await?;
                let user_id = raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| AppError::InvalidInput(format!("Invalid pkuser '{}': {}", raw, e)))?;
                uploading_user_id = Some(user_id);
            }
            "caption" => {
                let text = field.text().await?;
                caption = Some(text).filter(|c| !c.trim().is_empty());
            }
            "image" | "images" => {
                let filename = field.file_name().map(|s| s.to_string()).unwrap_or_default();
                let content_type = field.content_type().map(|m| m.to_string());
                let stream = spool_field(&mut field).await?;
                items.push(BatchItem::new(filename, caption.clone(), stream).with_content_type(content_type));
            }
            _ => tracing::debug!("Ignoring unknown multipart field: {}", field_name),
        }
    }

    let uploading_user_id = uploading_user_id.ok_or_else(|| AppError::MissingFormField("pkuser".to_string()))?;

    let result = state
        .orchestrator
        .process_batch(parent, uploading_user_id, items)
        .await?;

    let status = if result.is_complete_success() {
        StatusCode::CREATED
    } else {
        tracing::warn!(%parent, failed = result.failure_count(), "Batch finished with failed items");
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(BatchReport::from(&result))).into_response())
}

/// POST /users/{id}/images
///
/// Fields: optional `caption` and exactly one `image` file field. The image is
/// recorded against the user only, without a parent link.
pub async fn upload_user_image(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    if user_id <= 0 {
        return Err(ValidationError::InvalidUserId(user_id).into());
    }

    let mut caption: Option<String> = None;
    let mut item = None;

    while let Some(mut field) = multipart.next_field().await? {
        let field_name = match field.name() {
            Some(name) => name.to_string(),
            None => continue,
        };
        match field_name.as_str() {
            "caption" => {
                let text = field.text().await?;
                caption = Some(text).filter(|c| !c.trim().is_empty());
            }
            "image" if item.is_none() => {
                let filename = field.file_name().map(|s| s.to_string()).unwrap_or_default();
                let content_type = field.content_type().map(|m| m.to_string());
                let stream = spool_field(&mut field).await?;
                item = Some(BatchItem::new(filename, None, stream).with_content_type(content_type));
            }
            "image" => return Err(AppError::InvalidInput("Only one image field is accepted".to_string())),
            _ => tracing::debug!("Ignoring unknown multipart field: {}", field_name),
        }
    }

    let mut item = item.ok_or_else(|| AppError::MissingFormField("image".to_string()))?;
    if item.filename.trim().is_empty() {
        return Err(ValidationError::EmptyFilename { index: 0 }.into());
    }
    item.caption = caption;

    let record = state.orchestrator.upload_unlinked(user_id, item).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /{kind}/{id}/images
pub async fn list_images(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let kind = kind.parse::<ParentKind>().map_err(AppError::InvalidInput)?;
    let parent = ParentRef { kind, id };
    tracing::debug!(%parent, "Listing images via handler");
    let records = state.repo.list_for_parent(parent).await?;
    Ok(Json(records))
}

/// DELETE /images/{id}
///
/// Removes the association record only; the stored object is left in place.
pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    tracing::debug!(record_id = id, "Deleting association via handler");
    let record = state.repo.delete(id).await?;
    tracing::info!(record_id = id, s3_key = %record.object_key, "Association deleted via handler");
    Ok(Json(record))
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
