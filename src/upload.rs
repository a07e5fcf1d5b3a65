use crate::{
    domain::{ByteChunks, FileStorage},
    errors::UploadError,
    models::MediaObject,
};
use std::sync::Arc;
use tracing;
use uuid::Uuid;

/// Uploads single photo streams under freshly generated, collision-free keys.
#[derive(Clone)]
pub struct MediaUploader {
    storage: Arc<dyn FileStorage>,
}

impl MediaUploader {
    pub fn new(storage: Arc<dyn FileStorage>) -> Self {
        Self { storage }
    }

    /// Streams `stream` to the object store as `{uuid}-{filename}`.
    ///
    /// Returns once the store has acknowledged the object. Failures are
    /// returned as-is; retrying is up to the caller.
    pub async fn upload(&self, stream: ByteChunks, filename: &str) -> Result<MediaObject, UploadError> {
        self.upload_as(stream, filename, None).await
    }

    /// Like [`Self::upload`], but a content type declared by the client wins
    /// over the one guessed from the filename.
    pub async fn upload_as(
        &self,
        stream: ByteChunks,
        filename: &str,
        declared_content_type: Option<&str>,
    ) -> Result<MediaObject, UploadError> {
        let key = object_key(Uuid::new_v4(), filename);
        let content_type = declared_content_type
            .filter(|ct| !ct.trim().is_empty())
            .or_else(|| mime_guess::from_path(filename).first_raw())
            .unwrap_or("application/octet-stream");

        tracing::debug!(s3_key = %key, %filename, %content_type, "Uploading media stream");
        let location = self.storage.put_stream(&key, content_type, stream).await?;

        Ok(MediaObject {
            key,
            location,
            original_name: filename.to_string(),
        })
    }

    pub(crate) fn storage(&self) -> &Arc<dyn FileStorage> {
        &self.storage
    }
}

pub(crate) fn object_key(id: Uuid, filename: &str) -> String {
    format!("{}-{}", id, filename)
}
