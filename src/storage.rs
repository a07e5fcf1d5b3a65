use crate::{
    domain::{ByteChunks, FileStorage},
    errors::{ObjectStoreError, StreamReadError, UploadError},
};
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::{
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client as S3Client,
};
use aws_smithy_types::error::display::DisplayErrorContext;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing;
use url::Url;

/// Size at which the buffered payload is flushed as one multipart part.
/// S3 requires every part but the last to be at least 5 MiB.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// Builds public retrieval URLs for keys in one bucket.
#[derive(Debug, Clone)]
pub struct ObjectLocator {
    base: Url,
    bucket: String,
    bucket_in_path: bool,
}

impl ObjectLocator {
    /// With an endpoint override (LocalStack, MinIO) objects are addressed
    /// path-style, matching the client's `force_path_style`. Otherwise the
    /// regional virtual-hosted AWS endpoint is used.
    pub fn new(bucket: &str, region: &str, endpoint: Option<&str>) -> anyhow::Result<Self> {
        let (raw, bucket_in_path) = match endpoint {
            Some(endpoint) => (endpoint.to_string(), true),
            None => (format!("https://{}.s3.{}.amazonaws.com", bucket, region), false),
        };
        let base = Url::parse(&raw).with_context(|| format!("Invalid object store endpoint '{}'", raw))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Object store endpoint '{}' cannot carry a path", raw);
        }
        Ok(Self { base, bucket: bucket.to_string(), bucket_in_path })
    }

    pub fn locate(&self, key: &str) -> String {
        let mut url = self.base.clone();
        // Infallible: cannot-be-a-base URLs are rejected in `new`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            if self.bucket_in_path {
                segments.push(&self.bucket);
            }
            segments.push(key);
        }
        url.into()
    }
}

/// Pulls a byte stream apart into bounded parts.
///
/// The source is only polled while a part is being filled, so a slow sink
/// slows the reader down instead of growing the buffer.
pub(crate) struct PartReader {
    body: ByteChunks,
    buf: BytesMut,
    part_size: usize,
    bytes_read: u64,
    exhausted: bool,
}

impl PartReader {
    pub(crate) fn new(body: ByteChunks, part_size: usize) -> Self {
        Self {
            body,
            buf: BytesMut::new(),
            part_size,
            bytes_read: 0,
            exhausted: false,
        }
    }

    /// Returns the next part, or `None` once the stream is drained.
    /// The final part may be smaller than `part_size`; every other part is at least that big.
    pub(crate) async fn next_part(&mut self) -> Result<Option<Bytes>, StreamReadError> {
        while !self.exhausted && self.buf.len() < self.part_size {
            match self.body.next().await {
                Some(Ok(chunk)) => {
                    self.bytes_read += chunk.len() as u64;
                    self.buf.extend_from_slice(&chunk);
                }
                Some(Err(source)) => {
                    return Err(StreamReadError { bytes_read: self.bytes_read, source });
                }
                None => self.exhausted = true,
            }
        }
        if self.buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.buf.split().freeze()))
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted && self.buf.is_empty()
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

#[derive(Debug, Clone)]
pub struct S3FileStorage {
    client: S3Client,
    bucket_name: String,
    locator: ObjectLocator,
    part_size: usize,
}

impl S3FileStorage {
    pub fn new(client: S3Client, bucket_name: String, locator: ObjectLocator) -> Self {
        tracing::info!(bucket = %bucket_name, "Initializing S3FileStorage");
        Self { client, bucket_name, locator, part_size: PART_SIZE }
    }

    #[cfg(test)]
    pub(crate) fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self
    }

    async fn put_single(&self, key: &str, content_type: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        let len = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .content_type(content_type)
            .content_length(len as i64)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|sdk_err| {
                tracing::error!(s3_key = %key, bucket = %self.bucket_name, error = %DisplayErrorContext(&sdk_err), "S3: PutObject failed");
                ObjectStoreError::UploadFailed {
                    key: key.to_string(),
                    source: anyhow::Error::new(sdk_err).context("S3: PutObject was not acknowledged"),
                }
            })?;
        tracing::debug!(s3_key = %key, bucket = %self.bucket_name, bytes = len, "S3: Single-part upload acknowledged");
        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        content_type: &str,
        first: Bytes,
        reader: &mut PartReader,
    ) -> Result<(), UploadError> {
        let created = self.client
            .create_multipart_upload()
            .bucket(&self.bucket_name)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|sdk_err| upload_failed(key, "S3: CreateMultipartUpload failed", sdk_err))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| ObjectStoreError::UploadFailed {
                key: key.to_string(),
                source: anyhow::anyhow!("S3: CreateMultipartUpload returned no upload id"),
            })?
            .to_string();
        tracing::debug!(s3_key = %key, %upload_id, "S3: Multipart upload started");

        match self.send_parts(key, &upload_id, first, reader).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder().set_parts(Some(parts)).build();
                let result = self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket_name)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await;
                match result {
                    Ok(_) => {
                        tracing::debug!(s3_key = %key, %upload_id, bytes = reader.bytes_read(), "S3: Multipart upload acknowledged");
                        Ok(())
                    }
                    Err(sdk_err) => {
                        self.abort(key, &upload_id).await;
                        Err(upload_failed(key, "S3: CompleteMultipartUpload failed", sdk_err).into())
                    }
                }
            }
            Err(err) => {
                self.abort(key, &upload_id).await;
                Err(err)
            }
        }
    }

    async fn send_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Bytes,
        reader: &mut PartReader,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let mut parts = Vec::new();
        let mut next = Some(first);
        let mut part_number: i32 = 1;

        while let Some(data) = next {
            let len = data.len();
            let output = self.client
                .upload_part()
                .bucket(&self.bucket_name)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_length(len as i64)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|sdk_err| upload_failed(key, "S3: UploadPart failed", sdk_err))?;
            tracing::trace!(s3_key = %key, part_number, bytes = len, "S3: Part uploaded");

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            part_number += 1;
            next = reader.next_part().await?;
        }
        Ok(parts)
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        let result = self.client
            .abort_multipart_upload()
            .bucket(&self.bucket_name)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(sdk_err) = result {
            tracing::warn!(s3_key = %key, %upload_id, error = %DisplayErrorContext(&sdk_err), "S3: Failed to abort multipart upload; parts may linger until lifecycle cleanup");
        }
    }
}

fn upload_failed<E>(key: &str, context: &'static str, sdk_err: E) -> ObjectStoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    tracing::error!(s3_key = %key, error = %DisplayErrorContext(&sdk_err), "{}", context);
    ObjectStoreError::UploadFailed {
        key: key.to_string(),
        source: anyhow::Error::new(sdk_err).context(context),
    }
}

#[async_trait]
impl FileStorage for S3FileStorage {
    /// Payloads that fit in one part go through PutObject; larger ones are
    /// sent as a multipart upload one part at a time.
    async fn put_stream(&self, key: &str, content_type: &str, body: ByteChunks) -> Result<String, UploadError> {
        tracing::debug!(s3_key = %key, bucket = %self.bucket_name, %content_type, "S3: Uploading stream");

        let mut reader = PartReader::new(body, self.part_size);
        let first = reader.next_part().await?.unwrap_or_default();

        if reader.is_exhausted() {
            self.put_single(key, content_type, first).await?;
        } else {
            self.put_multipart(key, content_type, first, &mut reader).await?;
        }

        let location = self.locator.locate(key);
        tracing::info!(s3_key = %key, %location, bytes = reader.bytes_read(), "S3: Upload successful");
        Ok(location)
    }

    /// Deletes an object from S3 using DeleteObject.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        tracing::debug!(s3_key = %key, bucket = %self.bucket_name, "S3: Deleting object");

        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|sdk_err| {
                // DeleteObject succeeds even if the object doesn't exist.
                tracing::error!(s3_key = %key, bucket = %self.bucket_name, error = %DisplayErrorContext(&sdk_err), "S3: Error deleting object");
                ObjectStoreError::DeleteFailed {
                    key: key.to_string(),
                    source: anyhow::Error::new(sdk_err).context(format!("S3: Failed to delete object with key '{}'", key)),
                }
            })?;

        tracing::debug!(s3_key = %key, bucket = %self.bucket_name, "S3: Delete request successful (object might not have existed)");
        Ok(())
    }
}
