use crate::errors::{ObjectStoreError, PersistenceError, UploadError};
use crate::models::{AssociationRecord, ImageRecord, NewAssociation, NewImage, ParentRef};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;

/// A photo payload as handed over by the request layer, read chunk by chunk.
pub type ByteChunks = BoxStream<'static, io::Result<Bytes>>;

/// Trait defining the object store operations the upload pipeline needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileStorage: Send + Sync + 'static { // Send+Sync+'static required for Arc<dyn>
    /// Streams `body` to the store under `key`.
    ///
    /// Resolves only once the store has acknowledged the write and returns the
    /// retrieval location of the stored object.
    async fn put_stream(&self, key: &str, content_type: &str, body: ByteChunks) -> Result<String, UploadError>;

    /// Removes an object. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
}

/// Trait defining operations on the records linking stored photos to their parents.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssociationRepository: Send + Sync + 'static {
    /// Inserts one association record. Identical calls create distinct records.
    async fn associate(&self, new: NewAssociation) -> Result<AssociationRecord, PersistenceError>;

    /// Inserts an image row tied to its uploader only, with no parent link.
    async fn create_image(&self, new: NewImage) -> Result<ImageRecord, PersistenceError>;

    /// Deletes an association record by its id.
    async fn delete(&self, id: i64) -> Result<AssociationRecord, PersistenceError>;

    /// Lists the records attached to a parent, oldest first.
    async fn list_for_parent(&self, parent: ParentRef) -> Result<Vec<AssociationRecord>, PersistenceError>;
}
