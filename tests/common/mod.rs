//! In-memory stand-ins for S3 and Postgres used by the pipeline tests.

#![allow(dead_code)]

use adventure_media::{
    domain::{AssociationRepository, ByteChunks, FileStorage},
    errors::{ObjectStoreError, PersistenceError, UploadError},
    models::{AssociationRecord, ImageRecord, NewAssociation, NewImage, ParentRef},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{stream, StreamExt};
use std::{
    collections::{HashMap, HashSet},
    io,
    sync::Mutex,
};

/// Object store that keeps payloads in memory. Keys whose original filename
/// is listed in `fail_filenames` are rejected like a quota error.
#[derive(Default)]
pub struct MemoryFileStorage {
    objects: Mutex<HashMap<String, Bytes>>,
    fail_filenames: HashSet<String>,
}

impl MemoryFileStorage {
    pub fn failing_for(filenames: &[&str]) -> Self {
        Self {
            objects: Mutex::default(),
            fail_filenames: filenames.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn put_stream(&self, key: &str, _content_type: &str, mut body: ByteChunks) -> Result<String, UploadError> {
        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| adventure_media::errors::StreamReadError {
                bytes_read: data.len() as u64,
                source,
            })?;
            data.extend_from_slice(&chunk);
        }

        // Keys are `{36-char uuid}-{filename}`.
        let filename = key.get(37..).unwrap_or(key);
        if self.fail_filenames.contains(filename) {
            return Err(ObjectStoreError::UploadFailed {
                key: key.to_string(),
                source: anyhow::anyhow!("QuotaExceeded: simulated rejection"),
            }
            .into());
        }

        self.objects.lock().unwrap().insert(key.to_string(), Bytes::from(data));
        Ok(format!("https://photos.test/{}", key))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Relational store with foreign-key checks on parents and users.
pub struct MemoryAssociationRepository {
    parents: HashSet<ParentRef>,
    users: HashSet<i64>,
    rows: Mutex<Vec<AssociationRecord>>,
    images: Mutex<Vec<ImageRecord>>,
    next_id: Mutex<i64>,
}

impl MemoryAssociationRepository {
    pub fn new(parents: &[ParentRef], users: &[i64]) -> Self {
        Self {
            parents: parents.iter().copied().collect(),
            users: users.iter().copied().collect(),
            rows: Mutex::default(),
            images: Mutex::default(),
            next_id: Mutex::new(1),
        }
    }

    pub fn records(&self) -> Vec<AssociationRecord> {
        self.rows.lock().unwrap().clone()
    }

    pub fn unlinked_images(&self) -> Vec<ImageRecord> {
        self.images.lock().unwrap().clone()
    }

    fn check_user(&self, user_id: i64) -> Result<(), PersistenceError> {
        if self.users.contains(&user_id) {
            Ok(())
        } else {
            Err(PersistenceError::MissingReference {
                entity: "user",
                constraint: "images_fk_user_image_fkey".into(),
            })
        }
    }

    fn next_id(&self) -> i64 {
        let mut next = self.next_id.lock().unwrap();
        let id = *next;
        *next += 1;
        id
    }
}

#[async_trait]
impl AssociationRepository for MemoryAssociationRepository {
    async fn associate(&self, new: NewAssociation) -> Result<AssociationRecord, PersistenceError> {
        if !self.parents.contains(&new.parent) {
            return Err(PersistenceError::MissingReference {
                entity: new.parent.kind.as_str(),
                constraint: format!("{}_{}_fkey", new.parent.kind.link_table(), new.parent.kind.link_column()),
            });
        }
        self.check_user(new.uploading_user_id)?;

        let record = AssociationRecord {
            id: self.next_id(),
            object_key: new.object_key,
            object_location: new.object_location,
            caption: new.caption,
            parent: new.parent,
            uploading_user_id: new.uploading_user_id,
            created_at: Utc::now(),
        };
        self.rows.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn create_image(&self, new: NewImage) -> Result<ImageRecord, PersistenceError> {
        self.check_user(new.uploading_user_id)?;

        let record = ImageRecord {
            id: self.next_id(),
            object_key: new.object_key,
            object_location: new.object_location,
            caption: new.caption,
            uploading_user_id: new.uploading_user_id,
            created_at: Utc::now(),
        };
        self.images.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn delete(&self, id: i64) -> Result<AssociationRecord, PersistenceError> {
        let mut rows = self.rows.lock().unwrap();
        let position = rows.iter().position(|r| r.id == id).ok_or(PersistenceError::NotFound(id))?;
        Ok(rows.remove(position))
    }

    async fn list_for_parent(&self, parent: ParentRef) -> Result<Vec<AssociationRecord>, PersistenceError> {
        Ok(self.rows.lock().unwrap().iter().filter(|r| r.parent == parent).cloned().collect())
    }
}

/// A payload split into a few chunks, like a network read would deliver it.
pub fn body(content: &'static str) -> ByteChunks {
    let chunks: Vec<io::Result<Bytes>> = content
        .as_bytes()
        .chunks(4)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks).boxed()
}

/// A payload whose source fails after the first chunk.
pub fn broken_body() -> ByteChunks {
    stream::iter(vec![
        Ok(Bytes::from_static(b"\x89PNG")),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "client disconnected")),
    ])
    .boxed()
}
