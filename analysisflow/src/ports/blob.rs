//! Object storage port.

use async_trait::async_trait;
use md5::{Digest, Md5};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::BlobRef;
use crate::errors::FlowError;

/// Bucket/object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes an object and returns its ETag.
    async fn put(&self, location: &BlobRef, data: Vec<u8>) -> Result<String, FlowError>;

    /// Reads an object.
    async fn get(&self, location: &BlobRef) -> Result<Option<Vec<u8>>, FlowError>;

    /// Returns true if an object exists.
    async fn exists(&self, location: &BlobRef) -> Result<bool, FlowError>;

    /// Lists object paths of `bucket` starting with `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, FlowError>;

    /// Copies one object.
    async fn copy(&self, source: &BlobRef, destination: &BlobRef) -> Result<String, FlowError> {
        let data = self
            .get(source)
            .await?
            .ok_or_else(|| FlowError::not_found("blob", source.to_string()))?;
        self.put(destination, data).await
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    etag: String,
}

/// In-memory blob store.
///
/// Buckets are created implicitly on first write.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<BTreeMap<(String, String), StoredBlob>>,
    writes: AtomicUsize,
}

impl InMemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object, for fixtures.
    pub fn insert(&self, location: &BlobRef, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let etag = etag_of(&data);
        self.objects.write().insert(
            (location.bucket.clone(), location.object_path.clone()),
            StoredBlob { data, etag },
        );
    }

    /// Returns the number of writes through [`BlobStore::put`].
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Returns the ETag of an object.
    #[must_use]
    pub fn etag(&self, location: &BlobRef) -> Option<String> {
        self.objects
            .read()
            .get(&(location.bucket.clone(), location.object_path.clone()))
            .map(|b| b.etag.clone())
    }
}

fn etag_of(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, location: &BlobRef, data: Vec<u8>) -> Result<String, FlowError> {
        let etag = etag_of(&data);
        self.objects.write().insert(
            (location.bucket.clone(), location.object_path.clone()),
            StoredBlob {
                data,
                etag: etag.clone(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(etag)
    }

    async fn get(&self, location: &BlobRef) -> Result<Option<Vec<u8>>, FlowError> {
        Ok(self
            .objects
            .read()
            .get(&(location.bucket.clone(), location.object_path.clone()))
            .map(|b| b.data.clone()))
    }

    async fn exists(&self, location: &BlobRef) -> Result<bool, FlowError> {
        Ok(self
            .objects
            .read()
            .contains_key(&(location.bucket.clone(), location.object_path.clone())))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, FlowError> {
        Ok(self
            .objects
            .read()
            .keys()
            .filter(|(b, path)| b == bucket && path.starts_with(prefix))
            .map(|(_, path)| path.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_exists() {
        let store = InMemoryBlobStore::new();
        let location = BlobRef::new("b", "x/y.csv");

        assert!(!store.exists(&location).await.unwrap());
        let etag = store.put(&location, b"a,b\n1,2\n".to_vec()).await.unwrap();

        assert_eq!(etag.len(), 32);
        assert!(store.exists(&location).await.unwrap());
        assert_eq!(store.get(&location).await.unwrap().unwrap(), b"a,b\n1,2\n");
        assert_eq!(store.etag(&location), Some(etag));
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = InMemoryBlobStore::new();
        store.insert(&BlobRef::new("b", "dir/a"), "1");
        store.insert(&BlobRef::new("b", "dir/b"), "2");
        store.insert(&BlobRef::new("b", "other/c"), "3");
        store.insert(&BlobRef::new("c", "dir/d"), "4");

        assert_eq!(store.list("b", "dir/").await.unwrap(), vec!["dir/a", "dir/b"]);
    }

    #[tokio::test]
    async fn test_copy_missing_source_fails() {
        let store = InMemoryBlobStore::new();
        let err = store
            .copy(&BlobRef::new("b", "nope"), &BlobRef::new("c", "nope"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT-FOUND");
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_copy_keeps_etag() {
        let store = InMemoryBlobStore::new();
        let source = BlobRef::new("b", "f");
        store.insert(&source, "payload");
        let destination = BlobRef::new("run", "staged/b/f");

        store.copy(&source, &destination).await.unwrap();
        assert_eq!(store.etag(&source), store.etag(&destination));
        assert_eq!(store.write_count(), 1);
    }
}
