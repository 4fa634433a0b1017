//! Idempotent staging of foreign blobs into a run bucket.
//!
//! Foreign blobs are read-only to the run, so they are copied to
//! `staged/<source_bucket>/<object_path>` inside the run bucket. Copies are
//! serialized per destination and skipped when the destination exists,
//! which makes concurrent siblings staging the same dataset copy it once.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::{BlobKind, BlobRef};
use crate::errors::FlowError;
use crate::ports::BlobStore;

/// Returns the staged location of `source` inside `run_bucket`.
#[must_use]
pub fn staged_location(run_bucket: &str, source: &BlobRef) -> BlobRef {
    BlobRef::new(
        run_bucket,
        format!("staged/{}/{}", source.bucket, source.object_path),
    )
}

/// Copies foreign blobs into run buckets.
pub struct BlobStager {
    blobs: Arc<dyn BlobStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for BlobStager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStager")
            .field("in_flight", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl BlobStager {
    /// Creates a stager over a blob store.
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            locks: DashMap::new(),
        }
    }

    /// Stages `source` into `run_bucket` and returns the staged location.
    ///
    /// Directories are staged object by object.
    pub async fn stage(
        &self,
        source: &BlobRef,
        run_bucket: &str,
        kind: BlobKind,
    ) -> Result<BlobRef, FlowError> {
        let destination = staged_location(run_bucket, source);
        let key = destination.to_string();
        let lock = self.lock_for(&key);
        let staged = {
            let _guard = lock.lock().await;
            self.stage_locked(source, &destination, run_bucket, kind).await
        };
        drop(lock);
        // Only the map still holds the lock once every waiter is done.
        self.locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        staged.map(|()| destination)
    }

    async fn stage_locked(
        &self,
        source: &BlobRef,
        destination: &BlobRef,
        run_bucket: &str,
        kind: BlobKind,
    ) -> Result<(), FlowError> {
        match kind {
            BlobKind::File | BlobKind::Dataset => self.copy_once(source, destination).await,
            BlobKind::Dir => {
                let prefix = format!("{}/", source.object_path.trim_end_matches('/'));
                let objects = self
                    .blobs
                    .list(&source.bucket, &prefix)
                    .await
                    .map_err(|e| staging_error(source, destination, &e.to_string()))?;
                if objects.is_empty() {
                    return Err(staging_error(source, destination, "directory is empty or missing"));
                }
                for path in objects {
                    let object = BlobRef::new(&source.bucket, path);
                    self.copy_once(&object, &staged_location(run_bucket, &object))
                        .await?;
                }
                Ok(())
            }
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    async fn copy_once(&self, source: &BlobRef, destination: &BlobRef) -> Result<(), FlowError> {
        let present = self
            .blobs
            .exists(destination)
            .await
            .map_err(|e| staging_error(source, destination, &e.to_string()))?;
        if present {
            debug!(source = %source, destination = %destination, "Already staged");
            return Ok(());
        }
        self.blobs
            .copy(source, destination)
            .await
            .map_err(|e| staging_error(source, destination, &e.to_string()))?;
        debug!(source = %source, destination = %destination, "Staged blob");
        Ok(())
    }
}

fn staging_error(source: &BlobRef, destination: &BlobRef, reason: &str) -> FlowError {
    FlowError::Staging {
        source_path: source.to_string(),
        destination: destination.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryBlobStore;

    #[tokio::test]
    async fn test_stage_file_once() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        blobs.insert(&BlobRef::new("datasets", "iris.csv"), "a,b");
        let stager = BlobStager::new(blobs.clone());

        let first = stager
            .stage(&BlobRef::new("datasets", "iris.csv"), "run-a1", BlobKind::Dataset)
            .await
            .unwrap();
        let second = stager
            .stage(&BlobRef::new("datasets", "iris.csv"), "run-a1", BlobKind::Dataset)
            .await
            .unwrap();

        assert_eq!(first, BlobRef::new("run-a1", "staged/datasets/iris.csv"));
        assert_eq!(first, second);
        assert_eq!(blobs.write_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_staging_copies_once() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        blobs.insert(&BlobRef::new("datasets", "big.csv"), vec![7u8; 1024]);
        let stager = Arc::new(BlobStager::new(blobs.clone()));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let stager = stager.clone();
                tokio::spawn(async move {
                    stager
                        .stage(&BlobRef::new("datasets", "big.csv"), "run-a1", BlobKind::File)
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(blobs.write_count(), 1);
        assert!(stager.locks.is_empty());
    }

    #[tokio::test]
    async fn test_stage_directory() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        blobs.insert(&BlobRef::new("src", "images/a.png"), "a");
        blobs.insert(&BlobRef::new("src", "images/b.png"), "b");
        blobs.insert(&BlobRef::new("src", "imagesX/c.png"), "c");
        let stager = BlobStager::new(blobs.clone());

        let staged = stager
            .stage(&BlobRef::new("src", "images"), "run-a1", BlobKind::Dir)
            .await
            .unwrap();

        assert_eq!(staged.object_path, "staged/src/images");
        assert_eq!(
            blobs.list("run-a1", "staged/src/images/").await.unwrap(),
            vec!["staged/src/images/a.png", "staged/src/images/b.png"]
        );
    }

    #[tokio::test]
    async fn test_missing_source_is_a_staging_error() {
        let stager = BlobStager::new(Arc::new(InMemoryBlobStore::new()));
        let err = stager
            .stage(&BlobRef::new("datasets", "gone.csv"), "run-a1", BlobKind::File)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Staging { .. }));
        assert!(err.is_task_local());
    }

    #[tokio::test]
    async fn test_locks_are_released_per_destination() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let stager = BlobStager::new(blobs.clone());
        for run in 0..50 {
            let source = BlobRef::new("datasets", format!("part-{run}.csv"));
            blobs.insert(&source, "x");
            stager
                .stage(&source, &format!("run-a{run}"), BlobKind::File)
                .await
                .unwrap();
        }
        stager
            .stage(&BlobRef::new("datasets", "gone.csv"), "run-a1", BlobKind::File)
            .await
            .unwrap_err();

        assert_eq!(blobs.write_count(), 50);
        assert!(stager.locks.is_empty());
    }
}
