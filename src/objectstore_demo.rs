//! Demonstration implementations of [`ObjectStoreClient`]. Neither talks to
//! real AWS: [`InMemoryObjectStore`] backs unit/integration tests,
//! [`FsObjectStore`] gives the CLI binary something to drive against a
//! local directory so `--apply` has observable effects without cloud
//! credentials.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::objectstore::{ObjectMetadata, ObjectStoreClient};

#[derive(Clone)]
struct Version {
    id: String,
    body: Vec<u8>,
    metadata: HashMap<String, String>,
    deleted: bool,
}

struct Bucket {
    versioned: bool,
    objects: HashMap<String, Vec<Version>>,
}

/// An entirely in-process, versioned object store. Buckets must be created
/// up front via [`InMemoryObjectStore::create_bucket`] — there is no
/// "create bucket" operation in the trait because provisioning buckets is
/// the provisioner's job, not the object-store client's.
#[derive(Default)]
pub struct InMemoryObjectStore {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_bucket(&self, name: &str, versioned: bool) {
        self.buckets.lock().unwrap().insert(
            name.to_string(),
            Bucket { versioned, objects: HashMap::new() },
        );
    }

    /// Current (non-deleted) body of an object, for test assertions.
    pub fn current_body(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let buckets = self.buckets.lock().unwrap();
        let versions = buckets.get(bucket)?.objects.get(key)?;
        let latest = versions.last()?;
        if latest.deleted {
            None
        } else {
            Some(latest.body.clone())
        }
    }

    /// All surviving (not-permanently-deleted) version ids for a key, in
    /// creation order — used by tests asserting undo/commit correctness.
    pub fn surviving_versions(&self, bucket: &str, key: &str) -> Vec<String> {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|versions| versions.iter().map(|v| v.id.clone()).collect())
            .unwrap_or_default()
    }
}

fn new_version_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl ObjectStoreClient for InMemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.lock().unwrap().contains_key(bucket))
    }

    async fn bucket_is_versioned(&self, bucket: &str) -> Result<bool> {
        Ok(self
            .buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|b| b.versioned)
            .unwrap_or(false))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMetadata>> {
        let buckets = self.buckets.lock().unwrap();
        let Some(b) = buckets.get(bucket) else { return Ok(None) };
        let Some(versions) = b.objects.get(key) else { return Ok(None) };
        match versions.last() {
            Some(v) if !v.deleted => Ok(Some(ObjectMetadata {
                version_id: v.id.clone(),
                user_metadata: v.metadata.clone(),
            })),
            _ => Ok(None),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        let mut buckets = self.buckets.lock().unwrap();
        let b = buckets
            .get_mut(bucket)
            .with_context(|| format!("no such bucket: {}", bucket))?;
        let id = new_version_id();
        b.objects.entry(key.to_string()).or_default().push(Version {
            id: id.clone(),
            body: body.to_vec(),
            metadata,
            deleted: false,
        });
        Ok(id)
    }

    async fn delete_object(&self, bucket: &str, key: &str, version: Option<&str>) -> Result<String> {
        let mut buckets = self.buckets.lock().unwrap();
        let b = buckets
            .get_mut(bucket)
            .with_context(|| format!("no such bucket: {}", bucket))?;
        let versions = b.objects.entry(key.to_string()).or_default();
        match version {
            Some(v) => {
                versions.retain(|existing| existing.id != v);
                Ok(v.to_string())
            }
            None => {
                let id = new_version_id();
                versions.push(Version {
                    id: id.clone(),
                    body: Vec::new(),
                    metadata: HashMap::new(),
                    deleted: true,
                });
                Ok(id)
            }
        }
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let buckets = self.buckets.lock().unwrap();
        let Some(b) = buckets.get(bucket) else { return Ok(vec![]) };
        let mut keys: Vec<String> = b
            .objects
            .iter()
            .filter(|(k, versions)| {
                k.starts_with(prefix) && versions.last().map(|v| !v.deleted).unwrap_or(false)
            })
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[derive(Serialize, Deserialize, Default)]
struct FsIndex {
    versioned_buckets: Vec<String>,
    /// bucket -> key -> ordered version records
    objects: HashMap<String, HashMap<String, Vec<FsVersion>>>,
}

#[derive(Serialize, Deserialize, Clone)]
struct FsVersion {
    id: String,
    metadata: HashMap<String, String>,
    deleted: bool,
}

/// A local-filesystem-backed object store for the CLI's `--apply` mode.
/// Object bodies live under `<base>/blobs/<version-id>`; the index
/// (versions, metadata, bucket registrations) lives in `<base>/index.json`.
/// This is a demonstration harness, not a production S3 client.
pub struct FsObjectStore {
    base_dir: PathBuf,
    index: Mutex<FsIndex>,
}

impl FsObjectStore {
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(base_dir.join("blobs")).await?;
        let index_path = base_dir.join("index.json");
        let index = if index_path.exists() {
            let text = tokio::fs::read_to_string(&index_path).await?;
            serde_json::from_str(&text).context("corrupt object-store index")?
        } else {
            FsIndex::default()
        };
        Ok(FsObjectStore { base_dir, index: Mutex::new(index) })
    }

    pub fn register_bucket(&self, name: &str, versioned: bool) {
        let mut index = self.index.lock().unwrap();
        if versioned && !index.versioned_buckets.iter().any(|b| b == name) {
            index.versioned_buckets.push(name.to_string());
        }
        index.objects.entry(name.to_string()).or_default();
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = {
            let index = self.index.lock().unwrap();
            serde_json::to_string_pretty(&*index)?
        };
        tokio::fs::write(self.base_dir.join("index.json"), snapshot).await?;
        Ok(())
    }

    fn blob_path(&self, version_id: &str) -> PathBuf {
        self.base_dir.join("blobs").join(version_id)
    }
}

#[async_trait]
impl ObjectStoreClient for FsObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.index.lock().unwrap().objects.contains_key(bucket))
    }

    async fn bucket_is_versioned(&self, bucket: &str) -> Result<bool> {
        Ok(self
            .index
            .lock()
            .unwrap()
            .versioned_buckets
            .iter()
            .any(|b| b == bucket))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMetadata>> {
        let index = self.index.lock().unwrap();
        let latest = index
            .objects
            .get(bucket)
            .and_then(|keys| keys.get(key))
            .and_then(|versions| versions.last());
        match latest {
            Some(v) if !v.deleted => Ok(Some(ObjectMetadata {
                version_id: v.id.clone(),
                user_metadata: v.metadata.clone(),
            })),
            _ => Ok(None),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        let id = new_version_id();
        tokio::fs::write(self.blob_path(&id), body).await?;
        {
            let mut index = self.index.lock().unwrap();
            index
                .objects
                .entry(bucket.to_string())
                .or_default()
                .entry(key.to_string())
                .or_default()
                .push(FsVersion { id: id.clone(), metadata, deleted: false });
        }
        self.persist().await?;
        Ok(id)
    }

    async fn delete_object(&self, bucket: &str, key: &str, version: Option<&str>) -> Result<String> {
        let returned_id = {
            let mut index = self.index.lock().unwrap();
            let versions = index
                .objects
                .entry(bucket.to_string())
                .or_default()
                .entry(key.to_string())
                .or_default();
            match version {
                Some(v) => {
                    versions.retain(|existing| existing.id != v);
                    v.to_string()
                }
                None => {
                    let id = new_version_id();
                    versions.push(FsVersion { id: id.clone(), metadata: HashMap::new(), deleted: true });
                    id
                }
            }
        };
        self.persist().await?;
        if version.is_some() {
            let _ = tokio::fs::remove_file(self.blob_path(&returned_id)).await;
        }
        Ok(returned_id)
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let index = self.index.lock().unwrap();
        let mut keys: Vec<String> = index
            .objects
            .get(bucket)
            .map(|keys| {
                keys.iter()
                    .filter(|(k, versions)| {
                        k.starts_with(prefix) && versions.last().map(|v| !v.deleted).unwrap_or(false)
                    })
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_delete_round_trips_through_in_memory_store() {
        let store = InMemoryObjectStore::new();
        store.create_bucket("b", true);

        let id = store.put_object("b", "k", b"hi", HashMap::new()).await.unwrap();
        assert_eq!(store.current_body("b", "k"), Some(b"hi".to_vec()));

        store.delete_object("b", "k", None).await.unwrap();
        assert_eq!(store.current_body("b", "k"), None);

        // undo: delete the delete-marker, restoring the prior version
        let markers = store.surviving_versions("b", "k");
        let marker = markers.last().unwrap().clone();
        store.delete_object("b", "k", Some(&marker)).await.unwrap();
        assert_eq!(store.current_body("b", "k"), Some(b"hi".to_vec()));
        assert!(store.surviving_versions("b", "k").contains(&id));
    }

    #[tokio::test]
    async fn unversioned_bucket_reports_not_versioned() {
        let store = InMemoryObjectStore::new();
        store.create_bucket("b", false);
        assert!(!store.bucket_is_versioned("b").await.unwrap());
    }
}
