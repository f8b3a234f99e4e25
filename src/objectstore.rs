//! The object-store client boundary (§6) and the transactional `upload` /
//! `delete` / `make_dir` primitives built on top of it (§4.3).
//!
//! The client itself is an external collaborator — this module only
//! defines the trait the core needs and the primitives that drive it.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::CfnPlusError;
use crate::hash;

/// Metadata about an existing object, as returned by a head-object call.
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub version_id: String,
    pub user_metadata: HashMap<String, String>,
}

/// The versioned, bucket-oriented capability set the core needs from an
/// object store (§6). A real implementation wraps an S3-compatible API; the
/// crate ships only an in-process demonstration implementation (see
/// [`crate::objectstore_demo`]).
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;
    async fn bucket_is_versioned(&self, bucket: &str) -> Result<bool>;
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMetadata>>;
    /// Uploads a new version and returns its version id.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        metadata: HashMap<String, String>,
    ) -> Result<String>;
    /// With `version = Some(id)`, permanently removes that version.
    /// With `version = None`, inserts a delete marker (soft delete) and
    /// returns the new delete-marker's version id.
    async fn delete_object(&self, bucket: &str, key: &str, version: Option<&str>) -> Result<String>;
    /// Keys currently visible (not behind a delete marker) under `prefix`.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

/// A compensator that finalises or reverses exactly one prior primitive's
/// effect. A closed set mirrors the closed set of primitives, packing
/// per-call state (bucket/key/version) into the variant rather than a
/// boxed closure — the owned-`FnOnce`-trait-object shape runs into
/// borrow-checker friction here since compensators are driven by the
/// transaction driver well after the call that produced them.
pub enum Compensator {
    DeleteVersion { bucket: String, key: String, version: String },
}

impl Compensator {
    pub async fn invoke(&self, object_store: &dyn ObjectStoreClient) -> Result<()> {
        match self {
            Compensator::DeleteVersion { bucket, key, version } => {
                object_store
                    .delete_object(bucket, key, Some(version))
                    .await
                    .map(|_| ())
            }
        }
    }
}

/// A scheduled external side effect: exactly the primitives a directive
/// handler can emit, plus the stack-policy action `StackPolicy` schedules.
/// Carries its own arguments; `execute` is the single interface method
/// the driver calls.
#[derive(Debug)]
pub enum Action {
    UploadObject { bucket: String, key: String, content: Vec<u8> },
    DeleteObject { bucket: String, key: String },
    MakeDir { bucket: String, key: String },
    SetStackPolicy { stack_name: String, policy_json: String },
}

impl Action {
    pub async fn execute(
        &self,
        object_store: &dyn ObjectStoreClient,
        provisioner: &dyn crate::provisioner::ProvisionerClient,
        undoers: &mut Vec<Compensator>,
        committers: &mut Vec<Compensator>,
    ) -> Result<()> {
        match self {
            Action::UploadObject { bucket, key, content } => {
                upload(object_store, bucket, key, content, undoers, committers).await
            }
            Action::DeleteObject { bucket, key } => {
                delete(object_store, bucket, key, undoers, committers).await
            }
            Action::MakeDir { bucket, key } => {
                make_dir(object_store, bucket, key, undoers, committers).await
            }
            Action::SetStackPolicy { stack_name, policy_json } => {
                tracing::info!(stack = %stack_name, "Setting stack policy");
                provisioner.set_stack_policy(stack_name, policy_json).await
            }
        }
    }
}

async fn require_versioned(object_store: &dyn ObjectStoreClient, bucket: &str) -> Result<()> {
    if !object_store.bucket_exists(bucket).await? {
        return Err(CfnPlusError::invalid_template(format!(
            "No such S3 bucket: {}",
            bucket
        )));
    }
    if !object_store.bucket_is_versioned(bucket).await? {
        return Err(CfnPlusError::invalid_template(format!(
            "Bucket must have versioning enabled: {}",
            bucket
        )));
    }
    Ok(())
}

/// **upload**: no-op if content hash matches the existing object;
/// otherwise uploads a new version, schedules its deletion as the undoer,
/// and — if a previous version existed — schedules that previous version's
/// deletion as the committer.
pub async fn upload(
    object_store: &dyn ObjectStoreClient,
    bucket: &str,
    key: &str,
    content: &[u8],
    undoers: &mut Vec<Compensator>,
    committers: &mut Vec<Compensator>,
) -> Result<()> {
    require_versioned(object_store, bucket).await?;

    let hashvalue = hash::sha1_base64(content);
    let existing = object_store.head_object(bucket, key).await?;
    if let Some(meta) = &existing {
        if meta.user_metadata.get(hash::HASH_METADATA_KEY) == Some(&hashvalue) {
            return Ok(());
        }
    }

    tracing::info!(bucket, key, "Uploading object");
    let mut metadata = HashMap::new();
    metadata.insert(hash::HASH_METADATA_KEY.to_string(), hashvalue);
    let new_version = object_store.put_object(bucket, key, content, metadata).await?;
    undoers.push(Compensator::DeleteVersion {
        bucket: bucket.to_string(),
        key: key.to_string(),
        version: new_version,
    });
    if let Some(meta) = existing {
        committers.push(Compensator::DeleteVersion {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version: meta.version_id,
        });
    }
    Ok(())
}

/// **delete**: no-op if the object is absent; otherwise inserts a
/// delete-marker, schedules removing that marker as the undoer, and
/// schedules removing both the marker and the previous version as the
/// committer.
pub async fn delete(
    object_store: &dyn ObjectStoreClient,
    bucket: &str,
    key: &str,
    undoers: &mut Vec<Compensator>,
    committers: &mut Vec<Compensator>,
) -> Result<()> {
    require_versioned(object_store, bucket).await?;

    let Some(existing) = object_store.head_object(bucket, key).await? else {
        return Ok(());
    };

    tracing::info!(bucket, key, "Deleting object");
    let delete_marker_version = object_store.delete_object(bucket, key, None).await?;
    undoers.push(Compensator::DeleteVersion {
        bucket: bucket.to_string(),
        key: key.to_string(),
        version: delete_marker_version.clone(),
    });
    committers.push(Compensator::DeleteVersion {
        bucket: bucket.to_string(),
        key: key.to_string(),
        version: existing.version_id,
    });
    committers.push(Compensator::DeleteVersion {
        bucket: bucket.to_string(),
        key: key.to_string(),
        version: delete_marker_version,
    });
    Ok(())
}

/// **make_dir**: no-op if any object already has `key` as a prefix;
/// otherwise creates a zero-byte marker object and schedules its removal
/// as the undoer. Never produces a committer.
pub async fn make_dir(
    object_store: &dyn ObjectStoreClient,
    bucket: &str,
    key: &str,
    undoers: &mut Vec<Compensator>,
    _committers: &mut Vec<Compensator>,
) -> Result<()> {
    require_versioned(object_store, bucket).await?;

    if !object_store.list_objects(bucket, key).await?.is_empty() {
        return Ok(());
    }

    tracing::info!(bucket, key, "Making directory marker");
    let new_version = object_store.put_object(bucket, key, &[], HashMap::new()).await?;
    undoers.push(Compensator::DeleteVersion {
        bucket: bucket.to_string(),
        key: key.to_string(),
        version: new_version,
    });
    Ok(())
}

/// Parse `s3://<bucket>/<key>` into `(bucket, key)`. Leading `/` on the key
/// is stripped.
pub fn parse_s3_uri(uri: &str) -> Result<(String, String)> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| CfnPlusError::invalid_template(format!("Invalid URI: '{}'", uri)))?;
    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    Ok((bucket.to_string(), key.trim_start_matches('/').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_s3_uri() {
        assert_eq!(
            parse_s3_uri("s3://my-bucket/a/b.txt").unwrap(),
            ("my-bucket".to_string(), "a/b.txt".to_string())
        );
    }

    #[test]
    fn strips_leading_slash_on_key() {
        assert_eq!(
            parse_s3_uri("s3://my-bucket//a.txt").unwrap(),
            ("my-bucket".to_string(), "a.txt".to_string())
        );
    }

    #[test]
    fn rejects_non_s3_scheme() {
        assert!(parse_s3_uri("http://my-bucket/a.txt").is_err());
    }

    #[tokio::test]
    async fn delete_against_unversioned_bucket_fails() {
        let store = crate::objectstore_demo::InMemoryObjectStore::new();
        store.create_bucket("b", false);
        store.put_object("b", "k", b"hi", HashMap::new()).await.unwrap();

        let mut undoers = Vec::new();
        let mut committers = Vec::new();
        let err = delete(&store, "b", "k", &mut undoers, &mut committers).await.unwrap_err();
        assert!(err.to_string().contains("versioning"));
        assert!(undoers.is_empty());
        assert!(committers.is_empty());
    }
}
