//! `BeforeCreation` / `AfterCreation`: sequences of single-entry
//! `{Action: arg}` mappings, each producing a scheduled object-store
//! action. Forbidden entirely inside an imported (sub-stack) template.

use std::collections::HashSet;

use anyhow::Result;

use crate::context::Context;
use crate::document::Node;
use crate::error::CfnPlusError;
use crate::expr::eval_expr_as_string;
use crate::objectstore::{parse_s3_uri, Action};

use super::TagResult;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    After,
}

pub async fn evaluate(phase: Phase, arg: &Node, ctx: &Context) -> Result<TagResult> {
    let tag_name = match phase {
        Phase::Before => "Aruba::BeforeCreation",
        Phase::After => "Aruba::AfterCreation",
    };

    if ctx.template_is_imported {
        return Err(CfnPlusError::invalid_template(format!(
            "Actions are not allowed in this template, but found {}",
            tag_name
        )));
    }

    let items = arg.as_sequence().ok_or_else(|| {
        CfnPlusError::invalid_template(format!("Invalid value for {}: {:?}", tag_name, arg))
    })?;

    let mut actions = Vec::new();
    for item in items {
        let (action_name, action_arg) = item.single_entry().ok_or_else(|| {
            CfnPlusError::invalid_template(format!("Invalid value for {}: {:?}", tag_name, arg))
        })?;
        let scheduled = match action_name {
            "S3Mkdir" => vec![do_mkdir(action_arg, ctx).await?],
            "S3Sync" => do_sync(action_arg, ctx).await?,
            "S3Upload" => vec![do_upload(action_arg, ctx).await?],
            other => {
                return Err(CfnPlusError::invalid_template(format!("Invalid action: {}", other)))
            }
        };
        actions.extend(scheduled);
    }

    let mut result = TagResult::delete();
    match phase {
        Phase::Before => result.before = actions,
        Phase::After => result.after = actions,
    }
    Ok(result)
}

async fn do_mkdir(arg: &Node, ctx: &Context) -> Result<Action> {
    let uri = eval_expr_as_string(arg, ctx).await?;
    let (bucket, mut key) = parse_s3_uri(&uri)?;
    if !key.ends_with('/') {
        key.push('/');
    }
    Ok(Action::MakeDir { bucket, key })
}

async fn do_upload(arg: &Node, ctx: &Context) -> Result<Action> {
    let entries = arg.as_mapping().filter(|e| e.len() == 2).ok_or_else(|| {
        CfnPlusError::invalid_template(format!("Invalid argument for S3Upload: {:?}", arg))
    })?;
    let local_file_node = find_entry(entries, "LocalFile").ok_or_else(|| invalid_upload(arg))?;
    let s3_dest_node = find_entry(entries, "S3Dest").ok_or_else(|| invalid_upload(arg))?;

    let local_file = eval_expr_as_string(local_file_node, ctx).await?;
    let s3_dest = eval_expr_as_string(s3_dest_node, ctx).await?;
    let (bucket, key) = parse_s3_uri(&s3_dest)?;
    if key.ends_with('/') {
        return Err(CfnPlusError::invalid_template("S3Upload: Key must not end with '/'"));
    }

    let abs_path = ctx.abspath(&local_file)?;
    let content = std::fs::read(&abs_path)
        .map_err(|e| anyhow::anyhow!("reading {}: {}", abs_path.display(), e))?;
    Ok(Action::UploadObject { bucket, key, content })
}

async fn do_sync(arg: &Node, ctx: &Context) -> Result<Vec<Action>> {
    let entries = arg.as_mapping().filter(|e| e.len() == 2).ok_or_else(|| {
        CfnPlusError::invalid_template(format!("Invalid argument for S3Sync: {:?}", arg))
    })?;
    let local_dir_node = find_entry(entries, "LocalDir").ok_or_else(|| invalid_sync(arg))?;
    let s3_dest_node = find_entry(entries, "S3Dest").ok_or_else(|| invalid_sync(arg))?;

    let local_dir = eval_expr_as_string(local_dir_node, ctx).await?;
    let s3_dest = eval_expr_as_string(s3_dest_node, ctx).await?;
    let (bucket, mut dir_key) = parse_s3_uri(&s3_dest)?;
    if !dir_key.ends_with('/') {
        dir_key.push('/');
    }

    let abs_local_path = ctx.abspath(&local_dir)?;
    if !abs_local_path.is_dir() {
        return Err(CfnPlusError::invalid_template(format!(
            "S3Sync: {} is not a directory",
            abs_local_path.display()
        )));
    }

    let remote_keys = ctx.object_store.list_objects(&bucket, &dir_key).await?;
    let remote_relpaths: HashSet<String> = remote_keys
        .iter()
        .map(|k| k.trim_start_matches(&dir_key).to_string())
        .collect();

    // Sorted so the emitted action list is deterministic across runs on
    // the same filesystem, even though the final state doesn't depend on
    // the order (uploads are content-hash idempotent).
    let mut local_relpaths = Vec::new();
    for entry in walk_files(&abs_local_path)? {
        let relpath = entry
            .strip_prefix(&abs_local_path)
            .unwrap_or(&entry)
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        local_relpaths.push(relpath);
    }
    local_relpaths.sort();
    let local_set: HashSet<&String> = local_relpaths.iter().collect();

    let mut actions = Vec::new();
    let mut to_delete: Vec<&String> = remote_relpaths.iter().filter(|f| !local_set.contains(f)).collect();
    to_delete.sort();
    for relpath in to_delete {
        actions.push(Action::DeleteObject { bucket: bucket.clone(), key: format!("{}{}", dir_key, relpath) });
    }

    for relpath in &local_relpaths {
        let local_path = abs_local_path.join(relpath);
        let content = std::fs::read(&local_path)
            .map_err(|e| anyhow::anyhow!("reading {}: {}", local_path.display(), e))?;
        actions.push(Action::UploadObject {
            bucket: bucket.clone(),
            key: format!("{}{}", dir_key, relpath),
            content,
        });
    }

    Ok(actions)
}

fn walk_files(dir: &std::path::Path) -> Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk_files(&path)?);
        } else {
            out.push(path);
        }
    }
    Ok(out)
}

fn find_entry<'a>(entries: &'a [(String, Node)], key: &str) -> Option<&'a Node> {
    entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn invalid_upload(arg: &Node) -> anyhow::Error {
    CfnPlusError::invalid_template(format!("Invalid argument for S3Upload: {:?}", arg))
}

fn invalid_sync(arg: &Node) -> anyhow::Error {
    CfnPlusError::invalid_template(format!("Invalid argument for S3Sync: {:?}", arg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::ObjectStoreClient;
    use crate::objectstore_demo::InMemoryObjectStore;
    use crate::provisioner::NullProvisionerClient;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn test_ctx(template_path: &std::path::Path, imported: bool) -> (Context, Arc<InMemoryObjectStore>) {
        let store = Arc::new(InMemoryObjectStore::new());
        store.create_bucket("b", true);
        let mut ctx = Context::new(
            HashMap::new(),
            None,
            Some(template_path.to_string_lossy().to_string()),
            None,
            Arc::new(|_, _| Box::pin(async { unreachable!() })),
            store.clone(),
            Arc::new(NullProvisionerClient),
        );
        ctx.template_is_imported = imported;
        (ctx, store)
    }

    #[tokio::test]
    async fn before_creation_in_imported_template_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _store) = test_ctx(&dir.path().join("t.yaml"), true);
        let arg = Node::Sequence(vec![Node::mapping(vec![(
            "S3Mkdir",
            Node::string("s3://b/dir"),
        )])]);
        let err = evaluate(Phase::Before, &arg, &ctx).await.unwrap_err();
        assert!(err.downcast_ref::<CfnPlusError>().is_some());
    }

    #[tokio::test]
    async fn s3_mkdir_schedules_make_dir_with_trailing_slash() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _store) = test_ctx(&dir.path().join("t.yaml"), false);
        let arg = Node::Sequence(vec![Node::mapping(vec![(
            "S3Mkdir",
            Node::string("s3://b/dir"),
        )])]);
        let result = evaluate(Phase::Before, &arg, &ctx).await.unwrap();
        assert_eq!(result.before.len(), 1);
        match &result.before[0] {
            Action::MakeDir { bucket, key } => {
                assert_eq!(bucket, "b");
                assert_eq!(key, "dir/");
            }
            _ => panic!("expected MakeDir"),
        }
    }

    #[tokio::test]
    async fn s3_sync_deletes_remote_only_files_and_uploads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("t.yaml");
        let local_dir = dir.path().join("assets");
        std::fs::create_dir(&local_dir).unwrap();
        std::fs::write(local_dir.join("keep.txt"), b"keep").unwrap();
        std::fs::write(local_dir.join("new.txt"), b"new").unwrap();

        let (ctx, store) = test_ctx(&template_path, false);
        // Seed the remote side: "keep.txt" already matches, "stale.txt" has no local counterpart.
        store.put_object("b", "assets/keep.txt", b"keep", HashMap::new()).await.unwrap();
        store.put_object("b", "assets/stale.txt", b"old", HashMap::new()).await.unwrap();

        let arg = Node::mapping(vec![
            ("LocalDir", Node::string("assets")),
            ("S3Dest", Node::string("s3://b/assets")),
        ]);
        let actions = do_sync(&arg, &ctx).await.unwrap();

        let deletes: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                Action::DeleteObject { key, .. } => Some(key.clone()),
                _ => None,
            })
            .collect();
        let uploads: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                Action::UploadObject { key, .. } => Some(key.clone()),
                _ => None,
            })
            .collect();

        assert_eq!(deletes, vec!["assets/stale.txt".to_string()]);
        assert_eq!(uploads, vec!["assets/keep.txt".to_string(), "assets/new.txt".to_string()]);
    }
}
