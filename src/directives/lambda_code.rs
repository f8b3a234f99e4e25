//! `Aruba::LambdaCode`: packages a local directory into a zip archive,
//! names it by a canonical content hash, and schedules its upload.

use anyhow::Result;

use crate::context::Context;
use crate::document::Node;
use crate::error::CfnPlusError;
use crate::expr::eval_expr_as_string;
use crate::hash::{canonical_archive_hash, ArchiveEntry};
use crate::objectstore::{parse_s3_uri, Action};

use super::TagResult;

pub async fn evaluate(arg: &Node, ctx: &Context) -> Result<TagResult> {
    let entries = arg.as_mapping().ok_or_else(|| invalid(arg))?;
    let local_path_node = find(entries, "LocalPath").ok_or_else(|| invalid(arg))?;
    let s3_dest_node = find(entries, "S3Dest").ok_or_else(|| invalid(arg))?;

    let local_path = eval_expr_as_string(local_path_node, ctx).await?;
    let s3_dest = eval_expr_as_string(s3_dest_node, ctx).await?;
    let (bucket, dir_key) = parse_s3_uri(&s3_dest)?;

    let abs_path = ctx.abspath(&local_path)?;
    if !abs_path.is_dir() {
        return Err(CfnPlusError::invalid_template(format!(
            "{} is not a directory",
            abs_path.display()
        )));
    }

    let mut archive_entries = Vec::new();
    for file in walk_files(&abs_path)? {
        let pkg_path = file
            .strip_prefix(&abs_path)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        let contents = std::fs::read(&file)
            .map_err(|e| anyhow::anyhow!("reading {}: {}", file.display(), e))?;
        archive_entries.push(ArchiveEntry { path: pkg_path, contents });
    }

    let hash = canonical_archive_hash(&mut archive_entries);
    let s3_key = format!("{}/{}", dir_key, hash);
    let zip_bytes = build_zip(&mut archive_entries)?;

    let mut result = TagResult::replace(
        "Code",
        Node::mapping(vec![("S3Bucket", Node::string(&bucket)), ("S3Key", Node::string(&s3_key))]),
    );
    result.before.push(Action::UploadObject { bucket, key: s3_key, content: zip_bytes });
    Ok(result)
}

/// Build the zip from the same sorted entry list used for the hash, so the
/// archive's bytes are as reproducible as the key that names it (the name
/// itself never depends on the archive bytes — only on file contents and
/// paths — since zip embeds timestamps that would otherwise make the hash
/// unstable across runs).
fn build_zip(entries: &mut [ArchiveEntry]) -> Result<Vec<u8>> {
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());
        for entry in entries.iter() {
            zip.start_file(&entry.path, options)?;
            std::io::Write::write_all(&mut zip, &entry.contents)?;
        }
        zip.finish()?;
    }
    Ok(buf.into_inner())
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

fn find<'a>(entries: &'a [(String, Node)], key: &str) -> Option<&'a Node> {
    entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn invalid(arg: &Node) -> anyhow::Error {
    CfnPlusError::invalid_template(format!("Invalid argument for Aruba::LambdaCode: {:?}", arg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore_demo::InMemoryObjectStore;
    use crate::provisioner::NullProvisionerClient;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn packages_directory_and_schedules_upload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("h.js"), b"hi").unwrap();
        let template_path = dir.path().join("template.yaml");

        let store = Arc::new(InMemoryObjectStore::new());
        store.create_bucket("b", true);
        let ctx = Context::new(
            HashMap::new(),
            None,
            Some(template_path.to_string_lossy().to_string()),
            None,
            Arc::new(|_, _| Box::pin(async { unreachable!() })),
            store,
            Arc::new(NullProvisionerClient),
        );

        let arg = Node::mapping(vec![
            ("LocalPath", Node::string(".")),
            ("S3Dest", Node::string("s3://b/p")),
        ]);
        let result = evaluate(&arg, &ctx).await.unwrap();
        let (key, value) = result.replacement.unwrap();
        assert_eq!(key, "Code");
        assert_eq!(value.get("S3Bucket").unwrap().as_str(), Some("b"));
        let s3_key = value.get("S3Key").unwrap().as_str().unwrap();
        assert!(s3_key.starts_with("p/"));
        assert_eq!(result.before.len(), 1);
    }
}
