//! `Aruba::Stack`: imports another template, recursively evaluates its
//! directives under an "imported" context, uploads the rewritten result,
//! and replaces the resource with a native `AWS::CloudFormation::Stack`.

use anyhow::Result;

use crate::context::Context;
use crate::document::{yaml, Node};
use crate::error::CfnPlusError;
use crate::expr::eval_expr;
use crate::expr::eval_expr_as_string;
use crate::hash::sha1_hex;
use crate::objectstore::{parse_s3_uri, Action};

use super::ResourceResult;

pub async fn evaluate(resource: &Node, ctx: &Context) -> Result<ResourceResult> {
    if ctx.template_is_imported {
        return Err(CfnPlusError::invalid_template(
            "Cannot have imported template in imported template",
        ));
    }

    let props = resource.get("Properties").ok_or_else(|| invalid(resource))?;
    let template_node = props.get("Template").ok_or_else(|| invalid(resource))?;
    let local_path_node = template_node.get("LocalPath").ok_or_else(|| invalid(resource))?;
    let s3_dest_node = template_node.get("S3Dest").ok_or_else(|| invalid(resource))?;
    let params_node = props.get("Parameters");

    let local_path = eval_expr_as_string(local_path_node, ctx).await?;
    let s3_dest = eval_expr_as_string(s3_dest_node, ctx).await?;
    let (s3_bucket, s3_dir_key) = parse_s3_uri(&s3_dest)?;

    // Best-effort resolution of Parameters against the outer context:
    // entries that fail to resolve are left for the provisioner.
    let mut inner_ctx = ctx.clone();
    if let Some(Node::Mapping(params)) = params_node {
        for (name, value_node) in params {
            if let Ok(value) = eval_expr(value_node, ctx).await {
                inner_ctx.set_var(name.clone(), value);
            }
        }
    }

    let template_abs_path = ctx.abspath(&local_path)?;
    let imported_template_str = std::fs::read_to_string(&template_abs_path)
        .map_err(|e| anyhow::anyhow!("reading {}: {}", template_abs_path.display(), e))?;

    inner_ctx.template_is_imported = true;
    inner_ctx.template_path = Some(template_abs_path.to_string_lossy().to_string());
    inner_ctx.stack_name = None;

    let cache_key = inner_ctx.cache_key(&imported_template_str);
    let (rewritten_text, sub_before, sub_after) =
        if let Some(cached) = ctx.sub_template_cache.get(&cache_key) {
            (cached.clone(), Vec::new(), Vec::new())
        } else {
            tracing::debug!(path = %template_abs_path.display(), "Evaluating directives in imported template");
            let sub_result = (ctx.process_fn)(imported_template_str, inner_ctx.clone()).await?;
            let text = yaml::dump(&sub_result.document)?;
            ctx.sub_template_cache.insert(cache_key, text.clone());
            (text, sub_result.before, sub_result.after)
        };

    let s3_key = format!("{}/{}", s3_dir_key, sha1_hex(rewritten_text.as_bytes()));
    let region = ctx.region.as_deref().unwrap_or("us-east-1");
    let template_url = format!("https://s3-{}.amazonaws.com/{}/{}", region, s3_bucket, s3_key);

    let mut properties = vec![("TemplateURL".to_string(), Node::String(template_url))];
    if let Some(params) = params_node {
        properties.push(("Parameters".to_string(), params.clone()));
    }
    let cfn_resource = Node::mapping(vec![
        ("Type", Node::string("AWS::CloudFormation::Stack")),
        ("Properties", Node::Mapping(properties)),
    ]);

    let mut before = vec![Action::UploadObject {
        bucket: s3_bucket,
        key: s3_key,
        content: rewritten_text.into_bytes(),
    }];
    before.extend(sub_before);

    Ok(ResourceResult { replacement: Some(cfn_resource), before, after: sub_after })
}

fn invalid(resource: &Node) -> anyhow::Error {
    CfnPlusError::invalid_template(format!("Invalid argument for Aruba::Stack: {:?}", resource))
}
