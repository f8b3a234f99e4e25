//! The two-pass template processor: discovers directive nodes, invokes
//! their handlers, and aggregates the rewritten document with the
//! accumulated action lists.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;

use crate::context::{Context, ProcessFn};
use crate::directives;
use crate::document::{yaml, Node};
use crate::error::{self, CfnPlusError};
use crate::objectstore::{Action, ObjectStoreClient};
use crate::provisioner::ProvisionerClient;

/// One caller-supplied template parameter, mirroring the
/// `ParameterKey`/`ParameterValue`/`UsePreviousValue` triple the
/// provisioner's `create-stack`/`update-stack` calls accept.
pub struct ParamInput {
    pub key: String,
    pub value: Option<String>,
    pub use_previous_value: bool,
}

/// Looks up a parameter's value on a previously-deployed stack. The real
/// provisioner client would answer this from `DescribeStacks`; the
/// demonstration CLI has no persisted stack state, so this is the seam a
/// caller plugs in to support `--use-previous-value`.
pub trait PreviousParamLookup: Send + Sync {
    fn previous_value(&self, key: &str) -> Option<String>;
}

/// A lookup that never has a previous stack — `UsePreviousValue` always
/// fails with `InvalidArgument`, matching the "no existing stack" case.
pub struct NoPreviousStack;

impl PreviousParamLookup for NoPreviousStack {
    fn previous_value(&self, _key: &str) -> Option<String> {
        None
    }
}

/// The rewritten document plus the two accumulated action lists, ready to
/// be handed to a [`crate::transaction::TransactionDriver`].
#[derive(Debug)]
pub struct TemplateResult {
    pub document: Node,
    pub before: Vec<Action>,
    pub after: Vec<Action>,
}

fn build_param_dict(
    params: &[ParamInput],
    previous: &dyn PreviousParamLookup,
    has_existing_stack: bool,
) -> Result<HashMap<String, Node>> {
    let mut dict = HashMap::new();
    for param in params {
        let value = if param.use_previous_value {
            if param.value.is_some() {
                return Err(CfnPlusError::invalid_argument(
                    "Param value given but also told to use previous value",
                ));
            }
            if !has_existing_stack {
                return Err(CfnPlusError::invalid_argument(
                    "Told to use prev param value but there is no existing stack",
                ));
            }
            previous.previous_value(&param.key).ok_or_else(|| {
                CfnPlusError::invalid_argument(format!("Existing stack has no param \"{}\"", param.key))
            })?
        } else {
            param
                .value
                .clone()
                .ok_or_else(|| CfnPlusError::invalid_argument(format!("No value for param \"{}\"", param.key)))?
        };
        dict.insert(param.key.clone(), Node::String(value));
    }
    Ok(dict)
}

/// Top-level entry point: evaluate every directive in `template_str` and
/// return the rewritten document plus before/after action lists.
#[allow(clippy::too_many_arguments)]
pub async fn process_template(
    template_str: &str,
    params: &[ParamInput],
    region: Option<String>,
    template_path: Option<String>,
    stack_name: Option<String>,
    previous: &dyn PreviousParamLookup,
    has_existing_stack: bool,
    object_store: Arc<dyn ObjectStoreClient>,
    provisioner: Arc<dyn ProvisionerClient>,
) -> Result<TemplateResult> {
    let symbols = build_param_dict(params, previous, has_existing_stack)?;
    let process_fn: ProcessFn = Arc::new(|text, ctx| Box::pin(process_recursive(text, ctx)));
    let ctx = Context::new(symbols, region, template_path, stack_name, process_fn, object_store, provisioner);
    process_recursive(template_str.to_string(), ctx).await
}

async fn process_recursive(template_str: String, ctx: Context) -> Result<TemplateResult> {
    let run = async {
        let mut document = yaml::parse(&template_str)?;
        let (before1, after1) = pass1(&mut document, &ctx).await?;
        let (mut before2, mut after2) = pass2(&mut document, &ctx).await?;
        before2.extend(before1);
        after2.extend(after1);
        Ok(TemplateResult { document, before: before2, after: after2 })
    };
    run.await.map_err(|e| error::with_template_basename(e, ctx.template_path.as_deref()))
}

/// Accumulates output from a single pass-1 descent: scheduled actions, and
/// — only ever set by `BootstrapActions` — the `CreationPolicy` timeout to
/// install on the resource whose subtree is currently being walked.
#[derive(Default)]
struct TagOutcome {
    before: Vec<Action>,
    after: Vec<Action>,
    creation_policy_timeout: Option<Node>,
}

async fn pass1(document: &mut Node, ctx: &Context) -> Result<(Vec<Action>, Vec<Action>)> {
    let mut before = Vec::new();
    let mut after = Vec::new();

    if let Some(Node::Mapping(metadata_entries)) = document.get("Metadata").cloned() {
        let mut outcome = TagOutcome::default();
        let rewritten = walk_mapping(metadata_entries, ctx, &mut outcome).await?;
        replace_field(document, "Metadata", Node::Mapping(rewritten));
        before.extend(outcome.before);
        after.extend(outcome.after);
    }

    if let Some(Node::Mapping(resources)) = document.get("Resources").cloned() {
        let mut new_resources = Vec::with_capacity(resources.len());
        for (resource_name, resource_node) in resources {
            let mut resource_ctx = ctx.clone();
            resource_ctx.resource_name = Some(resource_name.clone());

            let Node::Mapping(resource_entries) = resource_node else {
                new_resources.push((resource_name, resource_node));
                continue;
            };

            let mut outcome = TagOutcome::default();
            let mut rewritten_entries = walk_mapping(resource_entries, &resource_ctx, &mut outcome).await?;
            if let Some(timeout) = outcome.creation_policy_timeout {
                rewritten_entries.push((
                    "CreationPolicy".to_string(),
                    Node::mapping(vec![("ResourceSignal", Node::mapping(vec![("Timeout", timeout)]))]),
                ));
            }
            before.extend(outcome.before);
            after.extend(outcome.after);
            new_resources.push((resource_name, Node::Mapping(rewritten_entries)));
        }
        replace_field(document, "Resources", Node::Mapping(new_resources));
    }

    Ok((before, after))
}

/// Recurses into every nested mapping looking for directive-named keys.
/// Matches at any depth, but a matched key's own subtree is never
/// descended into — and sequences are never descended into at all, which
/// is why `BeforeCreation`/`AfterCreation`'s action lists (themselves
/// sequences) are walked by their own handler instead of this generic
/// recursion.
fn walk_mapping<'a>(
    entries: Vec<(String, Node)>,
    ctx: &'a Context,
    out: &'a mut TagOutcome,
) -> Pin<Box<dyn Future<Output = Result<Vec<(String, Node)>>> + Send + 'a>> {
    Box::pin(async move {
        let mut result = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let dispatched = if let Some(future) = directives::dispatch_tag(&key, &value, ctx) {
                Some(future.await?)
            } else {
                None
            };
            if let Some(tag_result) = dispatched {
                out.before.extend(tag_result.before);
                out.after.extend(tag_result.after);
                if tag_result.creation_policy_timeout.is_some() {
                    out.creation_policy_timeout = tag_result.creation_policy_timeout;
                }
                if let Some((new_key, new_value)) = tag_result.replacement {
                    result.push((new_key, new_value));
                }
            } else if let Node::Mapping(child_entries) = value {
                let rewritten = walk_mapping(child_entries, ctx, out).await?;
                result.push((key, Node::Mapping(rewritten)));
            } else {
                result.push((key, value));
            }
        }
        Ok(result)
    })
}

async fn pass2(document: &mut Node, ctx: &Context) -> Result<(Vec<Action>, Vec<Action>)> {
    let mut before = Vec::new();
    let mut after = Vec::new();

    let Some(Node::Mapping(resources)) = document.get("Resources").cloned() else {
        return Ok((before, after));
    };

    let mut new_resources = Vec::with_capacity(resources.len());
    for (name, resource) in resources {
        let type_name = resource.get("Type").and_then(Node::as_str).unwrap_or("");
        let dispatched = if let Some(future) = directives::dispatch_resource(type_name, &resource, ctx) {
            Some(future.await?)
        } else {
            None
        };
        match dispatched {
            Some(result) => {
                before.extend(result.before);
                after.extend(result.after);
                if let Some(replacement) = result.replacement {
                    new_resources.push((name, replacement));
                }
            }
            None => new_resources.push((name, resource)),
        }
    }
    replace_field(document, "Resources", Node::Mapping(new_resources));
    Ok((before, after))
}

fn replace_field(doc: &mut Node, key: &str, value: Node) {
    if let Some(entries) = doc.as_mapping_mut() {
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key.to_string(), value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore_demo::InMemoryObjectStore;
    use crate::provisioner::NullProvisionerClient;

    fn no_previous() -> NoPreviousStack {
        NoPreviousStack
    }

    #[tokio::test]
    async fn strips_directive_keys_and_rewrites_lambda_code() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("h.js"), b"hi").unwrap();
        let template_path = dir.path().join("template.yaml");

        let template = format!(
            "Resources:\n  Fn:\n    Type: AWS::Lambda::Function\n    Properties:\n      Aruba::LambdaCode:\n        LocalPath: .\n        S3Dest: s3://b/p\n"
        );

        let mem_store = Arc::new(InMemoryObjectStore::new());
        mem_store.create_bucket("b", true);

        let result = process_template(
            &template,
            &[],
            None,
            Some(template_path.to_string_lossy().to_string()),
            None,
            &no_previous(),
            false,
            mem_store,
            Arc::new(NullProvisionerClient),
        )
        .await
        .unwrap();

        let code = result
            .document
            .get("Resources")
            .unwrap()
            .get("Fn")
            .unwrap()
            .get("Properties")
            .unwrap()
            .get("Code")
            .unwrap();
        assert!(code.get("S3Bucket").is_some());
        assert_eq!(result.before.len(), 1);
    }
}
