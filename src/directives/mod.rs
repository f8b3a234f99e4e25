//! The closed set of directive handlers. Each handler matches one
//! `Aruba::*` name, either as a mapping key (a "tag") evaluated during pass
//! 1, or as a resource `Type` evaluated during pass 2.

mod before_after;
mod bootstrap_actions;
mod lambda_code;
mod stack_policy;
mod substack;

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;

use crate::context::Context;
use crate::document::Node;
use crate::objectstore::Action;

/// What a tag handler (pass 1) produces: an optional `(key, value)`
/// replacement for the matched entry (`None` deletes it), the before/after
/// actions it scheduled, and — only `BootstrapActions` ever sets this — the
/// `CreationPolicy.ResourceSignal.Timeout` value to install on the
/// enclosing resource. Bubbling the timeout up through the return value
/// rather than mutating a shared resource node in place avoids holding two
/// live mutable borrows into the same tree during recursion.
#[derive(Default, Debug)]
pub struct TagResult {
    pub replacement: Option<(String, Node)>,
    pub before: Vec<Action>,
    pub after: Vec<Action>,
    pub creation_policy_timeout: Option<Node>,
}

impl TagResult {
    pub fn replace(key: impl Into<String>, value: Node) -> Self {
        TagResult { replacement: Some((key.into(), value)), ..Default::default() }
    }

    pub fn delete() -> Self {
        TagResult::default()
    }
}

/// What a resource-type handler (pass 2) produces: the resource's
/// replacement (`None` deletes the resource) plus scheduled actions.
#[derive(Default)]
pub struct ResourceResult {
    pub replacement: Option<Node>,
    pub before: Vec<Action>,
    pub after: Vec<Action>,
}

type TagFuture<'a> = Pin<Box<dyn Future<Output = Result<TagResult>> + Send + 'a>>;
type ResourceFuture<'a> = Pin<Box<dyn Future<Output = Result<ResourceResult>> + Send + 'a>>;

/// Dispatch a mapping-key directive by name. `None` means `name` is not a
/// registered tag.
pub fn dispatch_tag<'a>(name: &str, arg: &'a Node, ctx: &'a Context) -> Option<TagFuture<'a>> {
    match name {
        "Aruba::LambdaCode" => Some(Box::pin(lambda_code::evaluate(arg, ctx))),
        "Aruba::BeforeCreation" => {
            Some(Box::pin(before_after::evaluate(before_after::Phase::Before, arg, ctx)))
        }
        "Aruba::AfterCreation" => {
            Some(Box::pin(before_after::evaluate(before_after::Phase::After, arg, ctx)))
        }
        "Aruba::BootstrapActions" => Some(Box::pin(bootstrap_actions::evaluate(arg, ctx))),
        "Aruba::StackPolicy" => Some(Box::pin(stack_policy::evaluate(arg, ctx))),
        _ => None,
    }
}

/// Dispatch a resource-type directive by its `Type` value. `None` means
/// `type_name` is not a registered resource directive.
pub fn dispatch_resource<'a>(
    type_name: &str,
    resource: &'a Node,
    ctx: &'a Context,
) -> Option<ResourceFuture<'a>> {
    match type_name {
        "Aruba::Stack" => Some(Box::pin(substack::evaluate(resource, ctx))),
        _ => None,
    }
}
