//! The embedded expression sub-language: `Ref`, `Fn::Sub`, `Fn::ImportValue`,
//! and `${NAME}` string interpolation.

use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;

use crate::context::Context;
use crate::document::Node;
use crate::error::CfnPlusError;

fn interpolation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([-.:_0-9a-zA-Z]*)\}").unwrap())
}

/// Evaluate any node to a scalar. Scalars pass through; a single-entry
/// mapping keyed by `Ref`/`Fn::Sub`/`Fn::ImportValue` is dispatched to its
/// handler; any other shape is an error here (document-rewriting code is
/// responsible for leaving non-expression mappings alone before calling
/// this).
pub async fn eval_expr(node: &Node, ctx: &Context) -> Result<Node> {
    match node {
        Node::String(_) | Node::Int(_) | Node::Float(_) | Node::Bool(_) | Node::Null => {
            Ok(node.clone())
        }
        Node::Mapping(_) => {
            let (func_name, func_arg) = node.single_entry().ok_or_else(|| {
                CfnPlusError::invalid_template(format!(
                    "Invalid scalar expression: {:?}",
                    node
                ))
            })?;
            match func_name {
                "Ref" => eval_ref(func_arg, ctx),
                "Fn::Sub" => Box::pin(eval_sub(func_arg, ctx)).await,
                "Fn::ImportValue" => eval_import_value(func_arg, ctx).await,
                other => Err(CfnPlusError::invalid_template(format!(
                    "Unknown function: {}",
                    other
                ))),
            }
        }
        Node::Sequence(_) => Err(CfnPlusError::invalid_template(format!(
            "Invalid scalar expression: {:?}",
            node
        ))),
    }
}

/// Convenience wrapper that also renders the resulting scalar as a string,
/// as every directive handler that consumes a URI or path needs to.
pub async fn eval_expr_as_string(node: &Node, ctx: &Context) -> Result<String> {
    let value = Box::pin(eval_expr(node, ctx)).await?;
    value
        .stringify_scalar()
        .ok_or_else(|| CfnPlusError::invalid_template(format!("Expected a scalar, got {:?}", value)))
}

fn eval_ref(node: &Node, ctx: &Context) -> Result<Node> {
    let name = node
        .as_str()
        .ok_or_else(|| CfnPlusError::invalid_template(format!("Invalid arg for 'Ref': {:?}", node)))?;
    ctx.resolve_var(name)
}

async fn eval_import_value(node: &Node, ctx: &Context) -> Result<Node> {
    let export_name = eval_expr_as_string(node, ctx).await?;
    let value = ctx
        .provisioner
        .resolve_export(&export_name)
        .await?
        .ok_or_else(|| {
            CfnPlusError::invalid_template(format!(
                "No such CloudFormation export: {}",
                export_name
            ))
        })?;
    Ok(Node::String(value))
}

async fn eval_sub(node: &Node, ctx: &Context) -> Result<Node> {
    // Normalise the string form to the 2-sequence form.
    let (format_node, locals_node) = match node {
        Node::String(_) => (node.clone(), Node::Mapping(vec![])),
        Node::Sequence(items) if items.len() == 2 => (items[0].clone(), items[1].clone()),
        _ => {
            return Err(CfnPlusError::invalid_template(format!(
                "Invalid arg for 'Fn::Sub': {:?}",
                node
            )))
        }
    };

    let format_str = format_node.as_str().ok_or_else(|| {
        CfnPlusError::invalid_template(format!("Invalid arg for 'Fn::Sub': {:?}", node))
    })?;
    let locals = locals_node.as_mapping().ok_or_else(|| {
        CfnPlusError::invalid_template(format!("Invalid arg for 'Fn::Sub': {:?}", node))
    })?;

    // Evaluate local bindings against the *outer* context, then push them
    // onto a copy before interpolating the format string.
    let mut inner_ctx = ctx.clone();
    for (k, v) in locals {
        let value = Box::pin(eval_expr(v, ctx)).await?;
        inner_ctx.set_var(k.clone(), value);
    }

    interpolate(format_str, &inner_ctx)
}

/// Substitute every `${NAME}` occurrence in `format_str` against `ctx`.
/// Literal `$` without a following `{...}` is copied verbatim.
pub fn interpolate(format_str: &str, ctx: &Context) -> Result<Node> {
    let re = interpolation_regex();
    let mut result = String::new();
    let mut pos = 0;

    for caps in re.captures_iter(format_str) {
        let whole = caps.get(0).unwrap();
        if whole.start() < pos {
            continue;
        }
        let var_name = &caps[1];
        let value = ctx.resolve_var(var_name)?;
        let rendered = value.stringify_scalar().ok_or_else(|| {
            CfnPlusError::invalid_template(format!(
                "Variable \"{}\" does not resolve to a scalar",
                var_name
            ))
        })?;

        result.push_str(&format_str[pos..whole.start()]);
        result.push_str(&rendered);
        pos = whole.end();
    }
    result.push_str(&format_str[pos..]);
    Ok(Node::String(result))
}
