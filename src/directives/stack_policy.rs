//! `Aruba::StackPolicy`: installs the given mapping as the stack policy
//! once the stack has been created or updated.

use anyhow::Result;

use crate::context::Context;
use crate::document::Node;
use crate::error::CfnPlusError;
use crate::objectstore::Action;

use super::TagResult;

pub async fn evaluate(arg: &Node, ctx: &Context) -> Result<TagResult> {
    if !arg.is_mapping() {
        return Err(CfnPlusError::invalid_template("Aruba::StackPolicy: must contain mapping"));
    }
    let stack_name = ctx
        .stack_name
        .clone()
        .ok_or_else(|| CfnPlusError::invalid_template("Aruba::StackPolicy: stack name is unknown"))?;

    let policy_json = crate::document::yaml::dump_json(arg)?;

    let mut result = TagResult::delete();
    result.after.push(Action::SetStackPolicy { stack_name, policy_json });
    Ok(result)
}
