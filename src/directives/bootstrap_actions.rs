//! `Aruba::BootstrapActions`: pure text synthesis of a `UserData` script
//! that fetches and runs a sequence of remote scripts, logs each step, and
//! signals the enclosing resource on completion. None of the directive's
//! own values are evaluated here — they stay as expressions for the
//! provisioner to substitute at instance-launch time via `Fn::Sub`.

use anyhow::Result;

use crate::context::Context;
use crate::document::Node;
use crate::error::CfnPlusError;

use super::TagResult;

const TAG_NAME: &str = "Aruba::BootstrapActions";

pub async fn evaluate(arg: &Node, ctx: &Context) -> Result<TagResult> {
    let entries = arg
        .as_mapping()
        .ok_or_else(|| CfnPlusError::invalid_template(format!("{}: must contain mapping", TAG_NAME)))?;

    let actions_node = find(entries, "Actions")
        .ok_or_else(|| CfnPlusError::invalid_template(format!("{}: missing 'Actions'", TAG_NAME)))?;
    let timeout_node = find(entries, "Timeout")
        .ok_or_else(|| CfnPlusError::invalid_template(format!("{}: missing 'Timeout'", TAG_NAME)))?;
    let log_uri_node = find(entries, "LogUri");

    let action_items = actions_node.as_sequence().ok_or_else(|| {
        CfnPlusError::invalid_template(format!("{}: 'Actions' must contain a sequence", TAG_NAME))
    })?;

    let mut cfn_subs: Vec<(String, Node)> = Vec::new();
    if let Some(log_uri) = log_uri_node {
        cfn_subs.push(("log_uri".to_string(), log_uri.clone()));
    }

    let mut go_body = String::new();
    for (i, action_node) in action_items.iter().enumerate() {
        let path_node = action_node.get("Path").ok_or_else(|| {
            CfnPlusError::invalid_template(format!("{}: an action is missing 'Path'", TAG_NAME))
        })?;
        cfn_subs.push((format!("s3_uri_{}", i), path_node.clone()));

        let mut args = Vec::new();
        if let Some(Node::Sequence(args_node)) = action_node.get("Args") {
            for (j, n) in args_node.iter().enumerate() {
                let placeholder = format!("arg_{}_{}", i, j);
                cfn_subs.push((placeholder.clone(), n.clone()));
                args.push(format!("\"${{{}}}\"", placeholder));
            }
        }

        go_body.push_str(&run_step_script(i, &args.join(" "), log_uri_node.is_some()));
    }

    let resource_name = ctx.resource_name.as_deref().unwrap_or("");
    let user_data_script = user_data_script(&go_body, resource_name, log_uri_node.is_some());

    let user_data_node = Node::mapping(vec![(
        "Fn::Base64",
        Node::mapping(vec![(
            "Fn::Sub",
            Node::Sequence(vec![Node::String(user_data_script), Node::Mapping(cfn_subs)]),
        )]),
    )]);

    let mut result = TagResult::replace("UserData", user_data_node);
    result.creation_policy_timeout = Some(timeout_node.clone());
    Ok(result)
}

fn run_step_script(action_nbr: usize, args: &str, has_log_uri: bool) -> String {
    let log_copy = if has_log_uri {
        format!(
            "    aws s3 cp --content-type text/plain \"${{!LOG_LOCAL_PATH}}\" \\\n        \"${{log_uri}}/{action_nbr}\"\n"
        )
    } else {
        String::new()
    };
    format!(
        "\n    LOG_LOCAL_PATH=\"/var/log/aruba-bootstrap/{action_nbr}\"\n    SCRIPT_LOCAL_PATH=\"/tmp/aruba-bootstrap/{action_nbr}\"\n\n    # run script\n    mkdir -p \"$(dirname ${{!SCRIPT_LOCAL_PATH}})\"\n    aws s3 cp \"${{s3_uri_{action_nbr}}}\" \"${{!SCRIPT_LOCAL_PATH}}\"\n    chmod +x \"${{!SCRIPT_LOCAL_PATH}}\"\n    sudo -u ec2-user \"${{!SCRIPT_LOCAL_PATH}}\" {args} > \\\n        \"${{!LOG_LOCAL_PATH}}\" 2>&1\n    EXIT_CODE=$?\n\n    # copy log to S3\n{log_copy}\n    if [ \"${{!EXIT_CODE}}\" -ne 0 ]; then\n        return 1\n    fi\n",
        action_nbr = action_nbr,
        args = args,
        log_copy = log_copy,
    )
}

fn user_data_script(go_body: &str, rsrc_name: &str, has_log_uri: bool) -> String {
    let log_upload = if has_log_uri {
        "\n# copy log to S3\naws s3 cp --content-type text/plain /var/log/aruba-bootstrap/main \\\n    \"${log_uri}/main\"\n"
    } else {
        ""
    };
    format!(
        "\n#!/bin/bash -x\n\nmkdir /var/log/aruba-bootstrap\nexec >/var/log/aruba-bootstrap/main 2>&1\n\nfunction go() {{\n    {go_body}\n}}\n\n# run steps\ngo\nEXIT_CODE=$?\n{log_upload}\n# notify CloudFormation of result\nyum install -y aws-cfn-bootstrap\n/opt/aws/bin/cfn-signal -e \"${{!EXIT_CODE}}\" --stack \"${{AWS::StackName}}\" \\\n    --resource \"{rsrc_name}\" --region \"${{AWS::Region}}\"\n",
        go_body = go_body,
        log_upload = log_upload,
        rsrc_name = rsrc_name,
    )
}

fn find<'a>(entries: &'a [(String, Node)], key: &str) -> Option<&'a Node> {
    entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore_demo::InMemoryObjectStore;
    use crate::provisioner::NullProvisionerClient;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn test_ctx(resource_name: &str) -> Context {
        let mut ctx = Context::new(
            HashMap::new(),
            None,
            None,
            None,
            Arc::new(|_, _| Box::pin(async { unreachable!() })),
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(NullProvisionerClient),
        );
        ctx.resource_name = Some(resource_name.to_string());
        ctx
    }

    #[tokio::test]
    async fn produces_user_data_and_creation_policy_timeout() {
        let ctx = test_ctx("R");
        let arg = Node::mapping(vec![
            (
                "Actions",
                Node::Sequence(vec![Node::mapping(vec![
                    ("Path", Node::string("s3://b/k.sh")),
                    ("Args", Node::Sequence(vec![Node::string("x")])),
                ])]),
            ),
            ("Timeout", Node::string("PT10M")),
        ]);

        let result = evaluate(&arg, &ctx).await.unwrap();
        assert_eq!(result.creation_policy_timeout, Some(Node::string("PT10M")));
        let (key, value) = result.replacement.unwrap();
        assert_eq!(key, "UserData");
        let sub = value.get("Fn::Base64").unwrap().get("Fn::Sub").unwrap();
        let script = sub.as_sequence().unwrap()[0].as_str().unwrap();
        assert!(script.contains("cfn-signal"));
        assert!(script.contains("--resource \"R\""));
        assert!(script.contains("s3_uri_0"));
    }
}
