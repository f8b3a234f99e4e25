//! Human-facing rendering of a processed template: the rewritten YAML
//! preview and the before/after action-plan summary, using a +/- symbol
//! legend like a create/destroy plan.

use colored::Colorize;

use crate::document::{yaml, Node};
use crate::objectstore::Action;

/// Print a success message.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

/// Print an error message.
pub fn print_error(msg: &str) {
    println!("{} {}", "✗".red().bold(), msg.red());
}

/// Print the rewritten template as YAML.
pub fn print_document(document: &Node) -> anyhow::Result<()> {
    println!("{}", yaml::dump(document)?);
    Ok(())
}

/// Print the scheduled before/after actions in a create/destroy-plan style.
/// `before` actions run ahead of the provisioner call, `after` actions run
/// once it has succeeded.
pub fn print_action_plan(before: &[Action], after: &[Action]) {
    if before.is_empty() && after.is_empty() {
        println!("{}", "No S3 actions scheduled.".green());
        return;
    }

    println!("cfn-plus will perform the following actions:");
    println!("  {} upload / create", "+".green().bold());
    println!("  {} delete", "-".red().bold());
    println!();

    if !before.is_empty() {
        println!("{}", "Before stack provisioning:".bold());
        for action in before {
            print_action(action);
        }
        println!();
    }

    if !after.is_empty() {
        println!("{}", "After stack provisioning:".bold());
        for action in after {
            print_action(action);
        }
        println!();
    }
}

fn print_action(action: &Action) {
    match action {
        Action::UploadObject { bucket, key, content } => {
            println!(
                "  {} s3://{}/{} ({} bytes)",
                "+".green().bold(),
                bucket,
                key,
                content.len()
            );
        }
        Action::DeleteObject { bucket, key } => {
            println!("  {} s3://{}/{}", "-".red().bold(), bucket, key);
        }
        Action::MakeDir { bucket, key } => {
            println!("  {} s3://{}/{} (directory marker)", "+".green().bold(), bucket, key);
        }
        Action::SetStackPolicy { stack_name, .. } => {
            println!("  {} stack policy on {}", "~".yellow().bold(), stack_name);
        }
    }
}
