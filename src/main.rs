use std::collections::HashMap;
use std::sync::Arc;

/// Reset SIGPIPE to default behavior so piping (e.g. `cfn-plus process t.yaml | less`)
/// exits cleanly instead of panicking on broken pipe.
#[cfg(unix)]
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cfn_plus::context::{Context as TemplateContext, ProcessFn};
use cfn_plus::objectstore_demo::FsObjectStore;
use cfn_plus::output::formatter;
use cfn_plus::processor::{process_template, NoPreviousStack, ParamInput, PreviousParamLookup};
use cfn_plus::provisioner::NullProvisionerClient;
use cfn_plus::transaction::TransactionDriver;

/// cfn-plus - Transactional CloudFormation template preprocessor
#[derive(Parser)]
#[command(name = "cfn-plus", version, about, long_about = None)]
struct Cli {
    /// Number of times to repeat for more verbose logging (info, then debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a template's directives and print the rewritten document
    /// plus the scheduled S3 action plan.
    Process {
        /// Path to the template file
        template: String,

        /// Target AWS region (used for `AWS::Region` and TemplateURL hosts)
        #[arg(long)]
        region: Option<String>,

        /// Name of the stack being processed (used for `AWS::StackName` and
        /// `Aruba::StackPolicy`)
        #[arg(long)]
        stack_name: Option<String>,

        /// A template parameter as KEY=VALUE; may be repeated
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Reuse a previous deployment's value for this parameter key; may
        /// be repeated. Fails if there is no existing stack.
        #[arg(long = "use-previous-value")]
        use_previous_value: Vec<String>,

        /// Actually run the scheduled actions against the local
        /// demonstration object store instead of only printing the plan
        #[arg(long)]
        apply: bool,

        /// Directory the demonstration object store persists blobs/index
        /// under, when `--apply` is given
        #[arg(long, default_value = ".cfn-plus/objectstore")]
        object_store_dir: String,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => Err(format!("expected KEY=VALUE, got \"{}\"", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    #[cfg(unix)]
    reset_sigpipe();

    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Process {
            template,
            region,
            stack_name,
            params,
            use_previous_value,
            apply,
            object_store_dir,
        } => run_process(template, region, stack_name, params, use_previous_value, apply, object_store_dir).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_process(
    template_path: String,
    region: Option<String>,
    stack_name: Option<String>,
    params: Vec<(String, String)>,
    use_previous_value: Vec<String>,
    apply: bool,
    object_store_dir: String,
) -> Result<()> {
    let template_str = std::fs::read_to_string(&template_path)
        .with_context(|| format!("reading template {}", template_path))?;
    let abs_template_path = std::fs::canonicalize(&template_path)
        .with_context(|| format!("resolving path to {}", template_path))?;

    let mut param_inputs: Vec<ParamInput> = params
        .into_iter()
        .map(|(key, value)| ParamInput { key, value: Some(value), use_previous_value: false })
        .collect();
    param_inputs.extend(use_previous_value.into_iter().map(|key| ParamInput {
        key,
        value: None,
        use_previous_value: true,
    }));

    let previous: Box<dyn PreviousParamLookup> = Box::new(NoPreviousStack);

    if apply {
        let store = Arc::new(
            FsObjectStore::open(&object_store_dir)
                .await
                .with_context(|| format!("opening object store at {}", object_store_dir))?,
        );
        let result = process_template(
            &template_str,
            &param_inputs,
            region,
            Some(abs_template_path.to_string_lossy().to_string()),
            stack_name,
            previous.as_ref(),
            false,
            store.clone(),
            Arc::new(NullProvisionerClient),
        )
        .await?;

        formatter::print_document(&result.document)?;
        formatter::print_action_plan(&result.before, &result.after);

        let mut driver = TransactionDriver::new(result.before, result.after);
        let ctx = apply_context(store);
        match driver.do_before(&ctx).await {
            Ok(()) => {
                driver.do_after(&ctx).await?;
                driver.finish(&ctx).await;
                formatter::print_success("Actions applied.");
            }
            Err(err) => {
                driver.finish(&ctx).await;
                formatter::print_error(&format!("Action failed, rolled back: {}", err));
                bail!(err);
            }
        }
    } else {
        let result = process_template(
            &template_str,
            &param_inputs,
            region,
            Some(abs_template_path.to_string_lossy().to_string()),
            stack_name,
            previous.as_ref(),
            false,
            Arc::new(cfn_plus::objectstore_demo::InMemoryObjectStore::new()),
            Arc::new(NullProvisionerClient),
        )
        .await?;

        formatter::print_document(&result.document)?;
        formatter::print_action_plan(&result.before, &result.after);
    }

    Ok(())
}

/// A throwaway `Context` used only to thread the object-store/provisioner
/// clients through `TransactionDriver` — it carries no template state.
fn apply_context(store: Arc<FsObjectStore>) -> TemplateContext {
    let process_fn: ProcessFn = Arc::new(|_, _| Box::pin(async { unreachable!("driver never recurses") }));
    TemplateContext::new(HashMap::new(), None, None, None, process_fn, store, Arc::new(NullProvisionerClient))
}
