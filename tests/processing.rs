//! End-to-end coverage of the two-pass processor and the transactional
//! driver, combining directive handlers the way a real template would.

use std::collections::HashMap;
use std::sync::Arc;

use cfn_plus::objectstore_demo::InMemoryObjectStore;
use cfn_plus::processor::{process_template, NoPreviousStack, ParamInput};
use cfn_plus::provisioner::NullProvisionerClient;
use cfn_plus::transaction::TransactionDriver;
use cfn_plus::Context;

fn store_with_bucket(bucket: &str, versioned: bool) -> Arc<InMemoryObjectStore> {
    let store = Arc::new(InMemoryObjectStore::new());
    store.create_bucket(bucket, versioned);
    store
}

#[tokio::test]
async fn lambda_code_under_metadata_produces_canonical_key_and_one_upload() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("h.js"), b"hi").unwrap();
    let template_path = dir.path().join("template.yaml");

    let template = "\
Metadata:
  Aruba::LambdaCode:
    LocalPath: .
    S3Dest: s3://b/p
Resources:
  Noop:
    Type: AWS::SNS::Topic
";

    let store = store_with_bucket("b", true);
    let result = process_template(
        template,
        &[],
        None,
        Some(template_path.to_string_lossy().to_string()),
        None,
        &NoPreviousStack,
        false,
        store,
        Arc::new(NullProvisionerClient),
    )
    .await
    .unwrap();

    let code = result.document.get("Metadata").unwrap().get("Code").unwrap();
    assert_eq!(code.get("S3Bucket").unwrap().as_str(), Some("b"));
    assert!(code.get("S3Key").unwrap().as_str().unwrap().starts_with("p/"));
    assert_eq!(result.before.len(), 1);
}

#[tokio::test]
async fn bootstrap_actions_installs_creation_policy_and_user_data() {
    let dir = tempfile::tempdir().unwrap();
    let template_path = dir.path().join("template.yaml");

    let template = "\
Resources:
  Server:
    Type: AWS::AutoScaling::LaunchConfiguration
    Properties:
      Aruba::BootstrapActions:
        Actions:
          - Path: s3://b/k.sh
            Args: [\"x\"]
        Timeout: PT10M
";

    let store = store_with_bucket("b", true);
    let result = process_template(
        template,
        &[],
        None,
        Some(template_path.to_string_lossy().to_string()),
        None,
        &NoPreviousStack,
        false,
        store,
        Arc::new(NullProvisionerClient),
    )
    .await
    .unwrap();

    let server = result.document.get("Resources").unwrap().get("Server").unwrap();
    let timeout = server
        .get("CreationPolicy")
        .unwrap()
        .get("ResourceSignal")
        .unwrap()
        .get("Timeout")
        .unwrap();
    assert_eq!(timeout.as_str(), Some("PT10M"));
    assert!(server.get("Properties").unwrap().get("UserData").is_some());
    assert!(server.get("Properties").unwrap().get("Aruba::BootstrapActions").is_none());
}

#[tokio::test]
async fn identical_substacks_produce_identical_template_urls() {
    let dir = tempfile::tempdir().unwrap();
    let inner_path = dir.path().join("inner.yaml");
    std::fs::write(&inner_path, "Resources:\n  Noop:\n    Type: AWS::SNS::Topic\n").unwrap();
    let template_path = dir.path().join("outer.yaml");

    let template = "\
Resources:
  First:
    Type: Aruba::Stack
    Properties:
      Template:
        LocalPath: inner.yaml
        S3Dest: s3://b/sub
  Second:
    Type: Aruba::Stack
    Properties:
      Template:
        LocalPath: inner.yaml
        S3Dest: s3://b/sub
";

    let store = store_with_bucket("b", true);
    let result = process_template(
        template,
        &[],
        None,
        Some(template_path.to_string_lossy().to_string()),
        None,
        &NoPreviousStack,
        false,
        store,
        Arc::new(NullProvisionerClient),
    )
    .await
    .unwrap();

    let resources = result.document.get("Resources").unwrap();
    let url_of = |name: &str| {
        resources
            .get(name)
            .unwrap()
            .get("Properties")
            .unwrap()
            .get("TemplateURL")
            .unwrap()
            .as_str()
            .unwrap()
            .to_string()
    };
    assert_eq!(url_of("First"), url_of("Second"));
    // One upload action per occurrence, both for the same content-addressed key.
    assert_eq!(result.before.len(), 2);
}

#[tokio::test]
async fn before_creation_forbidden_inside_an_imported_template() {
    let dir = tempfile::tempdir().unwrap();
    let inner_path = dir.path().join("inner.yaml");
    std::fs::write(
        &inner_path,
        "Resources:\n  Noop:\n    Aruba::BeforeCreation:\n      - S3Mkdir: s3://b/dir\n    Type: AWS::SNS::Topic\n",
    )
    .unwrap();
    let template_path = dir.path().join("outer.yaml");

    let template = "\
Resources:
  Sub:
    Type: Aruba::Stack
    Properties:
      Template:
        LocalPath: inner.yaml
        S3Dest: s3://b/sub
";

    let store = store_with_bucket("b", true);
    let err = process_template(
        template,
        &[],
        None,
        Some(template_path.to_string_lossy().to_string()),
        None,
        &NoPreviousStack,
        false,
        store,
        Arc::new(NullProvisionerClient),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Actions are not allowed"));
}

#[tokio::test]
async fn stack_policy_without_stack_name_fails() {
    let dir = tempfile::tempdir().unwrap();
    let template_path = dir.path().join("template.yaml");
    let template = "\
Metadata:
  Aruba::StackPolicy:
    Statement: []
";

    let store = store_with_bucket("b", true);
    let err = process_template(
        template,
        &[],
        None,
        Some(template_path.to_string_lossy().to_string()),
        None, // no stack_name
        &NoPreviousStack,
        false,
        store,
        Arc::new(NullProvisionerClient),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("stack name is unknown"));
}

#[tokio::test]
async fn use_previous_value_without_existing_stack_is_invalid_argument() {
    let dir = tempfile::tempdir().unwrap();
    let template_path = dir.path().join("template.yaml");
    let params = vec![ParamInput { key: "Env".to_string(), value: None, use_previous_value: true }];

    let store = store_with_bucket("b", true);
    let err = process_template(
        "Resources: {}",
        &params,
        None,
        Some(template_path.to_string_lossy().to_string()),
        None,
        &NoPreviousStack,
        false, // no existing stack
        store,
        Arc::new(NullProvisionerClient),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("no existing stack"));
}

#[tokio::test]
async fn failed_before_phase_rolls_back_earlier_uploads_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ok.txt"), b"payload").unwrap();
    std::fs::write(dir.path().join("other.txt"), b"payload2").unwrap();
    let template_path = dir.path().join("template.yaml");

    // Both local files exist, so template processing itself succeeds; the
    // second upload's destination bucket doesn't exist, so do_before fails
    // at action-execution time, after the first upload has already landed.
    let template = "\
Resources:
  Noop:
    Type: AWS::SNS::Topic
    Metadata:
      Aruba::BeforeCreation:
        - S3Upload:
            LocalFile: ok.txt
            S3Dest: s3://b/ok.txt
        - S3Upload:
            LocalFile: other.txt
            S3Dest: s3://no-such-bucket/other.txt
";

    let store = store_with_bucket("b", true);
    let result = process_template(
        template,
        &[],
        None,
        Some(template_path.to_string_lossy().to_string()),
        None,
        &NoPreviousStack,
        false,
        store.clone(),
        Arc::new(NullProvisionerClient),
    )
    .await
    .unwrap();
    assert_eq!(result.before.len(), 2);

    let process_fn: cfn_plus::context::ProcessFn =
        Arc::new(|_, _| Box::pin(async { unreachable!("driver never recurses") }));
    let ctx = Context::new(
        HashMap::new(),
        None,
        None,
        None,
        process_fn,
        store.clone(),
        Arc::new(NullProvisionerClient),
    );

    let mut driver = TransactionDriver::new(result.before, result.after);
    let before_result = driver.do_before(&ctx).await;
    assert!(before_result.is_err());
    driver.finish(&ctx).await;

    assert!(store.current_body("b", "ok.txt").is_none());
}
