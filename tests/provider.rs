use std::sync::Arc;

use juicefs_provider::testing::{ProviderTester, RecordingRunner, TestError};
use juicefs_provider::{JuiceFsProvider, ProviderError};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

fn tester(runner: &Arc<RecordingRunner>) -> ProviderTester<JuiceFsProvider> {
    ProviderTester::new(JuiceFsProvider::with_runner(runner.clone()))
}

fn format_config() -> Value {
    json!({
        "storage": "s3",
        "bucket": "https://bucket.s3.amazonaws.com/jfs",
        "metadata_uri": "redis://localhost/1",
        "storage_name": "myjfs",
        "force": true,
        "additional_params": ["--trash-days", "0"],
    })
}

#[test]
fn test_registered_types() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    assert_eq!(tester.resource_types(), vec!["juicefs_format"]);
    assert_eq!(tester.data_source_types(), vec!["juicefs_version"]);

    let schema = tester.schema();
    assert!(schema.provider.attributes.contains_key("juicefs_binary"));
    assert!(schema.resources["juicefs_format"].attributes["triggers"].force_new);
}

#[tokio::test]
async fn test_configure_runs_version_check() {
    let runner = Arc::new(RecordingRunner::new().with_output("juicefs version 1.2.3"));
    let tester = tester(&runner);

    assert_ok!(tester.configure(json!({})).await);
    let calls = runner.invocations();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args, vec!["--version"]);
    assert_eq!(calls[0].binary, None);
}

#[tokio::test]
async fn test_configure_failure_is_a_diagnostic() {
    let runner = Arc::new(RecordingRunner::new().with_output("juicefs version 1.2.3"));
    runner.push_failure(127, "juicefs: not found");
    let tester = tester(&runner);

    match assert_err!(tester.configure(json!({})).await) {
        TestError::Diagnostics(diags) => {
            assert_eq!(diags.len(), 1);
            assert_eq!(diags[0].summary, "Failed to run juicefs");
            assert!(diags[0].detail.as_deref().unwrap_or("").contains("juicefs: not found"));
        },
        other => panic!("unexpected error: {other}"),
    }

    // The provider keeps working after a failed self-check.
    let state = assert_ok!(tester.read_data_source("juicefs_version", json!({})).await);
    assert_eq!(state["version"], "1.2.3");
}

#[tokio::test]
async fn test_configured_binary_is_forwarded() {
    let runner = Arc::new(RecordingRunner::new().with_output("juicefs version 1.2.3"));
    let tester = tester(&runner);

    assert_ok!(
        tester
            .configure(json!({"juicefs_binary": "/usr/local/bin/juicefs"}))
            .await
    );
    assert_ok!(tester.create("juicefs_format", format_config()).await);

    let calls = runner.invocations();
    assert_eq!(calls.len(), 2);
    for call in calls {
        assert_eq!(call.binary.as_deref(), Some("/usr/local/bin/juicefs"));
    }
}

#[tokio::test]
async fn test_create_runs_format_and_assigns_id() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let state = assert_ok!(tester.lifecycle_create("juicefs_format", format_config()).await);

    let id = state["id"].as_str().unwrap();
    assert!(!id.is_empty());
    assert_eq!(state["storage_name"], "myjfs");

    let calls = runner.invocations();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].args,
        vec![
            "format",
            "--storage",
            "s3",
            "--bucket",
            "https://bucket.s3.amazonaws.com/jfs",
            "--force",
            "--trash-days",
            "0",
            "redis://localhost/1",
            "myjfs",
        ]
    );
}

#[tokio::test]
async fn test_create_applies_azure_fix_and_environment() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let config = json!({
        "storage": "wasb",
        "bucket": "https://mystorage.blob.core.windows.net/container",
        "azure_storage_endpoint_suffix_fix": true,
        "environment": {"AZURE_STORAGE_KEY": "secret"},
        "metadata_uri": "redis://localhost/1",
        "storage_name": "azvol",
    });
    let state = assert_ok!(tester.create("juicefs_format", config).await);

    let call = &runner.invocations()[0];
    assert_eq!(call.args[3], "--bucket");
    assert_eq!(call.args[4], "https://mystorage.core.windows.net/container");
    assert_eq!(call.env.get("AZURE_STORAGE_KEY").map(String::as_str), Some("secret"));

    // State keeps the configured bucket.
    assert_eq!(state["bucket"], "https://mystorage.blob.core.windows.net/container");
}

#[tokio::test]
async fn test_create_failure_persists_nothing() {
    let runner = Arc::new(RecordingRunner::new());
    runner.push_failure(1, "cannot connect to redis://localhost/1");
    let tester = tester(&runner);

    let err = assert_err!(tester.create("juicefs_format", format_config()).await);
    assert!(matches!(err, ProviderError::Command { .. }));

    let diag = err.to_diagnostic();
    assert_eq!(diag.summary, "Failed to run juicefs format");
    assert!(diag
        .detail
        .as_deref()
        .unwrap_or("")
        .contains("cannot connect to redis://localhost/1"));
}

#[tokio::test]
async fn test_create_rejects_unsupported_storage_without_running() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let mut config = format_config();
    config["storage"] = json!("ceph");
    let err = assert_err!(tester.create("juicefs_format", config).await);
    assert!(matches!(err, ProviderError::Validation(ref msg) if msg == "storage ceph is not supported"));
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
async fn test_update_keeps_id_and_reruns_format() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let created = assert_ok!(tester.lifecycle_create("juicefs_format", format_config()).await);
    let id = created["id"].clone();

    let mut proposed = format_config();
    proposed["force"] = json!(false);
    proposed["additional_params"] = json!([]);
    let updated = assert_ok!(
        tester
            .lifecycle_update("juicefs_format", created, proposed)
            .await
    );

    assert_eq!(updated["id"], id);
    assert_eq!(updated["force"], false);

    let calls = runner.invocations();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[1].args,
        vec![
            "format",
            "--storage",
            "s3",
            "--bucket",
            "https://bucket.s3.amazonaws.com/jfs",
            "redis://localhost/1",
            "myjfs",
        ]
    );
}

#[tokio::test]
async fn test_update_with_unchanged_config_still_runs_format() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let created = assert_ok!(tester.create("juicefs_format", format_config()).await);
    assert_ok!(
        tester
            .update("juicefs_format", created.clone(), created)
            .await
    );
    assert_eq!(runner.call_count(), 2);
}

#[tokio::test]
async fn test_delete_runs_nothing() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let state = json!({"id": "0b9c6f5e", "storage": "s3", "metadata_uri": "redis://localhost/1", "storage_name": "myjfs"});
    assert_ok!(tester.delete("juicefs_format", state).await);
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
async fn test_read_is_passthrough() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let state = json!({"id": "0b9c6f5e", "storage": "mem", "metadata_uri": "sqlite3://jfs.db", "storage_name": "memvol"});
    let read = assert_ok!(tester.read("juicefs_format", state.clone()).await);
    assert_eq!(read, state);
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
async fn test_validate_rejects_unsupported_storage() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let mut config = format_config();
    config["storage"] = json!("ftp");
    match assert_err!(tester.validate_resource_config("juicefs_format", config).await) {
        TestError::Diagnostics(diags) => {
            assert_eq!(diags.len(), 1);
            assert_eq!(diags[0].detail.as_deref(), Some("storage ftp is not supported"));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
async fn test_validate_accepts_every_supported_storage() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    for storage in ["file", "mem", "redis", "s3", "sftp", "wasb", "webdav"] {
        let mut config = format_config();
        config["storage"] = json!(storage);
        assert_ok!(tester.validate_resource_config("juicefs_format", config).await);
    }
}

#[tokio::test]
async fn test_plan_trigger_change_requires_replace() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let mut prior = format_config();
    prior["id"] = json!("0b9c6f5e");
    prior["triggers"] = json!({"revision": "1"});
    let mut proposed = format_config();
    proposed["triggers"] = json!({"revision": "2"});

    let plan = assert_ok!(tester.plan_update("juicefs_format", prior, proposed).await);
    assert!(plan.requires_replace);
    assert_eq!(plan.planned_state["id"], "0b9c6f5e");
}

#[tokio::test]
async fn test_trigger_change_recreates_with_new_id() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let mut config = format_config();
    config["triggers"] = json!({"revision": "1"});
    let created = assert_ok!(tester.lifecycle_create("juicefs_format", config.clone()).await);
    let old_id = created["id"].as_str().unwrap().to_string();

    config["triggers"] = json!({"revision": "2"});
    let plan = assert_ok!(tester.plan_update("juicefs_format", created, config).await);
    assert!(plan.requires_replace);
    assert_eq!(plan.planned_state["id"], Value::Null);

    let recreated = assert_ok!(tester.create("juicefs_format", plan.planned_state).await);
    let new_id = recreated["id"].as_str().unwrap();
    assert!(!new_id.is_empty());
    assert_ne!(new_id, old_id);
    assert_eq!(recreated["triggers"], json!({"revision": "2"}));
    assert_eq!(runner.call_count(), 2);
}

#[tokio::test]
async fn test_plan_create_leaves_id_unknown() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let plan = assert_ok!(tester.plan_create("juicefs_format", format_config()).await);
    assert_eq!(plan.planned_state["id"], Value::Null);
    assert!(!plan.requires_replace);
    assert!(plan.changes.iter().any(|c| c.path == "storage"));
}

#[tokio::test]
async fn test_import_by_id() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let imported = assert_ok!(tester.import_resource("juicefs_format", "0b9c6f5e").await);
    assert_eq!(imported.len(), 1);
    assert_eq!(imported[0].resource_type, "juicefs_format");
    assert_eq!(imported[0].state, json!({"id": "0b9c6f5e"}));
}

#[tokio::test]
async fn test_version_data_source() {
    let runner = Arc::new(RecordingRunner::new());
    runner.push_output("juicefs version 1.2.3\n");
    let tester = tester(&runner);

    let state = assert_ok!(tester.read_data_source("juicefs_version", json!({})).await);
    assert_eq!(state, json!({"version": "1.2.3"}));
}

#[tokio::test]
async fn test_version_empty_output_fails() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let err = assert_err!(tester.read_data_source("juicefs_version", json!({})).await);
    assert!(matches!(err, ProviderError::UnexpectedOutput(_)));
    assert!(err.to_string().contains("JuiceFS did not output anything"));
}

#[tokio::test]
async fn test_version_without_number_fails() {
    let runner = Arc::new(RecordingRunner::new().with_output("juicefs version\n"));
    let tester = tester(&runner);

    let err = assert_err!(tester.read_data_source("juicefs_version", json!({})).await);
    assert!(matches!(err, ProviderError::UnexpectedOutput(_)));
}

#[tokio::test]
async fn test_version_command_failure() {
    let runner = Arc::new(RecordingRunner::new());
    runner.push_failure(2, "exec format error");
    let tester = tester(&runner);

    let err = assert_err!(tester.read_data_source("juicefs_version", json!({})).await);
    assert_eq!(err.summary(), "Failed to run juicefs");
}

#[tokio::test]
async fn test_unknown_types_are_rejected() {
    let runner = Arc::new(RecordingRunner::new());
    let tester = tester(&runner);

    let err = assert_err!(tester.create("juicefs_mount", json!({})).await);
    assert!(matches!(err, ProviderError::UnknownResource(ref t) if t == "juicefs_mount"));

    let err = assert_err!(tester.read_data_source("juicefs_status", json!({})).await);
    assert!(matches!(err, ProviderError::UnknownResource(_)));
}
