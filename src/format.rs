//! The `juicefs_format` resource.
//!
//! Each apply runs `juicefs format` against a metadata engine and object
//! storage. Create and Update both run the full command; Delete only drops
//! state, since a formatted volume has no matching "unformat".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::command::{CommandRunner, Invocation};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::types::ImportedResource;
use crate::validation;

/// Type name registered with the host.
pub const RESOURCE_TYPE: &str = "juicefs_format";

/// Storage backends accepted for `--storage`.
pub const VALID_STORAGES: [&str; 7] = ["file", "mem", "redis", "s3", "sftp", "wasb", "webdav"];

const AZURE_BLOB_SUFFIX: &str = ".blob.core.windows.net";
const AZURE_CORE_SUFFIX: &str = ".core.windows.net";

/// Stored state of one format resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatState {
    /// Opaque identifier, assigned on first create.
    #[serde(default)]
    pub id: Option<String>,
    /// Extra CLI arguments, passed in order before the positional arguments.
    #[serde(default)]
    pub additional_params: Option<Vec<String>>,
    /// Environment variables set for the juicefs process.
    #[serde(default)]
    pub environment: Option<BTreeMap<String, String>>,
    /// Arbitrary values; changing them recreates the resource.
    #[serde(default)]
    pub triggers: Option<BTreeMap<String, String>>,
    /// Pass `--force`.
    #[serde(default)]
    pub force: Option<bool>,
    /// Storage backend (`--storage`).
    pub storage: String,
    /// Bucket URL (`--bucket`).
    #[serde(default)]
    pub bucket: Option<String>,
    /// Metadata engine URI.
    pub metadata_uri: String,
    /// Volume name.
    pub storage_name: String,
    /// Rewrite `*.blob.core.windows.net` to `*.core.windows.net` in the bucket.
    #[serde(default)]
    pub azure_storage_endpoint_suffix_fix: Option<bool>,
}

impl FormatState {
    /// Decode state or configuration sent by the host.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Encode for the host.
    pub fn to_value(&self) -> Result<Value, ProviderError> {
        Ok(serde_json::to_value(self)?)
    }

    /// The bucket passed to juicefs, or `None` when no `--bucket` is emitted.
    pub fn effective_bucket(&self) -> Option<String> {
        let bucket = self.bucket.as_deref().filter(|b| !b.is_empty())?;
        if self.azure_storage_endpoint_suffix_fix.unwrap_or(false) {
            Some(bucket.replacen(AZURE_BLOB_SUFFIX, AZURE_CORE_SUFFIX, 1))
        } else {
            Some(bucket.to_string())
        }
    }

    /// Arguments of the `juicefs format` command line.
    ///
    /// Order: `format --storage S [--bucket B] [--force] [params...] META NAME`.
    pub fn format_args(&self) -> Vec<String> {
        let mut args = vec![
            "format".to_string(),
            "--storage".to_string(),
            self.storage.clone(),
        ];
        if let Some(bucket) = self.effective_bucket() {
            args.push("--bucket".to_string());
            args.push(bucket);
        }
        if self.force.unwrap_or(false) {
            args.push("--force".to_string());
        }
        args.extend(self.additional_params.iter().flatten().cloned());
        args.push(self.metadata_uri.clone());
        args.push(self.storage_name.clone());
        args
    }

    /// Assign a fresh identifier unless one is already set.
    fn ensure_id(&mut self) {
        if self.id.as_deref().map_or(true, str::is_empty) {
            self.id = Some(uuid::Uuid::new_v4().to_string());
        }
    }
}

/// Schema of the resource.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Formats a JuiceFS volume")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "additional_params",
            Attribute::optional_string_list()
                .with_description("Additional parameters to pass to the JuiceFS command"),
        )
        .with_attribute(
            "force",
            Attribute::optional_bool().with_description("Force overwriting existing images"),
        )
        .with_attribute(
            "environment",
            Attribute::optional_string_map().with_description("Environment variables"),
        )
        .with_attribute(
            "triggers",
            Attribute::optional_string_map()
                .with_description("Values that, when changed, trigger an update of this resource")
                .with_force_new(),
        )
        .with_attribute(
            "storage",
            Attribute::required_string()
                .with_description(format!(
                    "Storage to use (--storage parameter). Supported are: {}",
                    VALID_STORAGES.join(", ")
                ))
                .with_allowed_values(VALID_STORAGES),
        )
        .with_attribute(
            "bucket",
            Attribute::optional_string().with_description("The bucket URL to use"),
        )
        .with_attribute(
            "azure_storage_endpoint_suffix_fix",
            Attribute::optional_bool().with_description(
                "It may be necessary to use '*.core.windows.net' instead of \
                 '*.blob.core.windows.net'. This parameter does just that.",
            ),
        )
        .with_attribute(
            "metadata_uri",
            Attribute::required_string()
                .with_description("Metadata engine to use (for example redis://localhost/1)"),
        )
        .with_attribute(
            "storage_name",
            Attribute::required_string().with_description("Storage name"),
        )
}

/// Validate a resource configuration.
pub fn validate_config(config: &Value) -> Vec<Diagnostic> {
    validation::validate(&schema(), config)
}

async fn run_format(
    runner: &dyn CommandRunner,
    binary: Option<String>,
    state: &FormatState,
) -> Result<(), ProviderError> {
    validation::validate_result(&schema(), &state.to_value()?).map_err(|diagnostics| {
        let details: Vec<_> = diagnostics
            .into_iter()
            .map(|d| d.detail.unwrap_or(d.summary))
            .collect();
        ProviderError::Validation(details.join("; "))
    })?;

    let invocation = Invocation::new(state.format_args())
        .with_env(state.environment.clone().unwrap_or_default())
        .with_binary(binary);
    runner
        .run(invocation)
        .await
        .map_err(|e| ProviderError::command("Failed to run juicefs format", e))?;
    Ok(())
}

/// Format the volume and return the new state.
#[instrument(skip_all, fields(resource_type = RESOURCE_TYPE))]
pub async fn create(
    runner: &dyn CommandRunner,
    binary: Option<String>,
    planned: Value,
) -> Result<Value, ProviderError> {
    let mut state = FormatState::from_value(planned)?;
    run_format(runner, binary, &state).await?;
    state.ensure_id();
    info!(id = ?state.id, storage_name = %state.storage_name, "Volume formatted");
    state.to_value()
}

/// Re-run format with the planned configuration, keeping the identifier.
#[instrument(skip_all, fields(resource_type = RESOURCE_TYPE))]
pub async fn update(
    runner: &dyn CommandRunner,
    binary: Option<String>,
    prior: Value,
    planned: Value,
) -> Result<Value, ProviderError> {
    let prior_id = prior.get("id").and_then(Value::as_str).map(str::to_string);
    let mut state = FormatState::from_value(planned)?;
    if prior_id.is_some() {
        state.id = prior_id;
    }
    run_format(runner, binary, &state).await?;
    state.ensure_id();
    info!(id = ?state.id, storage_name = %state.storage_name, "Volume re-formatted");
    state.to_value()
}

/// Stored state is returned unchanged; juicefs offers no way to check it.
pub fn read(current: Value) -> Value {
    current
}

/// Import by id. Other attributes stay null until the configuration is applied.
pub fn import(id: &str) -> ImportedResource {
    ImportedResource::new(RESOURCE_TYPE, json!({ "id": id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> FormatState {
        FormatState {
            storage: "s3".to_string(),
            metadata_uri: "redis://localhost/1".to_string(),
            storage_name: "vol".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_all_supported_storages_accepted() {
        for storage in VALID_STORAGES {
            let config = json!({
                "storage": storage,
                "metadata_uri": "redis://localhost/1",
                "storage_name": "vol",
            });
            assert!(validate_config(&config).is_empty(), "{storage} rejected");
        }
    }

    #[test]
    fn test_unsupported_storage_rejected() {
        let config = json!({
            "storage": "ceph",
            "metadata_uri": "redis://localhost/1",
            "storage_name": "vol",
        });
        let diagnostics = validate_config(&config);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("storage"));
        assert_eq!(
            diagnostics[0].detail.as_deref(),
            Some("storage ceph is not supported")
        );
    }

    #[test]
    fn test_format_args_full() {
        let state = FormatState {
            additional_params: Some(vec!["--a".to_string(), "1".to_string()]),
            force: Some(true),
            bucket: Some("b".to_string()),
            ..state()
        };
        assert_eq!(
            state.format_args(),
            vec![
                "format",
                "--storage",
                "s3",
                "--bucket",
                "b",
                "--force",
                "--a",
                "1",
                "redis://localhost/1",
                "vol"
            ]
        );
    }

    #[test]
    fn test_format_args_minimal() {
        assert_eq!(
            state().format_args(),
            vec!["format", "--storage", "s3", "redis://localhost/1", "vol"]
        );
    }

    #[test]
    fn test_empty_bucket_omitted() {
        let state = FormatState {
            bucket: Some(String::new()),
            force: Some(false),
            ..state()
        };
        assert!(state.effective_bucket().is_none());
        assert!(!state.format_args().contains(&"--bucket".to_string()));
    }

    #[test]
    fn test_azure_suffix_fix() {
        let mut state = FormatState {
            storage: "wasb".to_string(),
            bucket: Some("mystorage.blob.core.windows.net/container".to_string()),
            azure_storage_endpoint_suffix_fix: Some(true),
            ..state()
        };
        assert_eq!(
            state.effective_bucket().as_deref(),
            Some("mystorage.core.windows.net/container")
        );

        state.azure_storage_endpoint_suffix_fix = Some(false);
        assert_eq!(
            state.effective_bucket().as_deref(),
            Some("mystorage.blob.core.windows.net/container")
        );
    }

    #[test]
    fn test_azure_suffix_fix_replaces_first_occurrence_only() {
        let state = FormatState {
            bucket: Some("a.blob.core.windows.net/b.blob.core.windows.net".to_string()),
            azure_storage_endpoint_suffix_fix: Some(true),
            ..state()
        };
        assert_eq!(
            state.effective_bucket().as_deref(),
            Some("a.core.windows.net/b.blob.core.windows.net")
        );
    }

    #[test]
    fn test_state_round_trip_keeps_nulls() {
        let value = state().to_value().unwrap();
        assert_eq!(value["bucket"], Value::Null);
        assert_eq!(value["id"], Value::Null);
        assert_eq!(FormatState::from_value(value).unwrap(), state());
    }

    #[test]
    fn test_ensure_id_is_stable() {
        let mut state = state();
        state.ensure_id();
        let id = state.id.clone().unwrap();
        assert!(!id.is_empty());
        state.ensure_id();
        assert_eq!(state.id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_import_sets_only_id() {
        let imported = import("f2a1");
        assert_eq!(imported.resource_type, RESOURCE_TYPE);
        assert_eq!(imported.state, json!({"id": "f2a1"}));
    }
}
