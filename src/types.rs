//! Plain types exchanged between the provider and the gRPC layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::generated;

/// The protocol version for the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// The handshake prefix the host expects on the provider's stdout.
pub const HANDSHAKE_PREFIX: &str = "HEMMER_PROVIDER";

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The attribute that changed.
    pub path: String,
    /// Value before the change (`None` when the attribute is being set).
    pub before: Option<Value>,
    /// Value after the change (`None` when the attribute is being cleared).
    pub after: Option<Value>,
}

impl AttributeChange {
    /// A newly set attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            before: None,
            after: Some(value),
        }
    }

    /// A cleared attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            before: Some(value),
            after: None,
        }
    }

    /// A modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self {
            path: path.into(),
            before: Some(before),
            after: Some(after),
        }
    }
}

fn encode_optional(value: Option<Value>) -> Vec<u8> {
    value
        .and_then(|v| serde_json::to_vec(&v).ok())
        .unwrap_or_default()
}

fn decode_optional(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(bytes).ok()
    }
}

impl From<generated::AttributeChange> for AttributeChange {
    fn from(proto: generated::AttributeChange) -> Self {
        Self {
            path: proto.path,
            before: decode_optional(&proto.before),
            after: decode_optional(&proto.after),
        }
    }
}

impl From<AttributeChange> for generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: encode_optional(change.before),
            after: encode_optional(change.after),
        }
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation.
    pub planned_state: Value,
    /// The attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource must be destroyed and recreated.
    pub requires_replace: bool,
}

impl PlanResult {
    /// A plan with no changes.
    pub fn no_change(state: Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// A plan with changes.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }
}

/// A resource returned by an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

impl From<ImportedResource> for generated::ImportedResource {
    fn from(resource: ImportedResource) -> Self {
        Self {
            resource_type: resource.resource_type,
            state: encode_optional(Some(resource.state)),
        }
    }
}

/// Provider metadata returned by GetMetadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Resource type names.
    pub resources: Vec<String>,
    /// Data source type names.
    pub data_sources: Vec<String>,
    /// Whether the provider wants to plan destroy operations.
    pub plan_destroy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("storage", json!("s3"));
        assert!(added.before.is_none());
        assert_eq!(added.after, Some(json!("s3")));

        let removed = AttributeChange::removed("bucket", json!("https://b"));
        assert_eq!(removed.before, Some(json!("https://b")));
        assert!(removed.after.is_none());
    }

    #[test]
    fn test_attribute_change_to_proto_leaves_missing_side_empty() {
        let proto: generated::AttributeChange =
            AttributeChange::added("force", json!(true)).into();
        assert_eq!(proto.path, "force");
        assert!(proto.before.is_empty());
        assert_eq!(proto.after, b"true");

        let back: AttributeChange = proto.into();
        assert_eq!(back.after, Some(json!(true)));
        assert!(back.before.is_none());
    }

    #[test]
    fn test_imported_resource_to_proto() {
        let imported = ImportedResource::new("juicefs_format", json!({"id": "abc"}));
        let proto: generated::ImportedResource = imported.into();
        assert_eq!(proto.resource_type, "juicefs_format");
        assert_eq!(
            serde_json::from_slice::<Value>(&proto.state).unwrap(),
            json!({"id": "abc"})
        );
    }
}
