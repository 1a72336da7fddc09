//! The `juicefs_version` data source.

use serde_json::{json, Value};
use tracing::debug;

use crate::command::{CommandRunner, Invocation};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// Type name registered with the host.
pub const DATA_SOURCE_TYPE: &str = "juicefs_version";

/// Argument that makes juicefs print its version.
pub const VERSION_FLAG: &str = "--version";

/// Schema of the data source.
pub fn schema() -> Schema {
    Schema::v0().with_attribute(
        "version",
        Attribute::computed_string().with_description("Version of installed JuiceFS"),
    )
}

/// Extract the version from `juicefs --version` output.
///
/// `juicefs version 1.2.3` yields `1.2.3`. Returns `None` when no version
/// remains after stripping the prefix.
pub fn parse_version(output: &str) -> Option<String> {
    let line = output.trim().lines().next()?;
    let rest = line.trim();
    let rest = rest.strip_prefix("juicefs").unwrap_or(rest).trim_start();
    let version = rest.strip_prefix("version").unwrap_or(rest).trim();
    if version.is_empty() {
        return None;
    }
    Some(version.to_string())
}

/// Query the version; the result is the data source's state.
pub async fn read(
    runner: &dyn CommandRunner,
    binary: Option<String>,
) -> Result<Value, ProviderError> {
    let output = runner
        .run(Invocation::new([VERSION_FLAG]).with_binary(binary))
        .await
        .map_err(|e| ProviderError::command("Failed to run juicefs", e))?;

    let version = parse_version(&output.output).ok_or_else(|| {
        ProviderError::UnexpectedOutput("JuiceFS did not output anything".to_string())
    })?;
    debug!(%version, "Read juicefs version");
    Ok(json!({ "version": version }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(
            parse_version("juicefs version 1.2.3").as_deref(),
            Some("1.2.3")
        );
        assert_eq!(
            parse_version("juicefs version 1.1.0+2023-09-04.08c4ae62\n").as_deref(),
            Some("1.1.0+2023-09-04.08c4ae62")
        );
    }

    #[test]
    fn test_parse_version_empty() {
        assert_eq!(parse_version(""), None);
        assert_eq!(parse_version("  \n"), None);
        assert_eq!(parse_version("juicefs version\n"), None);
        assert_eq!(parse_version("juicefs"), None);
    }

    #[test]
    fn test_parse_version_without_prefix() {
        assert_eq!(parse_version("1.2.3").as_deref(), Some("1.2.3"));
    }

    #[test]
    fn test_parse_version_first_line_only() {
        assert_eq!(
            parse_version("juicefs version 1.2.3\nextra line\n").as_deref(),
            Some("1.2.3")
        );
    }
}
