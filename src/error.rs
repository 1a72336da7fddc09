//! Error types for the JuiceFS provider.

use thiserror::Error;

use crate::command::CommandError;
use crate::schema::Diagnostic;

/// Errors that can occur while serving provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// The wrapped binary could not be run or exited unsuccessfully.
    #[error("{context}: {source}")]
    Command {
        /// What the provider was doing when the command failed.
        context: String,
        /// The underlying command failure, including captured output.
        #[source]
        source: CommandError,
    },

    /// The wrapped binary ran but produced output that could not be used.
    #[error("Unexpected output: {0}")]
    UnexpectedOutput(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),
}

impl ProviderError {
    /// Wrap a command failure with a short description of what was being run.
    pub fn command(context: impl Into<String>, source: CommandError) -> Self {
        Self::Command {
            context: context.into(),
            source,
        }
    }

    /// Short, user-facing summary used as a diagnostic headline.
    pub fn summary(&self) -> &str {
        match self {
            Self::Validation(_) => "Validation failed",
            Self::Configuration(_) => "Invalid provider configuration",
            Self::UnknownResource(_) => "Unknown resource type",
            Self::Command { context, .. } => context,
            Self::UnexpectedOutput(_) => "Unexpected output",
            Self::Serialization(_) => "Malformed state",
            Self::Transport(_) => "Transport failure",
            Self::Unimplemented(_) => "Not implemented",
        }
    }

    /// Convert into an error diagnostic for the host.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let detail = match self {
            Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::UnexpectedOutput(msg)
            | Self::Unimplemented(msg) => msg.clone(),
            Self::Command { source, .. } => source.to_string(),
            Self::Serialization(err) => err.to_string(),
            Self::Transport(err) => err.to_string(),
        };
        Diagnostic::error(self.summary()).with_detail(detail)
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            err @ ProviderError::Command { .. } => tonic::Status::internal(err.to_string()),
            ProviderError::UnexpectedOutput(msg) => tonic::Status::internal(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("Transport error: {}", err))
            },
            ProviderError::Unimplemented(msg) => tonic::Status::unimplemented(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DiagnosticSeverity;

    #[test]
    fn test_error_display() {
        let err = ProviderError::Validation("storage ftp is not supported".to_string());
        assert_eq!(
            format!("{}", err),
            "Validation error: storage ftp is not supported"
        );

        let err = ProviderError::UnknownResource("juicefs_mount".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: juicefs_mount");
    }

    #[test]
    fn test_command_error_keeps_output() {
        let err = ProviderError::command(
            "Failed to run juicefs format",
            CommandError::Failed {
                code: Some(1),
                output: "cannot connect to redis".to_string(),
            },
        );
        assert!(err.to_string().starts_with("Failed to run juicefs format"));
        assert!(err.to_string().contains("cannot connect to redis"));

        let diag = err.to_diagnostic();
        assert_eq!(diag.severity, DiagnosticSeverity::Error);
        assert_eq!(diag.summary, "Failed to run juicefs format");
        assert!(diag.detail.unwrap().contains("cannot connect to redis"));
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::Validation("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = ProviderError::Configuration("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let status: tonic::Status = ProviderError::UnexpectedOutput("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::Internal);

        let status: tonic::Status = ProviderError::Unimplemented("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }

    #[test]
    fn test_diagnostic_summary_is_short() {
        let diag = ProviderError::UnexpectedOutput("JuiceFS did not output anything".to_string())
            .to_diagnostic();
        assert_eq!(diag.summary, "Unexpected output");
        assert_eq!(
            diag.detail.as_deref(),
            Some("JuiceFS did not output anything")
        );
    }
}
