//! Test helpers for the provider.
//!
//! [`ProviderTester`] drives a [`ProviderService`] without a gRPC server, and
//! [`RecordingRunner`] stands in for the juicefs process.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use juicefs_provider::provider::JuiceFsProvider;
//! use juicefs_provider::testing::{ProviderTester, RecordingRunner};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let runner = Arc::new(RecordingRunner::new().with_output("juicefs version 1.2.3"));
//! let tester = ProviderTester::new(JuiceFsProvider::with_runner(runner.clone()));
//!
//! let state = tester.read_data_source("juicefs_version", json!({})).await.unwrap();
//! assert_eq!(state["version"], "1.2.3");
//! assert_eq!(runner.invocations()[0].args, vec!["--version"]);
//! # });
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use crate::command::{CommandError, CommandOutput, CommandRunner, Invocation};
use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// Drives a provider the way the host would, without gRPC.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Registered resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Registered data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// Configure the provider; error diagnostics become `Err`.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Validate a resource configuration; error diagnostics become `Err`.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a create.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan an update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Create a resource.
    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read a resource.
    pub async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update a resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import a resource by id.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Read a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    /// Plan, create, then read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created).await
    }

    /// Plan, update, then read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read(resource_type, updated).await
    }
}

/// Failure of a tester call that reports diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// The operation returned error diagnostics.
    #[error("operation failed with {} diagnostic(s): {}", .0.len(), summarize(.0))]
    Diagnostics(Vec<Diagnostic>),
    /// The operation returned a provider error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match &d.detail {
            Some(detail) => format!("{}: {}", d.summary, detail),
            None => d.summary.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// A [`CommandRunner`] that records invocations instead of running them.
///
/// Scripted results are returned in order; once exhausted, every call
/// succeeds with the default output.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    invocations: Mutex<Vec<Invocation>>,
    scripted: Mutex<VecDeque<Result<CommandOutput, CommandError>>>,
    default_output: String,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingRunner {
    /// A runner whose calls all succeed with empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Output returned by calls that have no scripted result.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.default_output = output.into();
        self
    }

    /// Queue a successful result.
    pub fn push_output(&self, output: impl Into<String>) {
        lock(&self.scripted).push_back(Ok(CommandOutput::new(output)));
    }

    /// Queue a non-zero exit with the given output.
    pub fn push_failure(&self, code: i32, output: impl Into<String>) {
        lock(&self.scripted).push_back(Err(CommandError::Failed {
            code: Some(code),
            output: output.into(),
        }));
    }

    /// All invocations so far, oldest first.
    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.invocations).clone()
    }

    /// Number of invocations so far.
    pub fn call_count(&self) -> usize {
        lock(&self.invocations).len()
    }
}

#[async_trait::async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput, CommandError> {
        lock(&self.invocations).push(invocation);
        lock(&self.scripted)
            .pop_front()
            .unwrap_or_else(|| Ok(CommandOutput::new(self.default_output.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_runner_replays_script() {
        let runner = RecordingRunner::new().with_output("default");
        runner.push_failure(1, "boom");

        let first = runner.run(Invocation::new(["format"])).await;
        assert!(matches!(first, Err(CommandError::Failed { code: Some(1), .. })));

        let second = runner.run(Invocation::new(["--version"])).await.unwrap();
        assert_eq!(second.output, "default");

        assert_eq!(runner.call_count(), 2);
        assert_eq!(runner.invocations()[1].args, vec!["--version"]);
    }

    #[test]
    fn test_check_diagnostics_ignores_warnings() {
        assert!(check_diagnostics(vec![Diagnostic::warning("just a warning")]).is_ok());
        assert!(check_diagnostics(vec![Diagnostic::error("broken")]).is_err());
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("validation failed").with_detail("storage ftp is not supported"),
            Diagnostic::error("Missing required attribute 'storage_name'"),
        ]);
        let display = err.to_string();
        assert!(display.contains("2 diagnostic(s)"));
        assert!(display.contains("storage ftp is not supported"));
        assert!(display.contains("storage_name"));
    }
}
