//! The JuiceFS provider: dispatches host operations to the format resource
//! and the version data source.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::command::{CommandRunner, Invocation, SelfInvoker};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::{format, plan, validation, version};

/// Provider name, the prefix of every type name.
pub const PROVIDER_NAME: &str = "juicefs";

/// JuiceFS provider.
pub struct JuiceFsProvider {
    runner: Arc<dyn CommandRunner>,
    config: RwLock<ProviderConfig>,
}

impl JuiceFsProvider {
    /// Provider that runs juicefs by re-invoking the current executable.
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SelfInvoker::new()))
    }

    /// Provider that runs juicefs through the given runner.
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            config: RwLock::new(ProviderConfig::default()),
        }
    }

    async fn binary(&self) -> Option<String> {
        self.config.read().await.juicefs_binary.clone()
    }

    fn unknown_resource(resource_type: &str) -> ProviderError {
        ProviderError::UnknownResource(resource_type.to_string())
    }
}

impl Default for JuiceFsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProviderService for JuiceFsProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(ProviderConfig::schema())
            .with_resource(format::RESOURCE_TYPE, format::schema())
            .with_data_source(version::DATA_SOURCE_TYPE, version::schema())
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validation::validate(&ProviderConfig::schema(), &config))
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let config = ProviderConfig::from_value(config)?;
        let binary = config.juicefs_binary.clone();
        *self.config.write().await = config;

        // Self-check: the wrapped binary must be runnable.
        match self
            .runner
            .run(Invocation::new([version::VERSION_FLAG]).with_binary(binary))
            .await
        {
            Ok(_) => {
                info!("juicefs self-check passed");
                Ok(vec![])
            },
            Err(e) => {
                warn!(error = %e, "juicefs self-check failed");
                Ok(vec![
                    Diagnostic::error("Failed to run juicefs").with_detail(e.to_string())
                ])
            },
        }
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match resource_type {
            format::RESOURCE_TYPE => Ok(format::validate_config(&config)),
            other => Err(Self::unknown_resource(other)),
        }
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        match resource_type {
            format::RESOURCE_TYPE => Ok(plan::plan_resource(
                &format::schema(),
                prior_state.as_ref(),
                proposed_state,
            )),
            other => Err(Self::unknown_resource(other)),
        }
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        match resource_type {
            format::RESOURCE_TYPE => {
                format::create(self.runner.as_ref(), self.binary().await, planned_state).await
            },
            other => Err(Self::unknown_resource(other)),
        }
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        match resource_type {
            format::RESOURCE_TYPE => Ok(format::read(current_state)),
            other => Err(Self::unknown_resource(other)),
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        match resource_type {
            format::RESOURCE_TYPE => {
                format::update(
                    self.runner.as_ref(),
                    self.binary().await,
                    prior_state,
                    planned_state,
                )
                .await
            },
            other => Err(Self::unknown_resource(other)),
        }
    }

    async fn delete(&self, resource_type: &str, _current_state: Value) -> Result<(), ProviderError> {
        match resource_type {
            format::RESOURCE_TYPE => {
                info!("Removing juicefs_format from state; the volume is left intact");
                Ok(())
            },
            other => Err(Self::unknown_resource(other)),
        }
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        match resource_type {
            format::RESOURCE_TYPE => Ok(vec![format::import(id)]),
            other => Err(Self::unknown_resource(other)),
        }
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match data_source_type {
            version::DATA_SOURCE_TYPE => Ok(validation::validate(&version::schema(), &config)),
            other => Err(Self::unknown_resource(other)),
        }
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        _config: Value,
    ) -> Result<Value, ProviderError> {
        match data_source_type {
            version::DATA_SOURCE_TYPE => version::read(self.runner.as_ref(), self.binary().await).await,
            other => Err(Self::unknown_resource(other)),
        }
    }
}
