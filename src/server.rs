//! Serving a provider over gRPC.
//!
//! [`ProviderService`] is the high-level trait a provider implements.
//! [`serve`] binds a listener, prints the handshake line, and runs the gRPC
//! server until SIGTERM/SIGINT.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated;
use crate::generated::provider_server::{Provider, ProviderServer};
use crate::schema::{has_errors, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema};
use crate::types::{ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX, PROTOCOL_VERSION};

/// Operations a provider implements.
///
/// Values are JSON objects shaped by the provider's schema.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// The provider's schema including all resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Provider metadata, derived from the schema by default.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            data_sources: schema.data_sources.keys().cloned().collect(),
            plan_destroy: false,
        }
    }

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Upgrade resource state from an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan changes for a resource.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Read the current state of a resource.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }

    /// Validate a data source's configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Read data from a data source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(data_source_type.to_string()))
    }
}

/// Adapts a [`ProviderService`] to the generated gRPC trait.
struct GrpcAdapter<P: ProviderService> {
    provider: Arc<P>,
}

/// Decode a JSON payload. An empty payload is null.
fn decode(bytes: &[u8]) -> Result<Value, ProviderError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(bytes)?)
}

fn encode(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<generated::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| generated::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => generated::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => generated::diagnostic::Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

fn error_to_proto(err: &ProviderError) -> Vec<generated::Diagnostic> {
    diagnostics_to_proto(vec![err.to_diagnostic()])
}

/// Log the outcome of a validation-style call and convert it.
fn validation_outcome(
    operation: &str,
    result: Result<Vec<Diagnostic>, ProviderError>,
) -> Vec<generated::Diagnostic> {
    match result {
        Ok(diagnostics) => {
            if has_errors(&diagnostics) {
                warn!(operation, diagnostics = diagnostics.len(), "Completed with errors");
            } else {
                debug!(operation, "Completed successfully");
            }
            diagnostics_to_proto(diagnostics)
        },
        Err(e) => {
            error!(operation, error = %e, "Failed");
            error_to_proto(&e)
        },
    }
}

/// Run a state-returning call, yielding encoded state or diagnostics.
fn state_outcome(
    operation: &str,
    resource_type: &str,
    result: Result<Value, ProviderError>,
) -> (Vec<u8>, Vec<generated::Diagnostic>) {
    match result {
        Ok(state) => {
            info!(operation, resource_type, "Completed successfully");
            (encode(&state), vec![])
        },
        Err(e) => {
            error!(operation, resource_type, error = %e, "Failed");
            (vec![], error_to_proto(&e))
        },
    }
}

fn schema_to_proto(schema: &Schema) -> generated::Schema {
    generated::Schema {
        version: schema.version as i64,
        block: Some(generated::Block {
            attributes: schema
                .attributes
                .iter()
                .map(|(name, attr)| generated::Attribute {
                    name: name.clone(),
                    r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
                    required: attr.flags.required,
                    optional: attr.flags.optional,
                    computed: attr.flags.computed,
                    sensitive: attr.flags.sensitive,
                    description: attr.description.clone().unwrap_or_default(),
                    force_new: attr.force_new,
                    default_value: vec![],
                })
                .collect(),
            block_types: vec![],
            description: schema.description.clone().unwrap_or_default(),
        }),
    }
}

#[tonic::async_trait]
impl<P: ProviderService> Provider for GrpcAdapter<P> {
    #[instrument(skip_all, name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: Request<generated::GetMetadataRequest>,
    ) -> Result<Response<generated::GetMetadataResponse>, Status> {
        let metadata = self.provider.metadata();
        debug!(resources = metadata.resources.len(), data_sources = metadata.data_sources.len(), "GetMetadata");
        Ok(Response::new(generated::GetMetadataResponse {
            server_capabilities: Some(generated::ServerCapabilities {
                plan_destroy: metadata.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: Request<generated::GetSchemaRequest>,
    ) -> Result<Response<generated::GetSchemaResponse>, Status> {
        let schema = self.provider.schema();
        let convert = |schemas: &BTreeMap<String, Schema>| -> HashMap<String, generated::Schema> {
            schemas
                .iter()
                .map(|(name, schema)| (name.clone(), schema_to_proto(schema)))
                .collect()
        };
        Ok(Response::new(generated::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: convert(&schema.resources),
            data_sources: convert(&schema.data_sources),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: Request<generated::ValidateProviderConfigRequest>,
    ) -> Result<Response<generated::ValidateProviderConfigResponse>, Status> {
        let config = decode(&request.into_inner().config);
        let result = match config {
            Ok(config) => self.provider.validate_provider_config(config).await,
            Err(e) => Err(e),
        };
        Ok(Response::new(generated::ValidateProviderConfigResponse {
            diagnostics: validation_outcome("ValidateProviderConfig", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.configure")]
    async fn configure(
        &self,
        request: Request<generated::ConfigureRequest>,
    ) -> Result<Response<generated::ConfigureResponse>, Status> {
        let config = decode(&request.into_inner().config);
        let result = match config {
            Ok(config) => self.provider.configure(config).await,
            Err(e) => Err(e),
        };
        Ok(Response::new(generated::ConfigureResponse {
            diagnostics: validation_outcome("Configure", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.stop")]
    async fn stop(
        &self,
        _request: Request<generated::StopRequest>,
    ) -> Result<Response<generated::StopResponse>, Status> {
        info!("Stop requested");
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            },
        };
        Ok(Response::new(generated::StopResponse { error }))
    }

    #[instrument(skip_all, name = "grpc.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        request: Request<generated::ValidateResourceConfigRequest>,
    ) -> Result<Response<generated::ValidateResourceConfigResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let config = decode(&req.config)?;
            self.provider
                .validate_resource_config(&req.resource_type, config)
                .await
        }
        .await;
        Ok(Response::new(generated::ValidateResourceConfigResponse {
            diagnostics: validation_outcome("ValidateResourceConfig", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        request: Request<generated::UpgradeResourceStateRequest>,
    ) -> Result<Response<generated::UpgradeResourceStateResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let raw_state = decode(&req.raw_state)?;
            self.provider
                .upgrade_resource_state(&req.resource_type, req.version, raw_state)
                .await
        }
        .await;
        let (upgraded_state, diagnostics) =
            state_outcome("UpgradeResourceState", &req.resource_type, result);
        Ok(Response::new(generated::UpgradeResourceStateResponse {
            upgraded_state,
            diagnostics,
        }))
    }

    #[instrument(skip_all, name = "grpc.plan")]
    async fn plan(
        &self,
        request: Request<generated::PlanRequest>,
    ) -> Result<Response<generated::PlanResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let prior_state = Some(decode(&req.prior_state)?).filter(|v| !v.is_null());
            let proposed_state = decode(&req.proposed_state)?;
            let config = decode(&req.config)?;
            self.provider
                .plan(&req.resource_type, prior_state, proposed_state, config)
                .await
        }
        .await;

        let response = match result {
            Ok(plan) => {
                info!(
                    resource_type = %req.resource_type,
                    changes = plan.changes.len(),
                    requires_replace = plan.requires_replace,
                    "Plan completed"
                );
                generated::PlanResponse {
                    planned_state: encode(&plan.planned_state),
                    changes: plan.changes.into_iter().map(Into::into).collect(),
                    requires_replace: plan.requires_replace,
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Plan failed");
                generated::PlanResponse {
                    diagnostics: error_to_proto(&e),
                    ..Default::default()
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.create")]
    async fn create(
        &self,
        request: Request<generated::CreateRequest>,
    ) -> Result<Response<generated::CreateResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let planned_state = decode(&req.planned_state)?;
            self.provider.create(&req.resource_type, planned_state).await
        }
        .await;
        let (state, diagnostics) = state_outcome("Create", &req.resource_type, result);
        Ok(Response::new(generated::CreateResponse { state, diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.read")]
    async fn read(
        &self,
        request: Request<generated::ReadRequest>,
    ) -> Result<Response<generated::ReadResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let current_state = decode(&req.current_state)?;
            self.provider.read(&req.resource_type, current_state).await
        }
        .await;
        let (state, diagnostics) = state_outcome("Read", &req.resource_type, result);
        Ok(Response::new(generated::ReadResponse { state, diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.update")]
    async fn update(
        &self,
        request: Request<generated::UpdateRequest>,
    ) -> Result<Response<generated::UpdateResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let prior_state = decode(&req.prior_state)?;
            let planned_state = decode(&req.planned_state)?;
            self.provider
                .update(&req.resource_type, prior_state, planned_state)
                .await
        }
        .await;
        let (state, diagnostics) = state_outcome("Update", &req.resource_type, result);
        Ok(Response::new(generated::UpdateResponse { state, diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.delete")]
    async fn delete(
        &self,
        request: Request<generated::DeleteRequest>,
    ) -> Result<Response<generated::DeleteResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let current_state = decode(&req.current_state)?;
            self.provider.delete(&req.resource_type, current_state).await
        }
        .await;
        let diagnostics = match result {
            Ok(()) => {
                info!(resource_type = %req.resource_type, "Delete completed");
                vec![]
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Delete failed");
                error_to_proto(&e)
            },
        };
        Ok(Response::new(generated::DeleteResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: Request<generated::ImportResourceStateRequest>,
    ) -> Result<Response<generated::ImportResourceStateResponse>, Status> {
        let req = request.into_inner();
        let response = match self.provider.import_resource(&req.resource_type, &req.id).await {
            Ok(imported) => {
                info!(resource_type = %req.resource_type, id = %req.id, count = imported.len(), "Import completed");
                generated::ImportResourceStateResponse {
                    imported: imported.into_iter().map(Into::into).collect(),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, id = %req.id, error = %e, "Import failed");
                generated::ImportResourceStateResponse {
                    imported: vec![],
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.validate_data_source_config")]
    async fn validate_data_source_config(
        &self,
        request: Request<generated::ValidateDataSourceConfigRequest>,
    ) -> Result<Response<generated::ValidateDataSourceConfigResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let config = decode(&req.config)?;
            self.provider
                .validate_data_source_config(&req.data_source_type, config)
                .await
        }
        .await;
        Ok(Response::new(generated::ValidateDataSourceConfigResponse {
            diagnostics: validation_outcome("ValidateDataSourceConfig", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.read_data_source")]
    async fn read_data_source(
        &self,
        request: Request<generated::ReadDataSourceRequest>,
    ) -> Result<Response<generated::ReadDataSourceResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let config = decode(&req.config)?;
            self.provider
                .read_data_source(&req.data_source_type, config)
                .await
        }
        .await;
        let (state, diagnostics) = state_outcome("ReadDataSource", &req.data_source_type, result);
        Ok(Response::new(generated::ReadDataSourceResponse { state, diagnostics }))
    }
}

/// Options for the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Address to bind. Port 0 picks a free port.
    pub address: SocketAddr,
    /// How long to wait for in-flight requests after a shutdown signal.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 0)),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Set the bind address.
    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = address;
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Format the handshake line printed on stdout.
pub fn handshake_line(addr: SocketAddr) -> String {
    format!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr)
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    _ = sigint.recv() => info!("Received SIGINT, shutting down"),
                }
                return;
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Cannot install signal handlers, falling back to CTRL+C");
            },
        }
    }

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received CTRL+C, shutting down");
    }
}

/// Serve a provider until a shutdown signal arrives.
///
/// Prints `HEMMER_PROVIDER|<version>|<address>` to stdout once listening.
pub async fn serve<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), ProviderError> {
    serve_with_shutdown(provider, options, wait_for_shutdown_signal()).await
}

/// Serve a provider until `shutdown` completes.
///
/// In-flight requests then get at most `options.shutdown_timeout` to finish.
pub async fn serve_with_shutdown<P, F>(
    provider: P,
    options: ServeOptions,
    shutdown: F,
) -> Result<(), ProviderError>
where
    P: ProviderService,
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(options.address)
        .await
        .map_err(|e| ProviderError::Configuration(format!("cannot bind {}: {}", options.address, e)))?;
    let addr = listener
        .local_addr()
        .map_err(|e| ProviderError::Configuration(e.to_string()))?;

    println!("{}", handshake_line(addr));
    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let service = ProviderServer::new(GrpcAdapter {
        provider: Arc::clone(&provider),
    });

    let (drain_tx, drain_rx) = oneshot::channel::<()>();
    let server = Server::builder().add_service(service).serve_with_incoming_shutdown(
        tokio_stream::wrappers::TcpListenerStream::new(listener),
        async {
            let _ = drain_rx.await;
        },
    );
    tokio::pin!(server);
    tokio::pin!(shutdown);

    let finished = tokio::select! {
        result = &mut server => Some(result),
        () = &mut shutdown => None,
    };

    let result = match finished {
        Some(result) => result,
        None => {
            let _ = drain_tx.send(());
            match tokio::time::timeout(options.shutdown_timeout, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout = ?options.shutdown_timeout, "Shutdown timeout exceeded, forcing shutdown");
                    Ok(())
                },
            }
        },
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }
    info!("Server shutdown complete");

    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Provider stop() returned error");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;

    #[test]
    fn test_handshake_line() {
        let addr: SocketAddr = "127.0.0.1:50051".parse().unwrap();
        assert_eq!(handshake_line(addr), "HEMMER_PROVIDER|1|127.0.0.1:50051");
    }

    #[test]
    fn test_schema_to_proto() {
        let schema = Schema::v0()
            .with_attribute("storage", Attribute::required_string())
            .with_attribute("triggers", Attribute::optional_string_map().with_force_new());
        let proto = schema_to_proto(&schema);
        let block = proto.block.unwrap();
        assert_eq!(block.attributes.len(), 2);

        let storage = block.attributes.iter().find(|a| a.name == "storage").unwrap();
        assert!(storage.required);
        assert_eq!(storage.r#type, b"\"string\"");

        let triggers = block.attributes.iter().find(|a| a.name == "triggers").unwrap();
        assert!(triggers.force_new);
        assert!(triggers.optional);
    }

    #[test]
    fn test_error_to_proto_has_summary_and_detail() {
        let diags = error_to_proto(&ProviderError::UnexpectedOutput("nothing".to_string()));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, generated::diagnostic::Severity::Error as i32);
        assert_eq!(diags[0].summary, "Unexpected output");
        assert_eq!(diags[0].detail, "nothing");
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode(b"").unwrap(), Value::Null);
        assert_eq!(decode(b"null").unwrap(), Value::Null);
        assert_eq!(decode(br#"{"a":1}"#).unwrap(), serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let err = decode(b"{not json").unwrap_err();
        assert!(matches!(err, ProviderError::Serialization(_)));
        assert_eq!(err.summary(), "Malformed state");
    }

    struct Idle;

    #[async_trait::async_trait]
    impl ProviderService for Idle {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new()
                .with_resource("juicefs_format", Schema::v0().with_attribute("id", Attribute::computed_string()))
        }

        async fn configure(&self, _config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
            Ok(vec![])
        }

        async fn plan(
            &self,
            _resource_type: &str,
            _prior_state: Option<Value>,
            proposed_state: Value,
            _config: Value,
        ) -> Result<PlanResult, ProviderError> {
            Ok(PlanResult::no_change(proposed_state))
        }

        async fn create(&self, _resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
            Ok(planned_state)
        }

        async fn read(&self, _resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
            Ok(current_state)
        }

        async fn update(
            &self,
            _resource_type: &str,
            _prior_state: Value,
            planned_state: Value,
        ) -> Result<Value, ProviderError> {
            Ok(planned_state)
        }

        async fn delete(&self, _resource_type: &str, _current_state: Value) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_serve_outlives_shutdown_timeout_until_signalled() {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let options = ServeOptions::default().with_shutdown_timeout(Duration::from_millis(50));
        let handle = tokio::spawn(serve_with_shutdown(Idle, options, async {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!handle.is_finished(), "server stopped without a shutdown signal");

        stop_tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server did not stop after the shutdown signal")
            .unwrap();
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_serve_reports_bind_failure() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let options = ServeOptions::default().with_address(taken.local_addr().unwrap());
        let result = serve_with_shutdown(Idle, options, std::future::pending()).await;
        assert!(matches!(result, Err(ProviderError::Configuration(_))));
    }
}
