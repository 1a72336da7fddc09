//! JuiceFS infrastructure provider.
//!
//! This crate implements a provider that lets an infrastructure host format
//! JuiceFS volumes declaratively and query the installed JuiceFS version. All
//! work is done by the `juicefs` command line tool.
//!
//! # Overview
//!
//! The provider exposes:
//!
//! - **`juicefs_format`**: a resource that runs `juicefs format` on create and update
//! - **`juicefs_version`**: a data source that reports `juicefs --version`
//! - **Provider config**: an optional path to the `juicefs` binary
//!
//! # Execution modes
//!
//! The same executable runs in two modes:
//!
//! - **serve** (default): starts the gRPC server and prints the handshake line
//! - **`juicefs`**: delegate mode, runs the wrapped binary with the given
//!   arguments and exits with its status
//!
//! The provider never spawns `juicefs` itself; it re-invokes its own
//! executable in delegate mode through [`command::SelfInvoker`].
//!
//! # Handshake Protocol
//!
//! When the provider starts via [`serve`], it outputs a handshake string to stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`
//!
//! # Testing
//!
//! [`testing::ProviderTester`] drives the provider in-process, and
//! [`testing::RecordingRunner`] replaces the juicefs process:
//!
//! ```
//! use std::sync::Arc;
//! use juicefs_provider::testing::{ProviderTester, RecordingRunner};
//! use juicefs_provider::JuiceFsProvider;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let runner = Arc::new(RecordingRunner::new());
//! let tester = ProviderTester::new(JuiceFsProvider::with_runner(runner.clone()));
//!
//! // Removing the resource never touches the volume.
//! tester.delete("juicefs_format", json!({"id": "abc"})).await.unwrap();
//! assert_eq!(runner.call_count(), 0);
//! # });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;
pub mod version;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use command::{CommandError, CommandOutput, CommandRunner, Invocation, SelfInvoker};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use logging::try_init_logging;
pub use provider::JuiceFsProvider;
pub use schema::ProviderSchema;
pub use server::{serve, serve_with_shutdown, ProviderService, ServeOptions};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX,
    PROTOCOL_VERSION,
};
