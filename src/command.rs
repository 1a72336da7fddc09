//! Running the wrapped `juicefs` binary.
//!
//! The provider never calls `juicefs` directly. It re-invokes its own
//! executable in delegate mode (`<exe> juicefs -- <args>`), which in turn runs
//! the wrapped binary and exits with its status. [`CommandRunner`] is the seam
//! between provider logic and process execution so tests can substitute a
//! recording stub.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Name of the delegate-mode subcommand on the provider executable.
pub const DELEGATE_SUBCOMMAND: &str = "juicefs";

/// Flag selecting the wrapped binary in delegate mode.
pub const JUICEFS_BINARY_FLAG: &str = "--juicefs-binary";

/// Environment variable delegate mode reads the wrapped binary from.
pub const JUICEFS_BINARY_ENV: &str = "JUICEFS_BINARY";

/// Errors from running the wrapped binary.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The path of the running provider executable could not be determined.
    #[error("could not locate the provider executable: {0}")]
    CurrentExe(#[source] std::io::Error),

    /// The process could not be started.
    #[error("could not start {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The process ran but exited unsuccessfully.
    #[error("could not run juicefs command (exit code {}); output: {output}", display_code(.code))]
    Failed {
        /// Exit code, or `None` when terminated by a signal.
        code: Option<i32>,
        /// Combined stdout and stderr.
        output: String,
    },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// One call of the wrapped binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Arguments passed to `juicefs`, starting with the subcommand or flag.
    pub args: Vec<String>,
    /// Environment overrides layered over the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Explicit path to the wrapped binary, when configured.
    pub binary: Option<String>,
}

impl Invocation {
    /// Create an invocation with the given arguments.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set environment overrides.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Set the wrapped binary path.
    pub fn with_binary(mut self, binary: Option<String>) -> Self {
        self.binary = binary;
        self
    }

    /// Arguments for the provider executable in delegate mode.
    pub fn delegate_args(&self) -> Vec<String> {
        let mut args = vec![DELEGATE_SUBCOMMAND.to_string()];
        if let Some(binary) = &self.binary {
            args.push(JUICEFS_BINARY_FLAG.to_string());
            args.push(binary.clone());
        }
        args.push("--".to_string());
        args.extend(self.args.iter().cloned());
        args
    }

    /// Environment overrides for the delegate process.
    ///
    /// [`JUICEFS_BINARY_ENV`] is dropped; only the provider chooses the binary.
    pub fn delegate_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        env.remove(JUICEFS_BINARY_ENV);
        env
    }
}

/// Captured result of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Combined stdout followed by stderr.
    pub output: String,
}

impl CommandOutput {
    /// Create output from text.
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

/// Executes wrapped-binary invocations.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    /// Run the invocation to completion. Non-zero exit is an error.
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput, CommandError>;
}

/// Runs invocations by re-executing the provider binary in delegate mode.
#[derive(Debug, Clone, Default)]
pub struct SelfInvoker {
    exe: Option<PathBuf>,
}

impl SelfInvoker {
    /// Re-invoke the currently running executable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-invoke a specific executable instead of the current one.
    pub fn with_executable(exe: impl Into<PathBuf>) -> Self {
        Self {
            exe: Some(exe.into()),
        }
    }

    fn executable(&self) -> Result<PathBuf, CommandError> {
        match &self.exe {
            Some(exe) => Ok(exe.clone()),
            None => std::env::current_exe().map_err(CommandError::CurrentExe),
        }
    }
}

#[async_trait::async_trait]
impl CommandRunner for SelfInvoker {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput, CommandError> {
        let exe = self.executable()?;
        run_process(&exe, &invocation.delegate_args(), &invocation.delegate_env()).await
    }
}

/// Run `program` with `args`, blocking until it exits.
#[instrument(skip(args, env), fields(program = %program.display(), args = args.len()))]
pub async fn run_process(
    program: &std::path::Path,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> Result<CommandOutput, CommandError> {
    debug!(?args, "Spawning process");

    let result = Command::new(program)
        .args(args)
        .envs(env)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| CommandError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

    let mut output = String::from_utf8_lossy(&result.stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(&result.stderr));

    if result.status.success() {
        debug!(bytes = output.len(), "Process completed");
        Ok(CommandOutput { output })
    } else {
        warn!(code = ?result.status.code(), "Process exited unsuccessfully");
        Err(CommandError::Failed {
            code: result.status.code(),
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delegate_args_without_binary() {
        let invocation = Invocation::new(["--version"]);
        assert_eq!(invocation.delegate_args(), vec!["juicefs", "--", "--version"]);
    }

    #[test]
    fn test_delegate_args_with_binary() {
        let invocation = Invocation::new(["format", "--storage", "s3"])
            .with_binary(Some("/opt/juicefs/bin/juicefs".to_string()));
        assert_eq!(
            invocation.delegate_args(),
            vec![
                "juicefs",
                "--juicefs-binary",
                "/opt/juicefs/bin/juicefs",
                "--",
                "format",
                "--storage",
                "s3"
            ]
        );
    }

    #[test]
    fn test_delegate_env_drops_binary_override() {
        let mut env = BTreeMap::new();
        env.insert("JUICEFS_BINARY".to_string(), "/tmp/other-juicefs".to_string());
        env.insert("ACCESS_KEY".to_string(), "key".to_string());
        let invocation = Invocation::new(["format"]).with_env(env);

        let delegated = invocation.delegate_env();
        assert!(!delegated.contains_key("JUICEFS_BINARY"));
        assert_eq!(delegated.get("ACCESS_KEY").map(String::as_str), Some("key"));
    }

    #[test]
    fn test_failed_error_includes_output() {
        let err = CommandError::Failed {
            code: Some(2),
            output: "bad metadata url".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "could not run juicefs command (exit code 2); output: bad metadata url"
        );

        let err = CommandError::Failed {
            code: None,
            output: String::new(),
        };
        assert!(err.to_string().contains("exit code signal"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_process_captures_output() {
        let mut env = BTreeMap::new();
        env.insert("JFS_TEST_VALUE".to_string(), "from-env".to_string());
        let output = run_process(
            std::path::Path::new("sh"),
            &[
                "-c".to_string(),
                "echo out $JFS_TEST_VALUE; echo err >&2".to_string(),
            ],
            &env,
        )
        .await;
        let output = tokio_test::assert_ok!(output);
        assert_eq!(output.output, "out from-env\nerr\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_process_non_zero_exit() {
        let result = run_process(
            std::path::Path::new("sh"),
            &["-c".to_string(), "echo boom; exit 3".to_string()],
            &BTreeMap::new(),
        )
        .await;
        match tokio_test::assert_err!(result) {
            CommandError::Failed { code, output } => {
                assert_eq!(code, Some(3));
                assert_eq!(output, "boom\n");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_self_invoker_passes_delegate_args() {
        let invoker = SelfInvoker::with_executable("echo");
        let output = invoker
            .run(Invocation::new(["--version"]).with_binary(Some("/opt/jfs".to_string())))
            .await;
        let output = tokio_test::assert_ok!(output);
        assert_eq!(output.output, "juicefs --juicefs-binary /opt/jfs -- --version\n");
    }

    #[tokio::test]
    async fn test_run_process_missing_program() {
        let result = run_process(
            std::path::Path::new("/nonexistent/juicefs-provider-test-binary"),
            &[],
            &BTreeMap::new(),
        )
        .await;
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }
}
