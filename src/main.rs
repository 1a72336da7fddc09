use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::process::Command;
use tracing::error;

use juicefs_provider::{serve, try_init_logging, JuiceFsProvider, ServeOptions};

/// Exit status when the wrapped binary cannot be started.
const EXIT_SPAWN_FAILED: u8 = 127;

#[derive(Parser)]
#[command(name = "terraform-provider-juicefs")]
#[command(about = "JuiceFS infrastructure provider", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the provider gRPC server (default)
    Serve {
        /// Address to listen on
        #[arg(long)]
        address: Option<SocketAddr>,

        /// Seconds to wait for in-flight requests on shutdown
        #[arg(long, default_value_t = 30)]
        shutdown_timeout: u64,
    },
    /// Run the wrapped juicefs binary and exit with its status
    Juicefs {
        /// Path to the juicefs binary
        #[arg(long, env = "JUICEFS_BINARY", default_value = "juicefs")]
        juicefs_binary: String,

        /// Arguments passed through to juicefs
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        None => run_serve(ServeOptions::default()).await,
        Some(Commands::Serve {
            address,
            shutdown_timeout,
        }) => {
            let mut options =
                ServeOptions::default().with_shutdown_timeout(Duration::from_secs(shutdown_timeout));
            if let Some(address) = address {
                options = options.with_address(address);
            }
            run_serve(options).await
        },
        Some(Commands::Juicefs {
            juicefs_binary,
            args,
        }) => run_delegate(&juicefs_binary, &args).await,
    }
}

async fn run_serve(options: ServeOptions) -> ExitCode {
    try_init_logging("info");

    match serve(JuiceFsProvider::new(), options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Provider server failed");
            ExitCode::FAILURE
        },
    }
}

/// Delegate mode. Stdio is inherited so the parent captures the child's
/// output directly; nothing else is written to stdout.
async fn run_delegate(binary: &str, args: &[String]) -> ExitCode {
    match Command::new(binary).args(args).status().await {
        Ok(status) => match status.code() {
            Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
            None => ExitCode::FAILURE,
        },
        Err(e) => {
            eprintln!("could not start {binary}: {e}");
            ExitCode::from(EXIT_SPAWN_FAILED)
        },
    }
}
