//! Logging setup.
//!
//! Logs go to **stderr**; stdout carries the handshake line in serve mode.
//! `RUST_LOG` overrides the default level, e.g.
//! `RUST_LOG=juicefs_provider=debug terraform-provider-juicefs`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the stderr subscriber.
///
/// Returns `false` if a global subscriber was already set.
pub fn try_init_logging(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("juicefs_provider=debug").is_ok());
        assert!(EnvFilter::try_new("warn,juicefs_provider::command=trace").is_ok());
    }
}
