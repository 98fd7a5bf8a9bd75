//! Logging setup
//!
//! Console logging through `tracing-subscriber` with an `EnvFilter`.
//! `RUST_LOG` wins when set; otherwise the level comes from CLI verbosity.

use tracing_subscriber::{fmt, EnvFilter};

/// Map `-v` occurrences to a default filter directive
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Initialize console logging.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(verbosity: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    fmt().with_env_filter(env_filter).with_target(false).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(0), "info");
        assert_eq!(default_directive(1), "debug");
        assert_eq!(default_directive(5), "trace");
    }
}
