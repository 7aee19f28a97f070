//! Tracing subscriber setup.
//!
//! Events go to stderr so command output on stdout stays machine-readable.
//! `RUST_LOG` wins over `[logging] level` when set.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber. Calling it twice is harmless.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Scope the configured level to this workspace's crates, keeping
/// dependency chatter (sqlx, hyper) at `warn`.
fn default_directive(level: &str) -> String {
    format!("warn,focus_coach={level},focus_coach_core={level},coach={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_parses() {
        let directive = default_directive("debug");
        assert!(EnvFilter::try_new(&directive).is_ok());
        assert!(directive.contains("focus_coach=debug"));
    }
}
