//! Process-wide `tracing` subscriber.
//!
//! Installed once by the binary. `RUST_LOG` wins when set; otherwise the
//! level follows the `-v` count and chatty dependencies are held at `warn`.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const NOISY_TARGETS: &[&str] = &[
    "chromiumoxide",
    "hyper",
    "hyper_util",
    "html5ever",
    "selectors",
    "reqwest",
    "sqlx",
    "tungstenite",
];

/// Filter directive for a verbosity count.
pub fn default_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let mut directive = format!("linkwell={level},{level}");
    if verbosity < 2 {
        for target in NOISY_TARGETS {
            directive.push_str(&format!(",{target}=warn"));
        }
    }
    directive
}

pub fn init(verbosity: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbosity)))
        .map_err(|e| anyhow::anyhow!("Invalid log filter: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_quiets_dependencies() {
        let directive = default_directive(0);
        assert!(directive.starts_with("linkwell=info"));
        assert!(directive.contains("chromiumoxide=warn"));
        assert!(!default_directive(2).contains("chromiumoxide"));
        assert!(EnvFilter::try_new(default_directive(1)).is_ok());
    }
}
