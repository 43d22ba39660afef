//! Shared bootstrap for the command-line binaries

use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{load_config, Config};
use crate::error::LedgerError;
use crate::ledger::Ledger;

/// Initialize the global tracing subscriber. Output goes to stderr so stdout
/// stays clean for JSON exports. `RUST_LOG` overrides `default_filter` when set.
pub fn init_logging(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // A second initialisation (e.g. in tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// Load `config_path`, start logging and open the configured ledger.
pub fn load_ledger_from_config(config_path: impl AsRef<Path>) -> Result<(Config, Ledger), LedgerError> {
    let config = load_config(config_path)?;
    init_logging(&config.logging.filter);
    let ledger = Ledger::from_config(&config)?;
    Ok((config, ledger))
}

/// Shorten a hex digest for table display.
pub fn short_hash(hash: &str) -> String {
    let chars: Vec<char> = hash.chars().collect();
    if chars.len() > 16 {
        let head: String = chars[..10].iter().collect();
        let tail: String = chars[chars.len() - 6..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        hash.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash() {
        let hash = "a".repeat(64);
        assert_eq!(short_hash(&hash), format!("{}...{}", "a".repeat(10), "a".repeat(6)));
        assert_eq!(short_hash("0000000000000000"), "0000000000000000");
    }

    #[test]
    fn test_short_hash_multibyte() {
        let label = "é".repeat(20);
        assert_eq!(short_hash(&label), format!("{}...{}", "é".repeat(10), "é".repeat(6)));
        // Twelve characters, more than sixteen bytes.
        assert_eq!(short_hash(&"ü".repeat(12)), "ü".repeat(12));
    }

    #[test]
    fn test_load_ledger_with_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let (config, ledger) = load_ledger_from_config(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.ledger.default_validator, "system");
        assert!(ledger.blocks().unwrap().is_empty());
    }
}
