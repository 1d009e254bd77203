//! Logging setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "stix_sky=info,stix_utils=info,stix_db=info";

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise [`DEFAULT_FILTER`] is used, or
/// `debug` for the STIX crates when `verbose` is set. Returns `false` if a
/// subscriber was already installed.
pub fn init_logging(verbose: bool) -> bool {
    let fallback = if verbose {
        "stix_sky=debug,stix_utils=debug,stix_db=debug"
    } else {
        DEFAULT_FILTER
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(false);
        assert!(!init_logging(true));
    }
}
