//! Optional `tracing` subscriber for hosts that do not install their own.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber. `RUST_LOG` wins over `filter`. Returns false if a global
/// subscriber was already set; calling it twice is harmless.
pub fn init_tracing(filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_thread_names(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        init_tracing("debug");
        assert!(!init_tracing("info"));
    }
}
