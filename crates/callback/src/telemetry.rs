use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// Installs a compact stderr subscriber honoring `RUST_LOG`, for host
/// applications that do not bring their own. No-op if a global subscriber is
/// already set.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_logging();
        init_logging();
    }
}
