/// Initializes the global `tracing` subscriber. `RUST_LOG` wins when set;
/// otherwise falls back to `default_level` (the agent's `--log-level`
/// flag), same precedence as `ando-server`'s startup sequence.
pub fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}
