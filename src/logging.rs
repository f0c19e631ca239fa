/// Installs the global fmt subscriber. `RUST_LOG` overrides the default
/// `info` filter. Fails if a subscriber is already installed.
pub fn init_tracing() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init()
        .map_err(|error| error.to_string())
}
