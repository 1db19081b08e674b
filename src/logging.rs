use tracing_subscriber::EnvFilter;

/// Install the global log subscriber. `RUST_LOG` wins over `verbose`.
///
/// Library code logs through the `log` facade; the subscriber's `tracing-log`
/// bridge picks those records up.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("mediasort=debug")
        } else {
            EnvFilter::new("mediasort=info")
        }
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
