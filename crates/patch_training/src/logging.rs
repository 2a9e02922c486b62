use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `PATCHTRAIN_LOG` first, then `RUST_LOG`, then `info`.
///
/// Event fields used by the trainer: `epoch` on every per-epoch event, `score` on evaluation
/// results, `path` on checkpoint writes and deletes.
pub fn init_tracing() {
    let filter = env_filter();
    // Progress bars own stdout; logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("PATCHTRAIN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
