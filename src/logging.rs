use std::env;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,reqwest=warn,hyper=warn";

fn filter_from_env() -> EnvFilter {
    for var in ["MIGRATOR_LOG", "RUST_LOG"] {
        if let Ok(raw) = env::var(var)
            && !raw.trim().is_empty()
            && let Ok(filter) = EnvFilter::try_new(raw.trim())
        {
            return filter;
        }
    }
    EnvFilter::new(DEFAULT_FILTER)
}

/// Install the stderr subscriber. Stdout is reserved for command reports.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_from_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
