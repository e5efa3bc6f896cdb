//! Tracing/logging initialization.
//!
//! Filtering comes from `RUST_LOG` (default `info`).

use tracing_subscriber::EnvFilter;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable lines, for local use.
    Pretty,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(output: LogOutput) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let _ = match output {
        LogOutput::Json => builder.json().with_target(false).try_init(),
        LogOutput::Pretty => builder.with_target(true).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init(LogOutput::Pretty);
        init(LogOutput::Json);
        ::tracing::info!("still logging after second init");
    }
}
