//! `tracing` subscriber bootstrap.
//!
//! Library crates only emit events; the binary calls [`init_subscriber`] once
//! at startup. `RUST_LOG` takes precedence over the configured level.

/// Initialize the global tracing subscriber writing to stderr.
///
/// Call once at application startup. Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Minimum level (or full `EnvFilter` directive) when `RUST_LOG` is unset.
/// * `json` - Emit one JSON object per event instead of compact text.
pub fn init_subscriber(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // set_global_default is a no-op if already set
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_subscriber("warn", false);
        init_subscriber("debug", true);
        tracing::info!("still logging");
    }
}
