use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Installs the global subscriber once per process.
///
/// `json = true` emits one JSON object per line (production); otherwise the
/// pretty formatter is used. The level comes from `RUST_LOG` and defaults
/// to `info`.
pub fn init_tracing(service_name: &'static str, json: bool) {
    LOGGER_INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let base = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            // Includes timing when the span closes
            .with_span_events(fmt::format::FmtSpan::CLOSE);

        // try_init: tests and embedders may already own the global subscriber.
        let installed = if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.pretty())
                .try_init()
        };

        match installed {
            Ok(()) => tracing::info!(service = service_name, json, "logger initialized"),
            Err(e) => eprintln!("logger already installed for {service_name}: {e}"),
        }
    });
}
