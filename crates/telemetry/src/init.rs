use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directive applied when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

/// Installs the global `tracing` subscriber for a node binary.
///
/// Events are emitted as flattened JSON lines on stderr with UTC timestamps,
/// so the container runtime can ship them without a sidecar parser.
/// `RUST_LOG` overrides the default `info` filter. `service` names the
/// binary in the first emitted line.
pub fn init_tracing(service: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let fmt_layer = fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    // try_init also wires the log-to-tracing bridge for crates still on
    // the `log` facade.
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    tracing::info!(target: "telemetry", service, "structured logging initialized");
    Ok(())
}
