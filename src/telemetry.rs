//! Diagnostics: `tracing` fmt output on stderr, plus optional OpenTelemetry span export.
//!
//! Filter precedence: `DERIVEBOX_LOG`, then `RUST_LOG`, then the level implied by
//! `--verbose`/`--quiet`. With the `otel` feature and `DERIVEBOX_OTEL=1`, spans are
//! also exported to stdout through the OpenTelemetry SDK.

use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

/// Shuts the span exporter down (flushing pending spans) when dropped.
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

/// Default filter directive for the given output flags.
pub fn default_directive(verbose: bool, quiet: bool) -> &'static str {
    if quiet {
        "error"
    } else if verbose {
        "info"
    } else {
        "warn"
    }
}

fn filter_from_env<F>(get: F, fallback: &str) -> EnvFilter
where
    F: Fn(&str) -> Option<String>,
{
    let spec = get("DERIVEBOX_LOG")
        .or_else(|| get("RUST_LOG"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    match spec {
        Some(s) => EnvFilter::try_new(&s).unwrap_or_else(|e| {
            eprintln!("derivebox: ignoring invalid log filter {s:?}: {e}");
            EnvFilter::new(fallback)
        }),
        None => EnvFilter::new(fallback),
    }
}

#[cfg(feature = "otel")]
fn otel_enabled_env() -> bool {
    env::var("DERIVEBOX_OTEL").ok().as_deref() == Some("1")
}

#[cfg(feature = "otel")]
fn build_resource() -> opentelemetry_sdk::Resource {
    use opentelemetry::KeyValue;

    let mut builder = opentelemetry_sdk::Resource::builder()
        .with_service_name("derivebox")
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .with_attribute(KeyValue::new("process.pid", std::process::id() as i64));
    if let Ok(host) = hostname::get() {
        if let Ok(s) = host.into_string() {
            builder = builder.with_attribute(KeyValue::new("host.name", s));
        }
    }
    builder.build()
}

/// Install the global subscriber once; later calls return `None`.
pub fn telemetry_init(verbose: bool, quiet: bool) -> Option<TelemetryGuard> {
    if INIT.get().is_some() {
        return None;
    }

    let filter = filter_from_env(|k| env::var(k).ok(), default_directive(verbose, quiet));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(crate::color::color_enabled_stderr());
    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    #[cfg(feature = "otel")]
    let (registry, provider) = {
        use opentelemetry::trace::TracerProvider as _;

        if otel_enabled_env() {
            let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
                .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
                .with_resource(build_resource())
                .build();
            let tracer = provider.tracer("derivebox");
            let layer = tracing_opentelemetry::layer().with_tracer(tracer);
            (registry.with(Some(layer)), Some(provider))
        } else {
            (registry.with(None), None)
        }
    };

    if registry.try_init().is_err() {
        eprintln!("derivebox: telemetry init skipped (global subscriber already set)");
        return None;
    }
    let _ = INIT.set(());

    Some(TelemetryGuard {
        #[cfg(feature = "otel")]
        provider,
    })
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        {
            if let Some(provider) = self.provider.take() {
                if let Err(e) = provider.shutdown() {
                    eprintln!("derivebox: telemetry shutdown failed: {e}");
                }
            }
        }
    }
}
