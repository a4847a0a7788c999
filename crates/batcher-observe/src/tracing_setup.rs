//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use batcher_types::config::LogConfig;
//!
//! // Text logs on stdout at INFO
//! batcher_observe::tracing_setup::init_tracing(&LogConfig::default(), false).unwrap();
//! ```

use std::io::{self, IsTerminal};
use std::sync::OnceLock;

use batcher_types::config::{LogConfig, LogFormat, LogOutput};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Boxed formatting layer, text or JSON depending on `config.format`.
///
/// Generic over the writer so callers (and tests) can route output anywhere
/// that implements `MakeWriter`. `ansi` only applies to the text format.
pub fn fmt_layer<S, W>(config: &LogConfig, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(writer);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Text => layer.with_ansi(ansi).boxed(),
    }
}

/// Filter admitting records at or above the configured level.
pub fn level_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::new(config.level.as_filter())
}

/// Initialize the global tracing subscriber.
///
/// - Installs a `fmt` layer in the configured format on stdout or stderr.
/// - `RUST_LOG`, when set, takes precedence over `config.level`.
/// - When `enable_otel` is true, additionally bridges tracing spans to
///   OpenTelemetry using a stdout exporter.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set.
pub fn init_tracing(
    config: &LogConfig,
    enable_otel: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(config));

    let fmt_layer = match config.output {
        LogOutput::Stdout => fmt_layer(config, io::stdout, io::stdout().is_terminal()),
        LogOutput::Stderr => fmt_layer(config, io::stderr, io::stderr().is_terminal()),
    };

    let otel_layer = if enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("batcher");

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    tracing::info!(
        level = %config.level,
        format = %config.format,
        output = %config.output,
        "logger initialized"
    );
    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// Safe to call even when OTel was not enabled (no-op in that case).
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batcher_types::config::LogLevel;
    use std::sync::{Arc, Mutex};

    /// In-memory sink shared between the layer and the assertions.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for SharedBuf {
        type Writer = SharedBuf;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(config: &LogConfig, emit: impl FnOnce()) -> String {
        let buf = SharedBuf::default();
        let subscriber = tracing_subscriber::registry()
            .with(level_filter(config))
            .with(fmt_layer(config, buf.clone(), false));
        tracing::subscriber::with_default(subscriber, emit);
        buf.contents()
    }

    #[test]
    fn text_layer_writes_level_and_message() {
        let config = LogConfig {
            level: LogLevel::Debug,
            format: LogFormat::Text,
            output: LogOutput::Stdout,
        };
        let out = capture(&config, || tracing::info!("test message"));
        assert!(out.contains("test message"));
        assert!(out.contains("INFO"));
    }

    #[test]
    fn json_layer_writes_structured_record() {
        let config = LogConfig {
            format: LogFormat::Json,
            ..LogConfig::default()
        };
        let out = capture(&config, || tracing::info!(subscribers = 3, "bus ready"));

        let line = out.lines().next().expect("one record");
        let record: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(record["level"], "INFO");
        assert_eq!(record["fields"]["message"], "bus ready");
        assert_eq!(record["fields"]["subscribers"], 3);
    }

    #[test]
    fn records_below_configured_level_are_filtered() {
        let config = LogConfig {
            level: LogLevel::Warn,
            ..LogConfig::default()
        };
        let out = capture(&config, || {
            tracing::info!("quiet");
            tracing::warn!("loud");
        });
        assert!(!out.contains("quiet"));
        assert!(out.contains("loud"));
    }

    #[test]
    fn shutdown_without_otel_is_noop() {
        shutdown_tracing();
    }
}
