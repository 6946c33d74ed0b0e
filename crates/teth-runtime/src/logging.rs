//! Logging setup for Teth applications.
//!
//! Teth crates log through `tracing`; this module installs a
//! `tracing-subscriber` registry for them. Dispatch opens `send` and
//! `circular` spans, so span events are the quickest way to watch messages
//! move through contexts.
//!
//! # Configuration-Based Initialization
//!
//! ```rust,ignore
//! use teth_runtime::{config::load_config, logging};
//!
//! let config = load_config()?;
//! logging::init_from_config(&config.logging);
//! ```
//!
//! # Manual Initialization
//!
//! ```rust,ignore
//! use teth_runtime::logging::{LoggingBuilder, SpanEvents};
//!
//! LoggingBuilder::new()
//!     .with_level(tracing::Level::WARN)
//!     .directive("teth_framework=debug")
//!     .span_events(SpanEvents::LIFECYCLE)
//!     .try_init()?;
//! ```

use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::{FmtSpan, Format};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{self, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LogOutput, LoggingConfig, SpanEventConfig};

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    /// Log when a span is created.
    pub new: bool,
    /// Log when a span is entered.
    pub enter: bool,
    /// Log when a span is exited.
    pub exit: bool,
    /// Log when a span is closed.
    pub close: bool,
}

impl SpanEvents {
    /// No span events.
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// Span creation and close: each dispatch once at its start and once at
    /// its end.
    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    /// Every span event.
    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn to_fmt_span(self) -> FmtSpan {
        [
            (self.new, FmtSpan::NEW),
            (self.enter, FmtSpan::ENTER),
            (self.exit, FmtSpan::EXIT),
            (self.close, FmtSpan::CLOSE),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .fold(FmtSpan::NONE, |span, (_, flag)| span | flag)
    }
}

impl From<&SpanEventConfig> for SpanEvents {
    fn from(config: &SpanEventConfig) -> Self {
        Self {
            new: config.new,
            enter: config.enter,
            exit: config.exit,
            close: config.close,
        }
    }
}

/// Initializes logging from a [`LoggingConfig`].
///
/// Does nothing if a global subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

// =============================================================================
// LoggingBuilder
// =============================================================================

/// Builds and installs the global subscriber.
///
/// Format, destination, thread ids and file locations come from
/// [`LoggingConfig`]; the setters cover what applications usually tweak in
/// code.
#[derive(Debug, Default)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: Option<tracing::Level>,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    thread_ids: bool,
    file_location: bool,
}

impl LoggingBuilder {
    /// Creates a builder logging at `INFO` in the compact format to stdout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder from a [`LoggingConfig`].
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            directives: config
                .filters
                .iter()
                .map(|(target, level)| format!("{target}={level}"))
                .collect(),
            level: Some(config.level.to_tracing_level()),
            span_events: SpanEvents::from(&config.span_events),
            format: config.format,
            output: config.output,
            thread_ids: config.thread_ids,
            file_location: config.file_location,
        }
    }

    /// Sets the base level used when `RUST_LOG` is not set.
    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Adds a filter directive such as `teth_framework::context=trace`.
    /// Directives that do not parse are skipped.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    /// Selects which span events are logged.
    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    /// `RUST_LOG` if set, else the base level, plus every directive that parses.
    fn build_filter(&self) -> EnvFilter {
        let base = self.level.unwrap_or(tracing::Level::INFO).to_string();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(base.to_lowercase()));

        self.directives
            .iter()
            .filter_map(|directive| directive.parse::<Directive>().ok())
            .fold(filter, EnvFilter::add_directive)
    }

    fn decorate<N, L, T, W>(
        &self,
        layer: fmt::Layer<Registry, N, Format<L, T>, W>,
    ) -> fmt::Layer<Registry, N, Format<L, T>, W>
    where
        N: for<'writer> FormatFields<'writer> + 'static,
    {
        layer
            .with_span_events(self.span_events.to_fmt_span())
            .with_thread_ids(self.thread_ids)
            .with_file(self.file_location)
            .with_line_number(self.file_location)
    }

    /// Installs the subscriber, failing if one is already set.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let writer = match self.output {
            LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        };

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            #[cfg(feature = "json-log")]
            LogFormat::Json => self.decorate(fmt::layer().json()).with_writer(writer).boxed(),
            LogFormat::Compact => self
                .decorate(fmt::layer().compact())
                .with_writer(writer)
                .boxed(),
            LogFormat::Full => self.decorate(fmt::layer()).with_writer(writer).boxed(),
            LogFormat::Pretty => self
                .decorate(fmt::layer().pretty())
                .with_writer(writer)
                .boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(self.build_filter())
            .try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_from_config() {
        let mut config = LoggingConfig {
            level: LogLevel::Debug,
            output: LogOutput::Stderr,
            thread_ids: true,
            span_events: SpanEventConfig {
                new: true,
                close: true,
                ..Default::default()
            },
            ..Default::default()
        };
        config
            .filters
            .insert("teth_framework".to_string(), LogLevel::Trace);

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, Some(tracing::Level::DEBUG));
        assert_eq!(builder.output, LogOutput::Stderr);
        assert_eq!(builder.span_events, SpanEvents::LIFECYCLE);
        assert_eq!(builder.directives, vec!["teth_framework=trace".to_string()]);
        assert!(builder.thread_ids);
        assert!(!builder.file_location);
    }

    #[test]
    fn test_manual_builder() {
        let builder = LoggingBuilder::new()
            .with_level(tracing::Level::WARN)
            .directive("teth_core=debug")
            .directive("not a directive!")
            .span_events(SpanEvents::FULL);

        assert_eq!(builder.level, Some(tracing::Level::WARN));
        assert_eq!(builder.span_events, SpanEvents::FULL);
        assert_eq!(builder.format, LogFormat::Compact);

        let filter = builder.build_filter().to_string();
        assert!(filter.contains("teth_core=debug"));
        assert!(!filter.contains("not a directive"));
    }

    #[test]
    fn test_span_event_flags() {
        assert_eq!(
            SpanEvents::FULL.to_fmt_span(),
            FmtSpan::NEW | FmtSpan::ENTER | FmtSpan::EXIT | FmtSpan::CLOSE
        );
        assert_eq!(
            SpanEvents::LIFECYCLE.to_fmt_span(),
            FmtSpan::NEW | FmtSpan::CLOSE
        );
        assert_eq!(SpanEvents::NONE.to_fmt_span(), FmtSpan::NONE);
    }
}
