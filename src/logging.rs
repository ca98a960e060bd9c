//! Structured logging via `tracing`
//!
//! The library only emits events; the binary decides how to render them.

use std::io::IsTerminal;

use tracing::{span, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log verbosity selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Verbosity {
    /// Default filter directive for this level
    pub fn filter_directive(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "rfpanalyst=warn,warn",
            Verbosity::Normal => "rfpanalyst=info,warn",
            Verbosity::Verbose => "rfpanalyst=debug,info",
            Verbosity::VeryVerbose => "rfpanalyst=trace,debug",
        }
    }

    /// Whether progress bars should be drawn
    pub fn show_progress(&self) -> bool {
        !matches!(self, Verbosity::Quiet)
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `verbosity`.
pub fn init_tracing(verbosity: Verbosity) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(verbosity.filter_directive()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let verbose = matches!(verbosity, Verbosity::Verbose | Verbosity::VeryVerbose);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .with_target(verbose)
                .with_line_number(false)
                .with_file(false)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise tracing: {}", e))?;

    Ok(())
}

/// Span wrapping one stage execution
pub fn stage_span(document_id: &str, stage: &str) -> tracing::Span {
    span!(
        Level::INFO,
        "stage",
        document_id = %short_id(document_id),
        stage = %stage,
    )
}

/// First 12 hex chars of a content hash, for log lines
pub fn short_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(12)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_filter_directives() {
        assert!(Verbosity::Quiet.filter_directive().contains("warn"));
        assert!(Verbosity::Verbose.filter_directive().contains("debug"));
        assert!(!Verbosity::Quiet.show_progress());
        assert!(Verbosity::Normal.show_progress());
    }
}
