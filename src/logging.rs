//! Tracing subscriber setup for the command-line tool

use std::io::{self, IsTerminal};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{Error, Result};

/// Filter directive for a verbosity level; `quiet` wins over verbosity
pub fn filter_directive(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "countae=info,warn",
        1 => "countae=debug,info",
        2 => "countae=trace,debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the verbosity flags.
pub fn init_logging(verbosity: u8, quiet: bool, json_output: bool) -> Result<()> {
    let env_filter = if quiet {
        EnvFilter::new(filter_directive(verbosity, quiet))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbosity, quiet)))
    };

    let result = if json_output {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(json_layer).try_init()
    } else if io::stderr().is_terminal() {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_ansi(true)
            .with_writer(io::stderr)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(fmt_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .without_time()
            .with_writer(io::stderr)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(fmt_layer).try_init()
    };

    result.map_err(|e| Error::internal(format!("failed to install logger: {}", e)))
}
