pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds the process-wide root logger writing structured records to stderr.
pub fn init() -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Debug);
    builder.destination(Destination::Stderr);

    builder.build().expect("Logger construction failed")
}

/// A logger that swallows every record. Used by components constructed
/// without a parent logger.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
