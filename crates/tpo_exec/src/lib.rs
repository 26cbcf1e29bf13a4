//! Subprocess execution with full output capture, timeouts, and cancellation.
//!
//! The executor knows nothing about platforms or caching: it launches a
//! command in a working directory, drains stdout and stderr on dedicated
//! threads (optionally streaming each line to a caller's sink), and reports
//! the exit status verbatim. A non-zero exit code is not
//! an error at this layer.

#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod executor;

pub use command::CommandSpec;
pub use error::ExecError;
pub use executor::{LineSink, OutputStream, ProcessExecutor, ProcessOutput, DEFAULT_MAX_OUTPUT_BYTES};
