//! Compiler instances and batch orchestration.
//!
//! A [`CompilerInstance`] binds one platform to the external toolchain: it
//! prepares a project skeleton, probes the toolchain, and turns each compile
//! request into a [`CompileResult`], consulting the shared build cache first.
//! A [`ResultAggregator`] runs many compiles on a bounded worker pool and
//! returns results in input order, optionally streaming toolchain output to
//! an [`OutputSink`] as it is produced.
//!
//! Per-example failures are data: `compile` never returns `Err` and a batch
//! always yields exactly one result per requested example.

#![warn(missing_docs)]

pub mod aggregator;
pub mod error;
pub mod inflight;
pub mod instance;
pub mod options;
pub mod output;
pub mod project;
pub mod result;

pub use aggregator::ResultAggregator;
pub use error::CompilerError;
pub use inflight::{Claim, InFlightRegistry};
pub use instance::{CompilerInstance, InstanceState};
pub use options::CompilerOptions;
pub use output::{OutputLine, OutputSink};
pub use project::{classify_example, ExampleKind};
pub use result::{BuildInfo, CompileError, CompileResult, ErrorKind};
pub use tpo_exec::OutputStream;
