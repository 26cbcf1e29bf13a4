//! tpo CLI: compile firmware examples for many platforms at once.
//!
//! Provides `tpo build` for batch compilation across platforms, `tpo info`
//! for toolchain metadata, and `tpo cache` for build cache maintenance.

#![warn(missing_docs)]

mod build;
mod cache;
mod context;
mod info;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// tpo: a parallel, cached firmware build orchestrator.
#[derive(Parser, Debug)]
#[command(name = "tpo", version, about = "Turbo platform orchestrator")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output and stream toolchain output live.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a `tpo.toml` file or the directory holding it.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile examples for one or more platforms.
    Build(BuildArgs),
    /// Print probed toolchain metadata for platforms.
    Info(InfoArgs),
    /// Inspect or maintain the build cache.
    Cache {
        /// The cache operation.
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Arguments for the `tpo build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Sketch directories, `.ino` files, or existing projects.
    #[arg(required = true)]
    pub examples: Vec<PathBuf>,

    /// Platform to build for; repeat for several (default: `native`).
    #[arg(short, long = "platform")]
    pub platforms: Vec<String>,

    /// Maximum concurrent compiles (default: host parallelism).
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Per-compile time limit in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Ignore cached builds and clean before compiling.
    #[arg(long)]
    pub clean: bool,

    /// Output format for results.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Arguments for the `tpo info` subcommand.
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Platform to describe; repeat for several (default: `native`).
    #[arg(short, long = "platform")]
    pub platforms: Vec<String>,
}

/// Build cache operations.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Show entry count and size against the budgets.
    Stats,
    /// Remove orphaned artifacts and stale temporary files.
    Gc,
    /// Remove every cached build.
    Purge,
}

/// Result output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };
    init_logging(&global);

    let result = match cli.command {
        Command::Build(ref args) => build::run(args, &global),
        Command::Info(ref args) => info::run(args, &global),
        Command::Cache { action } => cache::run(action, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Installs the stderr log subscriber.
///
/// `-v` and `-q` override `RUST_LOG`; otherwise `RUST_LOG` applies, falling
/// back to `warn`.
fn init_logging(global: &GlobalArgs) {
    let filter = match log_level(global) {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn log_level(global: &GlobalArgs) -> Option<&'static str> {
    if global.verbose {
        Some("debug")
    } else if global.quiet {
        Some("error")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_build_default() {
        let cli = Cli::parse_from(["tpo", "build", "examples/Blink"]);
        match cli.command {
            Command::Build(ref args) => {
                assert_eq!(args.examples, vec![PathBuf::from("examples/Blink")]);
                assert!(args.platforms.is_empty());
                assert!(args.jobs.is_none());
                assert!(args.timeout.is_none());
                assert!(!args.clean);
                assert_eq!(args.format, ReportFormat::Text);
            }
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn parse_build_with_args() {
        let cli = Cli::parse_from([
            "tpo", "build", "a", "b.ino", "-p", "native", "-p", "uno", "--jobs", "4",
            "--timeout", "30", "--clean", "--format", "json",
        ]);
        match cli.command {
            Command::Build(ref args) => {
                assert_eq!(args.examples.len(), 2);
                assert_eq!(args.platforms, vec!["native", "uno"]);
                assert_eq!(args.jobs, Some(4));
                assert_eq!(args.timeout, Some(30));
                assert!(args.clean);
                assert_eq!(args.format, ReportFormat::Json);
            }
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn build_requires_examples() {
        assert!(Cli::try_parse_from(["tpo", "build"]).is_err());
    }

    #[test]
    fn parse_info_platforms() {
        let cli = Cli::parse_from(["tpo", "info", "--platform", "teensy41"]);
        match cli.command {
            Command::Info(ref args) => assert_eq!(args.platforms, vec!["teensy41"]),
            _ => panic!("expected Info command"),
        }
    }

    #[test]
    fn parse_cache_actions() {
        for (word, action) in [
            ("stats", CacheAction::Stats),
            ("gc", CacheAction::Gc),
            ("purge", CacheAction::Purge),
        ] {
            let cli = Cli::parse_from(["tpo", "cache", word]);
            match cli.command {
                Command::Cache { action: parsed } => assert_eq!(parsed, action),
                _ => panic!("expected Cache command"),
            }
        }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::parse_from(["tpo", "--quiet", "--config", "ci/tpo.toml", "cache", "stats"]);
        assert!(cli.quiet);
        assert!(!cli.verbose);
        assert_eq!(cli.config.as_deref(), Some("ci/tpo.toml"));
    }

    #[test]
    fn verbose_wins_over_quiet() {
        let global = GlobalArgs {
            quiet: true,
            verbose: true,
            config: None,
        };
        assert_eq!(log_level(&global), Some("debug"));
        let default = GlobalArgs {
            quiet: false,
            verbose: false,
            config: None,
        };
        assert_eq!(log_level(&default), None);
    }
}
