//! `tpo build`: compile examples across platforms.

use std::sync::Arc;

use tpo_compiler::{CompileResult, CompilerOptions, OutputLine, OutputSink, ResultAggregator};

use crate::context;
use crate::{BuildArgs, GlobalArgs, ReportFormat};

/// Runs the `tpo build` command.
///
/// Returns exit code 0 only if every (platform, example) pair compiled.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let mut config = context::load(global)?;
    if let Some(jobs) = args.jobs {
        config.batch.workers = jobs;
    }
    if let Some(timeout) = args.timeout {
        if timeout == 0 {
            return Err("--timeout must be at least 1 second".into());
        }
        config.exec.timeout_secs = timeout;
    }

    let mut options = CompilerOptions::from_config(&config);
    options.force_rebuild = args.clean;

    let platforms = context::platforms(&config, &args.platforms)?;
    if !global.quiet && args.format == ReportFormat::Text {
        let names: Vec<_> = platforms.iter().map(|p| p.name()).collect();
        eprintln!(
            "  Building {} example(s) for {}",
            args.examples.len(),
            names.join(", ")
        );
    }
    let instances = context::instances(platforms, &options, global);

    let mut aggregator = ResultAggregator::new(options.effective_workers());
    if global.verbose && !global.quiet && args.format == ReportFormat::Text {
        let sink: OutputSink = Arc::new(|line: &OutputLine<'_>| eprintln!("{}", live_line(line)));
        aggregator = aggregator.with_output_sink(sink);
    }
    let results = aggregator.run_matrix(&instances, &args.examples);

    match args.format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        ReportFormat::Text => print_text(&results, global),
    }

    Ok(exit_code(&results))
}

fn print_text(results: &[CompileResult], global: &GlobalArgs) {
    for result in results {
        println!("{}", result.summary());
        if !result.ok() && !global.quiet {
            for line in result.stderr.lines() {
                println!("    | {line}");
            }
        }
    }

    if !global.quiet {
        let failed = results.iter().filter(|r| !r.ok()).count();
        let cached = results.iter().filter(|r| r.from_cache).count();
        eprintln!();
        eprintln!(
            "  {} passed, {} failed, {} from cache",
            results.len() - failed,
            failed,
            cached
        );
    }
}

/// Formats a line of toolchain output shown while `-v` builds run.
fn live_line(line: &OutputLine<'_>) -> String {
    let example = line
        .example
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_else(|| line.example.to_string_lossy());
    format!("  [{} {}] {}", line.platform, example, line.line)
}

fn exit_code(results: &[CompileResult]) -> i32 {
    if results.iter().all(CompileResult::ok) {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tpo_compiler::{ErrorKind, OutputStream};

    #[test]
    fn exit_code_requires_all_ok() {
        let ok = CompileResult::success("native", Path::new("a"));
        let bad = CompileResult::failure("native", Path::new("b"), ErrorKind::BuildFailed, "boom");
        assert_eq!(exit_code(&[ok.clone()]), 0);
        assert_eq!(exit_code(&[ok, bad]), 1);
        assert_eq!(exit_code(&[]), 0);
    }

    #[test]
    fn live_lines_name_platform_and_example() {
        let line = OutputLine {
            platform: "native",
            example: Path::new("sketches/Blink"),
            stream: OutputStream::Stdout,
            line: "Linking .pio/build/native/program",
        };
        assert_eq!(live_line(&line), "  [native Blink] Linking .pio/build/native/program");
    }
}
