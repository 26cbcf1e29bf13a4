//! Live toolchain output, tagged with the compile it belongs to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tpo_exec::{LineSink, OutputStream};

/// One line written by a running toolchain.
#[derive(Debug, Clone, Copy)]
pub struct OutputLine<'a> {
    /// Platform being built.
    pub platform: &'a str,
    /// Example as requested.
    pub example: &'a Path,
    /// Pipe the line came from.
    pub stream: OutputStream,
    /// The line, without its terminator.
    pub line: &'a str,
}

/// Receives toolchain output while builds run. Called concurrently from the
/// reader threads of every running compile; cache hits and followers of an
/// in-flight build stream nothing.
pub type OutputSink = Arc<dyn Fn(&OutputLine<'_>) + Send + Sync>;

/// Adapts `sink` to the executor's per-line callback for one compile.
pub(crate) fn line_sink(sink: &OutputSink, platform: &str, example: &Path) -> LineSink {
    let sink = Arc::clone(sink);
    let platform = platform.to_string();
    let example: PathBuf = example.to_path_buf();
    Arc::new(move |stream: OutputStream, line: &str| {
        sink(&OutputLine {
            platform: &platform,
            example: &example,
            stream,
            line,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn lines_are_tagged_with_their_compile() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&seen);
        let sink: OutputSink = Arc::new(move |line: &OutputLine<'_>| {
            store.lock().push(format!(
                "{} {} {}: {}",
                line.platform,
                line.example.display(),
                line.stream.as_str(),
                line.line
            ))
        });

        let lines = line_sink(&sink, "native", Path::new("examples/Blink"));
        lines(OutputStream::Stdout, "Compiling main.cpp");
        lines(OutputStream::Stderr, "warning: unused variable");
        assert_eq!(
            *seen.lock(),
            vec![
                "native examples/Blink stdout: Compiling main.cpp",
                "native examples/Blink stderr: warning: unused variable",
            ]
        );
    }
}
