//! Bounded, order-preserving batch execution.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use rayon::prelude::*;
use tpo_common::CancelToken;
use tracing::{error, info, warn};

use crate::instance::CompilerInstance;
use crate::output::OutputSink;
use crate::result::{CompileResult, ErrorKind};

/// Runs batches of compiles on a dedicated worker pool.
///
/// Results land in slots pre-sized to the input, so the output order always
/// matches the input order whatever the completion order. Each compile is
/// isolated: a failure, timeout, or even a panic affects only its own slot.
pub struct ResultAggregator {
    pool: Option<rayon::ThreadPool>,
    workers: usize,
    cancel: CancelToken,
    sink: Option<OutputSink>,
}

impl ResultAggregator {
    /// Creates an aggregator with `workers` threads (at least one).
    ///
    /// If the pool cannot be created the aggregator falls back to running
    /// compiles one at a time on the calling thread.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tpo-worker-{i}"))
            .build()
            .map_err(|e| warn!(error = %e, "worker pool unavailable, compiling sequentially"))
            .ok();
        Self {
            pool,
            workers,
            cancel: CancelToken::new(),
            sink: None,
        }
    }

    /// Streams the output of every build this aggregator runs to `sink`.
    pub fn with_output_sink(mut self, sink: OutputSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Worker count.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// A handle that cancels this aggregator's batches. Compiles not yet
    /// started report `Cancelled`; running toolchains are killed.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Compiles `examples` for one platform.
    pub fn run<P: AsRef<Path> + Sync>(
        &self,
        instance: &CompilerInstance,
        examples: &[P],
    ) -> Vec<CompileResult> {
        let jobs: Vec<(&CompilerInstance, &Path)> =
            examples.iter().map(|e| (instance, e.as_ref())).collect();
        self.run_jobs(&jobs)
    }

    /// Compiles every example for every instance. Results are ordered by
    /// instance, then by example.
    pub fn run_matrix<P: AsRef<Path> + Sync>(
        &self,
        instances: &[CompilerInstance],
        examples: &[P],
    ) -> Vec<CompileResult> {
        let jobs: Vec<(&CompilerInstance, &Path)> = instances
            .iter()
            .flat_map(|inst| examples.iter().map(move |e| (inst, e.as_ref())))
            .collect();
        self.run_jobs(&jobs)
    }

    fn run_jobs(&self, jobs: &[(&CompilerInstance, &Path)]) -> Vec<CompileResult> {
        let mut slots: Vec<Option<CompileResult>> = vec![None; jobs.len()];
        let cancel = &self.cancel;
        let sink = self.sink.as_ref();
        let fill = |(i, slot): (usize, &mut Option<CompileResult>)| {
            let (instance, example) = jobs[i];
            *slot = Some(isolated(instance, example, cancel, sink));
        };

        match &self.pool {
            Some(pool) => pool.install(|| {
                slots
                    .par_iter_mut()
                    .enumerate()
                    .with_max_len(1)
                    .for_each(fill)
            }),
            None => slots.iter_mut().enumerate().for_each(fill),
        }

        let results: Vec<CompileResult> = slots
            .into_iter()
            .zip(jobs)
            .map(|(slot, (instance, example))| {
                slot.unwrap_or_else(|| {
                    CompileResult::failure(
                        instance.platform().name(),
                        example,
                        ErrorKind::Internal,
                        "compile produced no result",
                    )
                })
            })
            .collect();

        let failed = results.iter().filter(|r| !r.ok()).count();
        info!(total = results.len(), failed, workers = self.workers, "batch finished");
        results
    }
}

fn isolated(
    instance: &CompilerInstance,
    example: &Path,
    cancel: &CancelToken,
    sink: Option<&OutputSink>,
) -> CompileResult {
    panic::catch_unwind(AssertUnwindSafe(|| instance.compile_observed(example, cancel, sink)))
        .unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "compile panicked".to_string());
            error!(example = %example.display(), %message, "compile panicked");
            CompileResult::failure(instance.platform().name(), example, ErrorKind::Internal, message)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompilerOptions;
    use tpo_common::PlatformDescriptor;

    fn uninitialized(work: &Path, name: &str) -> CompilerInstance {
        CompilerInstance::new(
            PlatformDescriptor::hardware(name, "[env]\n"),
            CompilerOptions::new(work),
        )
    }

    #[test]
    fn one_result_per_example_in_order() {
        let work = tempfile::tempdir().unwrap();
        let inst = uninitialized(work.path(), "uno");
        let examples = ["a", "b", "c", "d", "e"];
        let results = ResultAggregator::new(3).run(&inst, &examples);
        assert_eq!(results.len(), 5);
        for (result, example) in results.iter().zip(examples) {
            assert_eq!(result.example, Path::new(example));
            assert_eq!(result.error_kind(), Some(ErrorKind::NotInitialized));
        }
    }

    #[test]
    fn matrix_is_platform_major() {
        let work = tempfile::tempdir().unwrap();
        let instances = vec![uninitialized(work.path(), "uno"), uninitialized(work.path(), "due")];
        let results = ResultAggregator::new(2).run_matrix(&instances, &["x", "y"]);
        let labels: Vec<_> = results
            .iter()
            .map(|r| format!("{}:{}", r.platform, r.example.display()))
            .collect();
        assert_eq!(labels, vec!["uno:x", "uno:y", "due:x", "due:y"]);
    }

    #[test]
    fn empty_batch() {
        let work = tempfile::tempdir().unwrap();
        let inst = uninitialized(work.path(), "uno");
        let none: [&str; 0] = [];
        assert!(ResultAggregator::new(2).run(&inst, &none).is_empty());
    }

    #[test]
    fn zero_workers_clamped() {
        assert_eq!(ResultAggregator::new(0).workers(), 1);
    }
}
