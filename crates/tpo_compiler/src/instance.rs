//! One platform's compiler: lifecycle, compile pipeline, and build metadata.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tpo_cache::{BuildCache, BuildFingerprint, BuildRecord, CachedBuild, FingerprintInput};
use tpo_common::fsutil::now_millis;
use tpo_common::{CancelToken, PlatformDescriptor};
use tpo_config::expand_args;
use tpo_exec::{CommandSpec, ExecError, ProcessExecutor, ProcessOutput};
use tpo_shim::{detect_shim_mode, NativeShimProvisioner, ShimMode, SHIM_VERSION};
use tracing::{debug, error, info, info_span, warn};

use crate::aggregator::ResultAggregator;
use crate::error::CompilerError;
use crate::inflight::{Claim, InFlightRegistry};
use crate::options::CompilerOptions;
use crate::output::{line_sink, OutputSink};
use crate::project::{classify_example, stage_project, write_if_changed, ExampleKind};
use crate::result::{BuildInfo, CompileResult, ErrorKind};

/// Directory, relative to a project, used as the toolchain's private home.
const TOOLCHAIN_HOME_DIR: &str = ".tpo_home";

/// Lifecycle of a [`CompilerInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Constructed; `initialize` has not run.
    Uninitialized,
    /// `initialize` is in progress.
    Initializing,
    /// Ready to compile.
    Ready,
    /// `initialize` failed; terminal.
    Failed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Uninitialized => "uninitialized",
            InstanceState::Initializing => "initializing",
            InstanceState::Ready => "ready",
            InstanceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct Prepared {
    build_info: BuildInfo,
    toolchain_identity: String,
    cache: Option<BuildCache>,
}

enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready(Arc<Prepared>),
    Failed(String),
}

/// Compiles examples for a single platform.
///
/// Construct with [`new`](Self::new), call [`initialize`](Self::initialize)
/// once, then [`compile`](Self::compile) or
/// [`multi_compile`](Self::multi_compile) from any number of threads.
pub struct CompilerInstance {
    platform: PlatformDescriptor,
    options: CompilerOptions,
    executor: ProcessExecutor,
    lifecycle: RwLock<Lifecycle>,
    init_lock: Mutex<()>,
    inflight: Arc<InFlightRegistry>,
}

impl fmt::Debug for CompilerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerInstance")
            .field("platform", &self.platform.name())
            .field("state", &self.state())
            .finish()
    }
}

impl CompilerInstance {
    /// Creates an uninitialized instance.
    pub fn new(platform: PlatformDescriptor, options: CompilerOptions) -> Self {
        let executor = ProcessExecutor::new(options.max_output_bytes);
        let inflight = InFlightRegistry::shared(&options.work_dir);
        Self {
            platform,
            options,
            executor,
            lifecycle: RwLock::new(Lifecycle::Uninitialized),
            init_lock: Mutex::new(()),
            inflight,
        }
    }

    /// The platform this instance builds for.
    pub fn platform(&self) -> &PlatformDescriptor {
        &self.platform
    }

    /// The options this instance was created with.
    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InstanceState {
        match &*self.lifecycle.read() {
            Lifecycle::Uninitialized => InstanceState::Uninitialized,
            Lifecycle::Initializing => InstanceState::Initializing,
            Lifecycle::Ready(_) => InstanceState::Ready,
            Lifecycle::Failed(_) => InstanceState::Failed,
        }
    }

    /// The platform's skeleton directory under the work root.
    pub fn platform_dir(&self) -> PathBuf {
        self.options.work_dir.join(self.platform.safe_name())
    }

    /// Prepares the platform skeleton and probes the toolchain.
    ///
    /// Idempotent once successful. A failure is terminal: the instance stays
    /// `Failed` and every later call reports the original fault.
    pub fn initialize(&self) -> Result<(), CompilerError> {
        let _serial = self.init_lock.lock();
        match &*self.lifecycle.read() {
            Lifecycle::Ready(_) => return Ok(()),
            Lifecycle::Failed(reason) => {
                return Err(CompilerError::InitializationFailed {
                    platform: self.platform.name().to_string(),
                    reason: reason.clone(),
                })
            }
            Lifecycle::Uninitialized | Lifecycle::Initializing => {}
        }
        *self.lifecycle.write() = Lifecycle::Initializing;

        let _span = info_span!("initialize", platform = %self.platform.name()).entered();
        match self.prepare() {
            Ok(prepared) => {
                info!(
                    version = %prepared.build_info.toolchain_version,
                    cache = prepared.cache.is_some(),
                    "compiler ready"
                );
                *self.lifecycle.write() = Lifecycle::Ready(Arc::new(prepared));
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                error!(error = %reason, "initialization failed");
                *self.lifecycle.write() = Lifecycle::Failed(reason.clone());
                Err(CompilerError::InitializationFailed {
                    platform: self.platform.name().to_string(),
                    reason,
                })
            }
        }
    }

    fn prepare(&self) -> Result<Prepared, CompilerError> {
        let dir = self.platform_dir();
        fs::create_dir_all(&dir).map_err(|e| CompilerError::io(&dir, e))?;
        write_if_changed(
            &dir.join(&self.options.toolchain.config_file),
            self.platform.config(),
        )?;
        if self.platform.is_host_native() {
            NativeShimProvisioner::new().provision(&dir, ShimMode::Standard)?;
        }

        let build_info = self.probe(&dir)?;
        let toolchain_identity = self.toolchain_identity(&build_info);

        let cache = match &self.options.cache {
            Some(settings) => match BuildCache::open(settings.clone()) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!(error = %e, "build cache unavailable, continuing without it");
                    None
                }
            },
            None => None,
        };

        Ok(Prepared {
            build_info,
            toolchain_identity,
            cache,
        })
    }

    fn probe(&self, dir: &Path) -> Result<BuildInfo, CompilerError> {
        let toolchain = &self.options.toolchain;
        let version = if toolchain.version_args.is_empty() {
            "unknown".to_string()
        } else {
            let spec = self.command(&toolchain.version_args, dir);
            let output = self.executor.run(dir, &spec, self.options.timeout)?;
            if !output.success() {
                return Err(CompilerError::ProbeFailed {
                    command: spec.to_string(),
                    status: exit_description(&output),
                    stderr: output.stderr.trim().to_string(),
                });
            }
            output
                .stdout
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or("unknown")
                .to_string()
        };
        debug!(%version, "toolchain probed");

        Ok(BuildInfo {
            platform: self.platform.name().to_string(),
            target: self.platform.target(),
            toolchain: toolchain.program.clone(),
            toolchain_version: version,
            work_dir: dir.to_path_buf(),
            config_file_exists: dir.join(&toolchain.config_file).is_file(),
            shim_version: self
                .platform
                .is_host_native()
                .then(|| SHIM_VERSION.to_string()),
            probed_at_ms: now_millis(),
        })
    }

    fn toolchain_identity(&self, info: &BuildInfo) -> String {
        let mut identity = format!("{} {}", info.toolchain, info.toolchain_version);
        if let Some(shim) = &info.shim_version {
            identity.push_str(&format!(" +shim{shim}"));
        }
        identity
    }

    /// Toolchain metadata probed during `initialize`.
    ///
    /// With `refresh`, the probe runs again and the stored record (and the
    /// toolchain identity used for fingerprints) is replaced.
    pub fn build_info(&self, refresh: bool) -> Result<BuildInfo, CompilerError> {
        let prepared = self.prepared()?;
        if !refresh {
            return Ok(prepared.build_info.clone());
        }
        let build_info = self.probe(&self.platform_dir())?;
        let refreshed = Prepared {
            toolchain_identity: self.toolchain_identity(&build_info),
            build_info: build_info.clone(),
            cache: prepared.cache.clone(),
        };
        *self.lifecycle.write() = Lifecycle::Ready(Arc::new(refreshed));
        Ok(build_info)
    }

    fn prepared(&self) -> Result<Arc<Prepared>, CompilerError> {
        match &*self.lifecycle.read() {
            Lifecycle::Ready(prepared) => Ok(Arc::clone(prepared)),
            Lifecycle::Failed(reason) => Err(CompilerError::InitializationFailed {
                platform: self.platform.name().to_string(),
                reason: reason.clone(),
            }),
            Lifecycle::Uninitialized | Lifecycle::Initializing => Err(CompilerError::NotInitialized {
                platform: self.platform.name().to_string(),
            }),
        }
    }

    /// Compiles one example. Never fails: every fault is reported in the
    /// returned result.
    pub fn compile(&self, example: impl AsRef<Path>) -> CompileResult {
        self.compile_with_cancel(example.as_ref(), &CancelToken::new())
    }

    /// Compiles every example concurrently, returning results in input order.
    pub fn multi_compile<P: AsRef<Path> + Sync>(&self, examples: &[P]) -> Vec<CompileResult> {
        ResultAggregator::new(self.options.effective_workers()).run(self, examples)
    }

    /// Like [`compile`](Self::compile), observing a batch cancellation token.
    pub fn compile_with_cancel(&self, example: &Path, cancel: &CancelToken) -> CompileResult {
        self.compile_observed(example, cancel, None)
    }

    /// Like [`compile_with_cancel`](Self::compile_with_cancel), forwarding the
    /// toolchain's output to `sink` line by line while it runs.
    pub fn compile_observed(
        &self,
        example: &Path,
        cancel: &CancelToken,
        sink: Option<&OutputSink>,
    ) -> CompileResult {
        let started = Instant::now();
        let _span = info_span!(
            "compile",
            platform = %self.platform.name(),
            example = %example.display()
        )
        .entered();
        let mut result = self.compile_inner(example, cancel, sink);
        result.example = example.to_path_buf();
        result.duration = started.elapsed();
        match result.error() {
            None => info!(from_cache = result.from_cache, "compile succeeded"),
            Some(e) => warn!(kind = %e.kind, message = %e.message, "compile failed"),
        }
        result
    }

    fn compile_inner(
        &self,
        example: &Path,
        cancel: &CancelToken,
        sink: Option<&OutputSink>,
    ) -> CompileResult {
        let name = self.platform.name();
        let prepared = match self.prepared() {
            Ok(p) => p,
            Err(CompilerError::InitializationFailed { reason, .. }) => {
                return CompileResult::failure(name, example, ErrorKind::InitializationFailed, reason)
            }
            Err(e) => return CompileResult::failure(name, example, ErrorKind::NotInitialized, e.to_string()),
        };
        if cancel.is_cancelled() {
            return self.failed(&prepared, example, ErrorKind::Cancelled, "batch cancelled before start");
        }

        let config_file = &self.options.toolchain.config_file;
        let kind = match classify_example(example, config_file) {
            Ok(kind) => kind,
            Err(message) => return self.failed(&prepared, example, ErrorKind::InvalidExample, message),
        };

        let shim = match self.shim_mode(example, &kind) {
            Ok(shim) => shim,
            Err(e) => return self.failed(&prepared, example, ErrorKind::ProjectSetup, e.to_string()),
        };
        let fingerprint = match self.fingerprint(&prepared, example, &kind, shim) {
            Ok(fp) => fp,
            Err(e) => return self.failed(&prepared, example, ErrorKind::ProjectSetup, e.to_string()),
        };
        debug!(fingerprint = %fingerprint.short(), %shim, "fingerprint computed");

        if let Some(hit) = self.lookup(&prepared, &fingerprint) {
            return self.from_cache(&prepared, example, &fingerprint, hit);
        }

        let leader = loop {
            let waiter = match self.inflight.claim(fingerprint) {
                Claim::Leader(guard) => break guard,
                Claim::Follower(waiter) => waiter,
            };
            debug!(fingerprint = %fingerprint.short(), "joining in-flight build");
            match waiter.wait() {
                // The leader's batch was cancelled, not ours: build it ourselves.
                Some(shared)
                    if shared.error_kind() == Some(ErrorKind::Cancelled) && !cancel.is_cancelled() =>
                {
                    debug!(fingerprint = %fingerprint.short(), "in-flight build was cancelled, retrying");
                }
                Some(shared) => return shared,
                None => {
                    return self.failed(
                        &prepared,
                        example,
                        ErrorKind::Internal,
                        "in-flight build for the same fingerprint was abandoned",
                    )
                }
            }
        };

        // A build that finished between the first lookup and the claim is
        // already cached.
        let result = match self.lookup(&prepared, &fingerprint) {
            Some(hit) => self.from_cache(&prepared, example, &fingerprint, hit),
            None => self.build(&prepared, example, &kind, shim, &fingerprint, cancel, sink),
        };
        leader.publish(&result);
        result
    }

    fn failed(
        &self,
        prepared: &Prepared,
        example: &Path,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> CompileResult {
        let mut result = CompileResult::failure(self.platform.name(), example, kind, message);
        result.build_info = Some(prepared.build_info.clone());
        result
    }

    /// Host-native sketches get the FastLED shim when any of their sources
    /// include FastLED. Projects bring their own sources and get no shim.
    fn shim_mode(&self, example: &Path, kind: &ExampleKind) -> Result<ShimMode, CompilerError> {
        if !self.platform.is_host_native() || *kind == ExampleKind::Project {
            return Ok(ShimMode::Standard);
        }
        Ok(detect_shim_mode(example)?)
    }

    fn fingerprint(
        &self,
        prepared: &Prepared,
        example: &Path,
        kind: &ExampleKind,
        shim: ShimMode,
    ) -> Result<BuildFingerprint, CompilerError> {
        let config = match kind {
            ExampleKind::Project => {
                let path = example.join(&self.options.toolchain.config_file);
                fs::read_to_string(&path).map_err(|e| CompilerError::io(&path, e))?
            }
            ExampleKind::SketchDir | ExampleKind::SketchFile => self.platform.config().to_string(),
        };
        let toolchain = format!("{}{}", prepared.toolchain_identity, shim.identity_suffix());
        Ok(BuildFingerprint::compute(&FingerprintInput {
            platform: self.platform.name(),
            config: &config,
            source: example,
            toolchain: &toolchain,
        })?)
    }

    fn lookup(&self, prepared: &Prepared, fingerprint: &BuildFingerprint) -> Option<CachedBuild> {
        if self.options.force_rebuild {
            return None;
        }
        prepared.cache.as_ref()?.lookup(fingerprint)
    }

    fn from_cache(
        &self,
        prepared: &Prepared,
        example: &Path,
        fingerprint: &BuildFingerprint,
        hit: CachedBuild,
    ) -> CompileResult {
        let mut result = CompileResult::success(self.platform.name(), example);
        result.stdout = hit.record.stdout;
        result.stderr = hit.record.stderr;
        result.build_info = Some(prepared.build_info.clone());
        result.from_cache = true;
        result.fingerprint = Some(fingerprint.to_string());
        result.artifacts = hit.outputs;
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        prepared: &Prepared,
        example: &Path,
        kind: &ExampleKind,
        shim: ShimMode,
        fingerprint: &BuildFingerprint,
        cancel: &CancelToken,
        sink: Option<&OutputSink>,
    ) -> CompileResult {
        let toolchain = &self.options.toolchain;
        let project = match kind {
            ExampleKind::Project => example.to_path_buf(),
            ExampleKind::SketchDir | ExampleKind::SketchFile => {
                let staged = stage_project(
                    example,
                    kind,
                    &self.platform,
                    &self.platform_dir(),
                    &toolchain.config_file,
                    shim,
                );
                match staged {
                    Ok(project) => project,
                    Err(e) => return self.failed(prepared, example, ErrorKind::ProjectSetup, e.to_string()),
                }
            }
        };
        debug!(project = %project.display(), "project staged");

        if self.options.force_rebuild && !toolchain.clean_args.is_empty() {
            let clean = self.command(&toolchain.clean_args, &project);
            match self.executor.run_cancellable(&project, &clean, self.options.timeout, cancel) {
                Ok(out) if out.success() => debug!("clean finished"),
                Ok(out) => warn!(status = %exit_description(&out), "clean failed, building anyway"),
                Err(e) => warn!(error = %e, "clean failed, building anyway"),
            }
        }

        let spec = self.command(&toolchain.args, &project);
        let lines = sink.map(|sink| line_sink(sink, self.platform.name(), example));
        let started = Instant::now();
        let outcome = self
            .executor
            .run_streaming(&project, &spec, self.options.timeout, cancel, lines.as_ref());

        let mut result = CompileResult::success(self.platform.name(), example);
        result.build_info = Some(prepared.build_info.clone());
        result.fingerprint = Some(fingerprint.to_string());

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                let kind = match &e {
                    ExecError::Timeout { .. } => ErrorKind::Timeout,
                    ExecError::Cancelled { .. } => ErrorKind::Cancelled,
                    ExecError::Spawn { .. } | ExecError::Wait { .. } => ErrorKind::ToolchainCrashed,
                };
                if let Some(partial) = e.partial_output() {
                    result.stdout = partial.stdout.clone();
                    result.stderr = partial.stderr.clone();
                }
                result.fail(kind, e.to_string());
                return result;
            }
        };

        result.stdout = output.stdout.clone();
        result.stderr = output.stderr.clone();
        if !output.success() {
            let kind = if output.killed_by_signal() {
                ErrorKind::ToolchainCrashed
            } else {
                ErrorKind::BuildFailed
            };
            result.fail(kind, format!("{} {}", toolchain.program, exit_description(&output)));
            return result;
        }

        let artifacts = project.join(&toolchain.artifact_dir);
        result.artifacts = artifacts.is_dir().then_some(artifacts);
        self.store(prepared, fingerprint, &result, &output, started.elapsed().as_millis() as u64);
        result
    }

    fn store(
        &self,
        prepared: &Prepared,
        fingerprint: &BuildFingerprint,
        result: &CompileResult,
        output: &ProcessOutput,
        duration_ms: u64,
    ) {
        let Some(cache) = &prepared.cache else {
            return;
        };
        if output.stdout_truncated || output.stderr_truncated {
            debug!("output was truncated, caching the captured head only");
        }
        let record = BuildRecord {
            platform: self.platform.name().to_string(),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            build_info: prepared.build_info.to_json(),
            has_artifacts: result.artifacts.is_some(),
            duration_ms,
        };
        if let Err(e) = cache.store(fingerprint, &record, result.artifacts.as_deref()) {
            warn!(fingerprint = %fingerprint.short(), error = %e, "failed to cache build");
        }
    }

    fn command(&self, args: &[String], project: &Path) -> CommandSpec {
        let toolchain = &self.options.toolchain;
        let mut spec = CommandSpec::new(&toolchain.program).args(expand_args(args, project, self.platform.name()));
        for (key, value) in &toolchain.env {
            spec = spec.env(key, value);
        }
        if let Some(var) = &toolchain.home_env {
            spec = spec.env(var, project.join(TOOLCHAIN_HOME_DIR).display().to_string());
        }
        spec
    }
}

fn exit_description(output: &ProcessOutput) -> String {
    match (output.exit_code, output.signal) {
        (Some(code), _) => format!("exited with code {code}"),
        (None, Some(signal)) => format!("was terminated by signal {signal}"),
        (None, None) => "terminated abnormally".to_string(),
    }
}
