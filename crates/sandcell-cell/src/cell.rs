//! The isolated execution cell
//!
//! One [`IsolatedExecutionCell::run`] call owns exactly one container for its
//! whole life: create, start, stage inputs, execute, harvest outputs, remove.
//! Removal is tied to a [`CellLease`] so it happens on every exit path,
//! including panics and cancellation of the calling future.

use crate::archive;
use crate::config::CellConfig;
use crate::docker::DockerCli;
use crate::error::{CellError, RuntimeError};
use crate::outcome::{ExecutionFailure, ExecutionOutcome};
use crate::runtime::{CellId, CellRuntime, CellSpec, ExecCapture, ExecRequest};
use sandcell_types::{InputArtifact, OutputArtifacts, ProgramText, SandboxRoots};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedSemaphorePermit;

/// Idle process keeping a cell alive between injected commands
const IDLE_COMMAND: [&str; 3] = ["tail", "-f", "/dev/null"];

/// Prefix of every container name
const NAME_PREFIX: &str = "sandcell";

/// Runs untrusted programs in throwaway containers
///
/// Holds only configuration and a runtime handle; every run allocates its own
/// container, so concurrent runs share nothing.
#[derive(Clone)]
pub struct IsolatedExecutionCell {
    runtime: Arc<dyn CellRuntime>,
    config: CellConfig,
    roots: SandboxRoots,
}

impl std::fmt::Debug for IsolatedExecutionCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolatedExecutionCell")
            .field("config", &self.config)
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

impl IsolatedExecutionCell {
    /// Create a cell over an existing runtime
    ///
    /// # Errors
    /// Returns [`CellError::InvalidConfig`] if the configuration or roots are
    /// unusable
    pub fn new(
        runtime: Arc<dyn CellRuntime>,
        config: CellConfig,
        roots: SandboxRoots,
    ) -> Result<Self, CellError> {
        roots
            .validate()
            .map_err(|e| CellError::InvalidConfig(e.to_string()))?;
        config.validate(&roots)?;
        Ok(Self {
            runtime,
            config,
            roots,
        })
    }

    /// Create a cell on the Docker CLI, checking the daemon and image first
    ///
    /// # Errors
    /// Returns an allocation error if the runtime is unreachable or the image
    /// is missing, or [`CellError::InvalidConfig`]
    pub async fn docker(config: CellConfig, roots: SandboxRoots) -> Result<Self, CellError> {
        let cli = DockerCli::connect(config.docker_binary.clone(), &config.image)
            .await
            .map_err(|e| CellError::from_image_check(e, &config.image))?;
        Self::new(Arc::new(cli), config, roots)
    }

    /// The configuration in force
    #[must_use]
    pub fn config(&self) -> &CellConfig {
        &self.config
    }

    /// The sandbox roots
    #[must_use]
    pub fn roots(&self) -> &SandboxRoots {
        &self.roots
    }

    /// The underlying runtime
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn CellRuntime> {
        &self.runtime
    }

    /// Cells currently allocated under this configuration's label
    ///
    /// # Errors
    /// Returns the runtime error if listing fails
    pub async fn live_cells(&self) -> Result<Vec<CellId>, RuntimeError> {
        self.runtime.list_cells(&self.config.label).await
    }

    /// Run `program` with `inputs` staged into the input root
    ///
    /// Once the container is started, every failure is reported inside the
    /// returned outcome; only allocation failures are errors. The container
    /// is removed before this returns, and also if the returned future is
    /// dropped early.
    ///
    /// # Errors
    /// Returns [`CellError`] if the container cannot be created or started
    pub async fn run(
        &self,
        program: &ProgramText,
        inputs: &[InputArtifact],
    ) -> Result<ExecutionOutcome, CellError> {
        self.run_leased(program, inputs, None).await
    }

    /// [`run`](Self::run), holding `permit` until the container is gone
    ///
    /// The permit travels with the teardown, so a caller bounding live cells
    /// with a semaphore stays within the bound even when it is cancelled and
    /// removal finishes in the background.
    ///
    /// # Errors
    /// Returns [`CellError`] if the container cannot be created or started
    pub async fn run_with_permit(
        &self,
        program: &ProgramText,
        inputs: &[InputArtifact],
        permit: OwnedSemaphorePermit,
    ) -> Result<ExecutionOutcome, CellError> {
        self.run_leased(program, inputs, Some(permit)).await
    }

    #[tracing::instrument(skip_all, fields(digest = %program.digest().short(), inputs = inputs.len()))]
    async fn run_leased(
        &self,
        program: &ProgramText,
        inputs: &[InputArtifact],
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<ExecutionOutcome, CellError> {
        let started = Instant::now();
        let spec = self.spec();

        let id = self
            .runtime
            .create(&spec)
            .await
            .map_err(|e| CellError::from_create(e, &self.config.image))?;
        let lease = CellLease::new(Arc::clone(&self.runtime), id.clone(), self.config.stop_grace(), permit);
        tracing::info!(cell = %id.short(), name = %spec.name, "cell allocated");

        if let Err(source) = self.runtime.start(&id).await {
            tracing::error!(cell = %id.short(), error = %source, "cell failed to start");
            lease.release().await;
            return Err(CellError::StartFailed { id, source });
        }

        let outcome = self.drive(&id, program, inputs, started).await;
        lease.release().await;

        let outcome = ExecutionOutcome {
            elapsed: started.elapsed(),
            ..outcome
        };
        tracing::info!(
            cell = %id.short(),
            succeeded = outcome.succeeded,
            exit_status = outcome.exit_status,
            artifacts = outcome.output_artifacts.len(),
            elapsed_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            "cell finished"
        );
        Ok(outcome)
    }

    /// Steps between start and teardown; never fails
    async fn drive(
        &self,
        id: &CellId,
        program: &ProgramText,
        inputs: &[InputArtifact],
        started: Instant,
    ) -> ExecutionOutcome {
        if let Err(msg) = self.stage(id, inputs).await {
            tracing::warn!(cell = %id.short(), error = %msg, "staging failed");
            return ExecutionOutcome::failed(ExecutionFailure::Staging(msg), None, started.elapsed());
        }

        let request = ExecRequest {
            argv: vec![self.config.interpreter.clone(), "-".to_string()],
            stdin: program.as_str().as_bytes().to_vec(),
            user: self.config.user.clone(),
            workdir: self.config.workdir.clone(),
            max_output_bytes: self.config.max_output_bytes,
        };
        let limit = self.config.timeout();
        let capture = match tokio::time::timeout(limit, self.runtime.exec(id, &request)).await {
            Ok(Ok(capture)) => cap_streams(capture, self.config.max_output_bytes),
            Ok(Err(e)) => {
                tracing::warn!(cell = %id.short(), error = %e, "exec failed");
                return ExecutionOutcome::failed(
                    ExecutionFailure::Invocation(e.to_string()),
                    None,
                    started.elapsed(),
                );
            }
            Err(_) => {
                tracing::warn!(cell = %id.short(), timeout_secs = limit.as_secs(), "program timed out");
                return ExecutionOutcome::failed(
                    ExecutionFailure::TimedOut { after: limit },
                    None,
                    started.elapsed(),
                );
            }
        };

        match self.harvest(id).await {
            Ok(artifacts) => ExecutionOutcome::completed(capture, artifacts, started.elapsed()),
            Err(msg) => {
                tracing::warn!(cell = %id.short(), error = %msg, "harvest failed");
                ExecutionOutcome::failed(ExecutionFailure::Harvest(msg), Some(capture), started.elapsed())
            }
        }
    }

    /// One bulk transfer of all inputs into the input root
    async fn stage(&self, id: &CellId, inputs: &[InputArtifact]) -> Result<(), String> {
        if inputs.is_empty() {
            return Ok(());
        }
        let archive = archive::pack_inputs(inputs).map_err(|e| e.to_string())?;
        tracing::debug!(cell = %id.short(), files = inputs.len(), bytes = archive.len(), "staging inputs");
        self.runtime
            .put_archive(id, &self.roots.input_root, archive)
            .await
            .map_err(|e| e.to_string())
    }

    /// One bulk transfer of everything under the output root
    async fn harvest(&self, id: &CellId) -> Result<OutputArtifacts, String> {
        let limit = self.config.max_artifact_bytes;
        match self.runtime.get_archive(id, &self.roots.output_root, limit).await {
            Ok(Some(bytes)) if bytes.len() > limit => Err(RuntimeError::TooLarge {
                what: "output archive",
                limit,
            }
            .to_string()),
            Ok(Some(bytes)) => archive::unpack_outputs(&bytes, &self.roots.output_root).map_err(|e| e.to_string()),
            Ok(None) => Ok(OutputArtifacts::new()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn spec(&self) -> CellSpec {
        let mut labels = BTreeMap::new();
        if let Some((key, value)) = self.config.label_pair() {
            labels.insert(key.to_string(), value.to_string());
        }
        CellSpec {
            name: format!("{NAME_PREFIX}-{}", uuid::Uuid::new_v4().simple()),
            image: self.config.image.clone(),
            labels,
            memory_limit_bytes: self.config.memory_limit_bytes,
            cpus: self.config.cpus,
            pids_limit: self.config.pids_limit,
            read_only_rootfs: self.config.read_only_rootfs,
            writable_paths: vec![self.roots.input_root.clone(), self.roots.output_root.clone()],
            idle_command: IDLE_COMMAND.map(String::from).to_vec(),
            init: true,
        }
    }
}

/// Cut each stream to `limit` bytes, noting the cut on stderr
fn cap_streams(mut capture: ExecCapture, limit: usize) -> ExecCapture {
    let mut notes = Vec::new();
    for (name, stream) in [("stdout", &mut capture.stdout), ("stderr", &mut capture.stderr)] {
        if stream.len() > limit {
            stream.truncate(limit);
            notes.push(format!("{name} truncated at {limit} bytes"));
        }
    }
    if !notes.is_empty() {
        tracing::warn!(limit, "program output truncated");
        if !capture.stderr.is_empty() && !capture.stderr.ends_with(b"\n") {
            capture.stderr.push(b'\n');
        }
        capture.stderr.extend_from_slice(notes.join("; ").as_bytes());
        capture.stderr.push(b'\n');
    }
    capture
}

/// Guaranteed removal of one allocated cell
///
/// [`release`](Self::release) removes the cell in a spawned task and waits
/// for it, so cancelling the waiter does not cancel the removal. If the lease
/// is dropped unreleased (panic, cancelled caller) the removal is spawned on
/// the current tokio runtime. A held permit is returned only after removal.
pub(crate) struct CellLease {
    runtime: Arc<dyn CellRuntime>,
    id: Option<CellId>,
    grace: Duration,
    permit: Option<OwnedSemaphorePermit>,
}

impl CellLease {
    pub(crate) fn new(
        runtime: Arc<dyn CellRuntime>,
        id: CellId,
        grace: Duration,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            runtime,
            id: Some(id),
            grace,
            permit,
        }
    }

    /// Remove the cell and wait for it
    pub(crate) async fn release(mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let task = tokio::spawn(remove(Arc::clone(&self.runtime), id, self.grace, self.permit.take()));
        if let Err(e) = task.await {
            tracing::error!(error = %e, "cell teardown task did not complete");
        }
    }
}

impl Drop for CellLease {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(cell = %id.short(), "cell released on unwind, removing in background");
                handle.spawn(remove(Arc::clone(&self.runtime), id, self.grace, self.permit.take()));
            }
            Err(_) => {
                tracing::error!(cell = %id, "no async runtime to remove cell; it must be cleaned up by label");
            }
        }
    }
}

async fn remove(runtime: Arc<dyn CellRuntime>, id: CellId, grace: Duration, permit: Option<OwnedSemaphorePermit>) {
    match runtime.remove(&id, grace).await {
        Ok(()) => tracing::debug!(cell = %id.short(), "cell removed"),
        Err(e) => tracing::error!(cell = %id.short(), error = %e, "failed to remove cell"),
    }
    drop(permit);
}
