//! In-memory [`CellRuntime`] with fault injection
//!
//! Each fake cell has its own file map standing in for the container
//! filesystem. "Running" the interpreter calls a behavior closure that can
//! read staged inputs and write outputs, so whole cell runs can be exercised
//! without a container engine.

use async_trait::async_trait;
use parking_lot::Mutex;
use sandcell_cell::{CellId, CellRuntime, CellSpec, ExecCapture, ExecRequest, RuntimeError};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

/// Image every fake runtime starts with
pub const FAKE_IMAGE: &str = "sandcell-executor:latest";

/// Runtime operation a fault can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FaultStep {
    Create,
    Start,
    PutArchive,
    Exec,
    GetArchive,
    Remove,
}

impl FaultStep {
    /// Every step, in protocol order
    pub const ALL: [FaultStep; 6] = [
        FaultStep::Create,
        FaultStep::Start,
        FaultStep::PutArchive,
        FaultStep::Exec,
        FaultStep::GetArchive,
        FaultStep::Remove,
    ];

    fn operation(self) -> &'static str {
        match self {
            FaultStep::Create => "create",
            FaultStep::Start => "start",
            FaultStep::PutArchive => "cp (in)",
            FaultStep::Exec => "exec",
            FaultStep::GetArchive => "cp (out)",
            FaultStep::Remove => "rm",
        }
    }
}

/// What the behavior closure sees when the interpreter "runs"
pub struct ExecContext<'a> {
    /// Program text, as fed on stdin
    pub program: &'a str,
    /// The full request
    pub request: &'a ExecRequest,
    /// The cell's filesystem, absolute path to bytes
    pub files: &'a mut BTreeMap<String, Vec<u8>>,
}

impl ExecContext<'_> {
    /// Read a file, if present
    pub fn read(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Write a file
    pub fn write(&mut self, path: &str, bytes: impl Into<Vec<u8>>) {
        self.files.insert(path.to_string(), bytes.into());
    }
}

/// Simulated interpreter
pub type Behavior = Arc<dyn Fn(&mut ExecContext<'_>) -> ExecCapture + Send + Sync>;

#[derive(Debug)]
struct FakeCell {
    labels: BTreeMap<String, String>,
    running: bool,
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    cells: BTreeMap<CellId, FakeCell>,
    faults: BTreeSet<FaultStep>,
    hang_exec: bool,
    remove_delay: Option<Duration>,
    missing_output_root: bool,
    unavailable: bool,
    images: BTreeSet<String>,
    created: Vec<CellSpec>,
    removed: Vec<CellId>,
    exec_requests: Vec<ExecRequest>,
    archives_in: Vec<(CellId, String, usize)>,
}

/// In-memory container runtime
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    behavior: Mutex<Behavior>,
}

impl std::fmt::Debug for FakeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeRuntime")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// A healthy runtime whose interpreter exits 0 without output
    pub fn new() -> Self {
        let state = FakeState {
            images: BTreeSet::from([FAKE_IMAGE.to_string()]),
            ..FakeState::default()
        };
        Self {
            state: Mutex::new(state),
            behavior: Mutex::new(Arc::new(|_: &mut ExecContext<'_>| ExecCapture::exited(0))),
        }
    }

    /// Shared handle, ready to hand to a cell
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Replace the simulated interpreter
    pub fn set_behavior<F>(&self, behavior: F)
    where
        F: Fn(&mut ExecContext<'_>) -> ExecCapture + Send + Sync + 'static,
    {
        *self.behavior.lock() = Arc::new(behavior);
    }

    /// Make `step` fail from now on
    pub fn fail_at(&self, step: FaultStep) {
        self.state.lock().faults.insert(step);
    }

    /// Clear all injected faults
    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Make exec never return
    pub fn hang_exec(&self) {
        self.state.lock().hang_exec = true;
    }

    /// Make every removal take `delay` before the cell disappears
    pub fn delay_remove(&self, delay: Duration) {
        self.state.lock().remove_delay = Some(delay);
    }

    /// Report the output root as missing on harvest
    pub fn without_output_root(&self) {
        self.state.lock().missing_output_root = true;
    }

    /// Simulate an unreachable daemon
    pub fn make_unavailable(&self) {
        self.state.lock().unavailable = true;
    }

    /// Remove an image
    pub fn remove_image(&self, image: &str) {
        self.state.lock().images.remove(image);
    }

    /// Cells not yet removed
    pub fn live_cells(&self) -> Vec<CellId> {
        self.state.lock().cells.keys().cloned().collect()
    }

    /// Specs of every created cell, in order
    pub fn created(&self) -> Vec<CellSpec> {
        self.state.lock().created.clone()
    }

    /// Ids of every removed cell, in order
    pub fn removed(&self) -> Vec<CellId> {
        self.state.lock().removed.clone()
    }

    /// Every exec request, in order
    pub fn exec_requests(&self) -> Vec<ExecRequest> {
        self.state.lock().exec_requests.clone()
    }

    /// Every archive put into a cell: (cell, destination, bytes)
    pub fn archives_in(&self) -> Vec<(CellId, String, usize)> {
        self.state.lock().archives_in.clone()
    }

    /// Let background teardown tasks spawned on the current runtime finish
    pub async fn settle(&self) {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    fn fault(state: &FakeState, step: FaultStep) -> Result<(), RuntimeError> {
        if state.faults.contains(&step) {
            Err(RuntimeError::command(step.operation(), Some(1), "injected fault"))
        } else {
            Ok(())
        }
    }

    fn check_available(state: &FakeState) -> Result<(), RuntimeError> {
        if state.unavailable {
            Err(RuntimeError::Unavailable("Cannot connect to the Docker daemon".into()))
        } else {
            Ok(())
        }
    }
}

fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

#[async_trait]
impl CellRuntime for FakeRuntime {
    async fn create(&self, spec: &CellSpec) -> Result<CellId, RuntimeError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        if !state.images.contains(&spec.image) {
            return Err(RuntimeError::ImageNotFound(format!("No such image: {}", spec.image)));
        }
        Self::fault(&state, FaultStep::Create)?;

        state.next_id += 1;
        let id = CellId::new(format!("{:064x}", state.next_id));
        state.cells.insert(
            id.clone(),
            FakeCell {
                labels: spec.labels.clone(),
                running: false,
                files: BTreeMap::new(),
            },
        );
        state.created.push(spec.clone());
        Ok(id)
    }

    async fn start(&self, id: &CellId) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        Self::fault(&state, FaultStep::Start)?;
        let cell = state
            .cells
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NoSuchCell(id.clone()))?;
        cell.running = true;
        Ok(())
    }

    async fn put_archive(&self, id: &CellId, dest: &str, archive: Vec<u8>) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        Self::fault(&state, FaultStep::PutArchive)?;
        state.archives_in.push((id.clone(), dest.to_string(), archive.len()));
        let cell = state
            .cells
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NoSuchCell(id.clone()))?;

        let mut reader = tar::Archive::new(archive.as_slice());
        let entries = reader.entries().map_err(|e| RuntimeError::Archive(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| RuntimeError::Archive(e.to_string()))?;
            let name = entry
                .path()
                .map_err(|e| RuntimeError::Archive(e.to_string()))?
                .display()
                .to_string();
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| RuntimeError::Archive(e.to_string()))?;
            cell.files.insert(format!("{}/{name}", dest.trim_end_matches('/')), bytes);
        }
        Ok(())
    }

    async fn exec(&self, id: &CellId, request: &ExecRequest) -> Result<ExecCapture, RuntimeError> {
        let hang = {
            let mut state = self.state.lock();
            Self::fault(&state, FaultStep::Exec)?;
            state.exec_requests.push(request.clone());
            match state.cells.get(id) {
                Some(cell) if cell.running => {}
                Some(_) => return Err(RuntimeError::command("exec", Some(1), "container is not running")),
                None => return Err(RuntimeError::NoSuchCell(id.clone())),
            }
            state.hang_exec
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let behavior = Arc::clone(&*self.behavior.lock());
        let mut state = self.state.lock();
        let cell = state
            .cells
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NoSuchCell(id.clone()))?;
        let program = std::str::from_utf8(&request.stdin).unwrap_or_default();
        let mut ctx = ExecContext {
            program,
            request,
            files: &mut cell.files,
        };
        let mut capture = behavior(&mut ctx);

        // Like the real client, keep one byte past the limit and drop the rest
        let keep = request.max_output_bytes.saturating_add(1);
        capture.stdout.truncate(keep);
        capture.stderr.truncate(keep);
        Ok(capture)
    }

    async fn get_archive(&self, id: &CellId, path: &str, max_bytes: usize) -> Result<Option<Vec<u8>>, RuntimeError> {
        let state = self.state.lock();
        Self::fault(&state, FaultStep::GetArchive)?;
        let cell = state
            .cells
            .get(id)
            .ok_or_else(|| RuntimeError::NoSuchCell(id.clone()))?;
        if state.missing_output_root {
            return Ok(None);
        }

        let root = path.trim_end_matches('/');
        let prefix = basename(root);
        let mut builder = tar::Builder::new(Vec::new());
        let io = |e: std::io::Error| RuntimeError::Archive(e.to_string());

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder
            .append_data(&mut dir, format!("{prefix}/"), std::io::empty())
            .map_err(io)?;

        for (file, bytes) in &cell.files {
            let Some(rel) = file.strip_prefix(root).and_then(|r| r.strip_prefix('/')) else {
                continue;
            };
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            builder
                .append_data(&mut header, format!("{prefix}/{rel}"), bytes.as_slice())
                .map_err(io)?;
        }
        let archive = builder.into_inner().map_err(io)?;
        if archive.len() > max_bytes {
            return Err(RuntimeError::TooLarge {
                what: "output archive",
                limit: max_bytes,
            });
        }
        Ok(Some(archive))
    }

    async fn remove(&self, id: &CellId, _grace: Duration) -> Result<(), RuntimeError> {
        let delay = self.state.lock().remove_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        Self::fault(&state, FaultStep::Remove)?;
        state.cells.remove(id);
        state.removed.push(id.clone());
        Ok(())
    }

    async fn list_cells(&self, label: &str) -> Result<Vec<CellId>, RuntimeError> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        let (key, value) = label.split_once('=').unwrap_or((label, ""));
        Ok(state
            .cells
            .iter()
            .filter(|(_, cell)| cell.labels.get(key).is_some_and(|v| v == value))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn check_image(&self, image: &str) -> Result<(), RuntimeError> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        if state.images.contains(image) {
            Ok(())
        } else {
            Err(RuntimeError::ImageNotFound(format!("No such image: {image}")))
        }
    }
}
