//! [`CellRuntime`] backed by the `docker` command-line client
//!
//! Every operation is one `docker` invocation through `tokio::process`, so
//! nothing blocks the caller's executor. Client processes are killed when
//! their future is dropped, which is how the exec timeout terminates a hung
//! program's client. Client output is read through bounded buffers, so a
//! chatty program cannot grow the host process.

use crate::error::RuntimeError;
use crate::runtime::{CellId, CellRuntime, CellSpec, ExecCapture, ExecRequest};
use async_trait::async_trait;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Output kept from bookkeeping commands (ids, listings, errors)
const CLIENT_OUTPUT_LIMIT: usize = 1024 * 1024;

/// How much of each client stream to keep
#[derive(Debug, Clone, Copy)]
struct Capture {
    stdout: usize,
    stderr: usize,
    /// Close stdout once it exceeds its limit instead of draining it
    stop_on_overflow: bool,
}

impl Capture {
    const CLIENT: Self = Self {
        stdout: CLIENT_OUTPUT_LIMIT,
        stderr: CLIENT_OUTPUT_LIMIT,
        stop_on_overflow: false,
    };
}

/// Runtime talking to the Docker daemon through its CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    /// Use `binary` without checking it
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Use `binary` after checking the daemon answers and `image` exists
    ///
    /// # Errors
    /// Returns [`RuntimeError::Unavailable`] or [`RuntimeError::ImageNotFound`]
    pub async fn connect(binary: impl Into<String>, image: &str) -> Result<Self, RuntimeError> {
        let cli = Self::new(binary);
        cli.check_image(image).await?;
        tracing::info!(binary = %cli.binary, image, "docker runtime ready");
        Ok(cli)
    }

    /// The client binary
    #[must_use]
    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn docker(&self, args: &[String], stdin: Option<Vec<u8>>, capture: Capture) -> Result<Output, RuntimeError> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                RuntimeError::Unavailable(format!("cannot run '{}': {e}", self.binary))
            }
            _ => RuntimeError::Io(e),
        })?;

        let feed = feed_stdin(child.stdin.take(), stdin);
        let stdout = read_bounded(child.stdout.take(), capture.stdout, capture.stop_on_overflow);
        let stderr = read_bounded(child.stderr.take(), capture.stderr, false);
        let (fed, stdout, stderr) = tokio::join!(feed, stdout, stderr);
        fed?;

        Ok(Output {
            status: child.wait().await?,
            stdout: stdout?,
            stderr: stderr?,
        })
    }

    /// Run `docker args...` and fail on a non-zero status
    async fn checked(&self, operation: &'static str, args: &[String], stdin: Option<Vec<u8>>) -> Result<Output, RuntimeError> {
        let output = self.docker(args, stdin, Capture::CLIENT).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_failure(operation, &output))
        }
    }
}

/// Write `bytes` to the client's stdin and close it
///
/// A client that exits without reading everything is not an error here; its
/// exit status tells the story.
async fn feed_stdin(pipe: Option<tokio::process::ChildStdin>, bytes: Option<Vec<u8>>) -> std::io::Result<()> {
    let (Some(mut pipe), Some(bytes)) = (pipe, bytes) else {
        return Ok(());
    };
    let written = match pipe.write_all(&bytes).await {
        Ok(()) => pipe.shutdown().await,
        Err(e) => Err(e),
    };
    match written {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

/// Read a stream keeping at most `keep` bytes
///
/// The rest is drained and discarded. With `stop_on_overflow` the stream is
/// closed once `keep` bytes are held instead.
async fn read_bounded<R: AsyncRead + Unpin>(reader: Option<R>, keep: usize, stop_on_overflow: bool) -> std::io::Result<Vec<u8>> {
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut kept = Vec::new();
    let mut chunk = vec![0_u8; 64 * 1024];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = keep.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
        if stop_on_overflow && kept.len() >= keep {
            break;
        }
    }
    Ok(kept)
}

/// Map a failed client invocation onto a runtime error
fn classify_failure(operation: &'static str, output: &Output) -> RuntimeError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.contains("Cannot connect to the Docker daemon")
        || stderr.contains("Is the docker daemon running")
        || stderr.contains("permission denied while trying to connect")
    {
        RuntimeError::Unavailable(stderr)
    } else if stderr.contains("No such image") || stderr.contains("Unable to find image") {
        RuntimeError::ImageNotFound(stderr)
    } else {
        RuntimeError::command(operation, output.status.code(), stderr)
    }
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container")
}

fn is_missing_path(stderr: &str) -> bool {
    stderr.contains("Could not find the file") || stderr.contains("No such container:path")
}

/// Arguments for `docker create`
pub(crate) fn create_args(spec: &CellSpec) -> Vec<String> {
    let mut args: Vec<String> = vec!["create".into(), "--name".into(), spec.name.clone()];
    if spec.init {
        args.push("--init".into());
    }
    for (key, value) in &spec.labels {
        args.push("--label".into());
        args.push(format!("{key}={value}"));
    }
    args.extend(
        [
            "--network",
            "none",
            "--cap-drop",
            "ALL",
            "--security-opt",
            "no-new-privileges",
        ]
        .map(String::from),
    );
    if spec.read_only_rootfs {
        args.push("--read-only".into());
    }
    for path in &spec.writable_paths {
        args.push("--volume".into());
        args.push(path.clone());
    }
    args.extend([
        "--memory".into(),
        format!("{}b", spec.memory_limit_bytes),
        "--memory-swap".into(),
        format!("{}b", spec.memory_limit_bytes),
        "--cpus".into(),
        format!("{}", spec.cpus),
        "--pids-limit".into(),
        spec.pids_limit.to_string(),
    ]);

    let mut idle = spec.idle_command.iter();
    if let Some(entrypoint) = idle.next() {
        args.push("--entrypoint".into());
        args.push(entrypoint.clone());
    }
    args.push(spec.image.clone());
    args.extend(idle.cloned());
    args
}

/// Arguments for `docker exec`
pub(crate) fn exec_args(id: &CellId, request: &ExecRequest) -> Vec<String> {
    let mut args: Vec<String> = vec!["exec".into()];
    if !request.stdin.is_empty() {
        args.push("--interactive".into());
    }
    args.extend([
        "--user".into(),
        request.user.clone(),
        "--workdir".into(),
        request.workdir.clone(),
        id.to_string(),
    ]);
    args.extend(request.argv.iter().cloned());
    args
}

#[async_trait]
impl CellRuntime for DockerCli {
    #[tracing::instrument(skip_all, fields(name = %spec.name))]
    async fn create(&self, spec: &CellSpec) -> Result<CellId, RuntimeError> {
        let output = self.checked("create", &create_args(spec), None).await?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::command("create", output.status.code(), "no container id returned"));
        }
        tracing::debug!(id = %&id[..id.len().min(12)], "cell created");
        Ok(CellId::new(id))
    }

    async fn start(&self, id: &CellId) -> Result<(), RuntimeError> {
        self.checked("start", &["start".into(), id.to_string()], None).await?;
        Ok(())
    }

    async fn put_archive(&self, id: &CellId, dest: &str, archive: Vec<u8>) -> Result<(), RuntimeError> {
        let args = ["cp".into(), "-".into(), format!("{id}:{dest}")];
        self.checked("cp (in)", &args, Some(archive)).await?;
        Ok(())
    }

    async fn exec(&self, id: &CellId, request: &ExecRequest) -> Result<ExecCapture, RuntimeError> {
        let keep = request.max_output_bytes.saturating_add(1);
        let capture = Capture {
            stdout: keep,
            stderr: keep,
            stop_on_overflow: false,
        };
        let stdin = (!request.stdin.is_empty()).then(|| request.stdin.clone());
        let output = self.docker(&exec_args(id, request), stdin, capture).await?;
        let exit_status = output.status.code().unwrap_or(-1);

        // The client reports its own failures (container gone, bad user) with
        // a daemon error and no program output.
        let stderr = String::from_utf8_lossy(&output.stderr);
        if exit_status != 0 && output.stdout.is_empty() && stderr.starts_with("Error response from daemon") {
            return Err(RuntimeError::command("exec", Some(exit_status), stderr.trim()));
        }

        Ok(ExecCapture {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_status,
        })
    }

    async fn get_archive(&self, id: &CellId, path: &str, max_bytes: usize) -> Result<Option<Vec<u8>>, RuntimeError> {
        let args = ["cp".into(), format!("{id}:{path}"), "-".into()];
        let capture = Capture {
            stdout: max_bytes.saturating_add(1),
            stop_on_overflow: true,
            ..Capture::CLIENT
        };
        let output = self.docker(&args, None, capture).await?;
        if output.stdout.len() > max_bytes {
            return Err(RuntimeError::TooLarge {
                what: "output archive",
                limit: max_bytes,
            });
        }
        if output.status.success() {
            return Ok(Some(output.stdout));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_path(&stderr) {
            Ok(None)
        } else {
            Err(classify_failure("cp (out)", &output))
        }
    }

    async fn remove(&self, id: &CellId, grace: Duration) -> Result<(), RuntimeError> {
        let stop = ["stop".into(), "--time".into(), grace.as_secs().to_string(), id.to_string()];
        if let Err(e) = self.checked("stop", &stop, None).await {
            tracing::debug!(cell = %id.short(), error = %e, "stop failed, forcing removal");
        }

        let rm = ["rm".into(), "--force".into(), "--volumes".into(), id.to_string()];
        let output = self.docker(&rm, None, Capture::CLIENT).await?;
        if output.status.success() || is_missing_container(&String::from_utf8_lossy(&output.stderr)) {
            Ok(())
        } else {
            Err(classify_failure("rm", &output))
        }
    }

    async fn list_cells(&self, label: &str) -> Result<Vec<CellId>, RuntimeError> {
        let args = [
            "ps".into(),
            "--all".into(),
            "--quiet".into(),
            "--no-trunc".into(),
            "--filter".into(),
            format!("label={label}"),
        ];
        let output = self.checked("ps", &args, None).await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(CellId::new)
            .collect())
    }

    async fn check_image(&self, image: &str) -> Result<(), RuntimeError> {
        let version = ["version".into(), "--format".into(), "{{.Server.Version}}".into()];
        self.checked("version", &version, None)
            .await
            .map_err(|e| match e {
                RuntimeError::CommandFailed { stderr, .. } => RuntimeError::Unavailable(stderr),
                other => other,
            })?;

        let inspect = ["image".into(), "inspect".into(), "--format".into(), "{{.Id}}".into(), image.to_string()];
        match self.checked("image inspect", &inspect, None).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed { stderr, .. }) => Err(RuntimeError::ImageNotFound(stderr)),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec() -> CellSpec {
        CellSpec {
            name: "sandcell-test".into(),
            image: "sandcell-executor:latest".into(),
            labels: BTreeMap::from([("sandcell.managed".to_string(), "true".to_string())]),
            memory_limit_bytes: 512 * 1024 * 1024,
            cpus: 1.0,
            pids_limit: 64,
            read_only_rootfs: true,
            writable_paths: vec!["/tmp/input".into(), "/tmp/output".into()],
            idle_command: vec!["tail".into(), "-f".into(), "/dev/null".into()],
            init: true,
        }
    }

    fn window<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_create_args_lock_down_the_cell() {
        let args = create_args(&spec());
        assert_eq!(args[0], "create");
        assert_eq!(window(&args, "--network"), Some("none"));
        assert_eq!(window(&args, "--cap-drop"), Some("ALL"));
        assert_eq!(window(&args, "--security-opt"), Some("no-new-privileges"));
        assert_eq!(window(&args, "--memory"), Some("536870912b"));
        assert_eq!(window(&args, "--memory-swap"), Some("536870912b"));
        assert_eq!(window(&args, "--cpus"), Some("1"));
        assert_eq!(window(&args, "--pids-limit"), Some("64"));
        assert_eq!(window(&args, "--label"), Some("sandcell.managed=true"));
        assert_eq!(window(&args, "--entrypoint"), Some("tail"));
        assert!(args.iter().any(|a| a == "--read-only"));
        assert!(args.iter().any(|a| a == "--init"));
        assert_eq!(args.iter().filter(|a| *a == "--volume").count(), 2);
        assert_eq!(&args[args.len() - 3..], ["sandcell-executor:latest", "-f", "/dev/null"]);
    }

    #[test]
    fn test_exec_args_feed_program_on_stdin() {
        let program = "x = 1\n".repeat(40_000);
        let request = ExecRequest {
            argv: vec!["python".into(), "-".into()],
            stdin: program.into_bytes(),
            user: "sandbox".into(),
            workdir: "/tmp".into(),
            max_output_bytes: 1024,
        };
        let args = exec_args(&CellId::new("abc"), &request);
        assert_eq!(
            args,
            vec!["exec", "--interactive", "--user", "sandbox", "--workdir", "/tmp", "abc", "python", "-"]
        );
    }

    #[test]
    fn test_exec_args_without_stdin_are_not_interactive() {
        let request = ExecRequest {
            argv: vec!["true".into()],
            stdin: Vec::new(),
            user: "sandbox".into(),
            workdir: "/tmp".into(),
            max_output_bytes: 1024,
        };
        let args = exec_args(&CellId::new("abc"), &request);
        assert!(!args.iter().any(|a| a == "--interactive"));
    }

    #[tokio::test]
    async fn test_read_bounded_drains_past_limit() {
        let data = vec![b'x'; 300_000];
        let kept = read_bounded(Some(data.as_slice()), 1001, false).await.unwrap();
        assert_eq!(kept.len(), 1001);

        let kept = read_bounded(Some(&b"short"[..]), 1001, false).await.unwrap();
        assert_eq!(kept, b"short");
    }

    #[tokio::test]
    async fn test_read_bounded_can_stop_early() {
        let data = vec![b'x'; 300_000];
        let kept = read_bounded(Some(data.as_slice()), 10, true).await.unwrap();
        assert_eq!(kept.len(), 10);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let cli = DockerCli::new("/nonexistent/sandcell-docker");
        let err = cli.check_image("any:latest").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unavailable(_)));
    }
}
