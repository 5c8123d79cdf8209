use crate::process;
use futures::FutureExt;
use futures::future::BoxFuture;
use keepalive_core::worker::{LaunchSpec, WorkerExit};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// A freshly spawned worker process.
pub struct SpawnedWorker {
    pub pid: u32,
    /// Resolves once the process has exited and been reaped.
    pub exited: BoxFuture<'static, WorkerExit>,
}

/// OS-facing side of the supervisor: launch, signal and probe worker processes.
pub trait WorkerSpawner: Send + Sync + 'static {
    fn spawn(&self, spec: &LaunchSpec) -> std::io::Result<SpawnedWorker>;

    /// Best-effort graceful termination. Fails if the process is already gone.
    fn terminate(&self, pid: u32) -> std::io::Result<()>;

    /// Whether the process still exists, without affecting it.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Spawns the worker client runtime as a child process and forwards its
/// output to the log.
pub struct OsSpawner {
    program: PathBuf,
}

impl OsSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

impl WorkerSpawner for OsSpawner {
    fn spawn(&self, spec: &LaunchSpec) -> std::io::Result<SpawnedWorker> {
        let mut child = process::command(&self.program)
            .args(spec.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| std::io::Error::other("worker exited before reporting a pid"))?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, spec.label.clone(), false);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, spec.label.clone(), true);
        }

        let label = spec.label.clone();
        let exited = async move {
            match child.wait().await {
                Ok(status) => WorkerExit::from(status),
                Err(e) => {
                    log::error!("Failed to wait for worker '{}' (pid {}): {}", label, pid, e);
                    WorkerExit::default()
                }
            }
        }
        .boxed();

        Ok(SpawnedWorker { pid, exited })
    }

    fn terminate(&self, pid: u32) -> std::io::Result<()> {
        process::terminate_process(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        process::is_process_alive(pid)
    }
}

/// Pump a worker's stdout/stderr into the log, one line per record.
fn forward_output<R>(stream: R, label: String, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if is_stderr => log::warn!(target: "worker", "[{}] {}", label, line),
                Ok(Some(line)) => log::info!(target: "worker", "[{}] {}", label, line),
                Ok(None) => break,
                Err(e) => {
                    log::debug!(target: "worker", "[{}] output stream closed: {}", label, e);
                    break;
                }
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            target_id: "t1".into(),
            host: "localhost".into(),
            port: 25565,
            label: "bot".into(),
            version: "1.20.4".into(),
        }
    }

    #[tokio::test]
    async fn exit_code_is_reported() {
        // `false` ignores its arguments and exits 1
        let spawner = OsSpawner::new("false");
        let worker = spawner.spawn(&spec()).unwrap();
        assert!(worker.pid > 0);
        assert_eq!(worker.exited.await, WorkerExit::code(1));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let spawner = OsSpawner::new("/nonexistent/keepalive-worker");
        assert!(spawner.spawn(&spec()).is_err());
    }
}
