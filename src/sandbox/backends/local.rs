//! Host-directory runtime: the project lives in a workspace directory and
//! commands run as ordinary child processes inside it.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc};

use crate::sandbox::{
    Booter, EnvMap, FileEntry, FileTree, PortStatus, ProcessHandle, RuntimeInfo, RuntimeKind,
    SandboxError, SandboxEvent, SandboxRuntime,
};

#[derive(Debug, Clone)]
pub struct LocalRuntimeConfig {
    pub workspace: PathBuf,
    /// Loopback ports watched after each spawn to produce `port` events.
    pub probe_ports: Vec<u16>,
    pub probe_interval: Duration,
}

impl Default for LocalRuntimeConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("workspace"),
            probe_ports: vec![5173, 3000, 4000, 8080, 4321],
            probe_interval: Duration::from_millis(500),
        }
    }
}

pub struct LocalBooter {
    config: LocalRuntimeConfig,
}

impl LocalBooter {
    pub fn new(config: LocalRuntimeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Booter for LocalBooter {
    async fn boot(&self) -> Result<Arc<dyn SandboxRuntime>, SandboxError> {
        let runtime = LocalRuntime::create(self.config.clone()).await?;
        Ok(Arc::new(runtime))
    }
}

pub struct LocalRuntime {
    config: LocalRuntimeConfig,
    events: broadcast::Sender<SandboxEvent>,
}

impl LocalRuntime {
    pub async fn create(config: LocalRuntimeConfig) -> Result<Self, SandboxError> {
        tokio::fs::create_dir_all(&config.workspace)
            .await
            .map_err(|e| SandboxError::BootFailed(format!(
                "cannot create workspace {}: {e}",
                config.workspace.display()
            )))?;
        tracing::info!(workspace = %config.workspace.display(), "local sandbox workspace ready");
        let (events, _) = broadcast::channel(64);
        Ok(Self { config, events })
    }

    pub fn workspace(&self) -> &Path {
        &self.config.workspace
    }

    /// Map a project-relative path into the workspace, refusing anything
    /// that could leave it.
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let relative = Path::new(path);
        let mut resolved = self.config.workspace.clone();
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                _ => return Err(SandboxError::InvalidPath(path.to_string())),
            }
        }
        if depth == 0 {
            return Err(SandboxError::InvalidPath(path.to_string()));
        }
        Ok(resolved)
    }

    async fn clear_workspace(&self) -> Result<(), SandboxError> {
        let root = &self.config.workspace;
        let mut entries = tokio::fs::read_dir(root)
            .await
            .map_err(|e| SandboxError::io(root.display().to_string(), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SandboxError::io(root.display().to_string(), e))?
        {
            let path = entry.path();
            let result = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            result.map_err(|e| SandboxError::io(path.display().to_string(), e))?;
        }
        Ok(())
    }

    /// Candidate ports already serving. Taken before the child starts, since
    /// those belong to something else.
    async fn busy_ports(&self) -> HashSet<u16> {
        let mut busy = HashSet::new();
        for &port in &self.config.probe_ports {
            if port_open(port).await {
                busy.insert(port);
            }
        }
        busy
    }

    fn start_port_probe(&self, busy: HashSet<u16>, exited: Arc<AtomicBool>) {
        let ports = self.config.probe_ports.clone();
        if ports.is_empty() {
            return;
        }
        let interval = self.config.probe_interval;
        let events = self.events.clone();
        tokio::spawn(async move {
            while !exited.load(Ordering::SeqCst) {
                for &port in ports.iter().filter(|p| !busy.contains(*p)) {
                    if port_open(port).await {
                        tracing::debug!(port, "port opened inside local sandbox");
                        let _ = events.send(SandboxEvent::Port {
                            port,
                            status: PortStatus::Open,
                            url: format!("http://localhost:{port}"),
                        });
                        return;
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });
    }
}

async fn port_open(port: u16) -> bool {
    matches!(
        tokio::time::timeout(
            Duration::from_millis(200),
            TcpStream::connect(("127.0.0.1", port))
        )
        .await,
        Ok(Ok(_))
    )
}

/// Forward output line by line, decoding lossily. The pipe is drained to EOF
/// even when the receiver is gone, so the child never sees a closed pipe.
fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        let mut forwarding = true;
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    if !forwarding {
                        continue;
                    }
                    let mut text = String::from_utf8_lossy(&line).into_owned();
                    if !text.ends_with('\n') {
                        text.push('\n');
                    }
                    if tx.send(text).await.is_err() {
                        forwarding = false;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read sandbox process output");
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl SandboxRuntime for LocalRuntime {
    fn info(&self) -> RuntimeInfo {
        RuntimeInfo {
            kind: RuntimeKind::Local,
            requires_cross_origin_isolation: false,
            binary_safe_mount: true,
        }
    }

    async fn mount(&self, tree: &FileTree) -> Result<(), SandboxError> {
        tree.validate().map_err(SandboxError::MountFailed)?;
        self.clear_workspace()
            .await
            .map_err(|e| SandboxError::MountFailed(e.to_string()))?;

        let mut directories = Vec::new();
        let mut files = Vec::new();
        tree.visit(&mut |path, entry| match entry {
            FileEntry::Directory(_) => directories.push(path.to_string()),
            FileEntry::File(contents) => files.push((path.to_string(), contents)),
        });

        for dir in directories {
            let target = self.resolve(&dir)?;
            tokio::fs::create_dir_all(&target)
                .await
                .map_err(|e| SandboxError::MountFailed(format!("{dir}: {e}")))?;
        }
        for (path, contents) in files {
            let target = self.resolve(&path)?;
            tokio::fs::write(&target, contents.as_bytes())
                .await
                .map_err(|e| SandboxError::MountFailed(format!("{path}: {e}")))?;
        }
        tracing::debug!(files = tree.file_count(), "mounted tree into local workspace");
        Ok(())
    }

    async fn spawn(
        &self,
        program: &str,
        args: &[String],
        env: &EnvMap,
    ) -> Result<ProcessHandle, SandboxError> {
        let command_line = std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        let busy = self.busy_ports().await;
        let mut child = Command::new(program)
            .args(args)
            .envs(env)
            .current_dir(&self.config.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::SpawnFailed {
                command: command_line.clone(),
                source,
            })?;
        tracing::debug!(command = %command_line, pid = ?child.id(), "spawned sandbox process");

        let (sink, handle) = ProcessHandle::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, sink.output_sender()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, sink.output_sender()));
        }

        let exited = Arc::new(AtomicBool::new(false));
        self.start_port_probe(busy, Arc::clone(&exited));

        tokio::spawn(async move {
            let status = child.wait().await;
            for reader in readers {
                let _ = reader.await;
            }
            exited.store(true, Ordering::SeqCst);
            let code = match status {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    tracing::warn!(command = %command_line, error = %e, "failed to wait on sandbox process");
                    -1
                }
            };
            sink.finish(code);
        });

        Ok(handle)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .map_err(|e| SandboxError::io(path, e))
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), SandboxError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SandboxError::io(path, e))?;
        }
        tokio::fs::write(&target, contents)
            .await
            .map_err(|e| SandboxError::io(path, e))
    }

    fn subscribe(&self) -> broadcast::Receiver<SandboxEvent> {
        self.events.subscribe()
    }
}
