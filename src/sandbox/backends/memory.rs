//! In-process runtime with a scripted process table.
//!
//! Nothing is executed: `spawn` replays the [`ScriptedProcess`] registered for
//! the command line, which makes the pipeline drivable without Node or a
//! network.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::sandbox::{
    EnvMap, FileContents, FileEntry, FileTree, ProcessHandle, ProcessSink, RuntimeInfo,
    RuntimeKind, SandboxError, SandboxEvent, SandboxRuntime,
};

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Output(String),
    Event(SandboxEvent),
    Delay(Duration),
}

/// Behaviour of a fake process. `exit_code: None` keeps it running for as
/// long as the runtime lives.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProcess {
    pub steps: Vec<ScriptStep>,
    pub exit_code: Option<i32>,
}

impl ScriptedProcess {
    pub fn exiting(code: i32) -> Self {
        Self {
            steps: Vec::new(),
            exit_code: Some(code),
        }
    }

    pub fn running() -> Self {
        Self::default()
    }

    pub fn output(mut self, chunk: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Output(chunk.into()));
        self
    }

    pub fn event(mut self, event: SandboxEvent) -> Self {
        self.steps.push(ScriptStep::Event(event));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.steps.push(ScriptStep::Delay(delay));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRecord {
    pub command: String,
    pub env: EnvMap,
}

#[derive(Default)]
struct State {
    tree: FileTree,
    mounted: bool,
    scripts: HashMap<String, ScriptedProcess>,
    spawns: Vec<SpawnRecord>,
    writes: Vec<String>,
    failing_writes: HashSet<String>,
    running: Vec<ProcessSink>,
}

pub struct MemoryRuntime {
    state: Arc<Mutex<State>>,
    events: broadcast::Sender<SandboxEvent>,
    info: RuntimeInfo,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            events,
            info: RuntimeInfo {
                kind: RuntimeKind::Memory,
                requires_cross_origin_isolation: false,
                binary_safe_mount: true,
            },
        }
    }

    /// Report binary buffers as unsafe to bulk-mount, forcing the rewrite pass.
    pub fn with_unsafe_binary_mount(mut self) -> Self {
        self.info.binary_safe_mount = false;
        self
    }

    pub fn requiring_cross_origin_isolation(mut self) -> Self {
        self.info.requires_cross_origin_isolation = true;
        self
    }

    /// Register the behaviour of `command` (program and args joined by spaces).
    pub fn script(&self, command: &str, process: ScriptedProcess) {
        self.lock().scripts.insert(command.to_string(), process);
    }

    /// Make every write to `path` fail.
    pub fn fail_writes_to(&self, path: &str) {
        self.lock().failing_writes.insert(path.to_string());
    }

    pub fn emit(&self, event: SandboxEvent) {
        let _ = self.events.send(event);
    }

    pub fn tree(&self) -> FileTree {
        self.lock().tree.clone()
    }

    pub fn spawns(&self) -> Vec<SpawnRecord> {
        self.lock().spawns.clone()
    }

    /// Paths written through `write_file`, in order.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.lock().mounted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SandboxRuntime for MemoryRuntime {
    fn info(&self) -> RuntimeInfo {
        self.info
    }

    async fn mount(&self, tree: &FileTree) -> Result<(), SandboxError> {
        tree.validate().map_err(SandboxError::MountFailed)?;
        let mut state = self.lock();
        state.tree = tree.clone();
        state.mounted = true;
        Ok(())
    }

    async fn spawn(
        &self,
        program: &str,
        args: &[String],
        env: &EnvMap,
    ) -> Result<ProcessHandle, SandboxError> {
        let command = std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        let script = {
            let mut state = self.lock();
            state.spawns.push(SpawnRecord {
                command: command.clone(),
                env: env.clone(),
            });
            state
                .scripts
                .get(&command)
                .cloned()
                .unwrap_or_else(|| ScriptedProcess::exiting(0))
        };

        let (sink, handle) = ProcessHandle::channel();
        let events = self.events.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            for step in script.steps {
                match step {
                    ScriptStep::Output(chunk) => {
                        sink.send(chunk).await;
                    }
                    ScriptStep::Event(event) => {
                        let _ = events.send(event);
                    }
                    ScriptStep::Delay(delay) => tokio::time::sleep(delay).await,
                }
            }
            match script.exit_code {
                Some(code) => sink.finish(code),
                None => state
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .running
                    .push(sink),
            }
        });
        Ok(handle)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let state = self.lock();
        match state.tree.get(path) {
            Some(FileEntry::File(contents)) => Ok(contents.as_bytes().to_vec()),
            _ => Err(SandboxError::NotFound(path.to_string())),
        }
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), SandboxError> {
        let mut state = self.lock();
        if state.failing_writes.contains(path) {
            return Err(SandboxError::Io {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        let payload = match std::str::from_utf8(contents) {
            Ok(text) => FileContents::Text(text.to_string()),
            Err(_) => FileContents::Binary(contents.to_vec()),
        };
        if !state.tree.insert(path, payload) {
            return Err(SandboxError::InvalidPath(path.to_string()));
        }
        state.writes.push(path.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SandboxEvent> {
        self.events.subscribe()
    }
}
