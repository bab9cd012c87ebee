use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{EnvMap, FileTree, ProcessHandle, RuntimeInfo, SandboxError, SandboxEvent};

/// One booted sandbox execution runtime.
///
/// Paths are relative to the mounted project root.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    fn info(&self) -> RuntimeInfo;

    /// Replace the visible filesystem with `tree`.
    async fn mount(&self, tree: &FileTree) -> Result<(), SandboxError>;

    async fn spawn(
        &self,
        program: &str,
        args: &[String],
        env: &EnvMap,
    ) -> Result<ProcessHandle, SandboxError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError>;

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), SandboxError>;

    /// Receive `server-ready` / `port` notifications. Events sent before the
    /// call are not replayed.
    fn subscribe(&self) -> broadcast::Receiver<SandboxEvent>;

    async fn read_to_string(&self, path: &str) -> Result<String, SandboxError> {
        let bytes = self.read_file(path).await?;
        String::from_utf8(bytes).map_err(|_| SandboxError::InvalidUtf8 {
            path: path.to_string(),
        })
    }

    async fn exists(&self, path: &str) -> bool {
        self.read_file(path).await.is_ok()
    }
}
