//! Editor boundary: debounced edits flow into the file-state owner, which
//! keeps the modified-file map and mirrors each update into the sandbox.

pub mod debounce;
pub mod file;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::log::SessionLog;
use crate::sandbox::{RuntimeManager, SandboxError};

pub use debounce::{DEFAULT_DEBOUNCE, EditDebouncer, FileUpdate};
pub use file::{EditorFile, language_for};

/// Single owner of edited file contents.
pub struct FileStateOwner {
    manager: Arc<RuntimeManager>,
    log: SessionLog,
    modified: Mutex<BTreeMap<String, String>>,
}

impl FileStateOwner {
    pub fn new(manager: Arc<RuntimeManager>, log: SessionLog) -> Self {
        Self {
            manager,
            log,
            modified: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record the update, then write it into the sandbox.
    pub async fn apply(&self, update: FileUpdate) -> Result<(), SandboxError> {
        self.lock()
            .insert(update.path.clone(), update.content.clone());
        let runtime = self.manager.try_get()?;
        runtime
            .write_file(&update.path, update.content.as_bytes())
            .await?;
        tracing::debug!(path = %update.path, "editor update written to sandbox");
        Ok(())
    }

    /// Modified files keyed by path. Input of the publish flow.
    pub fn modified(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    pub fn spawn(self: Arc<Self>, mut updates: mpsc::Receiver<FileUpdate>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                let path = update.path.clone();
                if let Err(e) = self.apply(update).await {
                    tracing::warn!(path = %path, error = %e, "failed to write editor update");
                    self.log.warn(format!("Failed to save {path}: {e}"));
                }
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.modified
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Wire a debouncer to a new file-state owner.
pub fn start(
    manager: Arc<RuntimeManager>,
    log: SessionLog,
    delay: Duration,
) -> (EditDebouncer, Arc<FileStateOwner>) {
    let (tx, rx) = mpsc::channel(64);
    let owner = Arc::new(FileStateOwner::new(manager, log));
    Arc::clone(&owner).spawn(rx);
    let (debouncer, _task) = EditDebouncer::spawn(delay, tx);
    (debouncer, owner)
}
