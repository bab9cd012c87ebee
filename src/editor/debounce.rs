use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Content of one file after the user stopped typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    pub path: String,
    pub content: String,
}

enum Command {
    Edit { path: String, content: String },
    Select { path: String },
    Flush(oneshot::Sender<()>),
}

/// Trailing-edge debounce of editor changes.
///
/// Only the last content within the window is delivered. A pending edit is
/// always delivered under the path it was made to: switching files or
/// editing another file flushes it immediately.
#[derive(Clone)]
pub struct EditDebouncer {
    tx: mpsc::Sender<Command>,
}

impl EditDebouncer {
    pub fn spawn(delay: Duration, updates: mpsc::Sender<FileUpdate>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(run(delay, rx, updates));
        (Self { tx }, task)
    }

    pub async fn edit(&self, path: impl Into<String>, content: impl Into<String>) {
        let _ = self
            .tx
            .send(Command::Edit {
                path: path.into(),
                content: content.into(),
            })
            .await;
    }

    /// The editor switched to `path`.
    pub async fn select(&self, path: impl Into<String>) {
        let _ = self.tx.send(Command::Select { path: path.into() }).await;
    }

    /// Deliver any pending edit now.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

async fn run(delay: Duration, mut rx: mpsc::Receiver<Command>, updates: mpsc::Sender<FileUpdate>) {
    let mut pending: Option<FileUpdate> = None;
    let timer = tokio::time::sleep(delay);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Edit { path, content }) => {
                    if let Some(previous) = pending.take_if(|p| p.path != path) {
                        deliver(&updates, previous).await;
                    }
                    pending = Some(FileUpdate { path, content });
                    timer.as_mut().reset(Instant::now() + delay);
                }
                Some(Command::Select { path }) => {
                    if let Some(previous) = pending.take_if(|p| p.path != path) {
                        deliver(&updates, previous).await;
                    }
                }
                Some(Command::Flush(ack)) => {
                    if let Some(previous) = pending.take() {
                        deliver(&updates, previous).await;
                    }
                    let _ = ack.send(());
                }
                None => {
                    if let Some(previous) = pending.take() {
                        deliver(&updates, previous).await;
                    }
                    return;
                }
            },
            () = &mut timer, if pending.is_some() => {
                if let Some(update) = pending.take() {
                    deliver(&updates, update).await;
                }
            }
        }
    }
}

async fn deliver(updates: &mpsc::Sender<FileUpdate>, update: FileUpdate) {
    tracing::debug!(path = %update.path, bytes = update.content.len(), "editor update");
    if updates.send(update).await.is_err() {
        tracing::warn!("editor update dropped, file state owner is gone");
    }
}
