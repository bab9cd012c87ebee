use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

/// Where the readiness signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessSource {
    /// A runtime `server-ready` or `port` event.
    Structured,
    /// A pattern match on process output.
    Textual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub url: String,
    pub port: u16,
    pub source: ReadinessSource,
}

/// Single-assignment slot for the server address. The first offer wins and
/// every later offer is refused.
#[derive(Clone)]
pub struct ReadinessCell {
    tx: Arc<watch::Sender<Option<ServerInfo>>>,
}

impl Default for ReadinessCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Returns `true` if `info` was stored.
    pub fn offer(&self, info: ServerInfo) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(info);
            true
        })
    }

    pub fn get(&self) -> Option<ServerInfo> {
        self.tx.borrow().clone()
    }

    /// Resolve once a value is stored.
    pub async fn wait(&self) -> Option<ServerInfo> {
        let mut rx = self.tx.subscribe();
        let value = rx.wait_for(Option::is_some).await.ok()?;
        value.clone()
    }
}
