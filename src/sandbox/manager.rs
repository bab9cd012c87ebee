use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::{SandboxError, SandboxRuntime};

/// Knows how to bring up one runtime instance.
#[async_trait]
pub trait Booter: Send + Sync {
    async fn boot(&self) -> Result<Arc<dyn SandboxRuntime>, SandboxError>;

    /// Whether the runtime will need a cross-origin isolated host. Known
    /// before booting so the precondition can fail fast.
    fn requires_cross_origin_isolation(&self) -> bool {
        false
    }
}

/// Owns the single runtime instance of a session.
///
/// The first `get` boots; concurrent callers await the same in-flight boot.
/// A failed boot is remembered and returned to every later caller.
pub struct RuntimeManager {
    booter: Box<dyn Booter>,
    runtime: OnceCell<Result<Arc<dyn SandboxRuntime>, String>>,
    boots: AtomicUsize,
}

impl RuntimeManager {
    pub fn new(booter: impl Booter + 'static) -> Self {
        Self::from_boxed(Box::new(booter))
    }

    pub fn from_boxed(booter: Box<dyn Booter>) -> Self {
        Self {
            booter,
            runtime: OnceCell::new(),
            boots: AtomicUsize::new(0),
        }
    }

    /// Wrap an already booted runtime.
    pub fn ready(runtime: Arc<dyn SandboxRuntime>) -> Self {
        let requires_isolation = runtime.info().requires_cross_origin_isolation;
        let manager = Self::from_boxed(Box::new(Prebooted {
            runtime: Arc::clone(&runtime),
            requires_isolation,
        }));
        let _ = manager.runtime.set(Ok(runtime));
        manager
    }

    pub async fn get(&self) -> Result<Arc<dyn SandboxRuntime>, SandboxError> {
        let outcome = self
            .runtime
            .get_or_init(|| async {
                self.boots.fetch_add(1, Ordering::SeqCst);
                tracing::info!("booting sandbox runtime");
                match self.booter.boot().await {
                    Ok(runtime) => {
                        tracing::info!(kind = ?runtime.info().kind, "sandbox runtime booted");
                        Ok(runtime)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "sandbox runtime failed to boot");
                        Err(e.to_string())
                    }
                }
            })
            .await;

        match outcome {
            Ok(runtime) => Ok(Arc::clone(runtime)),
            Err(message) => Err(SandboxError::BootFailed(message.clone())),
        }
    }

    /// The runtime if it has finished booting successfully.
    pub fn try_get(&self) -> Result<Arc<dyn SandboxRuntime>, SandboxError> {
        match self.runtime.get() {
            Some(Ok(runtime)) => Ok(Arc::clone(runtime)),
            Some(Err(message)) => Err(SandboxError::BootFailed(message.clone())),
            None => Err(SandboxError::NotReady),
        }
    }

    pub fn boot_count(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }

    pub fn requires_cross_origin_isolation(&self) -> bool {
        self.booter.requires_cross_origin_isolation()
    }
}

struct Prebooted {
    runtime: Arc<dyn SandboxRuntime>,
    requires_isolation: bool,
}

#[async_trait]
impl Booter for Prebooted {
    async fn boot(&self) -> Result<Arc<dyn SandboxRuntime>, SandboxError> {
        Ok(Arc::clone(&self.runtime))
    }

    fn requires_cross_origin_isolation(&self) -> bool {
        self.requires_isolation
    }
}
