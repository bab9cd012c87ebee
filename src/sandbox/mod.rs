pub mod backends;
pub mod error;
pub mod handle;
pub mod manager;
pub mod provider;
pub mod types;

pub use error::SandboxError;
pub use handle::{ExitWaiter, ProcessHandle, ProcessSink};
pub use manager::{Booter, RuntimeManager};
pub use provider::SandboxRuntime;
pub use types::*;

use backends::local::{LocalBooter, LocalRuntimeConfig};

/// Build the session's runtime manager from config. Nothing boots until the
/// first `get`.
pub fn build_manager(config: LocalRuntimeConfig) -> RuntimeManager {
    tracing::info!(
        workspace = %config.workspace.display(),
        probe_ports = ?config.probe_ports,
        "initializing local sandbox runtime"
    );
    RuntimeManager::new(LocalBooter::new(config))
}
