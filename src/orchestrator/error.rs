use thiserror::Error;

use crate::launcher::LaunchError;
use crate::materialize::MaterializeError;
use crate::sandbox::SandboxError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("session already started")]
    AlreadyStarted,

    #[error(
        "the sandbox requires a cross-origin isolated host; serve the page with \
         Cross-Origin-Opener-Policy: same-origin and Cross-Origin-Embedder-Policy: require-corp"
    )]
    CrossOriginIsolation,

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error("{0}")]
    Mount(SandboxError),

    #[error("npm install failed with exit code {code}")]
    InstallFailed { code: i32 },

    #[error(transparent)]
    Launch(#[from] LaunchError),
}
