use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox environment not ready")]
    NotReady,

    #[error("sandbox boot failed: {0}")]
    BootFailed(String),

    #[error("mount failed: {0}")]
    MountFailed(String),

    #[error("failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("path escapes the sandbox workspace: {0}")]
    InvalidPath(String),

    #[error("{path} is not valid UTF-8")]
    InvalidUtf8 { path: String },

    #[error("process ended without reporting an exit code")]
    ProcessLost,

    #[error("sandbox I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            SandboxError::NotFound(path)
        } else {
            SandboxError::Io { path, source }
        }
    }
}
