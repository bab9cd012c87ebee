use tokio::sync::{mpsc, oneshot};

use super::SandboxError;

const OUTPUT_BUFFER: usize = 256;

/// A process running inside the sandbox.
///
/// `output` yields text chunks from stdout and stderr interleaved in arrival
/// order; `exit` resolves once the process terminates.
pub struct ProcessHandle {
    pub output: mpsc::Receiver<String>,
    pub exit: ExitWaiter,
}

impl ProcessHandle {
    /// Create a connected sink/handle pair for a backend to drive.
    pub fn channel() -> (ProcessSink, ProcessHandle) {
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_BUFFER);
        let (exit_tx, exit_rx) = oneshot::channel();
        (
            ProcessSink {
                output: output_tx,
                exit: exit_tx,
            },
            ProcessHandle {
                output: output_rx,
                exit: ExitWaiter(exit_rx),
            },
        )
    }

    /// Drain output through `on_chunk` and return the exit code.
    pub async fn wait_with_output<F>(mut self, mut on_chunk: F) -> Result<i32, SandboxError>
    where
        F: FnMut(String),
    {
        while let Some(chunk) = self.output.recv().await {
            on_chunk(chunk);
        }
        self.exit.wait().await
    }
}

pub struct ExitWaiter(oneshot::Receiver<i32>);

impl ExitWaiter {
    pub async fn wait(self) -> Result<i32, SandboxError> {
        self.0.await.map_err(|_| SandboxError::ProcessLost)
    }
}

/// Backend side of a [`ProcessHandle`].
pub struct ProcessSink {
    output: mpsc::Sender<String>,
    exit: oneshot::Sender<i32>,
}

impl ProcessSink {
    /// Forward a chunk. Returns `false` once the reader has gone away.
    pub async fn send(&self, chunk: impl Into<String>) -> bool {
        self.output.send(chunk.into()).await.is_ok()
    }

    pub fn output_sender(&self) -> mpsc::Sender<String> {
        self.output.clone()
    }

    pub fn finish(self, code: i32) {
        drop(self.output);
        let _ = self.exit.send(code);
    }
}
