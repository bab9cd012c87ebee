//! Dev Server Launcher: runs the project's dev command and races the
//! runtime's structured notifications against output scanning to learn where
//! the server listens.

pub mod patterns;
pub mod readiness;
pub mod watchdog;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::log::SessionLog;
use crate::sandbox::{EnvMap, PortStatus, SandboxError, SandboxEvent, SandboxRuntime};

use patterns::LineSplitter;
pub use readiness::{ReadinessCell, ReadinessSource, ServerInfo};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("dev server exited with code {code} before it was ready")]
    ExitedBeforeReady { code: i32 },

    #[error("dev server did not become ready within {}s", .0.as_secs())]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub program: String,
    pub args: Vec<String>,
    pub watchdog_grace: Duration,
    /// `None` waits for as long as the process lives.
    pub server_start_timeout: Option<Duration>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            program: "npm".to_string(),
            args: vec!["run".to_string(), "dev".to_string()],
            watchdog_grace: Duration::from_secs(30),
            server_start_timeout: None,
        }
    }
}

impl LaunchOptions {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct Launcher {
    runtime: Arc<dyn SandboxRuntime>,
    log: SessionLog,
    options: LaunchOptions,
}

impl Launcher {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, log: SessionLog, options: LaunchOptions) -> Self {
        Self {
            runtime,
            log,
            options,
        }
    }

    /// Start the dev server and resolve with the first readiness signal.
    ///
    /// Output keeps flowing into the session log after this returns.
    pub async fn start(&self, env: &EnvMap) -> Result<ServerInfo, LaunchError> {
        let command = self.options.command_line();
        // Subscribe first so an early server-ready event is not missed.
        let events = self.runtime.subscribe();
        let handle = self
            .runtime
            .spawn(&self.options.program, &self.options.args, env)
            .await?;
        tracing::info!(command = %command, "dev server spawned");
        self.log.info(format!("Running {command}"));

        let cell = ReadinessCell::new();
        let listener = spawn_event_listener(events, cell.clone());
        let mut scanner = spawn_output_scanner(handle.output, cell.clone(), self.log.clone());
        let watchdog = watchdog::spawn(
            Arc::clone(&self.runtime),
            self.log.clone(),
            cell.clone(),
            self.options.watchdog_grace,
        );
        let mut exit = tokio::spawn(handle.exit.wait());

        let hard_timeout = self.options.server_start_timeout;
        let deadline = async move {
            match hard_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            Some(info) = cell.wait() => Ok(info),
            joined = &mut exit => {
                let code = match joined {
                    Ok(Ok(code)) => code,
                    Ok(Err(e)) => return Err(abort_all(e.into(), &listener, &watchdog)),
                    Err(_) => return Err(abort_all(SandboxError::ProcessLost.into(), &listener, &watchdog)),
                };
                // Output sent before exit may still be in flight.
                let _ = (&mut scanner).await;
                match cell.get() {
                    Some(info) => {
                        tracing::info!(url = %info.url, port = info.port, code, "dev server reported readiness, then exited");
                        self.log.info(format!("Server ready at {}", info.url));
                        self.log.warn(format!("Dev server exited with code {code}"));
                        watchdog.abort();
                        return Ok(info);
                    }
                    None => Err(LaunchError::ExitedBeforeReady { code }),
                }
            }
            _ = deadline => Err(LaunchError::Timeout(hard_timeout.unwrap_or_default())),
        };

        match outcome {
            Ok(info) => {
                tracing::info!(url = %info.url, port = info.port, source = ?info.source, "dev server ready");
                self.log.info(format!("Server ready at {}", info.url));
                let log = self.log.clone();
                tokio::spawn(async move {
                    if let Ok(Ok(code)) = exit.await {
                        tracing::warn!(code, "dev server exited");
                        log.warn(format!("Dev server exited with code {code}"));
                    }
                });
                Ok(info)
            }
            Err(e) => {
                tracing::error!(command = %command, error = %e, "dev server failed to start");
                exit.abort();
                Err(abort_all(e, &listener, &watchdog))
            }
        }
    }
}

fn abort_all(err: LaunchError, listener: &JoinHandle<()>, watchdog: &JoinHandle<()>) -> LaunchError {
    listener.abort();
    watchdog.abort();
    err
}

/// Offer the first `server-ready` or `port open` event.
fn spawn_event_listener(mut events: broadcast::Receiver<SandboxEvent>, cell: ReadinessCell) -> JoinHandle<()> {
    let waiter = cell.clone();
    tokio::spawn(async move {
        let listen = async {
            loop {
                let (port, url) = match events.recv().await {
                    Ok(SandboxEvent::ServerReady { port, url }) => (port, url),
                    Ok(SandboxEvent::Port {
                        port,
                        status: PortStatus::Open,
                        url,
                    }) => (port, url),
                    Ok(SandboxEvent::Port { .. }) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "sandbox event listener lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                let offered = cell.offer(ServerInfo {
                    url: url.clone(),
                    port,
                    source: ReadinessSource::Structured,
                });
                if !offered {
                    tracing::debug!(port, url = %url, "server address already known, ignoring event");
                }
                return;
            }
        };
        tokio::select! {
            _ = listen => {}
            _ = waiter.wait() => {}
        }
    })
}

/// Log every output line and offer the first textual readiness match.
fn spawn_output_scanner(
    mut output: mpsc::Receiver<String>,
    cell: ReadinessCell,
    log: SessionLog,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut splitter = LineSplitter::default();
        while let Some(chunk) = output.recv().await {
            for line in splitter.push(&chunk) {
                scan_line(&line, &cell, &log);
            }
        }
        if let Some(rest) = splitter.finish() {
            scan_line(&rest, &cell, &log);
        }
    })
}

fn scan_line(raw: &str, cell: &ReadinessCell, log: &SessionLog) {
    let line = patterns::strip_ansi(raw);
    log.push(&*line, patterns::classify(&line));
    for (hint, severity) in patterns::hints_for(&line) {
        log.push(hint, severity);
    }

    let Some(port) = patterns::detect_port(&line) else {
        return;
    };
    let offered = cell.offer(ServerInfo {
        url: patterns::loopback_url(port),
        port,
        source: ReadinessSource::Textual,
    });
    if !offered {
        tracing::debug!(port, "ignoring textual readiness match, server address already known");
    }
}
