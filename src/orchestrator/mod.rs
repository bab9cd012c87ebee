//! Drives one session from "nothing running" to "dev server ready".
//!
//! Stages run strictly in sequence. Every failure funnels through
//! [`Orchestrator::run`], which is the only place that moves the session into
//! the `Error` state.

pub mod error;
pub mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::configure::{Configurator, SessionIdentifiers};
use crate::github::{GithubClient, RepoRef};
use crate::launcher::patterns::{LineSplitter, classify};
use crate::launcher::{LaunchOptions, Launcher, ServerInfo};
use crate::log::SessionLog;
use crate::materialize::{MaterializeError, Materializer, mount_tree};
use crate::sandbox::{EnvMap, RuntimeManager, SandboxRuntime};

pub use error::PipelineError;
pub use state::{ProgressState, SessionStatus};

/// Inputs of one session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub repo_url: String,
    pub identifiers: SessionIdentifiers,
    /// Whether the hosting context is cross-origin isolated.
    pub cross_origin_isolated: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub install_program: String,
    pub install_args: Vec<String>,
    pub launch: LaunchOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            install_program: "npm".to_string(),
            install_args: vec!["install".to_string()],
            launch: LaunchOptions::default(),
        }
    }
}

pub struct Orchestrator {
    manager: Arc<RuntimeManager>,
    /// `None` when no GitHub token is configured.
    github: Option<Arc<dyn GithubClient>>,
    log: SessionLog,
    options: PipelineOptions,
    started: AtomicBool,
    status: watch::Sender<SessionStatus>,
}

impl Orchestrator {
    pub fn new(
        manager: Arc<RuntimeManager>,
        github: Option<Arc<dyn GithubClient>>,
        log: SessionLog,
        options: PipelineOptions,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        Self {
            manager,
            github,
            log,
            options,
            started: AtomicBool::new(false),
            status,
        }
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn manager(&self) -> &Arc<RuntimeManager> {
        &self.manager
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Run the pipeline once. A second call returns `AlreadyStarted` without
    /// touching the sandbox or the session state.
    pub async fn run(&self, request: SessionRequest) -> Result<ServerInfo, PipelineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("session already started, ignoring run request");
            return Err(PipelineError::AlreadyStarted);
        }

        tracing::info!(repo = %request.repo_url, "starting session");
        match self.pipeline(&request).await {
            Ok(info) => {
                self.status.send_modify(|status| {
                    status.state = ProgressState::Ready;
                    status.message = ProgressState::Ready.status_text().to_string();
                    status.server = Some(info.clone());
                });
                tracing::info!(repo = %request.repo_url, url = %info.url, "session ready");
                Ok(info)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(repo = %request.repo_url, error = %message, "session failed");
                self.log.error(&message);
                self.log.info("Reload to retry");
                self.status.send_modify(|status| {
                    status.state = ProgressState::Error;
                    status.message = message.clone();
                    status.error = Some(message.clone());
                });
                Err(e)
            }
        }
    }

    async fn pipeline(&self, request: &SessionRequest) -> Result<ServerInfo, PipelineError> {
        if self.manager.requires_cross_origin_isolation() && !request.cross_origin_isolated {
            return Err(PipelineError::CrossOriginIsolation);
        }

        self.log.info(ProgressState::Initializing.status_text());
        let runtime = self.manager.get().await?;

        self.advance(ProgressState::Cloning);
        let repo = RepoRef::parse(&request.repo_url)
            .ok_or_else(|| MaterializeError::InvalidRepoUrl(request.repo_url.clone()))?;
        let github = self
            .github
            .clone()
            .ok_or_else(|| MaterializeError::MissingToken(repo.full_name()))?;
        let materialized = Materializer::new(github, self.log.clone())
            .clone_repository(&repo)
            .await?;
        mount_tree(runtime.as_ref(), &materialized.tree)
            .await
            .map_err(PipelineError::Mount)?;
        self.log.info(format!(
            "Mounted {} files",
            materialized.tree.file_count()
        ));

        self.advance(ProgressState::Installing);
        let report = Configurator::new(self.log.clone(), self.options.launch.command_line())
            .prepare(runtime.as_ref(), &request.identifiers)
            .await;
        self.install(runtime.as_ref()).await?;

        self.advance(ProgressState::StartingServer);
        let launcher = Launcher::new(runtime, self.log.clone(), self.options.launch.clone());
        let info = launcher.start(report.env.as_map()).await?;
        Ok(info)
    }

    async fn install(&self, runtime: &dyn SandboxRuntime) -> Result<(), PipelineError> {
        let handle = runtime
            .spawn(
                &self.options.install_program,
                &self.options.install_args,
                &EnvMap::new(),
            )
            .await?;

        let log = &self.log;
        let mut splitter = LineSplitter::default();
        let code = handle
            .wait_with_output(|chunk| {
                for line in splitter.push(&chunk) {
                    log.push(&line, classify(&line));
                }
            })
            .await?;
        if let Some(rest) = splitter.finish() {
            log.push(&rest, classify(&rest));
        }

        if code != 0 {
            return Err(PipelineError::InstallFailed { code });
        }
        tracing::info!("dependencies installed");
        self.log.info("Dependencies installed");
        Ok(())
    }

    fn advance(&self, next: ProgressState) {
        self.status.send_if_modified(|status| {
            if !status.state.can_advance_to(next) {
                tracing::warn!(from = ?status.state, to = ?next, "ignoring out-of-order stage transition");
                return false;
            }
            status.state = next;
            status.message = next.status_text().to_string();
            true
        });
        tracing::info!(stage = ?next, "session stage");
        self.log.info(next.status_text());
    }
}
