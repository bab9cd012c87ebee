use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::configure::SessionIdentifiers;
use crate::launcher::LaunchOptions;
use crate::orchestrator::{PipelineOptions, SessionRequest};
use crate::sandbox::backends::local::LocalRuntimeConfig;

pub const DEFAULT_CONFIG_PATH: &str = "devstage.toml";

/// Settings loaded from `devstage.toml`, then overridden from the environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub github: GithubConfig,
    pub sandbox: SandboxConfig,
    pub launcher: LauncherConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub environment: String,
    pub sentry_dsn: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            environment: "local".to_string(),
            sentry_dsn: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub token: Option<String>,
    pub api_base: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: crate::github::client::GITHUB_API.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Defaults to `~/.devstage/workspace`.
    pub workspace: Option<PathBuf>,
    pub probe_ports: Vec<u16>,
    pub probe_interval_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let defaults = LocalRuntimeConfig::default();
        Self {
            workspace: None,
            probe_ports: defaults.probe_ports,
            probe_interval_ms: defaults.probe_interval.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub install_command: Vec<String>,
    pub dev_command: Vec<String>,
    pub watchdog_grace_secs: u64,
    pub server_start_timeout_secs: Option<u64>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            install_command: vec!["npm".to_string(), "install".to_string()],
            dev_command: vec!["npm".to_string(), "run".to_string(), "dev".to_string()],
            watchdog_grace_secs: 30,
            server_start_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub repo_url: Option<String>,
    pub project_token: Option<String>,
    pub project_id: Option<String>,
    pub debounce_ms: u64,
    /// Whether the page hosting the sandbox is cross-origin isolated. Runtimes
    /// that require isolation refuse to start when this is false.
    pub cross_origin_isolated: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            repo_url: None,
            project_token: None,
            project_id: None,
            debounce_ms: 500,
            cross_origin_isolated: true,
        }
    }
}

impl Config {
    /// Read `path` if it exists, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `lookup`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = var("PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(env) = var("ENVIRONMENT") {
            self.server.environment = env;
        }
        if let Some(dsn) = var("SENTRY_DSN") {
            self.server.sentry_dsn = Some(dsn);
        }
        if let Some(token) = var("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(token) = var("BASEBASE_TOKEN") {
            self.session.project_token = Some(token);
        }
        if let Some(project) = var("BASEBASE_PROJECT") {
            self.session.project_id = Some(project);
        }
        if let Some(isolated) = var("CROSS_ORIGIN_ISOLATED").and_then(|v| v.parse().ok()) {
            self.session.cross_origin_isolated = isolated;
        }
    }

    pub fn sentry_dsn(&self) -> Option<String> {
        self.server.sentry_dsn.clone().filter(|s| !s.is_empty())
    }

    pub fn github_token(&self) -> Option<&str> {
        self.github.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn identifiers(&self) -> SessionIdentifiers {
        SessionIdentifiers {
            project_token: self.session.project_token.clone(),
            project_id: self.session.project_id.clone(),
        }
    }

    pub fn session_request(&self, repo_url: String) -> SessionRequest {
        SessionRequest {
            repo_url,
            identifiers: self.identifiers(),
            cross_origin_isolated: self.session.cross_origin_isolated,
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.session.debounce_ms)
    }

    pub fn local_runtime(&self) -> LocalRuntimeConfig {
        let workspace = self.sandbox.workspace.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".devstage")
                .join("workspace")
        });
        LocalRuntimeConfig {
            workspace,
            probe_ports: self.sandbox.probe_ports.clone(),
            probe_interval: Duration::from_millis(self.sandbox.probe_interval_ms),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        let defaults = PipelineOptions::default();
        let (install_program, install_args) =
            split_command(&self.launcher.install_command, (defaults.install_program, defaults.install_args));
        let launch_defaults = LaunchOptions::default();
        let (program, args) =
            split_command(&self.launcher.dev_command, (launch_defaults.program, launch_defaults.args));
        PipelineOptions {
            install_program,
            install_args,
            launch: LaunchOptions {
                program,
                args,
                watchdog_grace: Duration::from_secs(self.launcher.watchdog_grace_secs),
                server_start_timeout: self.launcher.server_start_timeout_secs.map(Duration::from_secs),
            },
        }
    }
}

fn split_command(command: &[String], fallback: (String, Vec<String>)) -> (String, Vec<String>) {
    match command.split_first() {
        Some((program, args)) => (program.clone(), args.to_vec()),
        None => fallback,
    }
}
