//! Environment Configurator: inspects the mounted project and injects the
//! configuration, compatibility files and environment the dev server needs.
//!
//! Every write here is best-effort. A failed write is logged as a warning and
//! listed in [`ConfigReport::failed`]; the pipeline carries on.

pub mod env;
pub mod manifest;
pub mod project;
pub mod templates;

use crate::log::SessionLog;
use crate::sandbox::SandboxRuntime;

pub use env::{EnvironmentVariables, FIXED_OVERRIDES, SessionIdentifiers, render_env_file};
pub use manifest::Manifest;
pub use project::ProjectShape;

pub const MANIFEST_PATH: &str = "package.json";

#[derive(Debug, Clone)]
pub struct ConfigReport {
    pub shape: ProjectShape,
    pub manifest: Option<Manifest>,
    pub env: EnvironmentVariables,
    /// Files created or overwritten.
    pub written: Vec<String>,
    /// Injected files left alone because the project already has them.
    pub kept: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Configurator {
    log: SessionLog,
    start_command: String,
}

impl Configurator {
    pub fn new(log: SessionLog, start_command: impl Into<String>) -> Self {
        Self {
            log,
            start_command: start_command.into(),
        }
    }

    pub async fn prepare(&self, runtime: &dyn SandboxRuntime, ids: &SessionIdentifiers) -> ConfigReport {
        let manifest = read_manifest(runtime).await;
        let shape = ProjectShape::detect(manifest.as_ref());
        tracing::info!(shape = %shape, "detected project shape");
        self.log.info(format!("Detected {shape} project"));

        let mut report = ConfigReport {
            shape,
            manifest,
            env: EnvironmentVariables::assemble(ids),
            written: Vec::new(),
            kept: Vec::new(),
            failed: Vec::new(),
        };

        let stackblitzrc = json_text(&templates::stackblitzrc(&self.start_command));
        self.write(runtime, ".stackblitzrc", &stackblitzrc, &mut report).await;

        self.dev_server_config(runtime, &mut report).await;

        for (path, contents) in shape.framework_files() {
            if runtime.exists(path).await {
                tracing::debug!(path, "project already has framework file");
                report.kept.push((*path).to_string());
            } else if self.write(runtime, path, contents, &mut report).await {
                self.log.info(format!("Created {path} for {shape}"));
            }
        }

        self.write(runtime, ".swcrc", &json_text(&templates::swcrc()), &mut report)
            .await;

        if self
            .write(runtime, ".env.local", &render_env_file(ids), &mut report)
            .await
        {
            if ids.project_id.as_deref().is_some_and(|p| !p.is_empty()) {
                self.log.info("Added BASEBASE_PROJECT environment variable");
            }
            if ids.project_token.as_deref().is_some_and(|t| !t.is_empty()) {
                self.log.info("Added BASEBASE_TOKEN environment variable");
            }
        }

        tracing::info!(
            written = report.written.len(),
            kept = report.kept.len(),
            failed = report.failed.len(),
            env_vars = report.env.len(),
            "project configured"
        );
        report
    }

    /// An existing `vite.config.js` is untouched; a `vite.config.ts` is copied
    /// to `.js`; otherwise the template is written.
    async fn dev_server_config(&self, runtime: &dyn SandboxRuntime, report: &mut ConfigReport) {
        if runtime.exists("vite.config.js").await {
            report.kept.push("vite.config.js".to_string());
            return;
        }
        match runtime.read_to_string("vite.config.ts").await {
            Ok(existing) => {
                if self.write(runtime, "vite.config.js", &existing, report).await {
                    self.log.info("Copied vite.config.ts to vite.config.js");
                }
            }
            Err(_) => {
                if self
                    .write(runtime, "vite.config.js", templates::VITE_CONFIG, report)
                    .await
                {
                    self.log.info("Created dev server config with isolation headers");
                }
            }
        }
    }

    async fn write(
        &self,
        runtime: &dyn SandboxRuntime,
        path: &str,
        contents: &str,
        report: &mut ConfigReport,
    ) -> bool {
        match runtime.write_file(path, contents.as_bytes()).await {
            Ok(()) => {
                report.written.push(path.to_string());
                true
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "failed to write configuration file");
                self.log.warn(format!("Failed to write {path}: {e}"));
                report.failed.push(path.to_string());
                false
            }
        }
    }
}

async fn read_manifest(runtime: &dyn SandboxRuntime) -> Option<Manifest> {
    let text = match runtime.read_to_string(MANIFEST_PATH).await {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(error = %e, "no readable package.json");
            return None;
        }
    };
    match Manifest::parse(&text) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            tracing::warn!(error = %e, "package.json is not valid JSON");
            None
        }
    }
}

fn json_text(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Severity;
    use crate::sandbox::backends::memory::MemoryRuntime;
    use crate::sandbox::{FileContents, FileTree};

    async fn mounted(files: &[(&str, &str)]) -> MemoryRuntime {
        let runtime = MemoryRuntime::new();
        let tree = FileTree::from_records(
            files
                .iter()
                .map(|(p, c)| (p.to_string(), FileContents::Text(c.to_string()))),
        );
        runtime.mount(&tree).await.unwrap();
        runtime
    }

    fn configurator(log: &SessionLog) -> Configurator {
        Configurator::new(log.clone(), "npm run dev")
    }

    #[tokio::test]
    async fn test_next_project_gets_framework_files() {
        let runtime = mounted(&[("package.json", r#"{"dependencies":{"next":"14.1.0"}}"#)]).await;
        let log = SessionLog::new();
        let report = configurator(&log)
            .prepare(&runtime, &SessionIdentifiers::default())
            .await;

        assert_eq!(report.shape, ProjectShape::NextJs);
        let tree = runtime.tree();
        assert!(tree.file("next.config.js").is_some());
        assert!(tree.file("middleware.ts").is_some());
        assert!(tree.file(".swcrc").is_some());
        assert!(tree.file(".stackblitzrc").is_some());
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_vite_project_gets_no_framework_files() {
        let runtime = mounted(&[("package.json", r#"{"devDependencies":{"vite":"5"}}"#)]).await;
        let report = configurator(&SessionLog::new())
            .prepare(&runtime, &SessionIdentifiers::default())
            .await;

        assert_eq!(report.shape, ProjectShape::Vite);
        assert!(runtime.tree().file("next.config.js").is_none());
        assert!(runtime.tree().file("middleware.ts").is_none());
    }

    #[tokio::test]
    async fn test_existing_next_config_is_not_overwritten() {
        let runtime = mounted(&[
            ("package.json", r#"{"dependencies":{"next":"14"}}"#),
            ("next.config.js", "module.exports = { custom: true }"),
        ])
        .await;
        let report = configurator(&SessionLog::new())
            .prepare(&runtime, &SessionIdentifiers::default())
            .await;

        assert_eq!(
            runtime.tree().file("next.config.js"),
            Some(&FileContents::Text("module.exports = { custom: true }".into()))
        );
        assert!(report.kept.contains(&"next.config.js".to_string()));
        assert!(runtime.tree().file("middleware.ts").is_some());
    }

    #[tokio::test]
    async fn test_existing_vite_js_is_untouched() {
        let runtime = mounted(&[
            ("package.json", "{}"),
            ("vite.config.js", "export default {}"),
        ])
        .await;
        configurator(&SessionLog::new())
            .prepare(&runtime, &SessionIdentifiers::default())
            .await;
        assert!(!runtime.writes().contains(&"vite.config.js".to_string()));
    }

    #[tokio::test]
    async fn test_vite_ts_is_copied_to_js() {
        let runtime = mounted(&[
            ("package.json", "{}"),
            ("vite.config.ts", "export default { ts: true }"),
        ])
        .await;
        configurator(&SessionLog::new())
            .prepare(&runtime, &SessionIdentifiers::default())
            .await;
        assert_eq!(
            runtime.tree().file("vite.config.js"),
            Some(&FileContents::Text("export default { ts: true }".into()))
        );
    }

    #[tokio::test]
    async fn test_missing_vite_config_uses_template() {
        let runtime = mounted(&[("index.html", "<html></html>")]).await;
        let report = configurator(&SessionLog::new())
            .prepare(&runtime, &SessionIdentifiers::default())
            .await;
        assert_eq!(report.shape, ProjectShape::Unknown);
        assert_eq!(
            runtime.tree().file("vite.config.js"),
            Some(&FileContents::Text(templates::VITE_CONFIG.into()))
        );
    }

    #[tokio::test]
    async fn test_failed_writes_are_warnings_not_errors() {
        let runtime = mounted(&[("package.json", "{}")]).await;
        runtime.fail_writes_to(".swcrc");
        runtime.fail_writes_to(".stackblitzrc");
        let log = SessionLog::new();
        let report = configurator(&log)
            .prepare(&runtime, &SessionIdentifiers::default())
            .await;

        assert_eq!(report.failed, vec![".stackblitzrc", ".swcrc"]);
        assert!(runtime.tree().file(".env.local").is_some());
        let warnings = log
            .entries()
            .into_iter()
            .filter(|e| e.severity == Severity::Warn)
            .count();
        assert_eq!(warnings, 2);
    }

    #[tokio::test]
    async fn test_env_local_written_with_identifiers() {
        let runtime = mounted(&[("package.json", "{}")]).await;
        let ids = SessionIdentifiers {
            project_token: Some("secret".into()),
            project_id: Some("acme".into()),
        };
        let report = configurator(&SessionLog::new()).prepare(&runtime, &ids).await;

        let env_file = runtime.read_to_string(".env.local").await.unwrap();
        assert!(env_file.contains("BASEBASE_TOKEN=secret"));
        assert!(env_file.contains("BASEBASE_PROJECT=acme"));
        assert_eq!(report.env.get("VITE_BASEBASE_TOKEN"), Some("secret"));
    }

    #[tokio::test]
    async fn test_unparseable_manifest_is_unknown() {
        let runtime = mounted(&[("package.json", "{ broken")]).await;
        let report = configurator(&SessionLog::new())
            .prepare(&runtime, &SessionIdentifiers::default())
            .await;
        assert_eq!(report.shape, ProjectShape::Unknown);
        assert!(report.manifest.is_none());
    }
}
