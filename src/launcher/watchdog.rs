use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::ReadinessCell;
use crate::configure::{MANIFEST_PATH, Manifest};
use crate::log::SessionLog;
use crate::sandbox::SandboxRuntime;

/// Scripts suggested when the primary command is slow to come up.
pub const ALTERNATIVE_SCRIPTS: &[&str] = &["start", "serve", "preview"];

/// After `grace` without readiness, list the manifest's alternative start
/// scripts in the session log. Nothing is launched.
pub fn spawn(
    runtime: Arc<dyn SandboxRuntime>,
    log: SessionLog,
    cell: ReadinessCell,
    grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cell.wait() => return,
            _ = tokio::time::sleep(grace) => {}
        }

        tracing::warn!(grace_secs = grace.as_secs(), "dev server slow to report readiness");
        log.warn(format!(
            "Dev server has not reported readiness after {}s",
            grace.as_secs()
        ));

        let manifest = match runtime.read_to_string(MANIFEST_PATH).await {
            Ok(text) => Manifest::parse(&text).ok(),
            Err(_) => None,
        };
        let Some(manifest) = manifest else {
            tracing::debug!("no manifest to inspect for alternative scripts");
            return;
        };
        for script in ALTERNATIVE_SCRIPTS {
            if manifest.has_script(script) {
                log.info(format!("Alternative start command available: npm run {script}"));
            }
        }
    })
}
