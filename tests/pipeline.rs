use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use devstage::configure::SessionIdentifiers;
use devstage::github::{ContentEntry, ContentKind, Contents, GithubClient, RepoRef};
use devstage::launcher::ReadinessSource;
use devstage::log::{SessionLog, Severity};
use devstage::materialize::MaterializeError;
use devstage::orchestrator::{Orchestrator, PipelineError, PipelineOptions, ProgressState, SessionRequest};
use devstage::sandbox::backends::memory::{MemoryRuntime, ScriptedProcess};
use devstage::sandbox::{
    Booter, FileContents, PortStatus, RuntimeManager, SandboxError, SandboxEvent, SandboxRuntime,
};

const REPO_URL: &str = "https://github.com/acme/widgets";

/// Serves a fixed set of files through the contents API shape.
struct FakeRepo {
    files: BTreeMap<String, Vec<u8>>,
}

impl FakeRepo {
    fn new(files: &[(&str, &[u8])]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(path, bytes)| (path.to_string(), bytes.to_vec()))
                .collect(),
        }
    }
}

#[async_trait]
impl GithubClient for FakeRepo {
    async fn list_contents(&self, repo: &RepoRef, path: &str) -> anyhow::Result<Contents> {
        anyhow::ensure!(repo.full_name() == "acme/widgets", "404 Not Found");
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let mut entries: BTreeMap<String, ContentEntry> = BTreeMap::new();
        for (file, bytes) in &self.files {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((dir, _)) => ContentEntry {
                    name: dir.to_string(),
                    path: format!("{prefix}{dir}"),
                    kind: ContentKind::Dir,
                    download_url: None,
                    size: 0,
                },
                None => ContentEntry {
                    name: rest.to_string(),
                    path: file.clone(),
                    kind: ContentKind::File,
                    download_url: Some(format!("https://raw.example/{file}")),
                    size: bytes.len() as u64,
                },
            };
            entries.entry(entry.name.clone()).or_insert(entry);
        }
        anyhow::ensure!(!entries.is_empty(), "404 Not Found: {path}");
        Ok(Contents::Listing(entries.into_values().collect()))
    }

    async fn fetch_raw(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let path = url.trim_start_matches("https://raw.example/");
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("404 for {url}"))
    }
}

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0xff, 0x00];

fn next_repo() -> FakeRepo {
    FakeRepo::new(&[
        (
            "package.json",
            br#"{"name":"widgets","dependencies":{"next":"14.1.0","react":"18.2.0"},"scripts":{"dev":"next dev","start":"next start"}}"#,
        ),
        ("app/page.tsx", b"export default function Page() { return null }"),
        ("public/logo.png", PNG),
    ])
}

fn vite_repo() -> FakeRepo {
    FakeRepo::new(&[
        ("package.json", br#"{"devDependencies":{"vite":"5.2.0"},"scripts":{"dev":"vite"}}"#),
        ("index.html", b"<div id=\"root\"></div>"),
        ("src/main.ts", b"console.log('hi')"),
    ])
}

fn request() -> SessionRequest {
    SessionRequest {
        repo_url: REPO_URL.to_string(),
        identifiers: SessionIdentifiers {
            project_token: Some("bb-token".to_string()),
            project_id: Some("widgets".to_string()),
        },
        cross_origin_isolated: true,
    }
}

fn orchestrator(runtime: &Arc<MemoryRuntime>, repo: FakeRepo) -> Orchestrator {
    let runtime: Arc<dyn SandboxRuntime> = runtime.clone();
    Orchestrator::new(
        Arc::new(RuntimeManager::ready(runtime)),
        Some(Arc::new(repo)),
        SessionLog::new(),
        PipelineOptions::default(),
    )
}

fn commands(runtime: &MemoryRuntime) -> Vec<String> {
    runtime.spawns().into_iter().map(|s| s.command).collect()
}

#[tokio::test(start_paused = true)]
async fn next_project_comes_up_with_framework_files() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.script(
        "npm install",
        ScriptedProcess::exiting(0).output("added 312 packages in 9s\n"),
    );
    runtime.script(
        "npm run dev",
        ScriptedProcess::running()
            .output("  ▲ Next.js 14.1.0\n")
            .output("ready - started server on 0.0.0.0:3000, url: http://localhost:3000\n"),
    );
    let session = orchestrator(&runtime, next_repo());

    let info = session.run(request()).await.unwrap();
    assert_eq!(info.port, 3000);
    assert_eq!(info.url, "http://localhost:3000");

    let tree = runtime.tree();
    assert!(tree.file("next.config.js").is_some());
    assert!(tree.file("middleware.ts").is_some());
    assert!(tree.file("app/page.tsx").is_some());
    assert_eq!(
        tree.file("public/logo.png"),
        Some(&FileContents::Binary(PNG.to_vec()))
    );
    assert_eq!(commands(&runtime), vec!["npm install", "npm run dev"]);

    let dev = &runtime.spawns()[1];
    assert_eq!(dev.env.get("NEXT_PUBLIC_BASEBASE_TOKEN").map(String::as_str), Some("bb-token"));
    assert_eq!(dev.env.get("NODE_ENV").map(String::as_str), Some("development"));
    let env_file = runtime.read_to_string(".env.local").await.unwrap();
    assert!(env_file.contains("BASEBASE_PROJECT=widgets"));

    let status = session.status();
    assert_eq!(status.state, ProgressState::Ready);
    assert_eq!(status.server, Some(info));
    assert!(status.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn vite_project_is_detected_from_local_line() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.script(
        "npm run dev",
        ScriptedProcess::running()
            .delay(Duration::from_millis(300))
            .output("\n  VITE v5.2.0  ready in 300 ms\n\n  ➜  Local:   http://localhost:5173/\n"),
    );
    let session = orchestrator(&runtime, vite_repo());

    let info = session.run(request()).await.unwrap();
    assert_eq!(info.port, 5173);
    assert_eq!(info.url, "http://localhost:5173");
    assert_eq!(info.source, ReadinessSource::Textual);

    let tree = runtime.tree();
    assert!(tree.file("next.config.js").is_none());
    assert!(tree.file("middleware.ts").is_none());
    assert!(tree.file("vite.config.js").is_some());
}

#[tokio::test(start_paused = true)]
async fn structured_port_event_wins_over_later_output() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.script(
        "npm run dev",
        ScriptedProcess::running()
            .event(SandboxEvent::Port {
                port: 4000,
                status: PortStatus::Open,
                url: "https://widgets-4000.sandbox.local".to_string(),
            })
            .delay(Duration::from_millis(20))
            .output("  ➜  Local:   http://localhost:5173/\n"),
    );
    let session = orchestrator(&runtime, vite_repo());

    let info = session.run(request()).await.unwrap();
    assert_eq!(info.port, 4000);
    assert_eq!(info.source, ReadinessSource::Structured);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.status().server.map(|s| s.port), Some(4000));
}

#[tokio::test(start_paused = true)]
async fn server_ready_event_pins_address_over_later_local_line() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.script(
        "npm run dev",
        ScriptedProcess::running()
            .event(SandboxEvent::ServerReady {
                port: 4000,
                url: "https://widgets-4000.sandbox.local".to_string(),
            })
            .delay(Duration::from_millis(20))
            .output("  ➜  Local:   http://localhost:5173/\n"),
    );
    let session = orchestrator(&runtime, vite_repo());

    let info = session.run(request()).await.unwrap();
    assert_eq!(info.port, 4000);
    assert_eq!(info.url, "https://widgets-4000.sandbox.local");
    assert_eq!(info.source, ReadinessSource::Structured);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = session.status();
    assert_eq!(status.server.map(|s| (s.port, s.url)), Some((4000, info.url.clone())));
    assert!(
        session
            .log()
            .entries()
            .iter()
            .any(|e| e.message.contains("Local:   http://localhost:5173/"))
    );
}

#[tokio::test(start_paused = true)]
async fn silent_dev_server_stays_starting_after_watchdog() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.script("npm run dev", ScriptedProcess::running().output("compiling...\n"));
    let session = Arc::new(orchestrator(&runtime, next_repo()));
    let running = Arc::clone(&session);
    let pipeline = tokio::spawn(async move { running.run(request()).await });

    tokio::time::sleep(Duration::from_secs(31)).await;

    let status = session.status();
    assert_eq!(status.state, ProgressState::StartingServer);
    assert!(!status.state.is_terminal());
    assert!(status.server.is_none());
    let messages: Vec<String> = session.log().entries().into_iter().map(|e| e.message).collect();
    assert!(messages.contains(&"Dev server has not reported readiness after 30s".to_string()));
    assert!(messages.contains(&"Alternative start command available: npm run start".to_string()));
    assert_eq!(commands(&runtime), vec!["npm install", "npm run dev"]);
    assert!(!pipeline.is_finished());

    pipeline.abort();
}

#[tokio::test(start_paused = true)]
async fn install_failure_stops_before_dev_server() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.script(
        "npm install",
        ScriptedProcess::exiting(1).output("npm ERR! 404 Not Found - GET https://registry.npmjs.org/nope\n"),
    );
    let session = orchestrator(&runtime, vite_repo());

    let err = session.run(request()).await.unwrap_err();
    assert!(matches!(err, PipelineError::InstallFailed { code: 1 }));
    assert_eq!(commands(&runtime), vec!["npm install"]);

    let status = session.status();
    assert_eq!(status.state, ProgressState::Error);
    assert_eq!(status.error.as_deref(), Some("npm install failed with exit code 1"));
    let entries = session.log().entries();
    assert!(entries.iter().any(|e| e.message.contains("npm ERR! 404")));
    assert!(
        entries
            .iter()
            .any(|e| e.severity == Severity::Error && e.message.contains("npm install failed"))
    );
}

#[tokio::test(start_paused = true)]
async fn dev_server_exit_is_reported() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.script(
        "npm run dev",
        ScriptedProcess::exiting(127).output("sh: vite: command not found\n"),
    );
    let session = orchestrator(&runtime, vite_repo());

    let err = session.run(request()).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Launch(devstage::launcher::LaunchError::ExitedBeforeReady { code: 127 })
    ));
    assert_eq!(session.status().state, ProgressState::Error);
}

struct IsolatedBooter {
    runtime: Arc<MemoryRuntime>,
}

#[async_trait]
impl Booter for IsolatedBooter {
    async fn boot(&self) -> Result<Arc<dyn SandboxRuntime>, SandboxError> {
        Ok(self.runtime.clone())
    }

    fn requires_cross_origin_isolation(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn missing_isolation_fails_without_touching_sandbox() {
    let runtime = Arc::new(MemoryRuntime::new().requiring_cross_origin_isolation());
    let manager = Arc::new(RuntimeManager::new(IsolatedBooter {
        runtime: runtime.clone(),
    }));
    let session = Orchestrator::new(
        Arc::clone(&manager),
        Some(Arc::new(vite_repo())),
        SessionLog::new(),
        PipelineOptions::default(),
    );

    let mut req = request();
    req.cross_origin_isolated = false;
    let err = session.run(req).await.unwrap_err();

    assert!(matches!(err, PipelineError::CrossOriginIsolation));
    assert_eq!(manager.boot_count(), 0);
    assert!(!runtime.is_mounted());
    assert!(runtime.spawns().is_empty());
    assert_eq!(session.status().state, ProgressState::Error);
}

#[tokio::test(start_paused = true)]
async fn second_run_is_rejected() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.script("npm run dev", ScriptedProcess::running().output("localhost:5173\n"));
    let session = orchestrator(&runtime, vite_repo());

    session.run(request()).await.unwrap();
    let err = session.run(request()).await.unwrap_err();

    assert!(matches!(err, PipelineError::AlreadyStarted));
    assert_eq!(commands(&runtime).len(), 2);
    assert_eq!(session.status().state, ProgressState::Ready);
}

#[tokio::test]
async fn missing_token_fails_at_clone() {
    let runtime = Arc::new(MemoryRuntime::new());
    let runtime_dyn: Arc<dyn SandboxRuntime> = runtime.clone();
    let session = Orchestrator::new(
        Arc::new(RuntimeManager::ready(runtime_dyn)),
        None,
        SessionLog::new(),
        PipelineOptions::default(),
    );

    let err = session.run(request()).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Materialize(MaterializeError::MissingToken(_))
    ));
    assert!(!runtime.is_mounted());
}

#[tokio::test]
async fn unreachable_repository_is_fatal() {
    let runtime = Arc::new(MemoryRuntime::new());
    let session = orchestrator(&runtime, vite_repo());
    let mut req = request();
    req.repo_url = "https://github.com/acme/missing".to_string();

    let err = session.run(req).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Materialize(MaterializeError::Unreachable { .. })
    ));
    let status = session.status();
    assert_eq!(status.state, ProgressState::Error);
    assert!(status.message.contains("acme/missing"));
}

#[tokio::test]
async fn invalid_url_is_fatal() {
    let runtime = Arc::new(MemoryRuntime::new());
    let session = orchestrator(&runtime, vite_repo());
    let mut req = request();
    req.repo_url = "ftp://example.com/acme".to_string();

    let err = session.run(req).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Materialize(MaterializeError::InvalidRepoUrl(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn binaries_are_rewritten_when_mount_is_not_binary_safe() {
    let runtime = Arc::new(MemoryRuntime::new().with_unsafe_binary_mount());
    runtime.script("npm run dev", ScriptedProcess::running().output("localhost:3000\n"));
    let session = orchestrator(&runtime, next_repo());

    session.run(request()).await.unwrap();
    assert_eq!(runtime.writes().first().map(String::as_str), Some("public/logo.png"));
    assert_eq!(
        runtime.tree().file("public/logo.png"),
        Some(&FileContents::Binary(PNG.to_vec()))
    );
}
