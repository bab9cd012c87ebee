use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Body;
use axum::extract::Request;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use devstage::config::{self, Config};
use devstage::editor;
use devstage::github::{GithubClient, HttpGithubClient};
use devstage::log::SessionLog;
use devstage::orchestrator::Orchestrator;
use devstage::sandbox;
use devstage::server;

#[derive(Parser)]
#[command(name = "devstage", version, about = "Run a hosted repository's dev server in a sandbox")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring a repository up and keep its dev server running until Ctrl-C.
    Up {
        /// https://github.com/<owner>/<repo>
        repo_url: String,
    },
    /// Serve the HTTP status surface, starting the configured session.
    Serve {
        /// Overrides `session.repo_url`.
        #[arg(long)]
        repo_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("devstage=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true).with_bracketed_fields(false))
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = sentry::init((
        config.sentry_dsn(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.server.environment.clone().into()),
            send_default_pii: false,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    let github: Option<Arc<dyn GithubClient>> = config.github_token().map(|token| {
        Arc::new(HttpGithubClient::with_api_base(
            http_client.clone(),
            token,
            &config.github.api_base,
        )) as Arc<dyn GithubClient>
    });
    if github.is_none() {
        tracing::warn!("GITHUB_TOKEN is not set; cloning will fail");
    }

    let manager = Arc::new(sandbox::build_manager(config.local_runtime()));
    let log = SessionLog::new();
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&manager),
        github,
        log.clone(),
        config.pipeline_options(),
    ));

    match cli.command {
        Command::Up { repo_url } => {
            let request = config.session_request(repo_url);
            match orchestrator.run(request).await {
                Ok(info) => {
                    println!("Dev server ready at {}", info.url);
                    tokio::signal::ctrl_c().await?;
                    tracing::info!("shutting down");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Serve { repo_url } => {
            match repo_url.or_else(|| config.session.repo_url.clone()) {
                Some(repo_url) => {
                    let request = config.session_request(repo_url);
                    let orchestrator = Arc::clone(&orchestrator);
                    tokio::spawn(async move {
                        // Failures are recorded in the session status.
                        let _ = orchestrator.run(request).await;
                    });
                }
                None => tracing::warn!("no repository configured; serving idle session"),
            }

            let (editor, files) = editor::start(Arc::clone(&manager), log, config.debounce());
            let state = server::AppState {
                orchestrator,
                editor,
                files,
            };
            let app = server::create_app(state)
                .layer(SentryHttpLayer::new().enable_transaction())
                .layer(NewSentryLayer::<Request<Body>>::new_from_top());

            let addr = format!("0.0.0.0:{}", config.server.port);
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            tracing::info!(%addr, "listening");
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
