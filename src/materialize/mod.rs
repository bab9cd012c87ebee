//! Repository materialization: walk the hosted contents API, fetch every
//! file and fold the result into a [`FileTree`] ready for mounting.
//!
//! The walk is sequential and depth-first. The contents API is rate limited
//! per request, so subtrees are never fetched in parallel.

pub mod binary;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::github::{ContentEntry, ContentKind, GithubClient, RepoRef};
use crate::log::SessionLog;
use crate::sandbox::{FileContents, FileTree, SandboxError, SandboxRuntime};

pub use binary::is_binary_path;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("invalid repository URL '{0}': expected https://<host>/<owner>/<repo>")]
    InvalidRepoUrl(String),

    #[error("a GitHub token is required to clone {0}")]
    MissingToken(String),

    #[error("repository {repo} is unreachable: {reason}")]
    Unreachable { repo: String, reason: String },
}

/// Result of visiting one node of the remote tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    File { path: String, contents: FileContents },
    Skipped { path: String, reason: String },
    /// The repository root itself could not be listed.
    RootUnavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPath {
    pub path: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct Materialized {
    pub tree: FileTree,
    pub skipped: Vec<SkippedPath>,
}

pub struct Materializer {
    github: Arc<dyn GithubClient>,
    log: SessionLog,
}

impl Materializer {
    pub fn new(github: Arc<dyn GithubClient>, log: SessionLog) -> Self {
        Self { github, log }
    }

    /// Lazily walk the repository in listing order.
    pub fn walk<'a>(&'a self, repo: &'a RepoRef) -> impl Stream<Item = NodeOutcome> + Send + 'a {
        async_stream::stream! {
            let root = match self.github.list_contents(repo, "").await {
                Ok(contents) => contents.into_entries(),
                Err(e) => {
                    yield NodeOutcome::RootUnavailable { reason: format!("{e:#}") };
                    return;
                }
            };

            let mut stack: Vec<std::vec::IntoIter<ContentEntry>> = vec![root.into_iter()];
            while let Some(level) = stack.last_mut() {
                let Some(entry) = level.next() else {
                    stack.pop();
                    continue;
                };

                match entry.kind {
                    ContentKind::Dir => match self.github.list_contents(repo, &entry.path).await {
                        Ok(contents) => stack.push(contents.into_entries().into_iter()),
                        Err(e) => {
                            yield NodeOutcome::Skipped {
                                path: entry.path,
                                reason: format!("{e:#}"),
                            };
                        }
                    },
                    ContentKind::File => {
                        yield self.fetch_file(entry).await;
                    }
                    other => {
                        yield NodeOutcome::Skipped {
                            path: entry.path,
                            reason: format!("unsupported entry type {other:?}"),
                        };
                    }
                }
            }
        }
    }

    async fn fetch_file(&self, entry: ContentEntry) -> NodeOutcome {
        let Some(url) = entry.download_url.as_deref() else {
            return NodeOutcome::Skipped {
                path: entry.path,
                reason: "no download URL".to_string(),
            };
        };

        match self.github.fetch_raw(url).await {
            Ok(bytes) => {
                let contents = if is_binary_path(&entry.path) {
                    FileContents::Binary(bytes)
                } else {
                    FileContents::Text(String::from_utf8_lossy(&bytes).into_owned())
                };
                NodeOutcome::File {
                    path: entry.path,
                    contents,
                }
            }
            Err(e) => NodeOutcome::Skipped {
                path: entry.path,
                reason: format!("{e:#}"),
            },
        }
    }

    /// Fetch the whole repository. Per-path failures are logged and skipped;
    /// only an unreachable root is fatal.
    pub async fn clone_repository(&self, repo: &RepoRef) -> Result<Materialized, MaterializeError> {
        tracing::info!(repo = %repo, "materializing repository");

        let mut records = Vec::new();
        let mut skipped = Vec::new();

        let walk = self.walk(repo);
        futures::pin_mut!(walk);
        while let Some(outcome) = walk.next().await {
            match outcome {
                NodeOutcome::File { path, contents } => {
                    tracing::debug!(path = %path, bytes = contents.len(), binary = contents.is_binary(), "fetched");
                    records.push((path, contents));
                }
                NodeOutcome::Skipped { path, reason } => {
                    self.log.warn(format!("Skipped {path}: {reason}"));
                    skipped.push(SkippedPath { path, reason });
                }
                NodeOutcome::RootUnavailable { reason } => {
                    return Err(MaterializeError::Unreachable {
                        repo: repo.full_name(),
                        reason,
                    });
                }
            }
        }

        let fetched = records.len();
        let tree = FileTree::from_records(records);
        tracing::info!(
            repo = %repo,
            files = fetched,
            skipped = skipped.len(),
            "repository materialized"
        );
        self.log.info(format!(
            "Fetched {fetched} files from {repo}{}",
            if skipped.is_empty() {
                String::new()
            } else {
                format!(" ({} paths skipped)", skipped.len())
            }
        ));

        Ok(Materialized { tree, skipped })
    }
}

/// Mount `tree`, then rewrite binary files one at a time when the runtime
/// cannot be trusted with byte buffers in a bulk mount. Returns how many
/// files were rewritten.
pub async fn mount_tree(runtime: &dyn SandboxRuntime, tree: &FileTree) -> Result<usize, SandboxError> {
    runtime.mount(tree).await?;
    if runtime.info().binary_safe_mount {
        return Ok(0);
    }

    let mut rewritten = 0;
    for (path, contents) in tree.files() {
        if let FileContents::Binary(bytes) = contents {
            runtime
                .write_file(&path, bytes)
                .await
                .map_err(|e| SandboxError::MountFailed(format!("rewriting {path}: {e}")))?;
            rewritten += 1;
        }
    }
    tracing::debug!(rewritten, "rewrote binary files after bulk mount");
    Ok(rewritten)
}
