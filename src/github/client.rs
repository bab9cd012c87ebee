use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use super::models::{Contents, RepoRef};

const USER_AGENT: &str = "devstage";
pub const GITHUB_API: &str = "https://api.github.com";

/// Read access to a hosted repository.
#[async_trait]
pub trait GithubClient: Send + Sync {
    /// List a directory (or describe a single file) at `path`; `""` is the root.
    async fn list_contents(&self, repo: &RepoRef, path: &str) -> Result<Contents>;

    /// Fetch raw bytes from a `download_url` returned by `list_contents`.
    async fn fetch_raw(&self, download_url: &str) -> Result<Vec<u8>>;
}

pub struct HttpGithubClient {
    http: Client,
    token: String,
    api_base: String,
}

impl HttpGithubClient {
    pub fn new(http: Client, token: impl Into<String>) -> Self {
        Self::with_api_base(http, token, GITHUB_API)
    }

    pub fn with_api_base(http: Client, token: impl Into<String>, api_base: &str) -> Self {
        Self {
            http,
            token: token.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn contents_url(&self, repo: &RepoRef, path: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            repo.owner,
            repo.repo,
            encoded.join("/")
        )
    }
}

#[async_trait]
impl GithubClient for HttpGithubClient {
    async fn list_contents(&self, repo: &RepoRef, path: &str) -> Result<Contents> {
        let url = self.contents_url(repo, path);
        let mut request = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json");
        if let Some(reference) = &repo.reference {
            request = request.query(&[("ref", reference)]);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("failed to list contents of '{path}'"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error {status} listing '{path}' in {repo}: {body}");
        }

        resp.json()
            .await
            .with_context(|| format!("failed to parse contents listing for '{path}'"))
    }

    async fn fetch_raw(&self, download_url: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(download_url)
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .context("failed to fetch raw file")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("GitHub raw fetch error {status} for {download_url}");
        }

        let bytes = resp.bytes().await.context("failed to read raw file body")?;
        Ok(bytes.to_vec())
    }
}
