use std::fmt;

use serde::Deserialize;

/// An `owner/repo` pair parsed from a repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub host: String,
    pub owner: String,
    pub repo: String,
    /// Branch, tag or commit from a `/tree/<ref>` URL suffix.
    pub reference: Option<String>,
}

impl RepoRef {
    /// Parse `https://<host>/<owner>/<repo>`, tolerating a `.git` suffix, a
    /// trailing slash and a `/tree/<ref>` suffix.
    pub fn parse(url: &str) -> Option<Self> {
        let rest = url.trim().strip_prefix("https://")?;
        let mut segments = rest.split('/').filter(|s| !s.is_empty());

        let host = segments.next()?;
        let owner = segments.next()?;
        let repo = segments.next()?;
        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        if owner.is_empty() || repo.is_empty() || !host.contains('.') {
            return None;
        }

        let reference = match (segments.next(), segments.next()) {
            (Some("tree"), Some(reference)) => Some(reference.to_string()),
            _ => None,
        };

        Some(Self {
            host: host.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            reference,
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    File,
    Dir,
    Symlink,
    Submodule,
}

/// One item of the contents API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContentEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub size: u64,
}

/// The contents API answers a directory with an array and a file with a
/// single object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Contents {
    Listing(Vec<ContentEntry>),
    Single(ContentEntry),
}

impl Contents {
    pub fn into_entries(self) -> Vec<ContentEntry> {
        match self {
            Contents::Listing(entries) => entries,
            Contents::Single(entry) => vec![entry],
        }
    }
}
