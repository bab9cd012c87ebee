pub mod client;
pub mod models;

pub use client::{GithubClient, HttpGithubClient};
pub use models::{ContentEntry, ContentKind, Contents, RepoRef};
