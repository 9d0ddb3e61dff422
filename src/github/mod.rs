//! GitHub REST API access: repository search, repository lookup and
//! recent commit counts.

pub mod client;

pub use client::{read_token, CommitSource, GithubClient, OfflineCommits, SearchQuery};
