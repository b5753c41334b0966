//! Push payload parsing for the supported providers

use serde::Deserialize;

use crate::errors::{PloyerError, Result};

/// Provider-independent view of one push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPayload {
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: String,
    pub author: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubPushEvent {
    #[serde(rename = "ref")]
    git_ref: String,
    head_commit: GithubCommit,
}

#[derive(Debug, Deserialize)]
struct GithubCommit {
    id: String,
    message: String,
    author: GithubAuthor,
}

#[derive(Debug, Deserialize)]
struct GithubAuthor {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GitlabPushEvent {
    #[serde(rename = "ref")]
    git_ref: String,
    checkout_sha: String,
    #[serde(default)]
    commits: Vec<GitlabCommit>,
}

#[derive(Debug, Deserialize)]
struct GitlabCommit {
    message: String,
    author: Option<GitlabAuthor>,
}

#[derive(Debug, Deserialize)]
struct GitlabAuthor {
    name: String,
}

fn branch_from_ref(git_ref: &str) -> String {
    git_ref
        .strip_prefix("refs/heads/")
        .unwrap_or(git_ref)
        .to_string()
}

pub fn parse_github_push(body: &[u8]) -> Result<PushPayload> {
    let event: GithubPushEvent = serde_json::from_slice(body)
        .map_err(|e| PloyerError::Validation(format!("unparseable push payload: {}", e)))?;

    Ok(PushPayload {
        branch: branch_from_ref(&event.git_ref),
        commit_sha: event.head_commit.id,
        commit_message: event.head_commit.message,
        author: Some(event.head_commit.author.name),
    })
}

pub fn parse_gitlab_push(body: &[u8]) -> Result<PushPayload> {
    let event: GitlabPushEvent = serde_json::from_slice(body)
        .map_err(|e| PloyerError::Validation(format!("unparseable push payload: {}", e)))?;

    let (message, author) = match event.commits.first() {
        Some(commit) => (
            commit.message.clone(),
            commit.author.as_ref().map(|a| a.name.clone()),
        ),
        None => (String::new(), None),
    };

    Ok(PushPayload {
        branch: branch_from_ref(&event.git_ref),
        commit_sha: event.checkout_sha,
        commit_message: message,
        author,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_github_push() {
        let body = r#"{
            "ref": "refs/heads/main",
            "head_commit": {
                "id": "abc123",
                "message": "Fix bug",
                "author": {"name": "Jane Doe"}
            }
        }"#;

        let payload = parse_github_push(body.as_bytes()).unwrap();
        assert_eq!(payload.branch, "main");
        assert_eq!(payload.commit_sha, "abc123");
        assert_eq!(payload.commit_message, "Fix bug");
        assert_eq!(payload.author.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_parse_gitlab_push() {
        let body = r#"{
            "ref": "refs/heads/develop",
            "checkout_sha": "def456",
            "commits": [
                {"message": "Add feature", "author": {"name": "Sam Smith"}}
            ]
        }"#;

        let payload = parse_gitlab_push(body.as_bytes()).unwrap();
        assert_eq!(payload.branch, "develop");
        assert_eq!(payload.commit_sha, "def456");
        assert_eq!(payload.commit_message, "Add feature");
        assert_eq!(payload.author.as_deref(), Some("Sam Smith"));
    }

    #[test]
    fn test_gitlab_push_without_commits() {
        let body = r#"{"ref": "refs/heads/main", "checkout_sha": "789"}"#;
        let payload = parse_gitlab_push(body.as_bytes()).unwrap();
        assert_eq!(payload.commit_sha, "789");
        assert!(payload.author.is_none());
    }

    #[test]
    fn test_branch_without_prefix_passes_through() {
        assert_eq!(branch_from_ref("refs/heads/main"), "main");
        assert_eq!(branch_from_ref("main"), "main");
    }
}
