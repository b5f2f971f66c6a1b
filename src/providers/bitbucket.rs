//! Bitbucket pull request integration.
//!
//! Listens for `pullrequest:created` and `pullrequest:updated` events.
//! Bitbucket exposes the whole pull request as one raw diff blob behind a
//! link carried in the payload, so the review runs through the single-diff
//! path and posts at most one comment per delivery.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::Value;

use super::traits::EventHandler;
use crate::review::{CodeReviewer, ReviewResult};

// ── REST client ──────────────────────────────────────────────────

/// Minimal Bitbucket REST client: raw diff fetch and comment post.
#[derive(Debug, Clone)]
pub struct BitbucketClient {
    api_url: String,
    token: String,
    client: reqwest::Client,
}

impl BitbucketClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            api_url: api_url.into(),
            token: token.into(),
            client,
        })
    }

    /// Fetch the pull request's unified diff from the link the payload
    /// carries. The whole change set comes back as one text blob.
    pub async fn pull_request_diff(&self, diff_link: &str) -> Result<String> {
        let resp = self
            .client
            .get(diff_link)
            .bearer_auth(&self.token)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Bitbucket diff fetch failed {status}: {body}");
        }

        Ok(resp.text().await?)
    }

    /// Post a comment on a pull request.
    pub async fn post_pull_request_comment(
        &self,
        workspace: &str,
        repo_slug: &str,
        pull_request_id: u64,
        comment: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/repositories/{}/{}/pullrequests/{}/comments",
            self.api_url.trim_end_matches('/'),
            workspace,
            repo_slug,
            pull_request_id
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "content": { "raw": comment } }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Bitbucket comment post failed {status}: {body}");
        }

        tracing::info!(workspace, repo_slug, pull_request_id, "pull request comment posted");
        Ok(())
    }
}

// ── Event handler ────────────────────────────────────────────────

/// Handles one Bitbucket pull request webhook delivery.
pub struct BitbucketEventHandler {
    client: BitbucketClient,
    reviewer: CodeReviewer,
}

impl BitbucketEventHandler {
    pub fn new(client: BitbucketClient, reviewer: CodeReviewer) -> Self {
        Self { client, reviewer }
    }
}

/// Identifiers a Bitbucket delivery needs: pull request id, repo slug,
/// workspace, and the link the diff is fetched from. Bitbucket sends
/// uuids where GitLab sends numeric ids; both repo and workspace are
/// addressed by uuid in the comment endpoint.
#[derive(Debug, PartialEq, Eq)]
struct PullRequestRefs {
    pull_request_id: u64,
    repo_slug: String,
    workspace: String,
    diff_link: String,
}

fn pull_request_refs(payload: &Value) -> Result<PullRequestRefs> {
    let pull_request_id = payload
        .get("pullrequest")
        .and_then(|pr| pr.get("id"))
        .and_then(Value::as_u64)
        .context("payload missing pullrequest.id")?;
    let repo_slug = payload
        .get("repository")
        .and_then(|repo| repo.get("uuid"))
        .and_then(Value::as_str)
        .context("payload missing repository.uuid")?;
    let workspace = payload
        .get("repository")
        .and_then(|repo| repo.get("workspace"))
        .and_then(|workspace| workspace.get("uuid"))
        .and_then(Value::as_str)
        .context("payload missing repository.workspace.uuid")?;
    let diff_link = payload
        .get("pullrequest")
        .and_then(|pr| pr.get("links"))
        .and_then(|links| links.get("diff"))
        .and_then(|diff| diff.get("href"))
        .and_then(Value::as_str)
        .context("payload missing pullrequest.links.diff.href")?;

    Ok(PullRequestRefs {
        pull_request_id,
        repo_slug: repo_slug.to_owned(),
        workspace: workspace.to_owned(),
        diff_link: diff_link.to_owned(),
    })
}

fn format_comment(result: &ReviewResult) -> String {
    format!(
        "Automated code review\n\nPossible issues:\n{}\n\nSuggestions:\n{}",
        result.issues, result.suggestions
    )
}

#[async_trait]
impl EventHandler for BitbucketEventHandler {
    fn provider(&self) -> &'static str {
        "bitbucket"
    }

    fn should_trigger(&self, headers: &HeaderMap, _payload: &Value) -> bool {
        let event = headers
            .get("X-Event-Key")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        event == "pullrequest:created" || event == "pullrequest:updated"
    }

    async fn handle_event(&self, payload: &Value) -> Result<()> {
        let refs = pull_request_refs(payload)?;
        let diff = self.client.pull_request_diff(&refs.diff_link).await?;
        tracing::info!(
            pull_request_id = refs.pull_request_id,
            diff_bytes = diff.len(),
            "fetched pull request diff"
        );

        if diff.is_empty() {
            tracing::info!("pull request has no reviewable diff");
            return Ok(());
        }

        // The blob spans the whole pull request, there is no single file
        // name to tag the verdict with.
        match self.reviewer.review_diff("", &diff).await? {
            Some(result) if result.should_comment => {
                let comment = format_comment(&result);
                if let Err(e) = self
                    .client
                    .post_pull_request_comment(
                        &refs.workspace,
                        &refs.repo_slug,
                        refs.pull_request_id,
                        &comment,
                    )
                    .await
                {
                    tracing::warn!("failed to post pull request comment: {e:#}");
                }
            }
            Some(_) => tracing::info!("review declined to comment"),
            None => tracing::error!("review produced no usable result"),
        }

        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
