//! GitLab merge request integration.
//!
//! Listens for `Merge Request Hook` events, fetches the merge request's
//! per-file changes, reviews them, and posts the verdict back as a note.
//! The default mode reviews every change in one batch call and posts at
//! most one note per merge request; `one-by-one` mode reviews each
//! surviving file separately and may post a note per file.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use super::traits::EventHandler;
use crate::config::ReviewMode;
use crate::review::{CodeReviewer, DiffUnit, ReviewResult};

// ── REST client ──────────────────────────────────────────────────

/// One changed file from the merge request diffs endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestChange {
    pub new_path: String,
    pub diff: String,
    #[serde(default)]
    pub deleted_file: bool,
}

/// Minimal GitLab REST client: diff fetch and note post.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    api_url: String,
    token: String,
    client: reqwest::Client,
}

impl GitLabClient {
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

    fn merge_request_url(&self, project_id: u64, merge_request_iid: u64, resource: &str) -> String {
        format!(
            "{}/projects/{}/merge_requests/{}/{}",
            self.api_url.trim_end_matches('/'),
            project_id,
            merge_request_iid,
            resource
        )
    }

    /// Fetch the per-file changes of a merge request.
    pub async fn merge_request_changes(
        &self,
        project_id: u64,
        merge_request_iid: u64,
    ) -> Result<Vec<MergeRequestChange>> {
        let url = self.merge_request_url(project_id, merge_request_iid, "diffs");
        let resp = self
            .client
            .get(&url)
            .header("Private-Token", &self.token)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GitLab diffs fetch failed {status}: {body}");
        }

        Ok(resp.json().await?)
    }

    /// Post a note on a merge request.
    pub async fn post_merge_request_note(
        &self,
        project_id: u64,
        merge_request_iid: u64,
        body: &str,
    ) -> Result<()> {
        let url = self.merge_request_url(project_id, merge_request_iid, "notes");
        let resp = self
            .client
            .post(&url)
            .header("Private-Token", &self.token)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GitLab note post failed {status}: {body}");
        }

        tracing::info!(project_id, merge_request_iid, "merge request note posted");
        Ok(())
    }
}

// ── Event handler ────────────────────────────────────────────────

/// Handles one GitLab merge request webhook delivery.
pub struct GitLabEventHandler {
    client: GitLabClient,
    reviewer: CodeReviewer,
    review_mode: ReviewMode,
}

impl GitLabEventHandler {
    pub fn new(client: GitLabClient, reviewer: CodeReviewer, review_mode: ReviewMode) -> Self {
        Self {
            client,
            reviewer,
            review_mode,
        }
    }

    /// Review the whole change set in one call, yielding one combined
    /// verdict. Deletions stay in: their diffs are part of the change.
    async fn review_at_once(
        &self,
        changes: &[MergeRequestChange],
    ) -> Result<Vec<Option<ReviewResult>>> {
        let diffs: Vec<DiffUnit> = changes
            .iter()
            .filter(|change| !change.new_path.is_empty() && !change.diff.is_empty())
            .map(|change| DiffUnit {
                file: change.new_path.clone(),
                diff: change.diff.clone(),
            })
            .collect();

        if diffs.is_empty() {
            tracing::info!("merge request has no reviewable diffs");
            return Ok(Vec::new());
        }

        Ok(vec![self.reviewer.review_diffs(&diffs).await?])
    }

    /// Review each file separately, skipping deleted files.
    async fn review_one_by_one(
        &self,
        changes: &[MergeRequestChange],
    ) -> Result<Vec<Option<ReviewResult>>> {
        let mut results = Vec::new();
        for change in changes {
            if change.deleted_file || change.new_path.is_empty() || change.diff.is_empty() {
                continue;
            }
            results.push(
                self.reviewer
                    .review_diff(&change.new_path, &change.diff)
                    .await?,
            );
        }
        Ok(results)
    }
}

fn merge_request_ids(payload: &Value) -> Result<(u64, u64)> {
    let project_id = payload
        .get("project")
        .and_then(|project| project.get("id"))
        .and_then(Value::as_u64)
        .context("payload missing project.id")?;
    let merge_request_iid = payload
        .get("object_attributes")
        .and_then(|attrs| attrs.get("iid"))
        .and_then(Value::as_u64)
        .context("payload missing object_attributes.iid")?;
    Ok((project_id, merge_request_iid))
}

fn format_note(result: &ReviewResult) -> String {
    // Per-file verdicts carry a file tag; name the file so one-by-one
    // mode's notes stay distinguishable on the merge request.
    match result.file {
        Some(ref file) => format!(
            "Automated code review\nFile: {}\nPossible issues: {}\nSuggestions: {}",
            file, result.issues, result.suggestions
        ),
        None => format!(
            "Automated code review\nPossible issues: {}\nSuggestions: {}",
            result.issues, result.suggestions
        ),
    }
}

#[async_trait]
impl EventHandler for GitLabEventHandler {
    fn provider(&self) -> &'static str {
        "gitlab"
    }

    fn should_trigger(&self, headers: &HeaderMap, payload: &Value) -> bool {
        let event = headers
            .get("X-Gitlab-Event")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if event != "Merge Request Hook" {
            return false;
        }

        payload
            .get("object_attributes")
            .and_then(|attrs| attrs.get("action"))
            .and_then(Value::as_str)
            == Some("open")
    }

    async fn handle_event(&self, payload: &Value) -> Result<()> {
        let (project_id, merge_request_iid) = merge_request_ids(payload)?;
        let changes = self
            .client
            .merge_request_changes(project_id, merge_request_iid)
            .await?;
        tracing::info!(
            project_id,
            merge_request_iid,
            changed_files = changes.len(),
            "fetched merge request changes"
        );

        let results = match self.review_mode {
            ReviewMode::Batch => self.review_at_once(&changes).await?,
            ReviewMode::OneByOne => self.review_one_by_one(&changes).await?,
        };

        for result in results {
            match result {
                Some(result) if result.should_comment => {
                    let note = format_note(&result);
                    if let Err(e) = self
                        .client
                        .post_merge_request_note(project_id, merge_request_iid, &note)
                        .await
                    {
                        tracing::warn!("failed to post merge request note: {e:#}");
                    }
                }
                Some(result) => {
                    tracing::info!(
                        file = result.file.as_deref().unwrap_or_default(),
                        "review declined to comment"
                    );
                }
                None => tracing::error!("review produced no usable result"),
            }
        }

        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
