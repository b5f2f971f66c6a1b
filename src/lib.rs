//! reviewgate — webhook-triggered LLM code review.
//!
//! GitLab and Bitbucket merge/pull request webhooks come in, the diff is
//! fetched from the provider, a completion model reviews it, and the
//! findings go back as a comment on the merge/pull request.

pub mod config;
pub mod gateway;
pub mod llm;
pub mod logging;
pub mod providers;
pub mod review;
