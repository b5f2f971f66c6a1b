//! Per-provider webhook adapters.
//!
//! Each provider contributes a REST client for its diff-fetch and
//! comment-post calls plus an [`EventHandler`] implementation that runs
//! the fetch → review → comment sequence for one delivery. The gateway
//! only ever sees the trait.

pub mod bitbucket;
pub mod gitlab;
pub mod traits;

pub use bitbucket::{BitbucketClient, BitbucketEventHandler};
pub use gitlab::{GitLabClient, GitLabEventHandler};
pub use traits::EventHandler;
