//! Process configuration, loaded once from the environment at startup and
//! passed explicitly to the components that need it.
//!
//! A provider without an access token is simply disabled; at least one
//! provider must be enabled for the process to start.

use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_SERVICE_TOKEN: &str = "secret-service-token";
pub const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_GITLAB_API_URL: &str = "https://gitlab.com/api/v4";
pub const DEFAULT_BITBUCKET_API_URL: &str = "https://api.bitbucket.org/2.0";

/// Fatal configuration problems, reported before the gateway binds.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    MissingVar(&'static str),
    #[error("GITLAB_ACCESS_TOKEN or BITBUCKET_ACCESS_TOKEN environment variable is not set")]
    NoProviderToken,
    #[error("invalid GITLAB_REVIEW_MODE {0:?}, expected \"batch\" or \"one-by-one\"")]
    InvalidReviewMode(String),
}

/// How the GitLab handler submits a merge request's changes for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewMode {
    /// Every change in one model call, one combined verdict per merge
    /// request.
    #[default]
    Batch,
    /// One model call per changed file, skipping deletions, one verdict
    /// (and potentially one comment) per file.
    OneByOne,
}

impl FromStr for ReviewMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(Self::Batch),
            "one-by-one" | "one_by_one" => Ok(Self::OneByOne),
            other => Err(ConfigError::InvalidReviewMode(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitLabConfig {
    pub api_url: String,
    pub access_token: String,
    pub review_mode: ReviewMode,
}

#[derive(Debug, Clone)]
pub struct BitbucketConfig {
    pub api_url: String,
    pub access_token: String,
}

/// Immutable process-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret the webhook routes require as a `service_token`
    /// query parameter.
    pub service_token: String,
    pub openai_api_key: String,
    pub openai_api_url: String,
    /// Model name sent with every completion request.
    pub model: String,
    pub gitlab: Option<GitLabConfig>,
    pub bitbucket: Option<BitbucketConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup. Values are trimmed; empty or
    /// whitespace-only values count as unset.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &'static str| {
            get(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let var_or = |name: &'static str, default: &str| {
            var(name).unwrap_or_else(|| default.to_owned())
        };

        let openai_api_key =
            var("OPENAI_API_KEY").ok_or(ConfigError::MissingVar("OPENAI_API_KEY"))?;

        let gitlab = match var("GITLAB_ACCESS_TOKEN") {
            Some(access_token) => Some(GitLabConfig {
                api_url: var_or("GITLAB_API_URL", DEFAULT_GITLAB_API_URL),
                access_token,
                review_mode: match var("GITLAB_REVIEW_MODE") {
                    Some(raw) => raw.parse()?,
                    None => ReviewMode::default(),
                },
            }),
            None => None,
        };

        let bitbucket = var("BITBUCKET_ACCESS_TOKEN").map(|access_token| BitbucketConfig {
            api_url: var_or("BITBUCKET_API_URL", DEFAULT_BITBUCKET_API_URL),
            access_token,
        });

        if gitlab.is_none() && bitbucket.is_none() {
            return Err(ConfigError::NoProviderToken);
        }

        Ok(Self {
            service_token: var_or("SERVICE_TOKEN", DEFAULT_SERVICE_TOKEN),
            openai_api_key,
            openai_api_url: var_or("OPENAI_API_URL", DEFAULT_OPENAI_API_URL),
            model: var_or("GPT_MODEL", DEFAULT_MODEL),
            gitlab,
            bitbucket,
        })
    }
}
