//! Classifier endpoint configuration.
//!
//! Routing policy lives in `tier_coordination::RouterConfig` (TOML + env).
//! This module only covers the optional OpenAI-compatible classifier.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const ENV_CLASSIFIER_URL: &str = "ROUTER_CLASSIFIER_URL";
pub const ENV_CLASSIFIER_MODEL: &str = "ROUTER_CLASSIFIER_MODEL";
pub const ENV_CLASSIFIER_API_KEY: &str = "ROUTER_CLASSIFIER_API_KEY";

const DEFAULT_CLASSIFIER_MODEL: &str = "classifier";
const ENDPOINT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// OpenAI-compatible endpoint used for entry classification.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierEndpoint {
    /// Base URL including the API prefix, e.g. `http://localhost:8080/v1`.
    pub url: String,
    pub model: String,
    /// Sent as a bearer token when present. Local servers usually need none.
    pub api_key: Option<String>,
}

impl ClassifierEndpoint {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Read the endpoint from the environment. `None` when no URL is set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(ENV_CLASSIFIER_URL).filter(|u| !u.trim().is_empty())?;
        let model = lookup(ENV_CLASSIFIER_MODEL).unwrap_or_else(|| DEFAULT_CLASSIFIER_MODEL.into());
        let endpoint = Self::new(url, model);
        Some(match lookup(ENV_CLASSIFIER_API_KEY).filter(|k| !k.is_empty()) {
            Some(key) => endpoint.with_api_key(key),
            None => endpoint,
        })
    }

    /// Like [`from_env`](Self::from_env) but an absent URL is an error.
    pub fn require_from_env() -> Result<Self> {
        Self::from_env().with_context(|| format!("{ENV_CLASSIFIER_URL} is not set"))
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.url)
    }
}

/// Check if an inference endpoint is reachable (GET /models).
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(ENDPOINT_PROBE_TIMEOUT)
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
