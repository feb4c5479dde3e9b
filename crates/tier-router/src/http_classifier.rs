//! OpenAI-compatible classifier backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use tier_coordination::ClassificationError;

use crate::classification::ClassifierBackend;
use crate::config::ClassifierEndpoint;

const SYSTEM_PROMPT: &str = r#"You classify software tasks by complexity. Answer with exactly:
COMPLEXITY: <1-6>
REASONING: <one sentence>

1 Trivial: typo, rename, one-line change
2 Simple: small self-contained function or test
3 Moderate: feature touching a few files
4 Complex: cross-module change, async or lifetime work
5 Advanced: architecture change, concurrency, performance
6 Critical: security, data loss or correctness under failure"#;

const MAX_TOKENS: u32 = 200;

/// Classifies through `<base_url>/chat/completions` at temperature 0.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: ClassifierEndpoint,
    timeout: Duration,
}

impl HttpClassifier {
    /// `timeout` bounds the HTTP call; the router applies its own bound on top.
    pub fn new(endpoint: ClassifierEndpoint, timeout: Duration) -> Result<Self, ClassificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassificationError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &ClassifierEndpoint {
        &self.endpoint
    }

    fn request_body(&self, text: &str) -> Value {
        json!({
            "model": self.endpoint.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": text}
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": 0
        })
    }
}

/// Pull `choices[0].message.content` out of a chat-completion response.
fn extract_content(body: &Value) -> Result<String, ClassificationError> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| ClassificationError::Backend("response has no message content".into()))
}

#[async_trait]
impl ClassifierBackend for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<String, ClassificationError> {
        let mut request = self
            .client
            .post(self.endpoint.completions_url())
            .json(&self.request_body(text));
        if let Some(key) = &self.endpoint.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClassificationError::Timeout {
                    secs: self.timeout.as_secs(),
                }
            } else {
                ClassificationError::Backend(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassificationError::Backend(format!(
                "classifier endpoint error ({}): {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClassificationError::Backend(e.to_string()))?;
        let content = extract_content(&body)?;
        debug!(model = %self.endpoint.model, chars = content.len(), "Classifier responded");
        Ok(content)
    }
}
