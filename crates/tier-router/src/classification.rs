//! Entry classification: one bounded backend call with a deterministic fallback.
//!
//! ```text
//! forced level? ──yes──► EntrySelector::forced
//!      │ no
//!      ▼
//! backend.classify(task) within classifier_timeout
//!      │ ok + parseable ──► bucket ──► level
//!      │ absent / timeout / error / unparseable
//!      ▼
//! keyword heuristic ──► bucket ──► level        (warn, never surfaced)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use tier_coordination::router::parse_classifier_output;
use tier_coordination::{ClassificationError, EntrySelector, Request, RoutingDecision};

/// Source of raw classifier text (an LLM endpoint in production).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    /// Return raw text naming a complexity code 1..=6 and a reasoning.
    async fn classify(&self, text: &str) -> Result<String, ClassificationError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("forced level {0} is not part of the hierarchy")]
pub struct UnknownForcedLevel(pub String);

/// Entry decision plus, when the heuristic decided, why the backend was not used.
#[derive(Debug, Clone)]
pub struct EntrySelection {
    pub decision: RoutingDecision,
    pub fallback_cause: Option<ClassificationError>,
}

/// Chooses where a request's attempts begin.
pub struct RequestRouter {
    backend: Option<Arc<dyn ClassifierBackend>>,
    selector: EntrySelector,
    timeout: Duration,
}

impl RequestRouter {
    pub fn new(selector: EntrySelector, timeout: Duration) -> Self {
        Self {
            backend: None,
            selector,
            timeout,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ClassifierBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Forced level wins; otherwise classify the task text.
    pub async fn select(
        &self,
        request: &Request,
        forced_level: Option<&str>,
    ) -> Result<EntrySelection, UnknownForcedLevel> {
        if let Some(name) = forced_level {
            let decision = self
                .selector
                .forced(name)
                .ok_or_else(|| UnknownForcedLevel(name.to_string()))?;
            return Ok(EntrySelection {
                decision,
                fallback_cause: None,
            });
        }
        Ok(self.classify(&request.task).await)
    }

    /// Classify free text. Never fails: every error path lands on the heuristic.
    pub async fn classify(&self, text: &str) -> EntrySelection {
        match self.classify_with_backend(text).await {
            Ok(decision) => {
                debug!(level = %decision.level, bucket = ?decision.bucket, "Classifier decided entry level");
                EntrySelection {
                    decision,
                    fallback_cause: None,
                }
            }
            Err(cause) => {
                let decision = self.selector.fallback(text);
                if !matches!(cause, ClassificationError::Unavailable) {
                    warn!(error = %cause, level = %decision.level, "Classifier failed, using keyword heuristic");
                }
                EntrySelection {
                    decision,
                    fallback_cause: Some(cause),
                }
            }
        }
    }

    async fn classify_with_backend(&self, text: &str) -> Result<RoutingDecision, ClassificationError> {
        let backend = self.backend.as_ref().ok_or(ClassificationError::Unavailable)?;
        let raw = tokio::time::timeout(self.timeout, backend.classify(text))
            .await
            .map_err(|_| ClassificationError::Timeout {
                secs: self.timeout.as_secs(),
            })??;
        let parsed = parse_classifier_output(&raw)?;
        Ok(self.selector.from_model(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tier_coordination::{
        CapabilityLevel, ClassificationSource, ComplexityBucket, EscalationHierarchy,
    };

    fn router() -> RequestRouter {
        let h = EscalationHierarchy::new(CapabilityLevel::default_ladder()).unwrap();
        RequestRouter::new(EntrySelector::proportional(&h), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_model_path() {
        let mut mock = MockClassifierBackend::new();
        mock.expect_classify()
            .times(1)
            .returning(|_| Ok(r#"{"complexity": 3, "reasoning": "a parser"}"#.to_string()));
        let r = router().with_backend(Arc::new(mock));

        let sel = r.classify("write a parser").await;
        assert_eq!(sel.decision.source, ClassificationSource::Model);
        assert_eq!(sel.decision.level, "balanced");
        assert!(sel.fallback_cause.is_none());
    }

    #[tokio::test]
    async fn test_unparseable_falls_back() {
        let mut mock = MockClassifierBackend::new();
        mock.expect_classify()
            .returning(|_| Ok("I would rather not say".to_string()));
        let r = router().with_backend(Arc::new(mock));

        let sel = r.classify("hello").await;
        assert_eq!(sel.decision.source, ClassificationSource::Heuristic);
        assert_eq!(sel.decision.bucket, Some(ComplexityBucket::Trivial));
        assert!(matches!(
            sel.fallback_cause,
            Some(ClassificationError::Unparseable { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_backend_uses_heuristic() {
        let sel = router().classify("Refactor the async cache").await;
        assert_eq!(sel.decision.source, ClassificationSource::Heuristic);
        assert_eq!(sel.fallback_cause, Some(ClassificationError::Unavailable));
    }

    #[tokio::test]
    async fn test_forced_and_unknown_forced() {
        let r = router();
        let req = Request::new("anything");
        let sel = r.select(&req, Some("maximum")).await.unwrap();
        assert_eq!(sel.decision.level_index, 3);
        assert_eq!(
            r.select(&req, Some("premium")).await.unwrap_err(),
            UnknownForcedLevel("premium".into())
        );
    }
}
