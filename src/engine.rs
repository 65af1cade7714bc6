use std::{fmt, sync::Arc, time::Duration};

use serde::Serialize;

use crate::{
    completion::Completer,
    history::Session,
    hybrid::{HybridRetriever, Retrieval},
    retriever::{RetrievalResult, Strategy},
};

/// Why answer synthesis produced no text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "lowercase")]
pub enum CompletionFailure {
    Timeout(Duration),
    Error(String),
}

impl fmt::Display for CompletionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(after) => {
                write!(f, "completion timed out after {after:?}")
            }
            Self::Error(message) => write!(f, "completion failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum Outcome {
    Completed(String),
    Failed(CompletionFailure),
}

/// Result of one question: the synthesized text or a typed failure, plus
/// the context it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub outcome: Outcome,
    pub sources: Vec<RetrievalResult>,
    /// Strategies that failed while gathering context.
    pub degraded: Vec<Strategy>,
}

impl Answer {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Outcome::Completed(_))
    }

    /// The answer text, if synthesis succeeded.
    pub fn completed_text(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Completed(text) => Some(text),
            Outcome::Failed(_) => None,
        }
    }

    /// Best-effort text for display, including an apology on failure.
    pub fn text(&self) -> String {
        match &self.outcome {
            Outcome::Completed(text) => text.clone(),
            Outcome::Failed(failure) => {
                format!("Sorry, I couldn't produce an answer ({failure}).")
            }
        }
    }
}

/// Answers questions over a hybrid retriever, one caller-owned session at a
/// time.
pub struct QueryEngine<C> {
    retriever: Arc<HybridRetriever>,
    completer: Arc<C>,
    timeout: Duration,
}

impl<C: Completer> QueryEngine<C> {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        completer: Arc<C>,
        timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            completer,
            timeout,
        }
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    /// Run the hybrid retriever off the async executor.
    pub async fn retrieve(&self, query: &str) -> Retrieval {
        let retriever = self.retriever.clone();
        let query = query.to_string();
        match tokio::task::spawn_blocking(move || retriever.retrieve(&query)).await {
            Ok(retrieval) => retrieval,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval task failed");
                Retrieval {
                    results: Vec::new(),
                    degraded: self.retriever.strategies(),
                }
            }
        }
    }

    /// Answer `question` in the context of `session`.
    ///
    /// Retrieval always precedes completion. The session gains a turn only
    /// when completion succeeds.
    pub async fn answer(&self, question: &str, session: &Session) -> Answer {
        let augmented = session.augment(question);
        let retrieval = self.retrieve(&augmented).await;
        let context = retrieval.context();

        tracing::debug!(
            context = context.len(),
            degraded = retrieval.degraded.len(),
            "synthesizing answer"
        );

        let outcome = match tokio::time::timeout(
            self.timeout,
            self.completer.complete(&augmented, &context),
        )
        .await
        {
            Ok(Ok(text)) => {
                session.record(question, &text);
                Outcome::Completed(text)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "completion failed");
                Outcome::Failed(CompletionFailure::Error(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "completion timed out"
                );
                Outcome::Failed(CompletionFailure::Timeout(self.timeout))
            }
        };

        Answer {
            outcome,
            sources: retrieval.results,
            degraded: retrieval.degraded,
        }
    }
}
