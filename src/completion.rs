//! Answer synthesis through a chat-completion service.

use std::future::Future;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
    config::RagConfig,
    error::{Error, Result},
};

const SYSTEM_PROMPT: &str = "You are an expert Q&A system that is trusted around the world.\n\
Always answer the query using the provided context information, and not prior knowledge.\n\
Some rules to follow:\n\
1. Never directly reference the given context in your answer.\n\
2. Avoid statements like 'Based on the context, ...' or 'The context information ...' or anything along those lines.";

/// Generates an answer to `prompt` grounded in `context`.
pub trait Completer: Send + Sync + 'static {
    fn complete(
        &self,
        prompt: &str,
        context: &[String],
    ) -> impl Future<Output = Result<String>> + Send;
}

/// The user message sent for a question over retrieved context.
///
/// # Examples
///
/// ```
/// use curatex::completion::build_qa_prompt;
///
/// let prompt = build_qa_prompt("Who?", &["Alice did it.".to_string()]);
/// assert!(prompt.contains("Alice did it."));
/// assert!(prompt.ends_with("Query: Who?\nAnswer: "));
/// ```
pub fn build_qa_prompt(query: &str, context: &[String]) -> String {
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {query}\n\
         Answer: ",
        context.join("\n\n")
    )
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl ChatClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("curatex/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    /// Client for the configured endpoint, reading the API key from the
    /// configured environment variable.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let api_key = config.completion_api_key();
        if api_key.is_none() {
            tracing::debug!(
                env = %config.completion_api_key_env,
                "no completion API key set"
            );
        }
        Self::new(
            config.completion_base_url.clone(),
            config.completion_model.clone(),
            api_key,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
        };

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(Error::Completion(format!("HTTP {status}: {text}")));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Completion("empty completion".to_string()))
    }
}

impl Completer for ChatClient {
    async fn complete(&self, prompt: &str, context: &[String]) -> Result<String> {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: Some(SYSTEM_PROMPT.to_string()),
            },
            ChatMessage {
                role: "user".to_string(),
                content: Some(build_qa_prompt(prompt, context)),
            },
        ];
        self.chat(messages).await
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}
