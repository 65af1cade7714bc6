use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    completion::ChatClient,
    engine::Outcome,
    error,
    history::Session,
    rag::{NewsRag, QuestionAnswering},
    retriever::RetrievalResult,
    text_util::{DEFAULT_MESSAGE_MAX_CHARS, extract_snippet, split_message},
};

const DEFAULT_SESSION: &str = "default";

struct CuratexState {
    rag: NewsRag<ChatClient>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl CuratexState {
    /// The named conversation, created on first use.
    fn session(&self, id: Option<&str>) -> Arc<Session> {
        let id = id.unwrap_or(DEFAULT_SESSION);
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(self.rag.new_session()))
            .clone()
    }
}

#[derive(Clone)]
pub struct CuratexMcpServer {
    state: Arc<CuratexState>,
    tool_router: ToolRouter<Self>,
}

impl CuratexMcpServer {
    fn new(rag: NewsRag<ChatClient>) -> Self {
        Self {
            state: Arc::new(CuratexState {
                rag,
                sessions: Mutex::new(HashMap::new()),
            }),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl CuratexMcpServer {
    /// Hybrid retrieval over the news corpus, without answer synthesis.
    #[tool(
        name = "news_search",
        description = "Search the curated news corpus with combined semantic, BM25 and keyword retrieval. Returns matching passages."
    )]
    pub async fn news_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let retrieval = self
            .state
            .rag
            .retrieve(&params.query)
            .await
            .map_err(|e| mcp_error("search failed", e))?;

        let include_snippet = params.include_snippet.unwrap_or(true);
        let items: Vec<SourceItem> = retrieval
            .results
            .iter()
            .map(|r| SourceItem::new(r, &params.query, include_snippet))
            .collect();

        let summary = format_search_summary(&items, &params.query);
        let structured = serde_json::to_value(SearchResponse {
            query: params.query,
            result_count: items.len(),
            degraded: retrieval.degraded.iter().map(|s| s.to_string()).collect(),
            results: items,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Answer a question from the news corpus, remembering the conversation.
    #[tool(
        name = "news_ask",
        description = "Answer a question about the curated news. Pass the same session id to ask follow-up questions."
    )]
    pub async fn news_ask(
        &self,
        params: Parameters<AskParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let session = self.state.session(params.session.as_deref());

        let answer = self
            .state
            .rag
            .answer(&params.question, &session)
            .await
            .map_err(|e| mcp_error("question failed", e))?;

        let (status, failure) = match &answer.outcome {
            Outcome::Completed(_) => ("completed", None),
            Outcome::Failed(failure) => ("failed", Some(failure.to_string())),
        };
        let sources: Vec<SourceItem> = if params.include_sources.unwrap_or(true) {
            answer
                .sources
                .iter()
                .map(|r| SourceItem::new(r, &params.question, false))
                .collect()
        } else {
            Vec::new()
        };

        let content = split_message(&answer.text(), DEFAULT_MESSAGE_MAX_CHARS)
            .into_iter()
            .map(Content::text)
            .collect();
        let structured = serde_json::to_value(AskResponse {
            question: params.question,
            status: status.to_string(),
            answer: answer.completed_text().map(str::to_string),
            failure,
            sources,
        })
        .map_err(|e| mcp_error("failed to serialize answer", e))?;

        let mut result = CallToolResult::success(content);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for CuratexMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info.name = "curatex".to_string();
        info.server_info.title = Some("curatex MCP".to_string());
        info.server_info.version = env!("CARGO_PKG_VERSION").to_string();
        info.instructions = Some(
            "Use news_search to find passages in the news corpus and news_ask to get a synthesized answer. Reuse a session id for follow-up questions."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Include a snippet preview (default: true).
    pub include_snippet: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AskParams {
    /// The question to answer.
    pub question: String,
    /// Conversation id; questions sharing an id share history.
    pub session: Option<String>,
    /// Include the retrieved passages (default: true).
    pub include_sources: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    degraded: Vec<String>,
    results: Vec<SourceItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AskResponse {
    question: String,
    status: String,
    answer: Option<String>,
    failure: Option<String>,
    sources: Vec<SourceItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceItem {
    node_id: String,
    source: String,
    chunk: usize,
    strategy: String,
    score: Option<f32>,
    matched_terms: Option<usize>,
    snippet: Option<String>,
}

impl SourceItem {
    fn new(result: &RetrievalResult, query: &str, include_snippet: bool) -> Self {
        Self {
            node_id: result.node.id.to_string(),
            source: result.node.source.clone(),
            chunk: result.node.index,
            strategy: result.strategy.to_string(),
            score: result.score,
            matched_terms: result.matched_terms,
            snippet: include_snippet
                .then(|| extract_snippet(&result.node.text, query))
                .flatten(),
        }
    }
}

fn format_search_summary(results: &[SourceItem], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for item in results {
        let score = item
            .score
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "{} {} {} {}",
            item.node_id, item.strategy, score, item.source
        ));
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

/// Set up the corpus, then serve MCP over stdio until the client leaves.
///
/// A failed setup does not stop the server; tools report the engine as
/// unavailable instead.
pub fn run_mcp(rag: NewsRag<ChatClient>, corpus_dir: PathBuf) -> error::Result<()> {
    rag.setup_corpus(&corpus_dir);
    let server = CuratexMcpServer::new(rag);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::{config::RagConfig, embedding::HashingEmbedder};

    fn server(tmp: &Path, with_corpus: bool) -> CuratexMcpServer {
        let corpus = tmp.join("data");
        std::fs::create_dir_all(&corpus).unwrap();
        std::fs::write(
            corpus.join("space.txt"),
            "NASA launched a rocket carrying a weather satellite.",
        )
        .unwrap();

        // Nothing listens on the discard port, so completions fail fast.
        let completer = ChatClient::new("http://127.0.0.1:9/v1", "test", None).unwrap();
        let rag = NewsRag::new(
            RagConfig::default(),
            tmp.join("indexes.redb"),
            Arc::new(HashingEmbedder::new(64)),
            completer,
        );
        if with_corpus {
            rag.setup(&corpus).unwrap();
        }
        CuratexMcpServer::new(rag)
    }

    #[tokio::test]
    async fn search_tool_returns_structured_results() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server(tmp.path(), true);

        let result = server
            .news_search(Parameters(SearchParams {
                query: "rocket launch".to_string(),
                include_snippet: Some(true),
            }))
            .await
            .unwrap();

        let structured = result.structured_content.expect("structured");
        let results = structured
            .get("results")
            .and_then(|v| v.as_array())
            .expect("results array");
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].get("source").and_then(|v| v.as_str()),
            Some("space.txt")
        );
        let snippet = results[0]
            .get("snippet")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        assert!(snippet.contains("rocket"));

        let summary = result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default();
        assert!(summary.contains("Found 1 result"));
    }

    #[tokio::test]
    async fn ask_tool_reports_failed_completion() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server(tmp.path(), true);

        let result = server
            .news_ask(Parameters(AskParams {
                question: "What did NASA launch?".to_string(),
                session: Some("s1".to_string()),
                include_sources: Some(true),
            }))
            .await
            .unwrap();

        let structured = result.structured_content.expect("structured");
        assert_eq!(
            structured.get("status").and_then(|v| v.as_str()),
            Some("failed")
        );
        assert!(structured.get("answer").is_some_and(|v| v.is_null()));
        let sources = structured
            .get("sources")
            .and_then(|v| v.as_array())
            .expect("sources array");
        assert!(!sources.is_empty());
        assert!(server.state.session(Some("s1")).is_empty());
    }

    #[tokio::test]
    async fn tools_fail_before_setup() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server(tmp.path(), false);

        let result = server
            .news_search(Parameters(SearchParams {
                query: "rocket".to_string(),
                include_snippet: None,
            }))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn sessions_are_reused_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server(tmp.path(), false);

        let a = server.state.session(Some("a"));
        a.record("q", "a");
        assert_eq!(server.state.session(Some("a")).len(), 1);
        assert!(server.state.session(Some("b")).is_empty());
        assert!(server.state.session(None).is_empty());
    }
}
