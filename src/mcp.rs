//! MCP tool adapter.
//!
//! Exposes the search daemon to an agent host over the Model Context
//! Protocol on stdio. The adapter holds no model and no store: every tool
//! call is one HTTP request to the daemon, rendered as plain text.
//!
//! | Tool | Arguments | Daemon call |
//! |------|-----------|-------------|
//! | `search_archive` | `query` (required), `n_results` (1–20, default 5) | `POST /search` |
//! | `get_archive_stats` | none | `GET /stats` |
//!
//! Daemon failures and bad arguments never surface as protocol errors or as
//! `isError` results; the agent always gets a successful text answer it can
//! read. Only an unknown tool name is a protocol error.
//!
//! # Host configuration
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "archive": {
//!       "command": "archive",
//!       "args": ["--config", "/path/to/archive.toml", "serve", "mcp"]
//!     }
//!   }
//! }
//! ```

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rmcp::model::*;
use rmcp::transport::stdio;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};

use crate::client::{DaemonClient, Outcome};
use crate::config::Config;
use crate::daemon::{SearchResponse, StatsResponse};
use crate::progress::format_number;

pub const SEARCH_TOOL: &str = "search_archive";
pub const STATS_TOOL: &str = "get_archive_stats";

const RULE_WIDTH: usize = 80;

/// The MCP server handler. Cheap to clone; every session shares one client.
#[derive(Clone)]
pub struct ArchiveTools {
    client: DaemonClient,
    default_results: usize,
    max_results: usize,
    search_timeout: Duration,
    stats_timeout: Duration,
}

impl ArchiveTools {
    pub fn from_config(config: &Config) -> Self {
        let adapter = &config.adapter;
        Self {
            client: DaemonClient::new(&adapter.daemon_url),
            default_results: config.retrieval.default_results.min(adapter.max_results),
            max_results: adapter.max_results,
            search_timeout: Duration::from_secs(adapter.search_timeout_secs),
            stats_timeout: Duration::from_secs(adapter.stats_timeout_secs),
        }
    }

    fn tools(&self) -> Vec<Tool> {
        vec![self.search_tool(), stats_tool()]
    }

    fn search_tool(&self) -> Tool {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query - describe what you're looking for conceptually"
                },
                "n_results": {
                    "type": "integer",
                    "description": format!(
                        "Number of results to return (default {}, max {})",
                        self.default_results, self.max_results
                    ),
                    "default": self.default_results,
                    "minimum": 1,
                    "maximum": self.max_results
                }
            },
            "required": ["query"]
        });

        Tool {
            name: Cow::Borrowed(SEARCH_TOOL),
            title: None,
            description: Some(Cow::Borrowed(
                "Search the conversation archive by semantic similarity. Finds relevant \
                 passages from past conversations based on meaning, not just keywords. \
                 Use for recalling earlier decisions, recurring patterns, relationship \
                 history, or whenever the user asks about past conversations.",
            )),
            input_schema: to_schema(schema),
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }

    /// Run `search_archive`. `Err` carries the text shown to the agent.
    pub async fn search_text(&self, args: &JsonObject) -> Result<String, String> {
        let (query, n_results) = parse_search_args(args, self.default_results, self.max_results)?;

        match self.client.search(&query, n_results, self.search_timeout).await {
            Outcome::Success(response) => Ok(render_search(&query, &response)),
            Outcome::Unreachable(e) => {
                tracing::warn!(error = %e, "search daemon unreachable");
                Err(unreachable_message(self.client.base_url()))
            }
            Outcome::Failed(e) => Err(format!("Error searching archive: {}", e)),
        }
    }

    /// Run `get_archive_stats`. `Err` carries the text shown to the agent.
    pub async fn stats_text(&self) -> Result<String, String> {
        match self.client.stats(self.stats_timeout).await {
            Outcome::Success(stats) => Ok(render_stats(&stats)),
            Outcome::Unreachable(e) => {
                tracing::warn!(error = %e, "search daemon unreachable");
                Err(unreachable_message(self.client.base_url()))
            }
            Outcome::Failed(e) => Err(format!("Error getting stats: {}", e)),
        }
    }

    /// Dispatch a tool call by name.
    pub async fn call(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, McpError> {
        let args = arguments.unwrap_or_default();
        let outcome = match name {
            SEARCH_TOOL => self.search_text(&args).await,
            STATS_TOOL => self.stats_text().await,
            other => {
                return Err(McpError::new(
                    ErrorCode::METHOD_NOT_FOUND,
                    format!("no tool registered with name: {}", other),
                    None,
                ))
            }
        };

        let text = match outcome {
            Ok(text) | Err(text) => text,
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

fn stats_tool() -> Tool {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {}
    });

    Tool {
        name: Cow::Borrowed(STATS_TOOL),
        title: None,
        description: Some(Cow::Borrowed(
            "Get statistics about the indexed conversation archive. \
             Shows total chunks indexed and index status.",
        )),
        input_schema: to_schema(schema),
        output_schema: None,
        annotations: Some(ToolAnnotations::new().read_only(true)),
        execution: None,
        icons: None,
        meta: None,
    }
}

fn to_schema(value: serde_json::Value) -> Arc<JsonObject> {
    match value {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(JsonObject::new()),
    }
}

fn unreachable_message(daemon_url: &str) -> String {
    format!(
        "Error: Cannot connect to search daemon at {}. Make sure `archive serve daemon` is running.",
        daemon_url
    )
}

/// Validate tool arguments. Oversized `n_results` is clamped; anything
/// below 1 is rejected without contacting the daemon.
pub fn parse_search_args(
    args: &JsonObject,
    default_results: usize,
    max_results: usize,
) -> Result<(String, usize), String> {
    let query = match args.get("query").and_then(|v| v.as_str()) {
        Some(q) if !q.trim().is_empty() => q.to_string(),
        _ => return Err("Error: query parameter required".to_string()),
    };

    let n_results = match args.get("n_results") {
        None | Some(serde_json::Value::Null) => default_results as i64,
        Some(v) => v
            .as_i64()
            .ok_or_else(|| "Error: n_results must be an integer".to_string())?,
    };
    if n_results < 1 {
        return Err("Error: n_results must be at least 1".to_string());
    }

    Ok((query, (n_results as usize).min(max_results)))
}

pub fn render_search(query: &str, response: &SearchResponse) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = format!("Search: '{}'\nFound {} results:\n\n", query, response.total);

    for (i, result) in response.results.iter().enumerate() {
        out.push_str(&rule);
        out.push('\n');
        out.push_str(&format!(
            "Result {} | Relevance: {:.3}\n",
            i + 1,
            result.relevance
        ));
        out.push_str(&format!("Source: {}\n\n", result.source_file));
        out.push_str(&result.text);
        out.push_str("\n\n");
    }

    out.push_str(&rule);
    out.push('\n');
    out
}

pub fn render_stats(stats: &StatsResponse) -> String {
    format!(
        "Archive Statistics:\nTotal chunks indexed: {}\nStatus: {}\n",
        format_number(stats.total_chunks),
        stats.status.as_str()
    )
}

impl ServerHandler for ArchiveTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "archive-search".to_string(),
                title: Some("Archive Search".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Semantic search over an archive of past conversations. Use search_archive \
                 to find relevant passages and get_archive_stats to check the index."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(self.tools())))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools().into_iter().find(|t| t.name == name)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.call(&request.name, request.arguments).await
    }
}

/// Serve the adapter on stdin/stdout until the host disconnects.
pub async fn run_mcp(config: &Config) -> Result<()> {
    let tools = ArchiveTools::from_config(config);
    tracing::info!(daemon = %config.adapter.daemon_url, "MCP adapter serving on stdio");

    let service = tools
        .serve(stdio())
        .await
        .context("Failed to start MCP server")?;
    service.waiting().await.context("MCP server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IndexStatus, SearchResult};

    fn args(value: serde_json::Value) -> JsonObject {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_missing_or_blank_query_rejected() {
        let err = parse_search_args(&args(serde_json::json!({})), 5, 20).unwrap_err();
        assert_eq!(err, "Error: query parameter required");
        let err = parse_search_args(&args(serde_json::json!({"query": "  "})), 5, 20).unwrap_err();
        assert_eq!(err, "Error: query parameter required");
    }

    #[test]
    fn test_n_results_default_clamp_and_reject() {
        let (q, n) = parse_search_args(&args(serde_json::json!({"query": "x"})), 5, 20).unwrap();
        assert_eq!((q.as_str(), n), ("x", 5));

        let (_, n) =
            parse_search_args(&args(serde_json::json!({"query": "x", "n_results": 50})), 5, 20)
                .unwrap();
        assert_eq!(n, 20);

        assert!(
            parse_search_args(&args(serde_json::json!({"query": "x", "n_results": 0})), 5, 20)
                .is_err()
        );
        assert!(
            parse_search_args(&args(serde_json::json!({"query": "x", "n_results": "3"})), 5, 20)
                .is_err()
        );
    }

    #[test]
    fn test_render_search_layout() {
        let response = SearchResponse {
            query: "trust".to_string(),
            total: 1,
            results: vec![SearchResult {
                source_file: "2024/march.md".to_string(),
                text: "we talked about trust".to_string(),
                relevance: 0.8123,
                chunk_index: 0,
            }],
        };
        let text = render_search("trust", &response);
        let rule = "=".repeat(80);
        let expected = format!(
            "Search: 'trust'\nFound 1 results:\n\n{rule}\nResult 1 | Relevance: 0.812\nSource: 2024/march.md\n\nwe talked about trust\n\n{rule}\n"
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_stats_groups_thousands() {
        let text = render_stats(&StatsResponse {
            total_chunks: 12345,
            status: IndexStatus::Ready,
        });
        assert_eq!(
            text,
            "Archive Statistics:\nTotal chunks indexed: 12,345\nStatus: ready\n"
        );
    }

    #[test]
    fn test_tool_listing() {
        let config = crate::config::parse_config(
            "[corpus]\nroot = \"./c\"\n[store]\npath = \"./s.sqlite\"\n",
        )
        .unwrap();
        let tools = ArchiveTools::from_config(&config);
        let names: Vec<String> = tools.tools().iter().map(|t| t.name.to_string()).collect();
        assert_eq!(names, vec![SEARCH_TOOL, STATS_TOOL]);
        assert!(tools.get_tool(SEARCH_TOOL).is_some());
        assert!(tools.get_tool("nope").is_none());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_protocol_error() {
        let config = crate::config::parse_config(
            "[corpus]\nroot = \"./c\"\n[store]\npath = \"./s.sqlite\"\n",
        )
        .unwrap();
        let tools = ArchiveTools::from_config(&config);
        assert!(tools.call("delete_everything", None).await.is_err());
    }

    fn call_text(result: &CallToolResult) -> String {
        result.content[0]
            .as_text()
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_daemon_down_is_plain_text_answer() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let config = crate::config::parse_config(&format!(
            "[corpus]\nroot = \"./c\"\n[store]\npath = \"./s.sqlite\"\n[adapter]\ndaemon_url = \"http://{}\"\n",
            addr
        ))
        .unwrap();
        let tools = ArchiveTools::from_config(&config);

        let result = tools
            .call(SEARCH_TOOL, Some(args(serde_json::json!({"query": "garden"}))))
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
        assert!(call_text(&result).starts_with("Error: Cannot connect to search daemon"));

        let result = tools.call(STATS_TOOL, None).await.unwrap();
        assert_ne!(result.is_error, Some(true));
        assert!(call_text(&result).starts_with("Error: Cannot connect to search daemon"));

        let result = tools.call(SEARCH_TOOL, None).await.unwrap();
        assert_ne!(result.is_error, Some(true));
        assert!(call_text(&result).starts_with("Error:"));
    }
}
