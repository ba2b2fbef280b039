use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    controller::{SearchOutcome, SessionController},
    error::{self, Error},
    loader::LoadWarning,
    reader::Answer,
    session_id::SessionId,
    session_store::Upload,
};

struct DocsiftState {
    controller: SessionController,
    /// The one session this server works in, minted at startup.
    session: SessionId,
}

#[derive(Clone)]
pub struct DocsiftMcpServer {
    state: Arc<DocsiftState>,
    tool_router: ToolRouter<Self>,
}

impl DocsiftMcpServer {
    pub fn new(controller: SessionController) -> Self {
        Self::with_session(controller, SessionId::generate())
    }

    fn with_session(controller: SessionController, session: SessionId) -> Self {
        Self {
            state: Arc::new(DocsiftState {
                controller,
                session,
            }),
            tool_router: Self::tool_router(),
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.state.session
    }

    /// Run a controller call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<error::Result<T>, rmcp::ErrorData>
    where
        T: Send + 'static,
        F: FnOnce(&DocsiftState) -> error::Result<T> + Send + 'static,
    {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || f(&*state))
            .await
            .map_err(|e| mcp_error("worker failed", e))
    }
}

#[tool_router(router = tool_router)]
impl DocsiftMcpServer {
    /// Store files in this server's session.
    #[tool(
        name = "add_files",
        description = "Add documents (.pdf, .txt, .docx) to the session. Give each file a name and either its text or its base64-encoded bytes. Files with the same name are replaced."
    )]
    pub async fn add_files(
        &self,
        params: Parameters<AddFilesParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let files = params
            .0
            .files
            .into_iter()
            .map(FileParam::into_bytes)
            .collect::<Result<Vec<_>, _>>()?;

        let outcome = self
            .blocking(move |state| {
                let uploads: Vec<_> = files
                    .iter()
                    .map(|(name, bytes)| Upload::new(name.as_str(), bytes.as_slice()))
                    .collect();
                state.controller.add_files(&state.session, uploads)
            })
            .await?;

        Ok(text_result(outcome))
    }

    /// Remove every file from this server's session.
    #[tool(
        name = "delete_files",
        description = "Delete every document in the session."
    )]
    pub async fn delete_files(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let outcome = self
            .blocking(|state| state.controller.delete_files(&state.session))
            .await?;
        Ok(text_result(outcome))
    }

    /// Answer a question from the session's documents.
    #[tool(
        name = "search",
        description = "Search the session's documents and return the passages that best answer the query, with the file each came from."
    )]
    pub async fn search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let query = params.0.query;
        let q = query.clone();

        let outcome = self
            .blocking(move |state| {
                let deadline = state.controller.config().deadline();
                state.controller.query(&state.session, &q, &deadline)
            })
            .await?;

        let outcome: SearchOutcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => return Ok(error_result(&e)),
        };

        let structured = serde_json::to_value(SearchResponse {
            query,
            result_count: outcome.answers.len(),
            answers: &outcome.answers,
            skipped: &outcome.skipped,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(outcome.render())]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocsiftMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docsift", env!("CARGO_PKG_VERSION")).with_title("docsift MCP"),
            )
            .with_instructions(
                "Use add_files to upload documents, then search to find passages answering a question. delete_files empties the session.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddFilesParams {
    /// Files to upload.
    pub files: Vec<FileParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileParam {
    /// File name, including its extension.
    pub name: String,
    /// File content as UTF-8 text.
    pub text: Option<String>,
    /// File content as base64, for binary formats.
    pub content_base64: Option<String>,
}

impl FileParam {
    fn into_bytes(self) -> Result<(String, Vec<u8>), rmcp::ErrorData> {
        let bytes = match (self.text, self.content_base64) {
            (Some(text), None) => text.into_bytes(),
            (None, Some(encoded)) => STANDARD.decode(encoded.trim()).map_err(|e| {
                rmcp::ErrorData::invalid_params(
                    format!("{}: invalid base64: {e}", self.name),
                    None,
                )
            })?,
            _ => {
                return Err(rmcp::ErrorData::invalid_params(
                    format!("{}: give exactly one of text or contentBase64", self.name),
                    None,
                ));
            }
        };
        Ok((self.name, bytes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Natural-language question or keywords.
    pub query: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse<'a> {
    query: String,
    result_count: usize,
    answers: &'a [Answer],
    skipped: &'a [LoadWarning],
}

fn text_result(outcome: error::Result<String>) -> CallToolResult {
    match outcome {
        Ok(text) => CallToolResult::success(vec![Content::text(text)]),
        Err(e) => error_result(&e),
    }
}

fn error_result(err: &Error) -> CallToolResult {
    CallToolResult::error(vec![Content::text(error::user_message(err))])
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(controller: SessionController) -> error::Result<()> {
    let server = DocsiftMcpServer::new(controller);
    info!(session = server.session().short(), "MCP session ready");

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
