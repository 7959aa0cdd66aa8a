//! MCP server: tool definitions using rmcp macros.
//!
//! Defines `ShellCoreServer`, a thin MCP facade over [`SessionManager`] --
//! every tool call maps onto one `BashSession::execute` dispatch or one
//! session-lifecycle operation. All state (working directory, environment,
//! the running-command flag) lives in the session, not here.

use std::time::Duration;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::schemars;
use rmcp::tool;
use rmcp::tool_handler;
use rmcp::tool_router;
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::Serialize;

use crate::session::{Action, CommandAction, Observation, SessionManager, ShutdownSignal};

// ---------------------------------------------------------------------------
// Parameter structs (deserialized from MCP tool call arguments)
// ---------------------------------------------------------------------------

/// Parameters for the `create_session` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CreateSessionParams {
    /// Unique ID the caller will use to refer to this session afterward.
    pub id: String,
    /// Initial working directory. Defaults to the server's own cwd.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// Informational only -- no privilege escalation is performed; the shell
    /// always runs as the server process's own user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Seconds of no new output before a non-blocking command reports a
    /// no-change timeout. Defaults to 30.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_change_timeout_seconds: Option<u64>,
}

/// Parameters for `session_exec`.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SessionExecParams {
    pub id: String,
    /// The shell command to execute. Must be a single command -- chain with
    /// `&&`/`;` rather than sending several separately.
    pub command: String,
    /// Hard deadline in seconds. Omit to rely solely on the no-change
    /// timeout for a non-blocking call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// If true, ignore the no-change timeout and wait for `timeout_seconds`
    /// (or indefinitely, if that is also omitted) for completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
}

/// Parameters for `session_send_input`.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SessionSendInputParams {
    pub id: String,
    /// Text to type into the running process, or a special-key token like
    /// `C-c`/`C-d`/`C-z`. Escape sequences (`\n`, `\t`, `\xNN`) are decoded.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
}

/// Parameters for `session_poll`.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SessionPollParams {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
}

/// Parameters for `session_interrupt`.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SessionInterruptParams {
    pub id: String,
}

/// Parameters for `close_session`.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CloseSessionParams {
    pub id: String,
}

/// Parameters for `get_cwd`.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct GetCwdParams {
    pub id: String,
}

// ---------------------------------------------------------------------------
// Result structs
// ---------------------------------------------------------------------------

/// Wire form of an [`Observation`]: the metadata's `prefix`/`suffix` banners
/// are folded into `content` here so the agent sees one plain-text block,
/// matching how the sentinel protocol presents them on a real terminal.
#[derive(Debug, Clone, Serialize)]
pub struct ExecResult {
    pub command: String,
    pub content: String,
    pub exit_code: i32,
    pub working_dir: Option<String>,
}

impl From<Observation> for ExecResult {
    fn from(obs: Observation) -> Self {
        let mut content = String::new();
        if !obs.metadata.prefix.is_empty() {
            content.push_str(&obs.metadata.prefix);
        }
        content.push_str(&obs.content);
        if !obs.metadata.suffix.is_empty() {
            content.push_str(&obs.metadata.suffix);
        }
        Self {
            command: obs.command,
            content,
            exit_code: obs.metadata.exit_code,
            working_dir: obs.metadata.working_dir,
        }
    }
}

// ---------------------------------------------------------------------------
// MCP Server
// ---------------------------------------------------------------------------

/// The shellcore MCP server: a named collection of persistent sessions.
#[derive(Clone)]
pub struct ShellCoreServer {
    sessions: SessionManager,
    tool_router: ToolRouter<ShellCoreServer>,
}

impl ShellCoreServer {
    #[must_use]
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            sessions: SessionManager::new(shutdown),
            tool_router: Self::tool_router(),
        }
    }
}

fn json_content<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("JSON serialization error: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn err_result(msg: impl Into<String>) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.into())]))
}

fn command_action(command: String, is_input: bool, timeout_seconds: Option<u64>, blocking: Option<bool>) -> Action {
    Action::Command(CommandAction {
        command,
        is_input,
        timeout: timeout_seconds.map(Duration::from_secs),
        blocking: blocking.unwrap_or(false),
    })
}

#[tool_router]
impl ShellCoreServer {
    #[tool(
        description = "Create a persistent shell session: a long-lived bash process with a real PTY. Working directory, environment variables, shell functions, and aliases all persist across session_exec calls. Pick a caller-chosen id and use it with every other session_* tool."
    )]
    async fn create_session(
        &self,
        Parameters(params): Parameters<CreateSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(id = %params.id, "create_session");
        let work_dir = params
            .working_directory
            .unwrap_or_else(|| std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_default());
        match self
            .sessions
            .create(params.id, work_dir, params.username, params.no_change_timeout_seconds)
            .await
        {
            Ok(info) => json_content(&info),
            Err(e) => err_result(e.to_string()),
        }
    }

    #[tool(
        description = "Run a single shell command in a session. Commands must not be chained with `;`/`&&`/`|` across multiple top-level statements at the tool-call boundary -- use a single `&&`/`;`-joined command string instead, it will run in one shell invocation. Non-blocking by default: if there's no new output for no_change_timeout_seconds (set at session creation, default 30s), the call returns early with the command still running -- poll with session_poll or send more input. Set blocking=true with a timeout_seconds to instead wait up to a hard deadline."
    )]
    async fn session_exec(
        &self,
        Parameters(params): Parameters<SessionExecParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session = %params.id, command = %params.command, "session_exec");
        let action = command_action(params.command, false, params.timeout_seconds, params.blocking);
        match self.sessions.execute(&params.id, action).await {
            Ok(obs) => json_content(&ExecResult::from(obs)),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Type text (or a special key like C-c/C-d/C-z) into the session's currently running command. Only valid while a previous session_exec/session_poll left a command running (after a no-change or hard timeout). Escape sequences \\n, \\r, \\t, \\xNN are decoded before sending."
    )]
    async fn session_send_input(
        &self,
        Parameters(params): Parameters<SessionSendInputParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session = %params.id, "session_send_input");
        let action = command_action(params.text, true, params.timeout_seconds, params.blocking);
        match self.sessions.execute(&params.id, action).await {
            Ok(obs) => json_content(&ExecResult::from(obs)),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Retrieve more output from the session's currently running command without sending anything. Only valid while a command is still running after a timeout. Equivalent to session_exec with an empty command."
    )]
    async fn session_poll(
        &self,
        Parameters(params): Parameters<SessionPollParams>,
    ) -> Result<CallToolResult, McpError> {
        let action = command_action(String::new(), false, params.timeout_seconds, params.blocking);
        match self.sessions.execute(&params.id, action).await {
            Ok(obs) => json_content(&ExecResult::from(obs)),
            Err(e) => err_result(e),
        }
    }

    #[tool(
        description = "Kill every process descended from the session's shell (not the shell itself). Use to interrupt a runaway or stuck command instead of waiting it out. Safe to call even if nothing is running."
    )]
    async fn session_interrupt(
        &self,
        Parameters(params): Parameters<SessionInterruptParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session = %params.id, "session_interrupt");
        match self.sessions.execute(&params.id, Action::Stop).await {
            Ok(obs) => json_content(&ExecResult::from(obs)),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "List every open session with its id, initial working directory, and current working directory.")]
    async fn list_sessions(&self) -> Result<CallToolResult, McpError> {
        json_content(&self.sessions.list().await)
    }

    #[tool(
        description = "Close a session: kill every descendant process, terminate the shell, and free its pane. Idempotent."
    )]
    async fn close_session(
        &self,
        Parameters(params): Parameters<CloseSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session = %params.id, "close_session");
        match self.sessions.close(&params.id).await {
            Ok(()) => json_content(&serde_json::json!({"id": params.id, "closed": true})),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Get a session's current working directory, as last reported by the shell prompt.")]
    async fn get_cwd(&self, Parameters(params): Parameters<GetCwdParams>) -> Result<CallToolResult, McpError> {
        match self.sessions.cwd(&params.id).await {
            Ok(cwd) => json_content(&serde_json::json!({"id": params.id, "cwd": cwd})),
            Err(e) => err_result(e),
        }
    }
}

#[tool_handler]
impl ServerHandler for ShellCoreServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "shellcore".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "shellcore gives an agent persistent shell sessions, each a real bash process \
                 attached to a pseudo-terminal.\n\n\
                 Start with create_session, then drive it with session_exec. Working directory, \
                 environment variables, shell functions, and aliases all persist across calls. \
                 Because each session has a real PTY (isatty()=true), interactive tools and \
                 programs with colored output behave the same way they would in a real terminal.\n\n\
                 session_exec is non-blocking by default: a command with no new output for a while \
                 returns early with the command still running, rather than hanging the call. Use \
                 session_poll to keep reading its output, session_send_input to type into it (including \
                 special keys like C-c), or session_interrupt to kill it outright. Set blocking=true \
                 with a timeout_seconds on session_exec to instead wait for a command to finish.\n\n\
                 Only one command runs at a time per session -- sending a new session_exec while one \
                 is still running (after a timeout) is rejected; use session_send_input or \
                 session_interrupt first."
                    .to_string(),
            ),
        }
    }
}
