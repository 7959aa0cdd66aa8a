//! Execution Engine (C5): the state machine that drives a single command to
//! completion against a [`Pane`].
//!
//! A session owns exactly one pane and runs exactly one command at a time.
//! `execute` dispatches an [`Action`], optionally injects keystrokes, then
//! polls the pane until the PS1 sentinel protocol (see [`crate::ps1`])
//! reports completion or one of the two timeouts fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::escaper;
use crate::guard;
use crate::pane::{self, Pane};
use crate::proctree;
use crate::ps1::{self, CommandMetadata};
use crate::splitter;

/// No-change timeout default, per the externally visible settings.
pub const DEFAULT_NO_CHANGE_TIMEOUT_SECONDS: u64 = 30;
/// Scrollback cap, per the externally visible settings.
pub const HISTORY_LIMIT: usize = 10_000;
/// Polling cadence.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A typed action dispatched to [`BashSession::execute`].
#[derive(Debug, Clone)]
pub enum Action {
    Command(CommandAction),
    Stop,
}

/// A shell command or keystroke-input request.
#[derive(Debug, Clone, Default)]
pub struct CommandAction {
    pub command: String,
    pub is_input: bool,
    pub timeout: Option<Duration>,
    pub blocking: bool,
}

/// The structured result of one `execute` call.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub content: String,
    pub command: String,
    pub metadata: CommandMetadata,
}

/// Closed enumeration of command states. `Continue` is reserved (never
/// produced by this engine) but kept so the running-ish checks below read
/// the same way the originating design states them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BashCommandStatus {
    Continue,
    Completed,
    NoChangeTimeout,
    HardTimeout,
}

/// Fatal, non-recoverable engine errors. Everything recoverable is folded
/// into a regular [`Observation`] instead of an `Err`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("session is not initialized")]
    NotInitialized,
    #[error("session was interrupted by shutdown")]
    Interrupted,
    #[error("pane error: {0}")]
    Pane(String),
}

/// Process-wide "should continue" predicate, flipped once at shutdown and
/// shared by every session's polling loop.
#[derive(Clone)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn should_continue(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

fn is_running_ish(status: Option<BashCommandStatus>) -> bool {
    matches!(
        status,
        Some(BashCommandStatus::Continue)
            | Some(BashCommandStatus::NoChangeTimeout)
            | Some(BashCommandStatus::HardTimeout)
    )
}

/// A long-lived interactive shell, and the only thing an agent drives.
pub struct BashSession {
    pane: Option<Pane>,
    work_dir: String,
    cwd: String,
    no_change_timeout: Duration,
    prev_status: Option<BashCommandStatus>,
    prev_output: String,
    initialized: bool,
    closed: bool,
    shutdown: ShutdownSignal,
}

impl BashSession {
    #[must_use]
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            pane: None,
            work_dir: String::new(),
            cwd: String::new(),
            no_change_timeout: Duration::from_secs(DEFAULT_NO_CHANGE_TIMEOUT_SECONDS),
            prev_status: None,
            prev_output: String::new(),
            initialized: false,
            closed: false,
            shutdown,
        }
    }

    /// Spawn the pane and install the PS1 protocol. Must be called before
    /// [`execute`](Self::execute).
    pub async fn initialize(
        &mut self,
        work_dir: String,
        username: Option<String>,
        no_change_timeout_seconds: Option<u64>,
    ) -> Result<(), EngineError> {
        let session_name = format!(
            "openhands-{}-{}",
            username.as_deref().unwrap_or("agent"),
            uuid::Uuid::new_v4()
        );
        let user_file = format!("/tmp/{session_name}-user.txt");
        let host_file = format!("/tmp/{session_name}-host.txt");

        let pane = Pane::new(&work_dir, HISTORY_LIMIT, &user_file, &host_file).await?;

        self.pane = Some(pane);
        self.cwd = work_dir.clone();
        self.work_dir = work_dir;
        self.no_change_timeout =
            Duration::from_secs(no_change_timeout_seconds.unwrap_or(DEFAULT_NO_CHANGE_TIMEOUT_SECONDS));
        self.initialized = true;
        info!(session = %session_name, work_dir = %self.work_dir, "session initialized");
        Ok(())
    }

    /// Last observed working directory.
    #[must_use]
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    #[must_use]
    pub fn work_dir(&self) -> &str {
        &self.work_dir
    }

    /// Dispatch one action and return its observation: empty command first,
    /// then input-to-running-process, then a normal command.
    pub async fn execute(&mut self, action: Action) -> Result<Observation, EngineError> {
        if !self.initialized || self.closed {
            return Err(EngineError::NotInitialized);
        }

        match action {
            Action::Stop => self.handle_stop().await,
            Action::Command(cmd) if cmd.command.is_empty() => self.handle_empty(cmd).await,
            Action::Command(cmd) if cmd.is_input => self.handle_input(cmd).await,
            Action::Command(cmd) => self.handle_normal_command(cmd).await,
        }
    }

    async fn handle_stop(&mut self) -> Result<Observation, EngineError> {
        let pane = self.pane.as_ref().ok_or(EngineError::NotInitialized)?;
        let shell_pid = pane.pid();
        let procs = proctree::descendants(shell_pid);
        let kill_pids: Vec<i32> = procs.into_iter().map(|p| p.pid).filter(|&pid| pid != shell_pid).collect();
        let killed_any = !kill_pids.is_empty();
        proctree::kill_all(&kill_pids);

        let content = if killed_any {
            "All running processes have been terminated"
        } else {
            "No processes were terminated"
        };
        Ok(Observation {
            content: content.to_string(),
            command: String::new(),
            metadata: CommandMetadata::default(),
        })
    }

    async fn handle_empty(&mut self, action: CommandAction) -> Result<Observation, EngineError> {
        if !is_running_ish(self.prev_status) {
            return Ok(Observation {
                content: "ERROR: No previous running command to retrieve logs from.".to_string(),
                command: action.command,
                metadata: CommandMetadata::default(),
            });
        }
        self.run_polling_loop(String::new(), action.blocking, action.timeout, None).await
    }

    async fn handle_input(&mut self, action: CommandAction) -> Result<Observation, EngineError> {
        if !is_running_ish(self.prev_status) {
            return Ok(Observation {
                content: "ERROR: No previous running command to retrieve logs from to interact with.".to_string(),
                command: action.command,
                metadata: CommandMetadata::default(),
            });
        }

        let mut special = None;
        if pane::is_special_key(&action.command) {
            special = Some(pane::special_key_name(&action.command));
            let pane = self.pane.as_mut().ok_or(EngineError::NotInitialized)?;
            pane.send_keys(&action.command).await?;
        } else {
            let bytes = process_escapes(&action.command);
            let pane = self.pane.as_mut().ok_or(EngineError::NotInitialized)?;
            pane.send_raw(&bytes).await?;
        }

        self.run_polling_loop(action.command, action.blocking, action.timeout, special).await
    }

    async fn handle_normal_command(&mut self, action: CommandAction) -> Result<Observation, EngineError> {
        // Step 1: a prior command may still be running after a timeout.
        if matches!(
            self.prev_status,
            Some(BashCommandStatus::HardTimeout) | Some(BashCommandStatus::NoChangeTimeout)
        ) {
            let cur = self.pane.as_ref().ok_or(EngineError::NotInitialized)?.capture().await;
            if !ps1::ends_with_fence(&cur) {
                let framed = ps1::frame_running(&cur);
                let content = format!(
                    "[Below is the output of the previous command.]\n{}",
                    framed.output.trim_end()
                );
                let suffix = "\n[The new command was not executed because a prior command is still running. Send an empty command to wait for more output, send this text as input to the running process, or send C-c / C-z / C-d to interrupt it.]".to_string();
                return Ok(Observation {
                    content,
                    command: action.command,
                    metadata: CommandMetadata { suffix, ..Default::default() },
                });
            }
        }

        // Step 2 (ambient): the safety guard runs before the splitter, so it
        // sees the whole, still-unsplit command string.
        if let Err(reason) = guard::validate_command(&action.command) {
            warn!(command = %action.command, reason = %reason, "blocked dangerous command");
            return Ok(Observation {
                content: format!("ERROR: {reason}"),
                command: action.command,
                metadata: CommandMetadata::default(),
            });
        }

        // Step 3: split on top-level separators, reject multi-command input.
        let parts = splitter::split_commands(&action.command);
        if parts.len() > 1 {
            let listing = parts
                .iter()
                .enumerate()
                .map(|(i, c)| format!("({}) {}", i + 1, c))
                .collect::<Vec<_>>()
                .join("\n");
            return Ok(Observation {
                content: format!(
                    "ERROR: Cannot execute multiple commands at once. Chain them with && or ; instead:\n{listing}"
                ),
                command: action.command,
                metadata: CommandMetadata::default(),
            });
        }
        let command = parts.into_iter().next().unwrap_or_default();

        // Step 4: detect special-key form, escape otherwise, then inject.
        let special = if pane::is_special_key(&command) {
            Some(pane::special_key_name(&command))
        } else {
            None
        };
        let to_send = if special.is_some() {
            command.clone()
        } else {
            escaper::escape_special_chars(&command)
        };

        {
            let pane = self.pane.as_mut().ok_or(EngineError::NotInitialized)?;
            pane.send_keys(&to_send).await?;
        }

        self.run_polling_loop(command, action.blocking, action.timeout, special).await
    }

    /// The dual-timeout polling loop: no-change timeout for non-blocking
    /// calls, an optional hard timeout regardless of blocking, completion
    /// detected the moment the capture ends with a PS1 fence.
    async fn run_polling_loop(
        &mut self,
        command_label: String,
        blocking: bool,
        hard_timeout: Option<Duration>,
        special_key: Option<char>,
    ) -> Result<Observation, EngineError> {
        let start = Instant::now();
        let mut last_change = start;
        let mut last_capture = self.pane.as_ref().ok_or(EngineError::NotInitialized)?.capture().await;

        loop {
            if !self.shutdown.should_continue() {
                return Err(EngineError::Interrupted);
            }

            let cur = self.pane.as_ref().ok_or(EngineError::NotInitialized)?.capture().await;
            if cur != last_capture {
                last_capture = cur.clone();
                last_change = Instant::now();
            }

            if ps1::ends_with_fence(&cur) {
                return self.handle_completion(&cur, command_label, special_key).await;
            }

            if !blocking && last_change.elapsed() >= self.no_change_timeout {
                return Ok(self.handle_running_timeout(
                    &cur,
                    command_label,
                    BashCommandStatus::NoChangeTimeout,
                    format!(
                        "\n[The command has no new output after {} seconds. Send an empty command to wait for more output, send new input to interact with it, or interrupt it with C-c.]",
                        self.no_change_timeout.as_secs()
                    ),
                ));
            }

            if let Some(timeout) = hard_timeout {
                if start.elapsed() >= timeout {
                    return Ok(self.handle_running_timeout(
                        &cur,
                        command_label,
                        BashCommandStatus::HardTimeout,
                        format!(
                            "\n[The command timed out after {} seconds. Send an empty command to wait for more output, send new input to interact with it, or interrupt it with C-c.]",
                            timeout.as_secs()
                        ),
                    ));
                }
            }

            debug!(elapsed = ?start.elapsed(), "polling pane for completion");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn handle_completion(
        &mut self,
        cur: &str,
        command_label: String,
        special_key: Option<char>,
    ) -> Result<Observation, EngineError> {
        let matches = ps1::find_matches(cur);
        let framed = ps1::frame_completed(cur);
        let Some(mut metadata) = framed.metadata else {
            return Err(EngineError::Pane(
                "command completed but no PS1 sentinel was found in the capture".to_string(),
            ));
        };

        let mut content = framed.output;

        let prefix = if matches.len() == 1 {
            let n = content.lines().count();
            format!("[Previous command outputs are truncated. Showing the last {n} lines of the output below.]\n")
        } else {
            String::new()
        };

        if let Some(dir) = metadata.working_dir.clone() {
            if !dir.is_empty() && dir != self.cwd {
                self.cwd = dir;
            }
        }

        let trimmed_cmd = command_label.trim_start();
        if !trimmed_cmd.is_empty() {
            if let Some(rest) = content.trim_start().strip_prefix(trimmed_cmd) {
                content = rest.to_string();
            }
        }
        if !self.prev_output.is_empty() {
            if let Some(rest) = content.strip_prefix(self.prev_output.as_str()) {
                content = rest.to_string();
            }
        }
        content = content.trim_end().to_string();

        metadata.prefix = prefix;
        metadata.suffix = match special_key {
            Some(ch) => format!(
                "\n[The command completed with exit code {}. CTRL+{ch} was sent.]",
                metadata.exit_code
            ),
            None => format!("\n[The command completed with exit code {}.]", metadata.exit_code),
        };

        self.prev_status = Some(BashCommandStatus::Completed);
        self.prev_output.clear();

        if let Some(pane) = self.pane.as_mut() {
            pane.clear_screen().await?;
            pane.clear_history().await;
        }

        Ok(Observation { content, command: command_label, metadata })
    }

    /// Handle a still-running command that tripped the no-change or hard
    /// timeout. `self.prev_output` holds the content returned the last time
    /// this session reported on a still-running command -- stripping it as
    /// a prefix keeps repeated polls from re-showing output the agent has
    /// already seen.
    fn handle_running_timeout(
        &mut self,
        cur: &str,
        command_label: String,
        status: BashCommandStatus,
        suffix: String,
    ) -> Observation {
        let matches = ps1::find_matches(cur);
        if matches.len() != 1 {
            warn!(count = matches.len(), "expected exactly one PS1 match while a command is still running");
        }

        let framed = ps1::frame_running(cur);
        let full = framed.output.trim_end().to_string();

        let (prefix, content) = if self.prev_output.is_empty() {
            (String::new(), full.clone())
        } else {
            match full.strip_prefix(self.prev_output.as_str()) {
                Some(rest) => (
                    "[Below is the output of the previous command.]\n".to_string(),
                    rest.trim_start_matches('\n').to_string(),
                ),
                None => (String::new(), full.clone()),
            }
        };

        self.prev_status = Some(status);
        self.prev_output = full;

        Observation {
            content,
            command: command_label,
            metadata: CommandMetadata { prefix, suffix, ..Default::default() },
        }
    }

    /// Kill every descendant and the pane itself. Idempotent.
    pub async fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        if let Some(pane) = self.pane.take() {
            let shell_pid = pane.pid();
            let procs = proctree::descendants(shell_pid);
            let kill_pids: Vec<i32> = procs.into_iter().map(|p| p.pid).filter(|&pid| pid != shell_pid).collect();
            proctree::kill_all(&kill_pids);
            pane.kill_session().await?;
        }
        self.closed = true;
        Ok(())
    }
}

/// A named collection of sessions, one bash process each, independently
/// lockable so a long-running command in one session never blocks a call
/// into another.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<tokio::sync::Mutex<std::collections::HashMap<String, Arc<tokio::sync::Mutex<BashSession>>>>>,
    shutdown: ShutdownSignal,
}

/// Summary of one session, as returned by `list_sessions`/`create_session`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub work_dir: String,
    pub cwd: String,
}

impl SessionManager {
    #[must_use]
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            sessions: Arc::new(tokio::sync::Mutex::new(std::collections::HashMap::new())),
            shutdown,
        }
    }

    pub async fn create(
        &self,
        id: String,
        work_dir: String,
        username: Option<String>,
        no_change_timeout_seconds: Option<u64>,
    ) -> Result<SessionInfo, EngineError> {
        let mut session = BashSession::new(self.shutdown.clone());
        session.initialize(work_dir, username, no_change_timeout_seconds).await?;
        let info = SessionInfo {
            id: id.clone(),
            work_dir: session.work_dir().to_string(),
            cwd: session.cwd().to_string(),
        };
        self.sessions
            .lock()
            .await
            .insert(id, Arc::new(tokio::sync::Mutex::new(session)));
        Ok(info)
    }

    async fn get(&self, id: &str) -> Result<Arc<tokio::sync::Mutex<BashSession>>, String> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| format!("no such session: {id}"))
    }

    pub async fn execute(&self, id: &str, action: Action) -> Result<Observation, String> {
        let session = self.get(id).await?;
        let mut session = session.lock().await;
        session.execute(action).await.map_err(|e| e.to_string())
    }

    pub async fn cwd(&self, id: &str) -> Result<String, String> {
        let session = self.get(id).await?;
        let session = session.lock().await;
        Ok(session.cwd().to_string())
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let ids: Vec<(String, Arc<tokio::sync::Mutex<BashSession>>)> = self
            .sessions
            .lock()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();

        let mut out = Vec::with_capacity(ids.len());
        for (id, session) in ids {
            let session = session.lock().await;
            out.push(SessionInfo {
                id,
                work_dir: session.work_dir().to_string(),
                cwd: session.cwd().to_string(),
            });
        }
        out
    }

    pub async fn close(&self, id: &str) -> Result<(), String> {
        let session = self.sessions.lock().await.remove(id);
        if let Some(session) = session {
            let mut session = session.lock().await;
            session.close().await.map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

/// Decode `\n`/`\r`/`\t`/`\xNN`/`\\` escape sequences in agent-supplied text
/// into real bytes, so typed-input text can carry control characters. MCP
/// string parameters arrive as literal text -- `\n` is two characters, not a
/// newline byte -- so this conversion happens at the boundary where the
/// agent's string becomes pane keystrokes.
fn process_escapes(input: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push(b'\n'),
                Some('r') => out.push(b'\r'),
                Some('t') => out.push(b'\t'),
                Some('\\') => out.push(b'\\'),
                Some('x') => {
                    let mut hex = String::new();
                    if let Some(h1) = chars.next() {
                        hex.push(h1);
                    }
                    if let Some(h2) = chars.next() {
                        hex.push(h2);
                    }
                    if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                        out.push(byte);
                    }
                }
                Some(other) => {
                    out.push(b'\\');
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                }
                None => out.push(b'\\'),
            }
        } else {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    out
}
