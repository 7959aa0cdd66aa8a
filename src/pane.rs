//! Pane Driver (C4): owns the pseudo-terminal a session's shell lives in.
//!
//! The codebase this crate grew out of already depended on `pty_process` for
//! a different (UUID-marker) session protocol; this is that same dependency
//! redeployed under a different completion protocol and a different capture
//! model. There is no terminal-multiplexer client crate anywhere in the
//! dependency stack, so rather than shelling out to a real `tmux`, a
//! multiplexer pane's externally visible behavior (persistent scrollback
//! capped at a history limit, capture-pane, clear-history) is reproduced
//! in-process: a background task drains the PTY's read half into a
//! mutex-guarded buffer that [`capture`](Pane::capture) reads from.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::output::strip_ansi;
use crate::ps1;
use crate::session::EngineError;

/// Pane geometry from the externally visible settings (§6): wide enough that
/// no realistic command output wraps mid-line, which would otherwise corrupt
/// PS1 fence matching.
const PANE_ROWS: u16 = 1000;
const PANE_COLS: u16 = 1000;

/// Emulates a multiplexer's scrollback: a capped buffer of completed lines
/// plus whatever partial line is still being written to.
struct Scrollback {
    lines: VecDeque<String>,
    pending: String,
    history_limit: usize,
}

impl Scrollback {
    fn new(history_limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            pending: String::new(),
            history_limit,
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        self.pending.push_str(&text);
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            self.lines.push_back(line);
            if self.lines.len() > self.history_limit {
                self.lines.pop_front();
            }
        }
    }

    fn snapshot(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out.push_str(self.pending.trim_end());
        out
    }

    fn clear(&mut self) {
        self.lines.clear();
        self.pending.clear();
    }
}

/// A special key token: the literal form `C-<x>` (e.g. `C-c`, `C-d`, `C-z`).
#[must_use]
pub fn is_special_key(text: &str) -> bool {
    let t = text.trim();
    let bytes = t.as_bytes();
    bytes.len() == 3 && bytes[0] == b'C' && bytes[1] == b'-' && bytes[2].is_ascii_alphabetic()
}

/// The uppercase key name used in completion-suffix wording, e.g. `C-c` → `C`.
#[must_use]
pub fn special_key_name(text: &str) -> char {
    text.trim().as_bytes()[2].to_ascii_uppercase() as char
}

fn control_byte(text: &str) -> u8 {
    let ch = text.trim().as_bytes()[2].to_ascii_uppercase();
    ch & 0x1f
}

/// A persistent shell inside its own pseudo-terminal.
pub struct Pane {
    writer: pty_process::OwnedWritePty,
    child: tokio::process::Child,
    scrollback: Arc<Mutex<Scrollback>>,
    reader_task: tokio::task::JoinHandle<()>,
    shell_pid: i32,
}

impl Pane {
    /// Spawn `/bin/bash` inside a fresh PTY, rooted at `work_dir`, and
    /// install the PS1 sentinel protocol on it.
    ///
    /// `user_file`/`host_file` are temp-file paths the PS1 prompt function
    /// reads from on every prompt (§4.4 step 5) -- written once here via
    /// `whoami`/`hostname`, so the function itself never needs an inline
    /// subshell that would have to survive the escaper.
    pub async fn new(
        work_dir: &str,
        history_limit: usize,
        user_file: &str,
        host_file: &str,
    ) -> Result<Self, EngineError> {
        let (pty, pts) = pty_process::open().map_err(|e| EngineError::Pane(e.to_string()))?;
        pty.resize(pty_process::Size::new(PANE_ROWS, PANE_COLS))
            .map_err(|e| EngineError::Pane(e.to_string()))?;

        let mut cmd = pty_process::Command::new("/bin/bash")
            .arg("--norc")
            .arg("--noprofile");

        for (key, _) in std::env::vars() {
            if is_stripped_env(&key) {
                cmd = cmd.env_remove(&key);
            }
        }
        cmd = cmd.current_dir(work_dir);

        let child = cmd
            .spawn(pts)
            .map_err(|e| EngineError::Pane(format!("failed to spawn bash: {e}")))?;
        let shell_pid = child
            .id()
            .ok_or_else(|| EngineError::Pane("spawned bash has no pid".to_string()))? as i32;

        let (read_pty, write_pty) = pty.into_split();
        let scrollback = Arc::new(Mutex::new(Scrollback::new(history_limit)));

        let drain_scrollback = scrollback.clone();
        let reader_task = tokio::spawn(async move {
            let mut reader = read_pty;
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let mut sb = drain_scrollback.lock().await;
                        sb.push_bytes(&buf[..n]);
                    }
                    Err(err) => {
                        debug!(%err, "pane reader task stopped");
                        break;
                    }
                }
            }
        });

        let mut pane = Self {
            writer: write_pty,
            child,
            scrollback,
            reader_task,
            shell_pid,
        };

        let setup = format!(
            "stty -echo\nexport PAGER=cat GIT_PAGER=cat\nshopt -s expand_aliases\n\
             echo \"$(whoami)\" > {user_file}\necho \"$(hostname)\" > {host_file}\n{}",
            ps1::install_script(user_file, host_file)
        );
        pane.write_raw(setup.as_bytes()).await?;
        pane.clear_screen().await?;
        pane.clear_history().await;

        Ok(pane)
    }

    /// PID of the shell process inside the pane.
    #[must_use]
    pub fn pid(&self) -> i32 {
        self.shell_pid
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| EngineError::Pane(format!("failed to write to pane: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| EngineError::Pane(format!("failed to flush pane: {e}")))
    }

    /// Send `text` as keystrokes. Ordinary text gets a trailing Enter; the
    /// special-key form `C-<x>` is translated to its control byte and sent
    /// without one.
    pub async fn send_keys(&mut self, text: &str) -> Result<(), EngineError> {
        if is_special_key(text) {
            self.write_raw(&[control_byte(text)]).await
        } else {
            let mut bytes = text.as_bytes().to_vec();
            bytes.push(b'\n');
            self.write_raw(&bytes).await
        }
    }

    /// Send pre-decoded raw bytes verbatim, with no implied Enter -- used for
    /// free-form input to an already-running process.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        self.write_raw(bytes).await
    }

    /// Full pane buffer: scrollback + visible, newline-joined, each line
    /// right-stripped, ANSI escapes removed (tmux's `capture-pane` renders
    /// the interpreted grid rather than raw escape sequences; this mirrors
    /// that rather than leaking terminal control bytes to callers).
    pub async fn capture(&self) -> String {
        let sb = self.scrollback.lock().await;
        strip_ansi(&sb.snapshot())
    }

    /// Ctrl-L, the cosmetic screen clear -- the scrollback buffer itself is
    /// untouched by this (see [`clear_history`](Pane::clear_history)).
    pub async fn clear_screen(&mut self) -> Result<(), EngineError> {
        self.write_raw(&[0x0c]).await
    }

    /// Reset the in-process scrollback buffer to empty.
    pub async fn clear_history(&self) {
        let mut sb = self.scrollback.lock().await;
        sb.clear();
    }

    /// True if the bash process is still alive.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Tear down the pane: ask bash to exit, then force it if it doesn't.
    pub async fn kill_session(mut self) -> Result<(), EngineError> {
        let _ = self.write_raw(b"exit\n").await;
        self.reader_task.abort();

        // Dropping the write half closes our end of the PTY master, which
        // sends SIGHUP to bash and unblocks the wait below even if bash
        // never got to process the `exit`.
        drop(self.writer);

        if tokio::time::timeout(std::time::Duration::from_secs(2), self.child.wait())
            .await
            .is_err()
        {
            let _ = self.child.start_kill();
            let _ = tokio::time::timeout(std::time::Duration::from_secs(1), self.child.wait()).await;
        }

        Ok(())
    }
}

/// Opt-in env stripping for spawned shells, renamed from the codebase's
/// existing `AGENTSH_STRIP_ENV` convention. By default nothing is stripped
/// -- child shells inherit the full environment, same as a real terminal.
fn is_stripped_env(name: &str) -> bool {
    static STRIPPED: std::sync::LazyLock<std::collections::HashSet<String>> =
        std::sync::LazyLock::new(|| {
            std::env::var("SHELLCORE_STRIP_ENV")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect()
        });
    if STRIPPED.is_empty() {
        return false;
    }
    STRIPPED.contains(&name.to_uppercase())
}

impl std::fmt::Debug for Pane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pane").field("shell_pid", &self.shell_pid).finish()
    }
}
