//! Interactive shell execution core for an agent sandbox runtime.
//!
//! An agent drives a long-lived POSIX shell through a small set of typed
//! actions (run a command, type input, interrupt) and gets back structured
//! observations (output, exit code, working directory). The hard part is
//! recovering that structure from a terminal that only ever gives you bytes:
//! [`ps1`] defines the sentinel protocol that smuggles metadata out through
//! the shell prompt, [`pane`] owns the pseudo-terminal the shell lives in,
//! and [`session`] is the state machine that ties injection, polling, and
//! timeout handling together.

pub mod escaper;
pub mod guard;
pub mod output;
pub mod pane;
pub mod proctree;
pub mod ps1;
pub mod server;
pub mod session;
pub mod splitter;

pub use session::{
    Action, BashSession, CommandAction, EngineError, Observation, SessionInfo, SessionManager,
    ShutdownSignal,
};
