//! Integration tests for persistent shell sessions.
//!
//! These exercise the session mechanism end to end: command dispatch, exit
//! codes, state persistence (cwd, env vars, functions, aliases), timeouts,
//! input injection, and session lifecycle. Each test spawns a real
//! `/bin/bash` under a PTY.

use std::time::Duration;

use shellcore::session::{Action, CommandAction, SessionManager, ShutdownSignal};

fn manager() -> SessionManager {
    SessionManager::new(ShutdownSignal::new())
}

fn exec(command: &str) -> Action {
    Action::Command(CommandAction {
        command: command.to_string(),
        is_input: false,
        timeout: None,
        blocking: false,
    })
}

// ---------------------------------------------------------------------------
// Basic lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_and_close_session() {
    let mgr = manager();
    let info = mgr.create("s1".into(), "/tmp".into(), None, None).await.unwrap();
    assert_eq!(info.id, "s1");

    mgr.close("s1").await.unwrap();

    let list = mgr.list().await;
    assert!(list.is_empty());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let mgr = manager();
    mgr.create("s2".into(), "/tmp".into(), None, None).await.unwrap();
    mgr.close("s2").await.unwrap();
    mgr.close("s2").await.unwrap();
}

// ---------------------------------------------------------------------------
// Command execution basics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_session_exec_echo() {
    let mgr = manager();
    mgr.create("t1".into(), "/tmp".into(), None, None).await.unwrap();

    let obs = mgr.execute("t1", exec("echo hello session")).await.unwrap();
    assert_eq!(obs.content, "hello session");
    assert_eq!(obs.metadata.exit_code, 0);
    assert!(obs.metadata.suffix.contains("exit code 0"));
}

#[tokio::test]
async fn test_empty_command_with_no_prior_command_is_an_error() {
    let mgr = manager();
    mgr.create("empty".into(), "/tmp".into(), None, None).await.unwrap();

    let obs = mgr.execute("empty", exec("")).await.unwrap();
    assert_eq!(obs.content, "ERROR: No previous running command to retrieve logs from.");
}

#[tokio::test]
async fn test_stop_with_nothing_running_reports_no_processes_terminated() {
    let mgr = manager();
    mgr.create("idle".into(), "/tmp".into(), None, None).await.unwrap();

    let obs = mgr.execute("idle", Action::Stop).await.unwrap();
    assert_eq!(obs.content, "No processes were terminated");
}

#[tokio::test]
async fn test_session_exec_failure_keeps_session_alive() {
    let mgr = manager();
    mgr.create("t2".into(), "/tmp".into(), None, None).await.unwrap();

    let obs = mgr.execute("t2", exec("false")).await.unwrap();
    assert_eq!(obs.metadata.exit_code, 1);

    let obs = mgr.execute("t2", exec("echo still alive")).await.unwrap();
    assert_eq!(obs.content, "still alive");
    assert_eq!(obs.metadata.exit_code, 0);
}

#[tokio::test]
async fn test_session_exec_subshell_exit_code() {
    let mgr = manager();
    mgr.create("t3".into(), "/tmp".into(), None, None).await.unwrap();

    let obs = mgr.execute("t3", exec("(exit 42)")).await.unwrap();
    assert_eq!(obs.metadata.exit_code, 42);
}

#[tokio::test]
async fn test_session_exec_multiline_output() {
    let mgr = manager();
    mgr.create("t4".into(), "/tmp".into(), None, None).await.unwrap();

    let obs = mgr.execute("t4", exec("seq 1 5")).await.unwrap();
    assert_eq!(obs.content, "1\n2\n3\n4\n5");
    assert_eq!(obs.metadata.exit_code, 0);
}

#[tokio::test]
async fn test_session_exec_stderr_captured() {
    let mgr = manager();
    mgr.create("t5".into(), "/tmp".into(), None, None).await.unwrap();

    let obs = mgr.execute("t5", exec("echo err_msg >&2")).await.unwrap();
    assert!(obs.content.contains("err_msg"));
}

// ---------------------------------------------------------------------------
// State persistence -- the whole point of sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_session_cwd_persists_and_is_reported() {
    let mgr = manager();
    mgr.create("cwd".into(), "/tmp".into(), None, None).await.unwrap();

    mgr.execute("cwd", exec("cd /")).await.unwrap();
    let obs = mgr.execute("cwd", exec("pwd")).await.unwrap();
    assert_eq!(obs.content, "/");
    assert_eq!(mgr.cwd("cwd").await.unwrap(), "/");
}

#[tokio::test]
async fn test_session_env_var_persists() {
    let mgr = manager();
    mgr.create("env".into(), "/tmp".into(), None, None).await.unwrap();

    mgr.execute("env", exec("export MY_SESSION_VAR=persistent_value")).await.unwrap();
    let obs = mgr.execute("env", exec("echo $MY_SESSION_VAR")).await.unwrap();
    assert_eq!(obs.content, "persistent_value");
}

#[tokio::test]
async fn test_session_shell_function_persists() {
    let mgr = manager();
    mgr.create("func".into(), "/tmp".into(), None, None).await.unwrap();

    mgr.execute("func", exec("greet() { echo \"hello $1\"; }")).await.unwrap();
    let obs = mgr.execute("func", exec("greet world")).await.unwrap();
    assert_eq!(obs.content, "hello world");
}

// ---------------------------------------------------------------------------
// Multi-command rejection and the safety guard
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_multiple_top_level_commands_rejected() {
    let mgr = manager();
    mgr.create("multi".into(), "/tmp".into(), None, None).await.unwrap();

    let obs = mgr.execute("multi", exec("echo one; echo two")).await.unwrap();
    assert!(obs.content.starts_with("ERROR: Cannot execute multiple commands at once."));
    assert!(obs.content.contains("(1) echo one"));
    assert!(obs.content.contains("(2) echo two"));
}

#[tokio::test]
async fn test_dangerous_command_blocked_but_session_still_works() {
    let mgr = manager();
    mgr.create("sec".into(), "/tmp".into(), None, None).await.unwrap();

    let obs = mgr.execute("sec", exec("rm -rf /")).await.unwrap();
    assert!(obs.content.starts_with("ERROR: blocked"));

    let obs = mgr.execute("sec", exec("echo safe")).await.unwrap();
    assert_eq!(obs.content, "safe");
}

// ---------------------------------------------------------------------------
// Input injection and interruption
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_send_input_to_running_read_loop() {
    let mgr = manager();
    mgr.create("input".into(), "/tmp".into(), None, Some(1)).await.unwrap();

    let obs = mgr
        .execute(
            "input",
            Action::Command(CommandAction {
                command: "read -r line && echo \"got: $line\"".to_string(),
                is_input: false,
                timeout: None,
                blocking: false,
            }),
        )
        .await
        .unwrap();
    // `read` with nothing typed never produces new output -- expect a
    // no-change timeout rather than completion.
    assert_eq!(obs.metadata.exit_code, -1);

    let obs = mgr
        .execute(
            "input",
            Action::Command(CommandAction {
                command: "hello\\n".to_string(),
                is_input: true,
                timeout: None,
                blocking: false,
            }),
        )
        .await
        .unwrap();
    assert_eq!(obs.content, "got: hello");
    assert_eq!(obs.metadata.exit_code, 0);
}

#[tokio::test]
async fn test_interrupt_kills_runaway_process() {
    let mgr = manager();
    mgr.create("runaway".into(), "/tmp".into(), None, Some(1)).await.unwrap();

    let obs = mgr
        .execute(
            "runaway",
            Action::Command(CommandAction {
                command: "sleep 30".to_string(),
                is_input: false,
                timeout: None,
                blocking: false,
            }),
        )
        .await
        .unwrap();
    assert_eq!(obs.metadata.exit_code, -1);

    let obs = mgr.execute("runaway", Action::Stop).await.unwrap();
    assert_eq!(obs.content, "All running processes have been terminated");
}

// ---------------------------------------------------------------------------
// Multiple independent sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_multiple_independent_sessions() {
    let mgr = manager();
    mgr.create("a".into(), "/tmp".into(), None, None).await.unwrap();
    mgr.create("b".into(), "/tmp".into(), None, None).await.unwrap();

    mgr.execute("a", exec("export WHICH=session_a")).await.unwrap();
    mgr.execute("b", exec("export WHICH=session_b")).await.unwrap();

    let ra = mgr.execute("a", exec("echo $WHICH")).await.unwrap();
    let rb = mgr.execute("b", exec("echo $WHICH")).await.unwrap();

    assert_eq!(ra.content, "session_a");
    assert_eq!(rb.content, "session_b");
}

#[tokio::test]
async fn test_list_sessions() {
    let mgr = manager();
    mgr.create("x".into(), "/tmp".into(), None, None).await.unwrap();
    mgr.create("y".into(), "/tmp".into(), None, None).await.unwrap();

    let list = mgr.list().await;
    assert_eq!(list.len(), 2);
    let ids: Vec<&str> = list.iter().map(|s| s.id.as_str()).collect();
    assert!(ids.contains(&"x"));
    assert!(ids.contains(&"y"));
}

#[tokio::test]
async fn test_exec_against_nonexistent_session() {
    let mgr = manager();
    let err = mgr.execute("nope", exec("echo hi")).await;
    assert!(err.is_err());
    assert!(err.unwrap_err().contains("no such session"));
}

// ---------------------------------------------------------------------------
// PTY: isatty verification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_session_pty_isatty() {
    let mgr = manager();
    mgr.create("tty".into(), "/tmp".into(), None, None).await.unwrap();

    let obs = mgr
        .execute(
            "tty",
            exec("python3 -c \"import os; print(os.isatty(0), os.isatty(1), os.isatty(2))\""),
        )
        .await
        .unwrap();

    assert_eq!(obs.metadata.exit_code, 0);
    assert!(obs.content.contains("True True True"));
}

// ---------------------------------------------------------------------------
// Hard timeout, bounded by the call's own timeout_seconds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_hard_timeout_reports_running_then_completes_on_poll() {
    let mgr = manager();
    mgr.create("hard".into(), "/tmp".into(), None, Some(60)).await.unwrap();

    let obs = mgr
        .execute(
            "hard",
            Action::Command(CommandAction {
                command: "sleep 2 && echo finished".to_string(),
                is_input: false,
                timeout: Some(Duration::from_millis(300)),
                blocking: false,
            }),
        )
        .await
        .unwrap();
    assert_eq!(obs.metadata.exit_code, -1);

    let obs = mgr.execute("hard", exec("")).await.unwrap();
    assert_eq!(obs.content, "finished");
    assert_eq!(obs.metadata.exit_code, 0);
}
