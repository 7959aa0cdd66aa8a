//! Integration tests for `/proc`-based process-tree discovery and teardown.

use shellcore::proctree::{descendants, kill_all};

#[test]
fn current_process_is_its_own_descendant_root() {
    let pid = std::process::id() as i32;
    let found = descendants(pid);
    assert!(found.iter().any(|p| p.pid == pid));
}

#[test]
fn unknown_root_yields_empty() {
    // A pid this high is never a real process's ancestor.
    let found = descendants(i32::MAX - 1);
    assert!(found.is_empty());
}

#[test]
fn kill_all_on_already_dead_pid_does_not_panic() {
    kill_all(&[i32::MAX - 1]);
}
