//! Process-tree discovery and teardown.
//!
//! There is no process-inspection crate anywhere in this codebase's
//! dependency stack, so descendants of the session's shell are found by
//! walking `/proc` directly: every numeric entry's `stat` gives its parent
//! pid, and `cmdline` gives the argv used to describe it back to the agent.
//! This mirrors the one corpus precedent for reading `/proc/<pid>/...`
//! directly rather than shelling out to `ps`.

use std::fs;
use std::path::Path;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// A process discovered under a session's shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    pub ppid: i32,
    pub cmdline: String,
}

/// Parse `/proc/<pid>/stat`'s parent pid field.
///
/// The second field (the comm name) is parenthesized and may itself contain
/// spaces or parentheses, so the ppid is read from the end: skip past the
/// last `)` and take the second whitespace-separated field after it.
fn read_ppid(pid: i32) -> Option<i32> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = stat.rsplit_once(')')?.1;
    after_comm.split_whitespace().nth(1)?.parse().ok()
}

fn read_cmdline(pid: i32) -> String {
    fs::read_to_string(format!("/proc/{pid}/cmdline"))
        .map(|raw| raw.replace('\0', " ").trim().to_string())
        .unwrap_or_default()
}

fn all_pids() -> Vec<i32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<i32>().ok()))
        .collect()
}

/// Collect every live process whose ancestry traces back to `root_pid`,
/// `root_pid` included. Processes that exit mid-walk are silently skipped
/// (a `/proc/<pid>` read racing a process exit is not an error).
#[must_use]
pub fn descendants(root_pid: i32) -> Vec<ProcessInfo> {
    let pids = all_pids();
    let mut ppid_of = std::collections::HashMap::new();
    for &pid in &pids {
        if let Some(ppid) = read_ppid(pid) {
            ppid_of.insert(pid, ppid);
        }
    }

    let mut keep: std::collections::HashSet<i32> = std::collections::HashSet::new();
    for &pid in &pids {
        if !Path::new(&format!("/proc/{pid}")).exists() {
            continue;
        }
        let mut cur = pid;
        let mut depth = 0;
        while depth < 4096 {
            if cur == root_pid {
                keep.insert(pid);
                break;
            }
            match ppid_of.get(&cur) {
                Some(&ppid) if ppid != cur => cur = ppid,
                _ => break,
            }
            depth += 1;
        }
    }

    let mut result: Vec<ProcessInfo> = keep
        .into_iter()
        .map(|pid| ProcessInfo {
            pid,
            ppid: ppid_of.get(&pid).copied().unwrap_or(0),
            cmdline: read_cmdline(pid),
        })
        .collect();
    result.sort_by_key(|p| p.pid);
    result
}

/// Send `SIGKILL` to every process in `pids`. Missing processes and
/// permission failures are logged and otherwise ignored -- by the time the
/// caller decides to kill a tree, some of its members may already be gone.
pub fn kill_all(pids: &[i32]) {
    for &pid in pids {
        match signal::kill(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) => debug!(pid, "sent SIGKILL"),
            Err(nix::errno::Errno::ESRCH) => {}
            Err(err) => warn!(pid, %err, "failed to kill process"),
        }
    }
}
