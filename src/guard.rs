//! Dangerous-command guard, run before a normal command ever reaches the shell.
//!
//! The runtime this crate lives in is sandboxed at the container/VM level, but
//! a cheap in-process check on top catches the obviously destructive cases
//! (fork bombs, raw writes to block devices, recursive deletes of system
//! paths) without waiting for the sandbox boundary to matter.

use regex::Regex;
use std::sync::LazyLock;

use crate::splitter;

/// System-critical paths that should never be the target of recursive delete,
/// chmod, or chown operations.
const PROTECTED_PATHS: &[&str] = &[
    "/",
    "/*",
    "/bin",
    "/sbin",
    "/usr",
    "/etc",
    "/var",
    "/home",
    "/root",
    "/lib",
    "/lib64",
    "/opt",
    "/boot",
    "/dev",
    "/sys",
    "/proc",
    "/System",
    "/Library",
    "/Applications",
    "/Users",
    "/private",
    "/private/var",
    "/private/etc",
];

struct DangerousPattern {
    regex: Regex,
    description: &'static str,
}

/// Compiled patterns for dangerous commands. Built once, reused on every check.
static DANGEROUS_PATTERNS: LazyLock<Vec<DangerousPattern>> = LazyLock::new(|| {
    vec![
        DangerousPattern {
            regex: Regex::new(r":\(\)\s*\{.*\|.*&\s*\}\s*;").unwrap(),
            description: "fork bomb",
        },
        DangerousPattern {
            regex: Regex::new(r"\bmkfs\b").unwrap(),
            description: "filesystem format (mkfs)",
        },
        DangerousPattern {
            regex: Regex::new(r"\bdd\b.*\bof=/dev/").unwrap(),
            description: "raw write to block device (dd of=/dev/...)",
        },
        DangerousPattern {
            regex: Regex::new(r">\s*/dev/(sd|nvme|hd|vd|xvd|disk|mapper/)").unwrap(),
            description: "redirect to block device",
        },
        DangerousPattern {
            regex: Regex::new(r"\b(shutdown|reboot|halt|poweroff)\b").unwrap(),
            description: "system shutdown/reboot",
        },
        DangerousPattern {
            regex: Regex::new(r"\binit\s+[06]\b").unwrap(),
            description: "system halt/reboot via init",
        },
    ]
});

/// Validate a command against dangerous patterns. Returns `Ok(())` if safe,
/// or `Err(description)` if the command matches a dangerous pattern.
pub fn validate_command(command: &str) -> Result<(), String> {
    for pattern in DANGEROUS_PATTERNS.iter() {
        if pattern.regex.is_match(command) {
            return Err(format!(
                "blocked: command matches dangerous pattern ({}): {}",
                pattern.description, command
            ));
        }
    }

    check_destructive_on_protected_paths(command)
}

/// Check if a command performs recursive destructive operations on protected paths.
///
/// Splits on the same top-level boundaries as [`splitter`] so that, e.g.,
/// `cd /tmp && rm -rf /` is caught even though `rm -rf /` is not the whole
/// command string.
fn check_destructive_on_protected_paths(command: &str) -> Result<(), String> {
    for subcmd in splitter::split_commands(command) {
        for subcmd in split_and_or_pipe(&subcmd) {
            let subcmd = subcmd.trim();
            if subcmd.is_empty() {
                continue;
            }

            if is_dangerous_rm(subcmd) {
                return Err(format!(
                    "blocked: recursive delete targeting a protected system path: {subcmd}"
                ));
            }
            if is_dangerous_chmod_chown(subcmd, "chmod") {
                return Err(format!(
                    "blocked: recursive chmod on a protected system path: {subcmd}"
                ));
            }
            if is_dangerous_chmod_chown(subcmd, "chown") {
                return Err(format!(
                    "blocked: recursive chown on a protected system path: {subcmd}"
                ));
            }
        }
    }

    Ok(())
}

/// Further split a single top-level command on `&&`/`||`/`|` -- not a full
/// parser, just enough to catch the obvious cases the guard cares about.
fn split_and_or_pipe(cmd: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut remaining = cmd;
    while !remaining.is_empty() {
        if let Some(pos) = remaining
            .find("&&")
            .into_iter()
            .chain(remaining.find("||"))
            .chain(remaining.find('|'))
            .min()
        {
            parts.push(&remaining[..pos]);
            let sep_len = if remaining[pos..].starts_with("&&") || remaining[pos..].starts_with("||")
            {
                2
            } else {
                1
            };
            remaining = &remaining[pos + sep_len..];
        } else {
            parts.push(remaining);
            break;
        }
    }
    parts
}

/// Check if a subcmd is a dangerous `rm` invocation targeting protected paths.
fn is_dangerous_rm(subcmd: &str) -> bool {
    let words: Vec<&str> = subcmd.split_whitespace().collect();
    let Some(rm_pos) = words.iter().position(|w| *w == "rm") else {
        return false;
    };
    let args = &words[rm_pos + 1..];

    let has_recursive = args.iter().any(|a| {
        *a == "-r"
            || *a == "-R"
            || *a == "--recursive"
            || a.starts_with('-') && !a.starts_with("--") && (a.contains('r') || a.contains('R'))
    });
    if !has_recursive {
        return false;
    }

    args.iter().any(|arg| !arg.starts_with('-') && targets_protected_path(arg))
}

/// Check if a subcmd is a dangerous recursive chmod/chown on protected paths.
fn is_dangerous_chmod_chown(subcmd: &str, cmd_name: &str) -> bool {
    let words: Vec<&str> = subcmd.split_whitespace().collect();
    let Some(cmd_pos) = words.iter().position(|w| *w == cmd_name) else {
        return false;
    };
    let args = &words[cmd_pos + 1..];

    let has_recursive = args.iter().any(|a| {
        *a == "-R" || *a == "--recursive" || a.starts_with('-') && !a.starts_with("--") && a.contains('R')
    });
    if !has_recursive {
        return false;
    }

    args.iter().any(|arg| !arg.starts_with('-') && targets_protected_path(arg))
}

fn targets_protected_path(arg: &str) -> bool {
    if arg == "/*" {
        return true;
    }
    let path = arg.trim_end_matches('/');
    let path_with_slash = if path.is_empty() { "/" } else { path };
    PROTECTED_PATHS.iter().any(|protected| {
        let protected_trimmed = protected.trim_end_matches('/');
        let protected_cmp = if protected_trimmed.is_empty() { "/" } else { protected_trimmed };
        path_with_slash == protected_cmp
    })
}
