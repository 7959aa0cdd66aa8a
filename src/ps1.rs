//! PS1 sentinel protocol (C3): the fenced JSON block the shell emits on
//! every prompt, carrying the metadata the pane otherwise has no side
//! channel for (exit code, cwd, pid, ...).
//!
//! The literal markers below are the protocol's one compatibility contract
//! (§6 of the spec this core implements) -- they must match bytewise.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Opening fence of a PS1 frame.
pub const START_MARKER: &str = "###PS1JSON###";
/// Closing fence of a PS1 frame.
pub const END_MARKER: &str = "###PS1END###";

static PS1_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)###PS1JSON###\r?\n(\{.*?\})\r?\n###PS1END###").expect("valid PS1 regex")
});

/// Per-command metadata recovered from a PS1 frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandMetadata {
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub py_interpreter_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub suffix: String,
}

impl Default for CommandMetadata {
    fn default() -> Self {
        Self {
            exit_code: -1,
            pid: None,
            username: None,
            hostname: None,
            working_dir: None,
            py_interpreter_path: None,
            timestamp: None,
            prefix: String::new(),
            suffix: String::new(),
        }
    }
}

/// Every field in the wire format is a JSON string, even numeric ones --
/// the prompt function builds the frame with `printf`, not a JSON encoder.
#[derive(Debug, Deserialize, Default)]
struct RawFrame {
    #[serde(default)]
    pid: Option<String>,
    #[serde(default)]
    exit_code: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    py_interpreter_path: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_metadata(json: &str) -> CommandMetadata {
    let raw: RawFrame = serde_json::from_str(json).unwrap_or_default();
    let exit_code = raw
        .exit_code
        .as_deref()
        .map(str::trim)
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or(-1);
    CommandMetadata {
        exit_code,
        pid: non_empty(raw.pid).and_then(|s| s.parse::<i64>().ok()),
        username: non_empty(raw.username),
        hostname: non_empty(raw.hostname),
        working_dir: non_empty(raw.working_dir),
        py_interpreter_path: non_empty(raw.py_interpreter_path),
        timestamp: non_empty(raw.timestamp),
        prefix: String::new(),
        suffix: String::new(),
    }
}

/// A single PS1 frame found in a pane capture: its byte span (covering
/// exactly `###PS1JSON###...###PS1END###`, no surrounding newlines) and the
/// metadata parsed out of it.
#[derive(Debug, Clone)]
pub struct Ps1Match {
    pub start: usize,
    pub end: usize,
    pub metadata: CommandMetadata,
}

/// Find every PS1 frame in `content`, in order.
#[must_use]
pub fn find_matches(content: &str) -> Vec<Ps1Match> {
    PS1_RE
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let json = caps.get(1)?.as_str();
            Some(Ps1Match {
                start: whole.start(),
                end: whole.end(),
                metadata: parse_metadata(json),
            })
        })
        .collect()
}

/// True if `content`, ignoring trailing whitespace, ends with the PS1 end
/// marker -- the polling loop's completion check.
#[must_use]
pub fn ends_with_fence(content: &str) -> bool {
    content.trim_end().ends_with(END_MARKER)
}

fn trim_newlines(s: &str) -> &str {
    s.trim_matches(['\r', '\n'])
}

/// The output/metadata recovered from a capture under the §4.3 framing rule.
#[derive(Debug, Clone)]
pub struct Framed {
    pub output: String,
    pub metadata: Option<CommandMetadata>,
}

/// Frame a capture taken while the command is still running (k=1 case reads
/// everything after the single match; k=0/k>=2 degrade gracefully). Metadata
/// is never meaningful here -- callers synthesize an empty one.
#[must_use]
pub fn frame_running(content: &str) -> Framed {
    let matches = find_matches(content);
    match matches.len() {
        0 => Framed {
            output: content.to_string(),
            metadata: None,
        },
        1 => Framed {
            output: trim_newlines(&content[matches[0].end..]).to_string(),
            metadata: None,
        },
        _ => concat_spans(content, &matches, None),
    }
}

/// Frame a capture known to carry a completed command's final prompt.
/// Requires at least one match; an empty result with `metadata: None`
/// signals the caller should treat this as the fatal "missing PS1 on
/// completion" case.
#[must_use]
pub fn frame_completed(content: &str) -> Framed {
    let matches = find_matches(content);
    match matches.len() {
        0 => Framed {
            output: String::new(),
            metadata: None,
        },
        1 => Framed {
            output: trim_newlines(&content[..matches[0].start]).to_string(),
            metadata: Some(matches[0].metadata.clone()),
        },
        _ => {
            let last = matches.last().unwrap().metadata.clone();
            concat_spans(content, &matches, Some(last))
        }
    }
}

fn concat_spans(content: &str, matches: &[Ps1Match], metadata: Option<CommandMetadata>) -> Framed {
    let mut output = String::new();
    for pair in matches.windows(2) {
        let span = trim_newlines(&content[pair[0].end..pair[1].start]);
        output.push_str(span);
        output.push('\n');
    }
    Framed { output, metadata }
}

/// Build the bash snippet installed once at session init: the prompt
/// function, `PROMPT_COMMAND`, and an empty `PS2`. `user_file`/`host_file`
/// are read by the function on every prompt so it never needs to shell out
/// to `whoami`/`hostname` itself (those were already captured once at init,
/// see [`crate::pane`]).
#[must_use]
pub fn install_script(user_file: &str, host_file: &str) -> String {
    format!(
        "__ps1_emit() {{\n  \
           local __ec=$?\n  \
           printf '\\n{START_MARKER}\\n{{\\n\"pid\": \"%s\",\\n\"exit_code\": \"%s\",\\n\"username\": \"%s\",\\n\"hostname\": \"%s\",\\n\"working_dir\": \"%s\",\\n\"py_interpreter_path\": \"%s\",\\n\"timestamp\": \"%s\"\\n}}\\n{END_MARKER}\\n' \\\n    \
           \"$$\" \"$__ec\" \"$(cat {user_file} 2>/dev/null)\" \"$(cat {host_file} 2>/dev/null)\" \"$PWD\" \"$(command -v python3 2>/dev/null)\" \"$(date +%s)\"\n\
         }}\n\
         export PROMPT_COMMAND=__ps1_emit\n\
         PS2=''\n"
    )
}
