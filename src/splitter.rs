//! Command splitter (C1): breaks a command string into top-level shell commands.
//!
//! No shell-grammar crate is used anywhere in this codebase's dependency
//! stack, so this is a hand-rolled character scanner rather than a real
//! POSIX parser. It tracks just enough shell structure (quotes, backticks,
//! `$(...)`, heredoc bodies) to find top-level `;`, bare `&`, and newline
//! separators without splitting inside them. On anything it can't make
//! sense of (unterminated quote, unterminated heredoc) it fails open and
//! hands the whole input back as a single command, per contract.

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Single,
    Double,
    Backtick,
    Subst,
    Heredoc,
}

/// Split `input` into top-level shell commands.
///
/// An empty or whitespace-only input returns `[""]`. A parse failure (an
/// unterminated quote or heredoc) returns `[input]` unchanged.
#[must_use]
pub fn split_commands(input: &str) -> Vec<String> {
    if input.trim().is_empty() {
        return vec![String::new()];
    }

    let chars: Vec<char> = input.chars().collect();
    let n = chars.len();

    let mut stack = vec![State::Normal];
    let mut i = 0usize;
    let mut seg_start = 0usize;
    let mut pieces: Vec<String> = Vec::new();
    let mut heredoc_pending: Option<(String, bool)> = None;
    let mut active_heredoc: Option<(String, bool)> = None;

    while i < n {
        let top = *stack.last().unwrap();

        if top == State::Heredoc {
            let line_start = i;
            let mut j = i;
            while j < n && chars[j] != '\n' {
                j += 1;
            }
            let line: String = chars[line_start..j].iter().collect();
            let (delim, strip_tabs) = active_heredoc.clone().unwrap();
            let cmp = if strip_tabs {
                line.trim_start_matches('\t')
            } else {
                line.as_str()
            };
            if cmp == delim {
                active_heredoc = None;
                stack.pop();
            }
            i = if j < n { j + 1 } else { j };
            if active_heredoc.is_none() {
                // The heredoc just closed. Its closing delimiter line's
                // newline is a top-level separator, same as a bare newline
                // in `State::Normal` -- push the segment up to here and
                // start the next one right after it.
                pieces.push(chars[seg_start..i].iter().collect::<String>().trim_end().to_string());
                seg_start = i;
            }
            continue;
        }

        let c = chars[i];

        if c == '\\' && top == State::Normal {
            i = (i + 2).min(n);
            continue;
        }

        match top {
            State::Normal => match c {
                '\'' => {
                    stack.push(State::Single);
                    i += 1;
                }
                '"' => {
                    stack.push(State::Double);
                    i += 1;
                }
                '`' => {
                    stack.push(State::Backtick);
                    i += 1;
                }
                '$' if i + 1 < n && chars[i + 1] == '(' => {
                    stack.push(State::Subst);
                    i += 2;
                }
                ';' => {
                    pieces.push(chars[seg_start..i].iter().collect::<String>().trim_end().to_string());
                    i += 1;
                    seg_start = i;
                }
                '&' => {
                    if i + 1 < n && chars[i + 1] == '&' {
                        i += 2;
                    } else {
                        pieces.push(chars[seg_start..i].iter().collect::<String>().trim_end().to_string());
                        i += 1;
                        seg_start = i;
                    }
                }
                '\n' => {
                    if let Some(hd) = heredoc_pending.take() {
                        active_heredoc = Some(hd);
                        stack.push(State::Heredoc);
                        i += 1;
                    } else {
                        pieces.push(chars[seg_start..i].iter().collect::<String>().trim_end().to_string());
                        i += 1;
                        seg_start = i;
                    }
                }
                '<' if i + 1 < n && chars[i + 1] == '<' => {
                    let (delim, strip_tabs, next) = scan_heredoc_operator(&chars, i);
                    if !delim.is_empty() {
                        heredoc_pending = Some((delim, strip_tabs));
                    }
                    i = next;
                }
                _ => i += 1,
            },
            State::Single => {
                if c == '\'' {
                    stack.pop();
                }
                i += 1;
            }
            State::Double => {
                if c == '"' {
                    stack.pop();
                }
                i += 1;
            }
            State::Backtick => {
                if c == '`' {
                    stack.pop();
                }
                i += 1;
            }
            State::Subst => {
                if c == ')' {
                    stack.pop();
                }
                i += 1;
            }
            State::Heredoc => unreachable!(),
        }
    }

    if stack.len() > 1 || active_heredoc.is_some() {
        return vec![input.to_string()];
    }

    let tail = chars[seg_start..n].iter().collect::<String>();
    let tail = tail.trim_end().to_string();
    if !tail.is_empty() || pieces.is_empty() {
        pieces.push(tail);
    }

    pieces
}

/// Scan a `<<` / `<<-` heredoc operator starting at `i` (which points at the
/// first `<`). Returns the delimiter word, whether `-` (tab-stripping) was
/// present, and the index just past the delimiter.
fn scan_heredoc_operator(chars: &[char], i: usize) -> (String, bool, usize) {
    let n = chars.len();
    let mut k = i + 2;
    let strip_tabs = k < n && chars[k] == '-';
    if strip_tabs {
        k += 1;
    }
    while k < n && (chars[k] == ' ' || chars[k] == '\t') {
        k += 1;
    }

    let mut delim = String::new();
    if k < n && (chars[k] == '\'' || chars[k] == '"') {
        let q = chars[k];
        k += 1;
        while k < n && chars[k] != q {
            delim.push(chars[k]);
            k += 1;
        }
        if k < n {
            k += 1;
        }
    } else {
        while k < n && !chars[k].is_whitespace() && !matches!(chars[k], '<' | '>' | ';' | '&') {
            delim.push(chars[k]);
            k += 1;
        }
    }

    (delim, strip_tabs, k)
}
