//! Integration tests for the shell-safe escaper.

use shellcore::escaper::escape_special_chars;

#[test]
fn doubles_backslash_before_metachars() {
    assert_eq!(escape_special_chars("echo a\\; echo b"), "echo a\\\\; echo b");
    assert_eq!(escape_special_chars("echo a \\| echo b"), "echo a \\\\| echo b");
    assert_eq!(escape_special_chars("foo \\> bar"), "foo \\\\> bar");
}

#[test]
fn noop_without_escaped_metachars() {
    let input = "echo hello world";
    assert_eq!(escape_special_chars(input), input);
}

#[test]
fn noop_inside_single_quotes() {
    let input = "echo 'a\\; b'";
    assert_eq!(escape_special_chars(input), input);
}

#[test]
fn noop_inside_double_quotes() {
    let input = "echo \"a\\; b\"";
    assert_eq!(escape_special_chars(input), input);
}

#[test]
fn noop_inside_command_substitution() {
    let input = "echo $(echo a\\; echo b)";
    assert_eq!(escape_special_chars(input), input);
}

#[test]
fn noop_inside_heredoc_body() {
    let input = "cat <<EOF\nfoo\\; bar\nEOF\n";
    assert_eq!(escape_special_chars(input), input);
}

#[test]
fn parse_failure_returns_input_unchanged() {
    let input = "echo 'unterminated \\; here";
    assert_eq!(escape_special_chars(input), input);
}

#[test]
fn empty_input_returns_empty() {
    assert_eq!(escape_special_chars(""), "");
}
