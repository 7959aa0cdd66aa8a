//! Integration tests for the top-level command splitter.

use shellcore::splitter::split_commands;

#[test]
fn empty_input_returns_single_empty_element() {
    assert_eq!(split_commands(""), vec![""]);
    assert_eq!(split_commands("   "), vec![""]);
}

#[test]
fn single_command_passes_through() {
    assert_eq!(split_commands("echo hello"), vec!["echo hello"]);
}

#[test]
fn splits_on_top_level_semicolon() {
    assert_eq!(split_commands("echo a; echo b"), vec!["echo a", "echo b"]);
}

#[test]
fn splits_on_bare_ampersand_not_double() {
    assert_eq!(split_commands("sleep 1 &"), vec!["sleep 1"]);
    assert_eq!(split_commands("echo a && echo b"), vec!["echo a && echo b"]);
}

#[test]
fn does_not_split_inside_single_quotes() {
    assert_eq!(split_commands("echo 'a; b'"), vec!["echo 'a; b'"]);
}

#[test]
fn does_not_split_inside_double_quotes() {
    assert_eq!(split_commands("echo \"a; b\""), vec!["echo \"a; b\""]);
}

#[test]
fn does_not_split_inside_command_substitution() {
    assert_eq!(
        split_commands("echo $(echo a; echo b)"),
        vec!["echo $(echo a; echo b)"]
    );
}

/// The `;` inside the heredoc body is not a split point, even though the
/// command following the heredoc's close still is (see
/// `splits_on_command_following_a_closed_heredoc` below).
#[test]
fn does_not_split_inside_heredoc_body() {
    let input = "cat <<EOF\nfoo; bar\nEOF\necho done";
    assert_eq!(
        split_commands(input),
        vec!["cat <<EOF\nfoo; bar\nEOF", "echo done"]
    );
}

/// The newline that closes a heredoc's delimiter line is itself a top-level
/// separator -- a command immediately following the heredoc is a second,
/// independent top-level command, not part of the heredoc's own piece.
#[test]
fn splits_on_command_following_a_closed_heredoc() {
    let input = "cat <<EOF\nfoo\nEOF\necho done";
    assert_eq!(
        split_commands(input),
        vec!["cat <<EOF\nfoo\nEOF", "echo done"]
    );
}

#[test]
fn splits_three_ways_around_a_heredoc_and_trailing_semicolon() {
    let input = "cat <<EOF\nfoo\nEOF\necho done; echo two";
    assert_eq!(
        split_commands(input),
        vec!["cat <<EOF\nfoo\nEOF", "echo done", "echo two"]
    );
}

#[test]
fn unterminated_quote_fails_open() {
    let input = "echo 'unterminated";
    assert_eq!(split_commands(input), vec![input]);
}

#[test]
fn escaped_semicolon_is_not_a_split_point() {
    assert_eq!(split_commands("echo a\\; echo b"), vec!["echo a\\; echo b"]);
}

#[test]
fn idempotent_on_already_split_commands() {
    let parts = split_commands("echo a; echo b; echo c");
    let rejoined = parts.join(";");
    let resplit = split_commands(&rejoined);
    assert_eq!(resplit.len(), parts.len());
}

#[test]
fn multi_command_rejection_example_from_spec() {
    let parts = split_commands("echo a; echo b");
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0], "echo a");
    assert_eq!(parts[1], "echo b");
}
