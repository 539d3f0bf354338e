// tests/command_extract.rs

use proptest::prelude::*;
use procstream::command::{extend, extract};

#[test]
fn splits_on_spaces_and_drops_empty_tokens() {
    assert_eq!(extract("a b"), vec!["a", "b"]);
    assert_eq!(extract("  a   b  "), vec!["a", "b"]);
    assert!(extract("").is_empty());
    assert!(extract("    ").is_empty());
}

#[test]
fn quoted_runs_are_literal() {
    assert_eq!(extract("\"a b\" c"), vec!["a b", "c"]);
    assert_eq!(extract("'a b' c"), vec!["a b", "c"]);
    assert_eq!(extract("\"it's\""), vec!["it's"]);
    assert_eq!(extract("'say \"hi\"'"), vec!["say \"hi\""]);
}

#[test]
fn adjacent_quoted_runs_concatenate() {
    assert_eq!(extract("'it''s'"), vec!["its"]);
    assert_eq!(extract("pre\"fix\"post"), vec!["prefixpost"]);
    assert_eq!(extract("\"\"x"), vec!["x"]);
}

#[test]
fn escaped_space_joins_tokens() {
    assert_eq!(extract("a\\ b"), vec!["a b"]);
}

#[test]
fn escaped_quotes_become_literal() {
    assert_eq!(extract("\\\"a"), vec!["\"a"]);
    assert_eq!(extract("it\\'s"), vec!["it's"]);
    assert_eq!(extract("\"a\\\"b\""), vec!["a\"b"]);
}

#[test]
fn other_escapes_keep_the_backslash() {
    assert_eq!(extract("C:\\dir\\file"), vec!["C:\\dir\\file"]);
    assert_eq!(extract("-c 'printf \"x\\ny\"'"), vec!["-c", "printf \"x\\ny\""]);
}

#[test]
fn trailing_partial_token_is_emitted() {
    assert_eq!(extract("a \"unterminated b"), vec!["a", "unterminated b"]);
}

#[test]
fn extend_appends_after_existing_arguments() {
    let mut args = vec!["/bin/program".to_string()];
    extend(&mut args, "--flag value");
    assert_eq!(args, vec!["/bin/program", "--flag", "value"]);
}

#[test]
fn multibyte_characters_survive() {
    assert_eq!(extract("héllo 'wörld ✓'"), vec!["héllo", "wörld ✓"]);
}

proptest! {
    #[test]
    fn plain_argument_is_returned_unchanged(arg in "[^ \"'\\\\]{1,32}") {
        prop_assert_eq!(extract(&arg), vec![arg.clone()]);
    }

    #[test]
    fn plain_words_joined_by_spaces_split_back(
        words in proptest::collection::vec("[a-zA-Z0-9_./-]{1,12}", 0..8),
        gap in 1usize..4,
    ) {
        let command = words.join(&" ".repeat(gap));
        prop_assert_eq!(extract(&command), words);
    }

    #[test]
    fn single_quoting_preserves_spaces(
        inner in "[a-z ]{0,20}",
    ) {
        let command = format!("'{inner}'");
        let args = extract(&command);
        if inner.is_empty() {
            prop_assert!(args.is_empty());
        } else {
            prop_assert_eq!(args, vec![inner]);
        }
    }
}
