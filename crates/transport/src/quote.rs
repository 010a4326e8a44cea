//! POSIX shell quoting for arguments emitted to a remote shell.
//!
//! Remote commands travel to the other side as a single shell string, so
//! every argument that could be misinterpreted by the shell is wrapped in
//! single quotes, with embedded single quotes escaped by the standard
//! `'\''` dance.

use std::borrow::Cow;

/// Check whether a shell argument needs quoting.
///
/// Returns `true` if the argument is empty or contains characters a POSIX
/// shell would interpret.
///
/// # Examples
///
/// ```
/// use cowsync_transport::needs_quoting;
///
/// assert!(!needs_quoting("simple"));
/// assert!(needs_quoting("has space"));
/// assert!(needs_quoting("has$dollar"));
/// assert!(needs_quoting("has'quote"));
/// ```
#[must_use]
pub fn needs_quoting(arg: &str) -> bool {
    if arg.is_empty() {
        return true;
    }

    const SPECIAL_CHARS: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    arg.chars().any(|c| SPECIAL_CHARS.contains(&c))
}

/// Quote a shell argument if necessary.
///
/// Returns the argument unchanged when it is already shell-safe, otherwise
/// a single-quoted form in which embedded single quotes are escaped.
///
/// # Examples
///
/// ```
/// use cowsync_transport::shell_quote;
///
/// assert_eq!(shell_quote("simple"), "simple");
/// assert_eq!(shell_quote("has space"), "'has space'");
/// assert_eq!(shell_quote("has'quote"), "'has'\\''quote'");
/// ```
#[must_use]
pub fn shell_quote(arg: &str) -> Cow<'_, str> {
    if !needs_quoting(arg) {
        return Cow::Borrowed(arg);
    }

    let quoted = arg.replace('\'', r"'\''");
    Cow::Owned(format!("'{quoted}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_pass_through() {
        assert!(!needs_quoting("simple"));
        assert!(!needs_quoting("simple_file.txt"));
        assert!(!needs_quoting("file123"));
        assert_eq!(shell_quote("simple"), "simple");
    }

    #[test]
    fn empty_argument_is_quoted() {
        assert!(needs_quoting(""));
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn whitespace_is_quoted() {
        assert_eq!(shell_quote("has space"), "'has space'");
        assert_eq!(shell_quote("two  spaces"), "'two  spaces'");
        assert_eq!(shell_quote("tab\there"), "'tab\there'");
    }

    #[test]
    fn metacharacters_are_quoted() {
        for arg in [
            "has$dollar",
            "has`backtick",
            "has|pipe",
            "has&amp",
            "has;semi",
            "has*glob",
            "has?glob",
            "has<redir",
            "has>redir",
            "has(paren",
            "has{brace",
            "has[bracket",
            "has~tilde",
            "has#hash",
        ] {
            assert!(needs_quoting(arg), "expected quoting for {arg}");
            assert_eq!(shell_quote(arg), format!("'{arg}'"));
        }
    }

    #[test]
    fn single_quotes_are_escaped() {
        assert_eq!(shell_quote("has'quote"), "'has'\\''quote'");
        assert_eq!(shell_quote("it's won't"), "'it'\\''s won'\\''t'");
    }

    #[test]
    fn mixed_metacharacters_round_trip_shape() {
        // The exact string from the quoting contract: "a b$c'd"
        assert_eq!(shell_quote("a b$c'd"), "'a b$c'\\''d'");
    }
}
