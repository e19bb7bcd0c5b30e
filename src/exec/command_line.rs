// src/exec/command_line.rs

//! Splitting configured command strings into argument vectors.
//!
//! Supports single quotes (literal), double quotes (backslash escapes) and
//! backslash escapes outside quotes. No variable expansion or globbing.

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    SingleQuote,
    DoubleQuote,
}

/// Split `command` into arguments.
pub fn parse(command: &str) -> Result<Vec<String>, String> {
    let invalid = |reason: &str| format!("Command `{command}` is invalid: {reason}");

    let mut arguments = Vec::new();
    let mut current = String::new();
    let mut mode = Mode::Normal;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match (mode, c) {
            (Mode::Normal, '\\') | (Mode::DoubleQuote, '\\') => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => {
                    return Err(invalid(
                        "it ends with a backslash (backslashes always escape the following character, for a literal backslash, use '\\\\')",
                    ));
                }
            },
            (Mode::Normal, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    arguments.push(std::mem::take(&mut current));
                }
            }
            (Mode::Normal, '\'') => mode = Mode::SingleQuote,
            (Mode::Normal, '"') => mode = Mode::DoubleQuote,
            (Mode::SingleQuote, '\'') | (Mode::DoubleQuote, '"') => mode = Mode::Normal,
            (_, c) => current.push(c),
        }
    }

    match mode {
        Mode::SingleQuote => Err(invalid("it contains an unbalanced single quote")),
        Mode::DoubleQuote => Err(invalid("it contains an unbalanced double quote")),
        Mode::Normal => {
            if !current.is_empty() {
                arguments.push(current);
            }
            Ok(arguments)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(parse("  echo  hello\tworld ").unwrap(), ["echo", "hello", "world"]);
    }

    #[test]
    fn quotes_group_words() {
        assert_eq!(
            parse(r#"sh -c 'echo "hi there"' "a b""#).unwrap(),
            ["sh", "-c", "echo \"hi there\"", "a b"]
        );
    }

    #[test]
    fn backslashes_escape_outside_single_quotes() {
        assert_eq!(parse(r#"a\ b "c\"d" 'e\f'"#).unwrap(), ["a b", "c\"d", "e\\f"]);
    }

    #[test]
    fn unbalanced_quotes_and_trailing_backslash_are_rejected() {
        assert!(parse("echo 'oops").unwrap_err().contains("unbalanced single quote"));
        assert!(parse("echo \"oops").unwrap_err().contains("unbalanced double quote"));
        assert!(parse("echo oops\\").unwrap_err().contains("ends with a backslash"));
    }
}
