// src/command.rs

//! Splitting a shell-style command string into an argument vector.
//!
//! Rules:
//! - arguments are separated by unquoted, unescaped spaces; empty arguments
//!   are dropped
//! - `"..."` and `'...'` delimit literal runs (the other quote character is
//!   literal inside); adjacent runs and bare text concatenate
//! - `\` escapes the next character. The backslash itself is dropped when it
//!   escapes a quote or a space and kept otherwise, so `C:\dir` survives

/// Tokenize `command` into a fresh vector.
pub fn extract(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    extend(&mut args, command);
    args
}

/// Tokenize `command`, appending the arguments to `args`.
pub fn extend(args: &mut Vec<String>, command: &str) {
    let mut current = String::new();
    let mut in_double = false;
    let mut in_single = false;
    let mut escaped = false;

    for c in command.chars() {
        if escaped {
            escaped = false;
            if !matches!(c, '"' | '\'' | ' ') {
                current.push('\\');
            }
            current.push(c);
            continue;
        }

        if c == '\\' {
            escaped = true;
            continue;
        }

        if in_double || in_single {
            match c {
                '"' if in_double => in_double = false,
                '\'' if in_single => in_single = false,
                _ => current.push(c),
            }
            continue;
        }

        match c {
            ' ' => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            '"' => in_double = true,
            '\'' => in_single = true,
            _ => current.push(c),
        }
    }

    // A dangling backslash has nothing to escape; keep it.
    if escaped {
        current.push('\\');
    }

    if !current.is_empty() {
        args.push(current);
    }
}
