//! Size bounds checked before a definition reaches the grammar.
//!
//! Parsing, checking, evaluation and rendering all recurse over the tree, so
//! an unbounded definition can exhaust the stack. These bounds keep every
//! accepted tree shallow enough for a default thread stack.

/// Longest accepted definition, in code points.
pub const MAX_DEFINITION_LEN: usize = 100_000;

/// Deepest accepted nesting of brackets and prefix operators.
pub const MAX_NESTING: usize = 64;

/// Most operators a single definition may contain.
pub const MAX_OPERATORS: usize = 512;

/// Scan `input` for definitions that exceed the bounds above.
///
/// String literals and `//` comments are skipped. Every `-` counts as a
/// prefix operator, so the nesting bound is slightly conservative for
/// subtraction.
pub(crate) fn check(input: &str) -> Result<(), String> {
    let len = input.chars().count();
    if len > MAX_DEFINITION_LEN {
        return Err(format!(
            "definition is {len} code points long, limit is {MAX_DEFINITION_LEN}"
        ));
    }

    let mut brackets = 0_usize;
    let mut prefix_run = 0_usize;
    let mut operators = 0_usize;
    let mut chars = input.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let mut prefix = false;
        match c {
            '"' | '\'' => {
                while let Some((_, s)) = chars.next() {
                    if s == '\\' {
                        chars.next();
                    } else if s == c {
                        break;
                    }
                }
            }
            '/' if chars.peek().is_some_and(|&(_, n)| n == '/') => {
                for (_, s) in chars.by_ref() {
                    if s == '\n' {
                        break;
                    }
                }
            }
            '(' | '[' => {
                brackets += 1;
                if c == '[' {
                    operators += 1;
                }
            }
            ')' | ']' => brackets = brackets.saturating_sub(1),
            '!' | '-' => {
                prefix = true;
                prefix_run += 1;
                operators += 1;
                // `!=` is a relation, not a prefix.
                if c == '!' && chars.peek().is_some_and(|&(_, n)| n == '=') {
                    chars.next();
                    prefix = false;
                    prefix_run = 0;
                }
            }
            '&' | '|' | '=' | '<' | '>' => {
                // Two-character operators count once.
                if chars.peek().is_some_and(|&(_, n)| n == c || n == '=') {
                    chars.next();
                }
                operators += 1;
            }
            '+' | '*' | '/' | '%' | '?' | '.' => operators += 1,
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = offset;
                let mut end = offset + c.len_utf8();
                while let Some(&(i, n)) = chars.peek() {
                    if !(n.is_ascii_alphanumeric() || n == '_') {
                        break;
                    }
                    end = i + n.len_utf8();
                    chars.next();
                }
                if &input[start..end] == "in" {
                    operators += 1;
                }
            }
            c if c.is_whitespace() => prefix = prefix_run > 0,
            _ => {}
        }
        if !prefix {
            prefix_run = 0;
        }

        let nesting = brackets + prefix_run;
        if nesting > MAX_NESTING {
            return Err(format!(
                "nesting deeper than {MAX_NESTING} at offset {offset}"
            ));
        }
        if operators > MAX_OPERATORS {
            return Err(format!(
                "more than {MAX_OPERATORS} operators at offset {offset}"
            ));
        }
    }
    Ok(())
}
