//! Splits a command line into argv tokens plus an optional output
//! redirection.
//!
//! Quoting follows the usual shell rules: single quotes are fully literal,
//! double quotes group and still expand `$NAME`, and bare `$NAME` expands
//! from the environment. Unset variables expand to the empty string. `>` and
//! `>>` act as redirection operators only when they appear as their own
//! unquoted token.

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Chars;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Overwrite,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub argv: Vec<String>,
    pub redirect: Option<Redirect>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("syntax error: unterminated quote")]
    UnterminatedQuote,

    #[error("syntax error near unexpected token `{0}`")]
    MissingRedirectTarget(String),
}

/// A scanned token plus whether any part of it was quoted. Quoted `>` must
/// not be treated as a redirection operator.
#[derive(Debug, PartialEq, Eq)]
struct RawToken {
    text: String,
    quoted: bool,
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Consumes a `$NAME` expansion from the character stream, the `$` already
/// eaten. A `$` not followed by a valid name start stays literal.
fn expand_variable(chars: &mut Peekable<Chars>, environment: &BTreeMap<String, String>) -> String {
    match chars.peek() {
        Some(&c) if is_name_start(c) => {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if is_name_char(c) {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            environment.get(&name).cloned().unwrap_or_default()
        }
        _ => "$".to_owned(),
    }
}

fn scan(line: &str, environment: &BTreeMap<String, String>) -> Result<Vec<RawToken>, ParseError> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut quoted = false;
    let mut in_token = false;

    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(RawToken {
                        text: std::mem::take(&mut text),
                        quoted,
                    });
                    quoted = false;
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                quoted = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => text.push(inner),
                        None => return Err(ParseError::UnterminatedQuote),
                    }
                }
            }
            '"' => {
                in_token = true;
                quoted = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('$') => text.push_str(&expand_variable(&mut chars, environment)),
                        Some(inner) => text.push(inner),
                        None => return Err(ParseError::UnterminatedQuote),
                    }
                }
            }
            '$' => {
                let expanded = expand_variable(&mut chars, environment);
                // A bare expansion that produced nothing does not create a
                // word on its own, matching shell word-splitting.
                if !expanded.is_empty() {
                    in_token = true;
                    text.push_str(&expanded);
                }
            }
            other => {
                in_token = true;
                text.push(other);
            }
        }
    }

    if in_token {
        tokens.push(RawToken { text, quoted });
    }

    Ok(tokens)
}

/// Tokenizes a command line, applying quote handling and variable
/// expansion. Redirection operators come back as plain tokens.
pub fn tokenize(
    line: &str,
    environment: &BTreeMap<String, String>,
) -> Result<Vec<String>, ParseError> {
    Ok(scan(line, environment)?
        .into_iter()
        .map(|token| token.text)
        .collect())
}

/// Tokenizes a command line and splits off the trailing redirection, if any.
/// When several redirections appear, the last one wins.
pub fn parse(
    line: &str,
    environment: &BTreeMap<String, String>,
) -> Result<ParsedLine, ParseError> {
    let mut argv = Vec::new();
    let mut redirect = None;

    let mut tokens = scan(line, environment)?.into_iter();
    while let Some(token) = tokens.next() {
        let kind = match (token.quoted, token.text.as_str()) {
            (false, ">") => RedirectKind::Overwrite,
            (false, ">>") => RedirectKind::Append,
            _ => {
                argv.push(token.text);
                continue;
            }
        };

        match tokens.next() {
            Some(target) => {
                redirect = Some(Redirect {
                    kind,
                    target: target.text,
                })
            }
            None => return Err(ParseError::MissingRedirectTarget(token.text)),
        }
    }

    Ok(ParsedLine { argv, redirect })
}
