//! Filter string tokenizer and parser.
//!
//! Tokens are recognised by testing each rule against the trimmed remainder
//! in a fixed priority order. The first rule that matches wins, which matters
//! because `!` prefixes both negated leaves and negated sub-blocks.
//!
//! | Rule       | Syntax            |
//! |------------|-------------------|
//! | title      | `[[Title]]`       |
//! | tag        | `#tag`            |
//! | field      | `[field=value]`, `[field!=value]` |
//! | space      | `@space`          |
//! | modifier   | `+modifier`       |
//! | text       | `"substring"`     |
//! | not        | `!` before any other token |
//! | sub-block  | `( ... )`         |
//! | or         | `,`               |
//!
//! Adjacent tokens are AND'ed. Parsing stops at the first remainder no rule
//! recognises; if nothing was consumed by then the filter is empty.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ast::{Ast, Leaf};
use crate::error::ParseError;

static TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[\[([^\]]+)\]\]").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#([^\s,]+)").unwrap());
static FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[([^!=\]]+)(!?)=([^\]]+)\]").unwrap());
static SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^@([^\s,]+)").unwrap());
static MODIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+([^\s,]+)").unwrap());
static TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^"([^"]+)""#).unwrap());
static NOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^!\W").unwrap());

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Leaf(Leaf),
    Not,
    SubBlock(&'a str),
    Or,
}

/// Recognise the next token, returning it with the unconsumed remainder.
fn next_token(input: &str) -> Result<Option<(Token<'_>, &str)>, ParseError> {
    let text = input.trim();
    if text.is_empty() {
        return Ok(None);
    }

    if let Some(caps) = TITLE.captures(text) {
        let rest = &text[caps[0].len()..];
        return Ok(Some((Token::Leaf(Leaf::Title(caps[1].to_string())), rest)));
    }
    if let Some(caps) = TAG.captures(text) {
        let rest = &text[caps[0].len()..];
        return Ok(Some((Token::Leaf(Leaf::Tag(caps[1].to_string())), rest)));
    }
    if let Some(caps) = FIELD.captures(text) {
        let rest = &text[caps[0].len()..];
        let leaf = Leaf::Field {
            field: caps[1].to_string(),
            value: caps[3].to_string(),
            negated: &caps[2] == "!",
        };
        return Ok(Some((Token::Leaf(leaf), rest)));
    }
    if let Some(caps) = SPACE.captures(text) {
        let rest = &text[caps[0].len()..];
        return Ok(Some((Token::Leaf(Leaf::Space(caps[1].to_string())), rest)));
    }
    if let Some(caps) = MODIFIER.captures(text) {
        let rest = &text[caps[0].len()..];
        return Ok(Some((Token::Leaf(Leaf::Modifier(caps[1].to_string())), rest)));
    }
    if let Some(caps) = TEXT.captures(text) {
        let rest = &text[caps[0].len()..];
        return Ok(Some((Token::Leaf(Leaf::Text(caps[1].to_string())), rest)));
    }
    if NOT.is_match(text) {
        return Ok(Some((Token::Not, &text[1..])));
    }
    if text.starts_with('(') {
        let (inner, rest) = split_block(text)?;
        return Ok(Some((Token::SubBlock(inner), rest)));
    }
    if let Some(rest) = text.strip_prefix(',') {
        return Ok(Some((Token::Or, rest)));
    }
    Ok(None)
}

/// Split `(inner) rest` at the bracket that closes the opening one.
fn split_block(text: &str) -> Result<(&str, &str), ParseError> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&text[1..i], &text[i + 1..]));
                }
            }
            _ => {}
        }
    }
    Err(ParseError::UnmatchedBrackets)
}

/// Turn a non-`Or` token into a node, consuming any operand it needs.
fn consume<'a>(token: Token<'a>, rest: &'a str) -> Result<(Ast, &'a str), ParseError> {
    match token {
        Token::Leaf(leaf) => Ok((Ast::Match(leaf), rest)),
        Token::SubBlock(inner) => Ok((parse(inner)?, rest)),
        Token::Not => match next_token(rest)? {
            Some((Token::Or, _)) | None => Err(ParseError::MissingOperand(rest.trim().to_string())),
            Some((operand, remaining)) => {
                let (node, remaining) = consume(operand, remaining)?;
                Ok((node.negate(), remaining))
            }
        },
        Token::Or => Err(ParseError::MissingOperand(rest.trim().to_string())),
    }
}

fn collapse(mut nodes: Vec<Ast>, wrap: fn(Vec<Ast>) -> Ast) -> Option<Ast> {
    match nodes.len() {
        0 => None,
        1 => nodes.pop(),
        _ => Some(wrap(nodes)),
    }
}

/// Parse a filter string into an AST.
///
/// The result is an `Or` of `And` blocks, with single-child blocks collapsed
/// into the child. Empty OR groups (`#a,,#b`) are skipped.
pub fn parse(text: &str) -> Result<Ast, ParseError> {
    let mut groups = Vec::new();
    let mut block = Vec::new();
    let mut rest = text;

    while let Some((token, remaining)) = next_token(rest)? {
        if token == Token::Or {
            groups.extend(collapse(std::mem::take(&mut block), Ast::And));
            rest = remaining;
            continue;
        }
        let (node, remaining) = consume(token, remaining)?;
        block.push(node);
        rest = remaining;
    }
    groups.extend(collapse(block, Ast::And));

    collapse(groups, Ast::Or).ok_or(ParseError::EmptyFilter)
}
