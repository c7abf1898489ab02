//! Splits a statement into words, quoted strings and single-character symbols.

use crate::types::{KeelError, Result};

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Token {
    Word(String),
    Quoted(String),
    Symbol(char),
    End,
}

fn is_symbol(c: char) -> bool {
    matches!(c, '>' | '<' | '=' | '*' | ',' | '(' | ')')
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub(crate) struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
    /// Start of the token returned by the last `peek`.
    start: usize,
    peeked: Option<Token>,
}

impl<'a> Tokenizer<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            start: 0,
            peeked: None,
        }
    }

    pub(crate) fn peek(&mut self) -> Result<&Token> {
        if self.peeked.is_none() {
            let token = self.next_token()?;
            self.peeked = Some(token);
        }
        Ok(self.peeked.get_or_insert(Token::End))
    }

    /// Consumes the peeked token.
    pub(crate) fn pop(&mut self) {
        self.peeked = None;
    }

    /// `InvalidCommand` with a `<< ` marker at the current token.
    pub(crate) fn error(&self) -> KeelError {
        let at = self.start.min(self.src.len());
        KeelError::InvalidCommand(format!("{}<< {}", &self.src[..at], &self.src[at..]))
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn next_token(&mut self) -> Result<Token> {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
        self.start = self.pos;
        let mut chars = trimmed.chars();
        let Some(first) = chars.next() else {
            return Ok(Token::End);
        };
        if is_symbol(first) {
            self.pos += 1;
            return Ok(Token::Symbol(first));
        }
        if first == '\'' || first == '"' {
            let body = &trimmed[1..];
            let Some(len) = body.find(first) else {
                return Err(self.error());
            };
            self.pos += len + 2;
            return Ok(Token::Quoted(body[..len].to_string()));
        }
        let negative = first == '-' && chars.next().is_some_and(|c| c.is_ascii_digit());
        if is_word_char(first) || negative {
            let len = 1 + trimmed[1..]
                .find(|c: char| !is_word_char(c))
                .unwrap_or(trimmed.len() - 1);
            self.pos += len;
            return Ok(Token::Word(trimmed[..len].to_string()));
        }
        Err(self.error())
    }
}
