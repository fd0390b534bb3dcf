use crate::error::LexError;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FUNCTION_REGEX: Regex =
        Regex::new(r"^=(IF|SUM|MIN|MAX|AVG|CONCAT|DEBUG|COPY)").unwrap();
    static ref SIGNED_NUMBER_REGEX: Regex = Regex::new(r"^[+-]?[0-9]+(\.[0-9]+)?").unwrap();
    static ref NUMBER_REGEX: Regex = Regex::new(r"^[0-9]+(\.[0-9]+)?").unwrap();
    static ref OPERATOR_REGEX: Regex = Regex::new(r"^[+\-*/<>=&|:]").unwrap();
    static ref REFERENCE_REGEX: Regex =
        Regex::new(r"^\$[A-Z]+[0-9]+(:\$[A-Z]+[0-9]+)?").unwrap();
    static ref TEXT_REGEX: Regex = Regex::new(r"^[^\s(),]+").unwrap();
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"^\s+").unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// `=` immediately followed by a known function name, e.g. `=SUM`.
    Function,
    Number,
    Operator,
    LParen,
    RParen,
    Reference,
    /// Two references joined by `:`, e.g. `$A1:$B3`.
    Range,
    Comma,
    Text,
}

impl TokenKind {
    /// Whether a token of this kind ends an operand, so that a following
    /// `+` or `-` must be read as an operator rather than a sign.
    fn ends_operand(self) -> bool {
        matches!(
            self,
            TokenKind::Number
                | TokenKind::Reference
                | TokenKind::Range
                | TokenKind::Text
                | TokenKind::RParen
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Byte offset of the token in the tokenized input.
    pub pos: usize,
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer {
            input,
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn sign_allowed(&self) -> bool {
        self.tokens
            .last()
            .map_or(true, |token| !token.kind.ends_operand())
    }

    fn function_len(&self, rest: &str) -> Option<usize> {
        let len = FUNCTION_REGEX.find(rest)?.end();
        // `=SUMX` is not a call to SUM
        match rest[len..].chars().next() {
            Some(c) if c.is_ascii_alphanumeric() => None,
            _ => Some(len),
        }
    }

    fn next_token(&self, rest: &str) -> Option<(TokenKind, usize)> {
        if let Some(len) = self.function_len(rest) {
            return Some((TokenKind::Function, len));
        }

        let number = if self.sign_allowed() {
            &*SIGNED_NUMBER_REGEX
        } else {
            &*NUMBER_REGEX
        };
        if let Some(m) = number.find(rest) {
            return Some((TokenKind::Number, m.end()));
        }

        if let Some(m) = OPERATOR_REGEX.find(rest) {
            return Some((TokenKind::Operator, m.end()));
        }
        if rest.starts_with('(') {
            return Some((TokenKind::LParen, 1));
        }
        if rest.starts_with(')') {
            return Some((TokenKind::RParen, 1));
        }
        if let Some(caps) = REFERENCE_REGEX.captures(rest) {
            let kind = if caps.get(1).is_some() {
                TokenKind::Range
            } else {
                TokenKind::Reference
            };
            return Some((kind, caps[0].len()));
        }
        if rest.starts_with(',') {
            return Some((TokenKind::Comma, 1));
        }
        TEXT_REGEX
            .find(rest)
            .map(|m| (TokenKind::Text, m.end()))
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        while self.pos < self.input.len() {
            let rest = &self.input[self.pos..];

            if let Some(m) = WHITESPACE_REGEX.find(rest) {
                self.pos += m.end();
                continue;
            }

            let (kind, len) = self.next_token(rest).ok_or_else(|| LexError {
                index: self.pos,
                input: self.input.to_string(),
            })?;

            self.tokens.push(Token {
                kind,
                text: rest[..len].to_string(),
                pos: self.pos,
            });
            self.pos += len;
        }

        Ok(self.tokens)
    }
}

/// Splits a formula into tokens, skipping whitespace.
///
/// Patterns are tried in a fixed priority order at each position: function
/// keyword, number, operator, parentheses, reference or range, comma, and
/// finally any other run of characters that is not whitespace, a
/// parenthesis or a comma.
pub fn tokenize(formula: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(formula).run()
}
