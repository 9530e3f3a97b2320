use crate::error::{KdlError, Location, ReasonCode};
use crate::token::{Keyword, Operator, Symbol, Token, TokenKind};

/// Cursor over a tokenized file. Reading past the end keeps returning the
/// trailing `Eof` token.
pub struct TokenStream {
    tokens: Vec<Token>,
    index:  usize,
}

impl TokenStream {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map_or(true, |t| t.kind != TokenKind::Eof) {
            let location = tokens
                .last()
                .map(|t| t.location.clone())
                .unwrap_or_else(Location::builtin);
            tokens.push(Token::new(TokenKind::Eof, location));
        }
        TokenStream { tokens, index: 0 }
    }

    pub fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    pub fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.index + offset).min(last)]
    }

    pub fn location(&self) -> Location {
        self.peek().location.clone()
    }

    pub fn finished(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    pub fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    pub fn eat_symbol(&mut self, symbol: Symbol) -> bool {
        self.eat(|t| t.is_symbol(symbol))
    }

    pub fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        self.eat(|t| t.is_keyword(keyword))
    }

    pub fn eat_operator(&mut self, op: Operator) -> bool {
        self.eat(|t| t.is_operator(op))
    }

    fn eat(&mut self, test: impl Fn(&Token) -> bool) -> bool {
        if test(self.peek()) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Error for the current token, given a description of what was
    /// expected instead.
    pub fn unexpected(&self, expected: &str) -> KdlError {
        let token = self.peek();
        match &token.kind {
            TokenKind::Eof => KdlError::compile(
                ReasonCode::UnexpectedEndOfInput,
                format!("expected {} but reached the end of the file", expected),
                &token.location,
            ),
            TokenKind::Error(text) => KdlError::compile(
                ReasonCode::UnrecognizedLexeme,
                format!("unrecognized input \"{}\"", text),
                &token.location,
            ),
            TokenKind::Symbol(Symbol::Hash) => KdlError::compile(
                ReasonCode::MalformedReference,
                "malformed reference literal",
                &token.location,
            ),
            _ => KdlError::compile(
                ReasonCode::UnexpectedToken,
                format!("expected {} but found \"{}\"", expected, token),
                &token.location,
            ),
        }
    }

    pub fn expect_symbol(&mut self, symbol: Symbol) -> Result<Token, KdlError> {
        if self.peek().is_symbol(symbol) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("\"{}\"", symbol.as_str())))
        }
    }

    pub fn expect_keyword(&mut self, keyword: Keyword) -> Result<Token, KdlError> {
        if self.peek().is_keyword(keyword) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("\"{}\"", keyword.as_str())))
        }
    }

    pub fn expect_operator(&mut self, op: Operator) -> Result<Token, KdlError> {
        if self.peek().is_operator(op) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("\"{}\"", op.as_str())))
        }
    }

    pub fn expect_identifier(&mut self) -> Result<(String, Location), KdlError> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                let token = self.advance();
                Ok((name, token.location))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    pub fn expect_string(&mut self) -> Result<(String, Location), KdlError> {
        match &self.peek().kind {
            TokenKind::String(text) => {
                let text = text.clone();
                let token = self.advance();
                Ok((text, token.location))
            }
            _ => Err(self.unexpected("string")),
        }
    }

    pub fn expect_integer(&mut self) -> Result<(i64, Location), KdlError> {
        match &self.peek().kind {
            TokenKind::Integer(value) => {
                let value = *value;
                let token = self.advance();
                Ok((value, token.location))
            }
            _ => Err(self.unexpected("integer")),
        }
    }

    /// Collects the tokens of one expression: everything up to the first
    /// token for which `is_end` holds outside any parentheses, brackets or
    /// braces. The terminator itself is left in the stream.
    pub fn take_expression(&mut self, is_end: impl Fn(&Token) -> bool) -> Result<Vec<Token>, KdlError> {
        let mut depth = 0usize;
        let mut out = Vec::new();

        loop {
            let token = self.peek();
            if token.kind == TokenKind::Eof {
                return Err(self.unexpected("end of expression"));
            }
            if depth == 0 && is_end(token) {
                break;
            }
            match &token.kind {
                TokenKind::Symbol(Symbol::LParen | Symbol::LBracket | Symbol::LBrace) => depth += 1,
                TokenKind::Symbol(Symbol::RParen | Symbol::RBracket | Symbol::RBrace) => {
                    if depth == 0 {
                        return Err(self.unexpected("expression"));
                    }
                    depth -= 1;
                }
                _ => {}
            }
            out.push(self.advance());
        }

        if out.is_empty() {
            return Err(self.unexpected("expression"));
        }
        Ok(out)
    }

}
