use crate::error::Location;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

lazy_static! {
    pub static ref LEXEME_REGEX: Regex = Regex::new(concat!(
        r#"(/\*[\s\S]*?\*/|//[^\n]*|\s+"#,
        r#"|"(?:[^"\\\n]|\\.)*""#,
        r#"|0[xX][0-9A-Fa-f]+|\d+\.\d+|\d+"#,
        r#"|[A-Za-z_][A-Za-z0-9_]*"#,
        r#"|\?\?\?\?|<<|>>|==|!=|<=|>=|&&|\|\||\+\+|--|\*\*"#,
        r#"|.)"#,
    ))
    .unwrap();
    pub static ref SKIPPED_RX: Regex = Regex::new(r"^(/\*[\s\S]*\*/|//.*|\s+)$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexemeKind {
    Identifier,
    Integer,
    Decimal,
    String,
    Symbol,
}

/// One raw unit of source text. `text` holds the unescaped contents for
/// string lexemes and the literal source for everything else.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub kind:     LexemeKind,
    pub text:     String,
    pub location: Location,
}

impl Lexeme {
    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == LexemeKind::Symbol && self.text == symbol
    }

    pub fn is_identifier(&self) -> bool {
        self.kind == LexemeKind::Identifier
    }
}

fn classify(part: &str) -> LexemeKind {
    let first = part.chars().next().unwrap_or(' ');
    if first == '"' && part.len() >= 2 && part.ends_with('"') {
        LexemeKind::String
    } else if first.is_ascii_digit() {
        if part.contains('.') {
            LexemeKind::Decimal
        } else {
            LexemeKind::Integer
        }
    } else if first.is_ascii_alphabetic() || first == '_' {
        LexemeKind::Identifier
    } else {
        LexemeKind::Symbol
    }
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Scan source text into lexemes. Scanning never fails: any character that
/// no other rule accepts becomes a single-character symbol lexeme, which the
/// tokenizer turns into an error token.
pub fn scan(text: &str, file: &str) -> Vec<Lexeme> {
    let file: Arc<str> = Arc::from(file);
    let mut lexemes = Vec::new();
    let mut line = 1;
    let mut column = 1;

    for mat in LEXEME_REGEX.find_iter(text) {
        let part = mat.as_str();

        if !SKIPPED_RX.is_match(part) {
            let kind = classify(part);
            let text = match kind {
                LexemeKind::String => unescape(&part[1..part.len() - 1]),
                _ => part.to_string(),
            };
            lexemes.push(Lexeme {
                kind,
                text,
                location: Location::new(&file, line, column),
            });
        }

        // Update line/column
        let newline_count = part.matches('\n').count();
        if newline_count > 0 {
            line += newline_count;
            if let Some(last_line_part) = part.split('\n').last() {
                column = last_line_part.chars().count() + 1;
            }
        } else {
            column += part.chars().count();
        }
    }

    lexemes
}
