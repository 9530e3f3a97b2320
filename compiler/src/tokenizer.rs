use crate::error::Location;
use crate::lexer::{scan, Lexeme, LexemeKind};
use crate::token::{
    BinaryFieldType, Decorator, Keyword, Operator, Reference, Symbol, Token, TokenKind,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

lazy_static! {
    static ref FIXED_CSTR: Regex = Regex::new(r"^C[0-9A-Fa-f]{3}$").unwrap();
}

/// Scan and tokenize source text. The returned stream always ends in an
/// `Eof` token.
pub fn tokenize(text: &str, file: &str) -> Vec<Token> {
    let lexemes = scan(text, file);
    let mut tokens = tokenize_lexemes(&lexemes);
    let location = match lexemes.last() {
        Some(last) => Location {
            column: last.location.column + last.text.chars().count(),
            ..last.location.clone()
        },
        None => Location {
            file: file.into(),
            line: 1,
            column: 1,
        },
    };
    tokens.push(Token::new(TokenKind::Eof, location));
    tokens
}

/// Classify a lexeme slice. Never fails: anything unrecognized becomes an
/// `Error` token and classification moves on by one lexeme.
pub fn tokenize_lexemes(lexemes: &[Lexeme]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < lexemes.len() {
        let (kind, consumed) = classify(lexemes, index);
        if let TokenKind::Error(text) = &kind {
            warn!(location = %lexemes[index].location, lexeme = %text, "unrecognized lexeme");
        }
        tokens.push(Token::new(kind, lexemes[index].location.clone()));
        index += consumed.max(1);
    }

    tokens
}

fn classify(lexemes: &[Lexeme], index: usize) -> (TokenKind, usize) {
    let lexeme = &lexemes[index];

    if lexeme.is_symbol("@") {
        return decorator(lexemes, index);
    }

    if lexeme.is_symbol("#") {
        return match reference(lexemes, index) {
            Some((r, consumed)) => (TokenKind::Reference(r), consumed),
            None => (TokenKind::Symbol(Symbol::Hash), 1),
        };
    }

    match lexeme.kind {
        LexemeKind::Identifier => identifier(lexemes, index),
        LexemeKind::Integer => (integer(&lexeme.text), 1),
        LexemeKind::Decimal => match lexeme.text.parse::<f64>() {
            Ok(value) => (TokenKind::Decimal(value), 1),
            Err(_) => (TokenKind::Error(lexeme.text.clone()), 1),
        },
        LexemeKind::String => (TokenKind::String(lexeme.text.clone()), 1),
        LexemeKind::Symbol => {
            if lexeme.text == "$" {
                if let Some(name) = lexemes.get(index + 1).filter(|l| l.is_identifier()) {
                    return (TokenKind::Variable(name.text.clone()), 2);
                }
            }
            if let Some(op) = Operator::from_symbol(&lexeme.text) {
                (TokenKind::Operator(op), 1)
            } else if let Some(symbol) = Symbol::from_symbol(&lexeme.text) {
                (TokenKind::Symbol(symbol), 1)
            } else {
                (TokenKind::Error(lexeme.text.clone()), 1)
            }
        }
    }
}

fn integer(text: &str) -> TokenKind {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => text.parse::<i64>(),
    };
    match parsed {
        Ok(value) => TokenKind::Integer(value),
        Err(_) => TokenKind::Error(text.to_string()),
    }
}

fn identifier(lexemes: &[Lexeme], index: usize) -> (TokenKind, usize) {
    let text = lexemes[index].text.as_str();

    if let Some(binary) = binary_type(lexemes, index) {
        return binary;
    }

    if let Some(keyword) = Keyword::from_word(text) {
        return (TokenKind::Keyword(keyword), 1);
    }

    match text {
        "true" => return (TokenKind::Boolean(true), 1),
        "false" => return (TokenKind::Boolean(false), 1),
        "is" => return (TokenKind::Operator(Operator::Is), 1),
        _ => {}
    }

    // a.b.c
    let mut path = vec![text.to_string()];
    let mut cursor = index + 1;
    while lexemes.get(cursor).map_or(false, |l| l.is_symbol("."))
        && lexemes.get(cursor + 1).map_or(false, |l| l.is_identifier())
    {
        path.push(lexemes[cursor + 1].text.clone());
        cursor += 2;
    }
    if path.len() > 1 {
        return (TokenKind::IdentifierPath(path), cursor - index);
    }

    (TokenKind::Identifier(text.to_string()), 1)
}

fn binary_type(lexemes: &[Lexeme], index: usize) -> Option<(TokenKind, usize)> {
    let text = lexemes[index].text.as_str();

    if let Some(binary) = BinaryFieldType::from_code(text) {
        return Some((TokenKind::BinaryType(binary), 1));
    }

    if FIXED_CSTR.is_match(text) {
        let width = u16::from_str_radix(&text[1..], 16).ok()?;
        return Some((TokenKind::BinaryType(BinaryFieldType::FixedCstr(width)), 1));
    }

    if text == "NESTED" || text == "BYTE_CODE" {
        let argument = match (lexemes.get(index + 1), lexemes.get(index + 2), lexemes.get(index + 3)) {
            (Some(open), Some(name), Some(close))
                if open.is_symbol("<") && name.is_identifier() && close.is_symbol(">") =>
            {
                name.text.clone()
            }
            _ => return Some((TokenKind::Error(text.to_string()), 1)),
        };
        let binary = if text == "NESTED" {
            BinaryFieldType::Nested(argument)
        } else {
            BinaryFieldType::ByteCode(argument)
        };
        return Some((TokenKind::BinaryType(binary), 4));
    }

    None
}

fn decorator(lexemes: &[Lexeme], index: usize) -> (TokenKind, usize) {
    let name = match lexemes.get(index + 1).filter(|l| l.is_identifier()) {
        Some(name) => name.text.as_str(),
        None => return (TokenKind::Error("@".to_string()), 1),
    };

    if !lexemes.get(index + 2).map_or(false, |l| l.is_symbol("(")) {
        return (TokenKind::Decorator(Decorator::from_name(name, Vec::new())), 2);
    }

    let mut depth = 0;
    for (offset, lexeme) in lexemes[index + 2..].iter().enumerate() {
        if lexeme.is_symbol("(") {
            depth += 1;
        } else if lexeme.is_symbol(")") {
            depth -= 1;
            if depth == 0 {
                let close = index + 2 + offset;
                let args = tokenize_lexemes(&lexemes[index + 3..close]);
                return (TokenKind::Decorator(Decorator::from_name(name, args)), close - index + 1);
            }
        }
    }

    (TokenKind::Error(format!("@{}", name)), 1)
}

fn reference_id(lexemes: &[Lexeme], index: usize) -> Option<(Reference, usize)> {
    let lexeme = lexemes.get(index)?;
    if lexeme.text == "auto" {
        return Some((Reference::auto(), 1));
    }
    if lexeme.is_symbol("-") {
        let next = lexemes.get(index + 1)?;
        if let (LexemeKind::Integer, TokenKind::Integer(id)) = (next.kind, integer(&next.text)) {
            return Some((Reference::new(-id), 2));
        }
        return None;
    }
    match (lexeme.kind, integer(&lexeme.text)) {
        (LexemeKind::Integer, TokenKind::Integer(id)) => Some((Reference::new(id), 1)),
        _ => None,
    }
}

/// Recognizes `#id`, `#-id`, `#Type.id`, `#Container.Type.id`,
/// `#Container.????.id`, the `auto` forms and `#?`. Returns the reference
/// and the number of lexemes it spans, including the hash.
fn reference(lexemes: &[Lexeme], index: usize) -> Option<(Reference, usize)> {
    let first = lexemes.get(index + 1)?;

    if first.is_symbol("?") {
        return Some((Reference::any(), 2));
    }

    if let Some((r, consumed)) = reference_id(lexemes, index + 1) {
        return Some((r, consumed + 1));
    }

    if !first.is_identifier() || !lexemes.get(index + 2)?.is_symbol(".") {
        return None;
    }

    // #Type.id
    if let Some((r, consumed)) = reference_id(lexemes, index + 3) {
        let r = Reference {
            type_name: Some(first.text.clone()),
            ..r
        };
        return Some((r, consumed + 3));
    }

    // #Container.Type.id / #Container.????.id
    let second = lexemes.get(index + 3)?;
    if !lexemes.get(index + 4)?.is_symbol(".") {
        return None;
    }
    let type_name = if second.is_symbol("????") {
        None
    } else if second.is_identifier() {
        Some(second.text.clone())
    } else {
        return None;
    };
    let (r, consumed) = reference_id(lexemes, index + 5)?;
    let r = Reference {
        type_name,
        container: Some(first.text.clone()),
        ..r
    };
    Some((r, consumed + 5))
}
