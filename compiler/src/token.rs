//! The tagged token used both by the parser and, as a runtime value, by the
//! expression interpreter.
//!
//! Operators are defined per concrete variant pair. Arithmetic between an
//! integer and a reference (or two references) only ever changes the numeric
//! id: the reference operand keeps its type name, type code and container,
//! and when both operands are references the left one wins.

use crate::error::{KdlError, Location, ReasonCode};
use kdl_format::TypeCode;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Type,
    Declare,
    New,
    Scene,
    Dialog,
    Import,
    Field,
    Template,
    Repeatable,
    As,
    Constructor,
    Default,
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "type"        => Keyword::Type,
            "declare"     => Keyword::Declare,
            "new"         => Keyword::New,
            "scene"       => Keyword::Scene,
            "dialog"      => Keyword::Dialog,
            "import"      => Keyword::Import,
            "field"       => Keyword::Field,
            "template"    => Keyword::Template,
            "repeatable"  => Keyword::Repeatable,
            "as"          => Keyword::As,
            "constructor" => Keyword::Constructor,
            "default"     => Keyword::Default,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Type        => "type",
            Keyword::Declare     => "declare",
            Keyword::New         => "new",
            Keyword::Scene       => "scene",
            Keyword::Dialog      => "dialog",
            Keyword::Import      => "import",
            Keyword::Field       => "field",
            Keyword::Template    => "template",
            Keyword::Repeatable  => "repeatable",
            Keyword::As          => "as",
            Keyword::Constructor => "constructor",
            Keyword::Default     => "default",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Exponent,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    ShiftLeft,
    ShiftRight,
    LogicalAnd,
    LogicalOr,
    Not,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Increment,
    Decrement,
    Is,
}

impl Operator {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+"  => Operator::Plus,
            "-"  => Operator::Minus,
            "*"  => Operator::Multiply,
            "/"  => Operator::Divide,
            "%"  => Operator::Modulo,
            "**" => Operator::Exponent,
            "&"  => Operator::BitAnd,
            "|"  => Operator::BitOr,
            "^"  => Operator::BitXor,
            "~"  => Operator::BitNot,
            "<<" => Operator::ShiftLeft,
            ">>" => Operator::ShiftRight,
            "&&" => Operator::LogicalAnd,
            "||" => Operator::LogicalOr,
            "!"  => Operator::Not,
            "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            "<"  => Operator::Less,
            ">"  => Operator::Greater,
            "<=" => Operator::LessEqual,
            ">=" => Operator::GreaterEqual,
            "++" => Operator::Increment,
            "--" => Operator::Decrement,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Plus         => "+",
            Operator::Minus        => "-",
            Operator::Multiply     => "*",
            Operator::Divide       => "/",
            Operator::Modulo       => "%",
            Operator::Exponent     => "**",
            Operator::BitAnd       => "&",
            Operator::BitOr        => "|",
            Operator::BitXor       => "^",
            Operator::BitNot       => "~",
            Operator::ShiftLeft    => "<<",
            Operator::ShiftRight   => ">>",
            Operator::LogicalAnd   => "&&",
            Operator::LogicalOr    => "||",
            Operator::Not          => "!",
            Operator::Equal        => "==",
            Operator::NotEqual     => "!=",
            Operator::Less         => "<",
            Operator::Greater      => ">",
            Operator::LessEqual    => "<=",
            Operator::GreaterEqual => ">=",
            Operator::Increment    => "++",
            Operator::Decrement    => "--",
            Operator::Is           => "is",
        }
    }

    /// Binding power of the operator in infix position, or `None` for
    /// operators that are only valid as prefix/postfix.
    pub fn precedence(self) -> Option<u8> {
        Some(match self {
            Operator::LogicalOr => 1,
            Operator::LogicalAnd => 2,
            Operator::BitOr => 3,
            Operator::BitXor => 4,
            Operator::BitAnd => 5,
            Operator::Equal | Operator::NotEqual | Operator::Is => 6,
            Operator::Less | Operator::Greater | Operator::LessEqual | Operator::GreaterEqual => 7,
            Operator::ShiftLeft | Operator::ShiftRight => 8,
            Operator::Plus | Operator::Minus => 9,
            Operator::Multiply | Operator::Divide | Operator::Modulo => 10,
            Operator::Exponent => 11,
            Operator::BitNot | Operator::Not | Operator::Increment | Operator::Decrement => {
                return None
            }
        })
    }

    pub fn is_right_associative(self) -> bool {
        matches!(self, Operator::Exponent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Assign,
    Dot,
    Hash,
    At,
    Dollar,
}

impl Symbol {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "(" => Symbol::LParen,
            ")" => Symbol::RParen,
            "{" => Symbol::LBrace,
            "}" => Symbol::RBrace,
            "[" => Symbol::LBracket,
            "]" => Symbol::RBracket,
            "," => Symbol::Comma,
            ";" => Symbol::Semicolon,
            ":" => Symbol::Colon,
            "=" => Symbol::Assign,
            "." => Symbol::Dot,
            "#" => Symbol::Hash,
            "@" => Symbol::At,
            "$" => Symbol::Dollar,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Symbol::LParen    => "(",
            Symbol::RParen    => ")",
            Symbol::LBrace    => "{",
            Symbol::RBrace    => "}",
            Symbol::LBracket  => "[",
            Symbol::RBracket  => "]",
            Symbol::Comma     => ",",
            Symbol::Semicolon => ";",
            Symbol::Colon     => ":",
            Symbol::Assign    => "=",
            Symbol::Dot       => ".",
            Symbol::Hash      => "#",
            Symbol::At        => "@",
            Symbol::Dollar    => "$",
        }
    }
}

/// Decorators are resolved to a closed set when tokenizing.
#[derive(Debug, Clone, PartialEq)]
pub enum Decorator {
    Builtin,
    Synthesize,
    Deprecated,
    NoDeclaration,
    Api(Vec<Token>),
    Example(Vec<Token>),
    Condition(Vec<Token>),
    Unknown(String),
}

impl Decorator {
    pub fn from_name(name: &str, args: Vec<Token>) -> Self {
        match name {
            "builtin"        => Decorator::Builtin,
            "synthesize"     => Decorator::Synthesize,
            "deprecated"     => Decorator::Deprecated,
            "no_declaration" => Decorator::NoDeclaration,
            "api"            => Decorator::Api(args),
            "example"        => Decorator::Example(args),
            "condition"      => Decorator::Condition(args),
            other            => Decorator::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Decorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let with_args = |f: &mut fmt::Formatter<'_>, name: &str, args: &[Token]| {
            let args: Vec<String> = args.iter().map(|t| t.to_string()).collect();
            write!(f, "@{}({})", name, args.join(" "))
        };
        match self {
            Decorator::Builtin       => write!(f, "@builtin"),
            Decorator::Synthesize    => write!(f, "@synthesize"),
            Decorator::Deprecated    => write!(f, "@deprecated"),
            Decorator::NoDeclaration => write!(f, "@no_declaration"),
            Decorator::Api(args)       => with_args(f, "api", args),
            Decorator::Example(args)   => with_args(f, "example", args),
            Decorator::Condition(args) => with_args(f, "condition", args),
            Decorator::Unknown(name)   => write!(f, "@{}", name),
        }
    }
}

impl Serialize for Decorator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Binary template field types, named after their classic four letter codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BinaryFieldType {
    Dbyt,
    Dwrd,
    Dlng,
    Dqwd,
    Hbyt,
    Hwrd,
    Hlng,
    Hqwd,
    Cstr,
    Pstr,
    /// `Cnnn`: a fixed width C string of `nnn` (hex) bytes.
    FixedCstr(u16),
    Lstr,
    Ostr,
    Rect,
    Rsrc,
    Hexd,
    Ocnt,
    Bool,
    Nested(String),
    ByteCode(String),
}

impl BinaryFieldType {
    /// Resolves a plain four letter code. `Cnnn`, `NESTED<…>` and
    /// `BYTE_CODE<…>` are handled by the tokenizer.
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "DBYT" => BinaryFieldType::Dbyt,
            "DWRD" => BinaryFieldType::Dwrd,
            "DLNG" => BinaryFieldType::Dlng,
            "DQWD" => BinaryFieldType::Dqwd,
            "HBYT" => BinaryFieldType::Hbyt,
            "HWRD" => BinaryFieldType::Hwrd,
            "HLNG" => BinaryFieldType::Hlng,
            "HQWD" => BinaryFieldType::Hqwd,
            "CSTR" => BinaryFieldType::Cstr,
            "PSTR" => BinaryFieldType::Pstr,
            "LSTR" => BinaryFieldType::Lstr,
            "OSTR" => BinaryFieldType::Ostr,
            "RECT" => BinaryFieldType::Rect,
            "RSRC" => BinaryFieldType::Rsrc,
            "HEXD" => BinaryFieldType::Hexd,
            "OCNT" => BinaryFieldType::Ocnt,
            "BOOL" => BinaryFieldType::Bool,
            _ => return None,
        })
    }

    /// Signed-ness and width in bytes of the integer field types.
    pub fn integer_width(&self) -> Option<(bool, usize)> {
        match self {
            BinaryFieldType::Dbyt => Some((true, 1)),
            BinaryFieldType::Dwrd => Some((true, 2)),
            BinaryFieldType::Dlng => Some((true, 4)),
            BinaryFieldType::Dqwd => Some((true, 8)),
            BinaryFieldType::Hbyt => Some((false, 1)),
            BinaryFieldType::Hwrd => Some((false, 2)),
            BinaryFieldType::Hlng => Some((false, 4)),
            BinaryFieldType::Hqwd => Some((false, 8)),
            _ => None,
        }
    }
}

impl fmt::Display for BinaryFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryFieldType::Dbyt => write!(f, "DBYT"),
            BinaryFieldType::Dwrd => write!(f, "DWRD"),
            BinaryFieldType::Dlng => write!(f, "DLNG"),
            BinaryFieldType::Dqwd => write!(f, "DQWD"),
            BinaryFieldType::Hbyt => write!(f, "HBYT"),
            BinaryFieldType::Hwrd => write!(f, "HWRD"),
            BinaryFieldType::Hlng => write!(f, "HLNG"),
            BinaryFieldType::Hqwd => write!(f, "HQWD"),
            BinaryFieldType::Cstr => write!(f, "CSTR"),
            BinaryFieldType::Pstr => write!(f, "PSTR"),
            BinaryFieldType::FixedCstr(width) => write!(f, "C{:03X}", width),
            BinaryFieldType::Lstr => write!(f, "LSTR"),
            BinaryFieldType::Ostr => write!(f, "OSTR"),
            BinaryFieldType::Rect => write!(f, "RECT"),
            BinaryFieldType::Rsrc => write!(f, "RSRC"),
            BinaryFieldType::Hexd => write!(f, "HEXD"),
            BinaryFieldType::Ocnt => write!(f, "OCNT"),
            BinaryFieldType::Bool => write!(f, "BOOL"),
            BinaryFieldType::Nested(name) => write!(f, "NESTED<{}>", name),
            BinaryFieldType::ByteCode(language) => write!(f, "BYTE_CODE<{}>", language),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReferenceSentinel {
    /// `#auto`: the compiler assigns the next free id.
    Auto,
    /// `#?`: matches any resource.
    Any,
}

/// Identifies a resource by id, with optional type and container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Reference {
    pub id:        i64,
    pub type_name: Option<String>,
    pub type_code: Option<TypeCode>,
    pub container: Option<String>,
    pub sentinel:  Option<ReferenceSentinel>,
}

impl Reference {
    pub fn new(id: i64) -> Self {
        Reference {
            id,
            type_name: None,
            type_code: None,
            container: None,
            sentinel:  None,
        }
    }

    pub fn auto() -> Self {
        Reference {
            sentinel: Some(ReferenceSentinel::Auto),
            ..Reference::new(0)
        }
    }

    pub fn any() -> Self {
        Reference {
            sentinel: Some(ReferenceSentinel::Any),
            ..Reference::new(0)
        }
    }

    pub fn typed(id: i64, type_name: &str) -> Self {
        Reference {
            type_name: Some(type_name.to_string()),
            ..Reference::new(id)
        }
    }

    /// Same type, code and container, different id.
    pub fn with_id(&self, id: i64) -> Self {
        Reference {
            id,
            sentinel: None,
            ..self.clone()
        }
    }

    pub fn is_auto(&self) -> bool {
        self.sentinel == Some(ReferenceSentinel::Auto)
    }

    pub fn is_any(&self) -> bool {
        self.sentinel == Some(ReferenceSentinel::Any)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#")?;
        if let Some(container) = &self.container {
            write!(f, "{}.", container)?;
            if self.type_name.is_none() {
                write!(f, "????.")?;
            }
        }
        if let Some(type_name) = &self.type_name {
            write!(f, "{}.", type_name)?;
        }
        match self.sentinel {
            Some(ReferenceSentinel::Auto) => write!(f, "auto"),
            Some(ReferenceSentinel::Any) => write!(f, "?"),
            None => write!(f, "{}", self.id),
        }
    }
}

/// The result of a constructor or composite helper call: an ordered list of
/// labelled values belonging to `type_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct Compound {
    pub type_name: String,
    pub values:    Vec<(String, Token)>,
}

impl Compound {
    pub fn new(type_name: &str) -> Self {
        Compound {
            type_name: type_name.to_string(),
            values:    Vec::new(),
        }
    }

    pub fn get(&self, label: &str) -> Option<&Token> {
        self.values
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, token)| token)
    }

    /// Flattens nested compounds into `outer.inner` labels.
    pub fn flatten(&self) -> Vec<(String, Token)> {
        let mut out = Vec::new();
        for (label, token) in &self.values {
            match &token.kind {
                TokenKind::Compound(inner) => {
                    for (inner_label, inner_token) in inner.flatten() {
                        out.push((format!("{}.{}", label, inner_label), inner_token));
                    }
                }
                _ => out.push((label.clone(), token.clone())),
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Integer(i64),
    Decimal(f64),
    String(String),
    Boolean(bool),
    Reference(Reference),
    Identifier(String),
    IdentifierPath(Vec<String>),
    Variable(String),
    Keyword(Keyword),
    Decorator(Decorator),
    BinaryType(BinaryFieldType),
    Operator(Operator),
    Symbol(Symbol),
    List(Vec<Token>),
    Compound(Compound),
    /// Synthesized in place of an omitted value; resolves to the value's
    /// default expression.
    DefaultValue,
    Error(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind:     TokenKind,
    pub location: Location,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Integer(v) => write!(f, "{}", v),
            TokenKind::Decimal(v) => write!(f, "{}", v),
            TokenKind::String(v) => write!(f, "{}", v),
            TokenKind::Boolean(v) => write!(f, "{}", v),
            TokenKind::Reference(r) => write!(f, "{}", r),
            TokenKind::Identifier(name) => write!(f, "{}", name),
            TokenKind::IdentifierPath(path) => write!(f, "{}", path.join(".")),
            TokenKind::Variable(name) => write!(f, "${}", name),
            TokenKind::Keyword(k) => write!(f, "{}", k.as_str()),
            TokenKind::Decorator(d) => write!(f, "{}", d),
            TokenKind::BinaryType(t) => write!(f, "{}", t),
            TokenKind::Operator(op) => write!(f, "{}", op.as_str()),
            TokenKind::Symbol(s) => write!(f, "{}", s.as_str()),
            TokenKind::List(items) => {
                let items: Vec<String> = items.iter().map(|t| t.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            TokenKind::Compound(c) => {
                let values: Vec<String> = c
                    .values
                    .iter()
                    .map(|(label, token)| format!("{}: {}", label, token))
                    .collect();
                write!(f, "{}({})", c.type_name, values.join(", "))
            }
            TokenKind::DefaultValue => write!(f, "default"),
            TokenKind::Error(text) => write!(f, "{}", text),
            TokenKind::Eof => write!(f, "<end of file>"),
        }
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Token {
    pub fn new(kind: TokenKind, location: Location) -> Self {
        Token { kind, location }
    }

    pub fn integer(value: i64, location: &Location) -> Self {
        Token::new(TokenKind::Integer(value), location.clone())
    }

    pub fn string(value: &str, location: &Location) -> Self {
        Token::new(TokenKind::String(value.to_string()), location.clone())
    }

    pub fn boolean(value: bool, location: &Location) -> Self {
        Token::new(TokenKind::Boolean(value), location.clone())
    }

    pub fn reference(value: Reference, location: &Location) -> Self {
        Token::new(TokenKind::Reference(value), location.clone())
    }

    pub fn is_symbol(&self, symbol: Symbol) -> bool {
        self.kind == TokenKind::Symbol(symbol)
    }

    pub fn is_operator(&self, op: Operator) -> bool {
        self.kind == TokenKind::Operator(op)
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }

    pub fn is_identifier(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Identifier(n) if n == name)
    }

    /// Name of the value variant, as used by `is` type tests.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            TokenKind::Integer(_) => "Integer",
            TokenKind::Decimal(_) => "Decimal",
            TokenKind::String(_) => "String",
            TokenKind::Boolean(_) => "Boolean",
            TokenKind::Reference(_) => "Reference",
            TokenKind::Identifier(_) => "Identifier",
            TokenKind::IdentifierPath(_) => "IdentifierPath",
            TokenKind::Variable(_) => "Variable",
            TokenKind::List(_) => "List",
            TokenKind::Compound(_) => "Compound",
            TokenKind::Keyword(_) => "Keyword",
            TokenKind::Decorator(_) => "Decorator",
            TokenKind::BinaryType(_) => "BinaryType",
            TokenKind::Operator(_) => "Operator",
            TokenKind::Symbol(_) => "Symbol",
            TokenKind::DefaultValue => "Default",
            TokenKind::Error(_) => "Error",
            TokenKind::Eof => "Eof",
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match &self.kind {
            TokenKind::Integer(v) => Some(*v),
            TokenKind::Boolean(b) => Some(*b as i64),
            TokenKind::Reference(r) => Some(r.id),
            _ => None,
        }
    }

    /// String coercion used by concatenation.
    pub fn coerce_string(&self) -> String {
        self.to_string()
    }

    fn invalid(&self, op: Operator, rhs: Option<&Token>) -> KdlError {
        let msg = match rhs {
            Some(rhs) => format!(
                "operator '{}' is not defined for {} and {}",
                op.as_str(),
                self.type_name(),
                rhs.type_name()
            ),
            None => format!(
                "operator '{}' is not defined for {}",
                op.as_str(),
                self.type_name()
            ),
        };
        KdlError::compile(ReasonCode::InvalidOperation, msg, &self.location)
    }

    fn integer_op(&self, op: Operator, a: i64, b: i64, rhs: &Token) -> Result<i64, KdlError> {
        let overflow = || {
            KdlError::compile(
                ReasonCode::ValueOutOfRange,
                format!("integer overflow in {} {} {}", a, op.as_str(), b),
                &self.location,
            )
        };
        let zero = || {
            KdlError::compile(ReasonCode::DivisionByZero, "division by zero", &self.location)
        };
        match op {
            Operator::Plus => a.checked_add(b).ok_or_else(overflow),
            Operator::Minus => a.checked_sub(b).ok_or_else(overflow),
            Operator::Multiply => a.checked_mul(b).ok_or_else(overflow),
            Operator::Divide if b == 0 => Err(zero()),
            Operator::Divide => a.checked_div(b).ok_or_else(overflow),
            Operator::Modulo if b == 0 => Err(zero()),
            Operator::Modulo => a.checked_rem(b).ok_or_else(overflow),
            Operator::Exponent => u32::try_from(b)
                .ok()
                .and_then(|e| a.checked_pow(e))
                .ok_or_else(overflow),
            Operator::BitAnd => Ok(a & b),
            Operator::BitOr => Ok(a | b),
            Operator::BitXor => Ok(a ^ b),
            Operator::ShiftLeft => u32::try_from(b)
                .ok()
                .and_then(|s| a.checked_shl(s))
                .ok_or_else(overflow),
            Operator::ShiftRight => u32::try_from(b)
                .ok()
                .and_then(|s| a.checked_shr(s))
                .ok_or_else(overflow),
            _ => Err(self.invalid(op, Some(rhs))),
        }
    }

    fn compare<T: PartialOrd>(op: Operator, a: T, b: T) -> Option<bool> {
        Some(match op {
            Operator::Equal => a == b,
            Operator::NotEqual => a != b,
            Operator::Less => a < b,
            Operator::Greater => a > b,
            Operator::LessEqual => a <= b,
            Operator::GreaterEqual => a >= b,
            _ => return None,
        })
    }

    /// Applies an infix operator. The result carries the left operand's
    /// location.
    pub fn apply_binary(&self, op: Operator, rhs: &Token) -> Result<Token, KdlError> {
        use TokenKind::{Boolean, Decimal, Integer, Reference, String};

        if op == Operator::Is {
            return Ok(Token::boolean(self.is_match(rhs), &self.location));
        }

        let kind = match (&self.kind, &rhs.kind) {
            (Integer(a), Integer(b)) => match Token::compare(op, a, b) {
                Some(result) => Boolean(result),
                None => Integer(self.integer_op(op, *a, *b, rhs)?),
            },

            (Decimal(_), Integer(_) | Decimal(_)) | (Integer(_), Decimal(_)) => {
                let a = self.as_decimal().unwrap_or_default();
                let b = rhs.as_decimal().unwrap_or_default();
                if let Some(result) = Token::compare(op, a, b) {
                    Boolean(result)
                } else {
                    Decimal(match op {
                        Operator::Plus => a + b,
                        Operator::Minus => a - b,
                        Operator::Multiply => a * b,
                        Operator::Divide if b == 0.0 => {
                            return Err(KdlError::compile(
                                ReasonCode::DivisionByZero,
                                "division by zero",
                                &self.location,
                            ))
                        }
                        Operator::Divide => a / b,
                        Operator::Exponent => a.powf(b),
                        _ => return Err(self.invalid(op, Some(rhs))),
                    })
                }
            }

            (Reference(r), Integer(n)) => match op {
                Operator::Plus | Operator::Minus | Operator::Multiply | Operator::Divide
                | Operator::Modulo => Reference(r.with_id(self.integer_op(op, r.id, *n, rhs)?)),
                _ => match Token::compare(op, r.id, *n) {
                    Some(result) => Boolean(result),
                    None => return Err(self.invalid(op, Some(rhs))),
                },
            },

            (Integer(n), Reference(r)) => match op {
                Operator::Plus | Operator::Minus | Operator::Multiply | Operator::Divide
                | Operator::Modulo => Reference(r.with_id(self.integer_op(op, *n, r.id, rhs)?)),
                _ => match Token::compare(op, *n, r.id) {
                    Some(result) => Boolean(result),
                    None => return Err(self.invalid(op, Some(rhs))),
                },
            },

            (Reference(a), Reference(b)) => match op {
                Operator::Equal => Boolean(a == b),
                Operator::NotEqual => Boolean(a != b),
                Operator::Plus | Operator::Minus | Operator::Multiply | Operator::Divide
                | Operator::Modulo => Reference(a.with_id(self.integer_op(op, a.id, b.id, rhs)?)),
                _ => match Token::compare(op, a.id, b.id) {
                    Some(result) => Boolean(result),
                    None => return Err(self.invalid(op, Some(rhs))),
                },
            },

            (String(a), String(b)) if op != Operator::Plus => match Token::compare(op, a, b) {
                Some(result) => Boolean(result),
                None => return Err(self.invalid(op, Some(rhs))),
            },

            (String(a), _) if op == Operator::Plus => String(format!("{}{}", a, rhs.coerce_string())),

            (Boolean(a), Boolean(b)) => Boolean(match op {
                Operator::BitAnd | Operator::LogicalAnd => *a && *b,
                Operator::BitOr | Operator::LogicalOr => *a || *b,
                Operator::BitXor | Operator::NotEqual => a != b,
                Operator::Equal => a == b,
                _ => return Err(self.invalid(op, Some(rhs))),
            }),

            _ => return Err(self.invalid(op, Some(rhs))),
        };

        Ok(Token::new(kind, self.location.clone()))
    }

    /// Applies a prefix operator (`-`, `!`, `~`, `++`, `--`).
    pub fn apply_unary(&self, op: Operator) -> Result<Token, KdlError> {
        use TokenKind::{Boolean, Decimal, Integer};

        let kind = match (op, &self.kind) {
            (Operator::Minus, Integer(v)) => Integer(v.checked_neg().ok_or_else(|| {
                KdlError::compile(ReasonCode::ValueOutOfRange, "integer overflow", &self.location)
            })?),
            (Operator::Minus, Decimal(v)) => Decimal(-v),
            (Operator::Plus, Integer(_) | Decimal(_)) => self.kind.clone(),
            (Operator::Not, Boolean(b)) => Boolean(!b),
            (Operator::BitNot, Integer(v)) => Integer(!v),
            (Operator::Increment, _) => return self.step(1),
            (Operator::Decrement, _) => return self.step(-1),
            _ => return Err(self.invalid(op, None)),
        };

        Ok(Token::new(kind, self.location.clone()))
    }

    /// `++` / `--`: integers and decimals move by one, references move their id.
    pub fn step(&self, delta: i64) -> Result<Token, KdlError> {
        let op = if delta > 0 { Operator::Increment } else { Operator::Decrement };
        let kind = match &self.kind {
            TokenKind::Integer(v) => TokenKind::Integer(self.checked_step(*v, delta)?),
            TokenKind::Decimal(v) => TokenKind::Decimal(v + delta as f64),
            TokenKind::Reference(r) => TokenKind::Reference(r.with_id(self.checked_step(r.id, delta)?)),
            _ => return Err(self.invalid(op, None)),
        };
        Ok(Token::new(kind, self.location.clone()))
    }

    fn checked_step(&self, value: i64, delta: i64) -> Result<i64, KdlError> {
        value.checked_add(delta).ok_or_else(|| {
            KdlError::compile(ReasonCode::ValueOutOfRange, "integer overflow", &self.location)
        })
    }

    fn as_decimal(&self) -> Option<f64> {
        match &self.kind {
            TokenKind::Integer(v) => Some(*v as f64),
            TokenKind::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    /// The `is` test: a type name checks the variant, a list checks
    /// membership, anything else checks for the exact same value.
    pub fn is_match(&self, rhs: &Token) -> bool {
        match &rhs.kind {
            TokenKind::Identifier(type_name) => self.type_name() == type_name,
            TokenKind::List(items) => items.iter().any(|item| self.is_match(item)),
            _ => self.kind == rhs.kind,
        }
    }
}
