use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Where a lexeme came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub file:   Arc<str>,
    pub line:   usize,
    pub column: usize,
}

impl Location {
    pub fn new(file: &Arc<str>, line: usize, column: usize) -> Self {
        Location {
            file: Arc::clone(file),
            line,
            column,
        }
    }

    /// Location used for synthesized tokens that have no source text.
    pub fn builtin() -> Self {
        Location {
            file:   Arc::from("<builtin>"),
            line:   0,
            column: 0,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Stable diagnostic codes. Tooling keys off the rendered `KDLnnn` form, so
/// the numeric values must never be reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    UnrecognizedLexeme     = 1,
    UnexpectedToken        = 10,
    UnexpectedEndOfInput   = 11,
    TooManyValues          = 12,
    MalformedReference     = 13,
    NestingTooDeep         = 14,
    InvalidDecorator       = 15,
    UnknownType            = 20,
    DuplicateType          = 21,
    TypeNotDeclarable      = 22,
    UnknownField           = 23,
    UnknownTemplateLabel   = 24,
    RepeatBoundExceeded    = 25,
    InvalidTemplate        = 26,
    DuplicateResource      = 27,
    UnknownSymbol          = 30,
    ImportFailed           = 31,
    ImportNotAllowed       = 32,
    ConversionFailed       = 33,
    ValueTypeMismatch      = 34,
    TemplateMismatch       = 39,
    UnresolvedName         = 40,
    UnresolvedFunction     = 41,
    InvalidOperation       = 42,
    ArgumentMismatch       = 43,
    DivisionByZero         = 44,
    MalformedExpression    = 45,
    ValueOutOfRange        = 46,
    UnknownElement         = 50,
    UnknownAttribute       = 51,
    InvalidAttributeValue  = 52,
    InterfaceEncodingFailed = 53,
}

impl ReasonCode {
    pub fn number(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KDL{:03}", self.number())
    }
}

#[derive(Debug, Error)]
pub enum KdlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{location}: error[{code}]: {msg}")]
    Compile {
        code:     ReasonCode,
        msg:      String,
        location: Location,
    },

    #[error("Resource decode error: {0}")]
    DecodeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl KdlError {
    pub fn compile(code: ReasonCode, msg: impl Into<String>, location: &Location) -> Self {
        KdlError::Compile {
            code,
            msg: msg.into(),
            location: location.clone(),
        }
    }

    /// The stable reason code, for compile diagnostics.
    pub fn code(&self) -> Option<ReasonCode> {
        match self {
            KdlError::Compile { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            KdlError::Compile { location, .. } => Some(location),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_render_with_three_digits() {
        assert_eq!(ReasonCode::UnrecognizedLexeme.to_string(), "KDL001");
        assert_eq!(ReasonCode::TooManyValues.to_string(), "KDL012");
        assert_eq!(ReasonCode::InvalidOperation.to_string(), "KDL042");
    }

    #[test]
    fn compile_error_display_includes_location_and_code() {
        let file: Arc<str> = Arc::from("menus.kdl");
        let err = KdlError::compile(
            ReasonCode::UnknownField,
            "no field \"Size\" on type \"StaticImage\"",
            &Location::new(&file, 4, 9),
        );
        assert_eq!(
            err.to_string(),
            "menus.kdl:4:9: error[KDL023]: no field \"Size\" on type \"StaticImage\""
        );
        assert_eq!(err.code(), Some(ReasonCode::UnknownField));
        assert_eq!(err.location().map(|l| l.line), Some(4));
    }
}
