use crate::declaration::parse_declare;
use crate::error::{KdlError, ReasonCode};
use crate::interpreter::execute;
use crate::resource::Context;
use crate::scene_parser::parse_scene;
use crate::scope::Scope;
use crate::stream::TokenStream;
use crate::token::{Keyword, Symbol, TokenKind};
use crate::type_parser::{parse_decorators, parse_type};

/// Parses a whole file: type definitions, `declare` blocks, scenes and
/// dialogs, and file level `$variable = …;` statements. Stops at the first
/// error.
pub fn parse_file(stream: &mut TokenStream, ctx: &mut Context, scope: &mut Scope) -> Result<(), KdlError> {
    while !stream.finished() {
        if stream.eat_symbol(Symbol::Semicolon) {
            continue;
        }

        let at = stream.location();
        let decorators = parse_decorators(stream);
        let is_type = stream.peek().is_keyword(Keyword::Type);
        if !decorators.is_empty() && !is_type {
            return Err(KdlError::compile(
                ReasonCode::InvalidDecorator,
                format!("decorator {} must precede a type or a \"new\"", decorators[0]),
                &at,
            ));
        }

        match &stream.peek().kind {
            TokenKind::Keyword(Keyword::Type) => {
                parse_type(stream, ctx, scope, decorators)?;
            }
            TokenKind::Keyword(Keyword::Declare) => parse_declare(stream, ctx, scope)?,
            TokenKind::Keyword(Keyword::Scene) | TokenKind::Keyword(Keyword::Dialog) => {
                parse_scene(stream, ctx, scope)?;
            }
            TokenKind::Variable(_) => {
                let statement = stream.take_expression(|t| t.is_symbol(Symbol::Semicolon))?;
                execute(&statement, scope)?;
                stream.expect_symbol(Symbol::Semicolon)?;
            }
            _ => return Err(stream.unexpected("\"type\", \"declare\", \"scene\", \"dialog\" or a variable")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::import::PassthroughConverter;
    use crate::registry::TypeRegistry;
    use crate::scene_encoder::BinaryInterfaceEncoder;
    use crate::tokenizer::tokenize;
    use std::path::PathBuf;

    fn parse(text: &str) -> Result<usize, KdlError> {
        let options = CompileOptions::default();
        let mut ctx = Context::new(
            TypeRegistry::with_builtins()?,
            &options,
            &PassthroughConverter,
            &BinaryInterfaceEncoder,
            PathBuf::from("."),
        );
        let mut stream = TokenStream::new(tokenize(text, "file.kdl"));
        parse_file(&mut stream, &mut ctx, &mut Scope::new())?;
        Ok(ctx.resources.len())
    }

    #[test]
    fn file_level_statements_share_one_scope() {
        let count = parse(
            r#"
            $base = 200;
            type Counter : "cntr" { template { DWRD "Value"; }; field("Value") { Value; }; };
            ;
            declare Counter { new ($base) { Value = $base; }; new ($base + 1) { Value = 1; }; }
            scene <$base> "Menu" { }
            "#,
        )
        .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn rejects_stray_tokens_and_decorators() {
        assert_eq!(parse("42;").unwrap_err().code(), Some(ReasonCode::UnexpectedToken));
        assert_eq!(parse("@builtin declare Package { }").unwrap_err().code(), Some(ReasonCode::InvalidDecorator));
        assert_eq!(parse("declare Package { new {} ").unwrap_err().code(), Some(ReasonCode::UnexpectedEndOfInput));
        assert_eq!(parse("`").unwrap_err().code(), Some(ReasonCode::UnrecognizedLexeme));
        assert_eq!(parse("# ;").unwrap_err().code(), Some(ReasonCode::MalformedReference));
    }
}
