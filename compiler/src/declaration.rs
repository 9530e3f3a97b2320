use crate::error::{KdlError, Location, ReasonCode};
use crate::interpreter::{evaluate, execute};
use crate::registry::TypeHandle;
use crate::resource::{Context, ResourceInstance};
use crate::scope::Scope;
use crate::stream::TokenStream;
use crate::token::{Decorator, Keyword, Reference, Symbol, Token, TokenKind};
use crate::type_parser::parse_decorators;
use crate::value_parser::{parse_field, synthesize_field, Values};
use tracing::trace;

fn lookup_type(ctx: &Context, name: &str, at: &Location) -> Result<TypeHandle, KdlError> {
    let instance = ctx
        .registry
        .type_named(name)
        .ok_or_else(|| KdlError::compile(ReasonCode::UnknownType, format!("unknown type \"{}\"", name), at))?;
    if !instance.is_declarable() {
        return Err(KdlError::compile(
            ReasonCode::TypeNotDeclarable,
            format!("resources of type \"{}\" cannot be declared", name),
            at,
        ));
    }
    Ok(instance)
}

/// `declare Type { new … ; $v = …; }`
pub fn parse_declare(stream: &mut TokenStream, ctx: &mut Context, scope: &mut Scope) -> Result<(), KdlError> {
    stream.expect_keyword(Keyword::Declare)?;
    let (name, at) = stream.expect_identifier()?;
    let instance = lookup_type(ctx, &name, &at)?;

    let mut block = scope.child();
    stream.expect_symbol(Symbol::LBrace)?;
    while !stream.eat_symbol(Symbol::RBrace) {
        if stream.eat_symbol(Symbol::Semicolon) {
            continue;
        }
        let decorators = parse_decorators(stream);
        match &stream.peek().kind {
            TokenKind::Keyword(Keyword::New) => {
                parse_new(stream, ctx, &mut block, Some(instance.clone()), decorators)?;
            }
            TokenKind::Variable(_) if decorators.is_empty() => {
                let statement = stream.take_expression(|t| t.is_symbol(Symbol::Semicolon))?;
                execute(&statement, &mut block)?;
                stream.expect_symbol(Symbol::Semicolon)?;
            }
            _ => return Err(stream.unexpected("\"new\" or a variable assignment")),
        }
    }
    stream.eat_symbol(Symbol::Semicolon);
    Ok(())
}

fn condition_holds(tokens: &[Token], scope: &mut Scope, at: &Location) -> Result<bool, KdlError> {
    let value = evaluate(tokens, scope)?;
    match value.kind {
        TokenKind::Boolean(b) => Ok(b),
        TokenKind::Integer(v) => Ok(v != 0),
        _ => Err(KdlError::compile(
            ReasonCode::InvalidDecorator,
            format!("@condition must evaluate to a boolean, found {}", value.type_name()),
            at,
        )),
    }
}

fn header_reference(tokens: &[Token], scope: &mut Scope) -> Result<Reference, KdlError> {
    let value = evaluate(tokens, scope)?;
    match value.kind {
        TokenKind::Reference(reference) => Ok(reference),
        TokenKind::Integer(id) => Ok(Reference::new(id)),
        _ => Err(KdlError::compile(
            ReasonCode::MalformedReference,
            format!("expected a resource reference, found {}", value.type_name()),
            &value.location,
        )),
    }
}

/// `new [Type] [(reference[, name])] { field assignments }`
///
/// Declares one resource and returns its reference. The declaration runs
/// inside a nested guard, so its repeat counters, active type and
/// suppression never outlive it. `declared` is the type used when the
/// header names none.
pub fn parse_new(
    stream: &mut TokenStream,
    ctx: &mut Context,
    scope: &mut Scope,
    declared: Option<TypeHandle>,
    decorators: Vec<Decorator>,
) -> Result<Reference, KdlError> {
    let at = stream.expect_keyword(Keyword::New)?.location;

    let instance = match &stream.peek().kind {
        TokenKind::Identifier(name) => {
            let name = name.clone();
            let token = stream.advance();
            lookup_type(ctx, &name, &token.location)?
        }
        _ => match declared {
            Some(instance) => instance,
            None => {
                return Err(KdlError::compile(
                    ReasonCode::UnknownType,
                    "\"new\" needs a type name here",
                    &at,
                ))
            }
        },
    };

    let mut reference = Reference::auto();
    let mut name = String::new();
    if stream.eat_symbol(Symbol::LParen) {
        let tokens = stream.take_expression(|t| t.is_symbol(Symbol::Comma) || t.is_symbol(Symbol::RParen))?;
        reference = header_reference(&tokens, scope)?;
        if stream.eat_symbol(Symbol::Comma) {
            let tokens = stream.take_expression(|t| t.is_symbol(Symbol::RParen))?;
            name = evaluate(&tokens, scope)?.coerce_string();
        }
        stream.expect_symbol(Symbol::RParen)?;
    }

    let mut suppress = false;
    let mut synthesize = instance.has_decorator(&Decorator::Synthesize);
    for decorator in &decorators {
        match decorator {
            Decorator::Condition(tokens) => suppress |= !condition_holds(tokens, scope, &at)?,
            Decorator::Synthesize => synthesize = true,
            other => {
                return Err(KdlError::compile(
                    ReasonCode::InvalidDecorator,
                    format!("decorator {} cannot be used on \"new\"", other),
                    &at,
                ))
            }
        }
    }

    let mut guard = ctx.enter_nested(&at)?;
    let ctx: &mut Context = &mut guard;
    ctx.suppress_resources |= suppress;
    ctx.current_type = Some(instance.clone());

    let id = ctx.claim_id(&instance.name, &reference, &at)?;
    let reference = Reference {
        id,
        type_name: Some(instance.name.clone()),
        type_code: Some(instance.code),
        container: reference.container,
        sentinel: None,
    };
    trace!(reference = %reference, depth = ctx.depth(), "new");

    let mut body = scope.child();
    body.set_variable("this", Token::reference(reference.clone(), &at));
    let mut values = Values::new();
    let mut assigned = Vec::new();

    stream.expect_symbol(Symbol::LBrace)?;
    while !stream.eat_symbol(Symbol::RBrace) {
        match &stream.peek().kind {
            TokenKind::Symbol(Symbol::Semicolon) => {
                stream.advance();
            }
            TokenKind::Variable(_) => {
                let statement = stream.take_expression(|t| t.is_symbol(Symbol::Semicolon))?;
                execute(&statement, &mut body)?;
                stream.expect_symbol(Symbol::Semicolon)?;
            }
            TokenKind::Identifier(_) => assigned.push(parse_field(stream, ctx, &mut body, &mut values)?),
            _ => return Err(stream.unexpected("field assignment")),
        }
    }

    if synthesize {
        for field in instance.fields.iter().filter(|f| !assigned.contains(&f.name)) {
            synthesize_field(ctx, &body, field, &mut values)?;
        }
    }

    ctx.push_resource(ResourceInstance {
        reference: reference.clone(),
        name,
        location: at,
        values,
    });
    Ok(reference)
}
