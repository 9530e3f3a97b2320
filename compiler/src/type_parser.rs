use crate::error::{KdlError, Location, ReasonCode};
use crate::interpreter::evaluate;
use crate::registry::{
    Constructor, Field, FieldValue, ImportHint, Repeatable, TemplateField, TypeHandle, TypeInstance,
    TypeRegistry, ValueType,
};
use crate::resource::Context;
use crate::scope::Scope;
use crate::stream::TokenStream;
use crate::token::{Decorator, Keyword, Operator, Symbol, TokenKind};
use kdl_format::TypeCode;
use tracing::debug;

/// Collects any decorators at the current position.
pub fn parse_decorators(stream: &mut TokenStream) -> Vec<Decorator> {
    let mut decorators = Vec::new();
    while let TokenKind::Decorator(decorator) = &stream.peek().kind {
        decorators.push(decorator.clone());
        stream.advance();
    }
    decorators
}

fn invalid_decorator(decorator: &Decorator, on: &str, at: &Location) -> KdlError {
    KdlError::compile(
        ReasonCode::InvalidDecorator,
        format!("decorator {} cannot be used on {}", decorator, on),
        at,
    )
}

/// `type Name : "code" { template {…} field(…) {…} constructor(…) {…} }`
pub fn parse_type(
    stream: &mut TokenStream,
    ctx: &mut Context,
    scope: &mut Scope,
    decorators: Vec<Decorator>,
) -> Result<TypeHandle, KdlError> {
    let at = stream.expect_keyword(Keyword::Type)?.location;
    for decorator in &decorators {
        if matches!(decorator, Decorator::Condition(_)) {
            return Err(invalid_decorator(decorator, "a type", &at));
        }
    }

    let (name, name_at) = stream.expect_identifier()?;
    stream.expect_symbol(Symbol::Colon)?;
    let (code_text, code_at) = stream.expect_string()?;
    let code: TypeCode = code_text
        .parse()
        .map_err(|e: String| KdlError::compile(ReasonCode::InvalidTemplate, e, &code_at))?;

    let mut instance = TypeInstance::new(&name, code);
    instance.decorators = decorators;
    instance.location = name_at;

    stream.expect_symbol(Symbol::LBrace)?;
    while !stream.eat_symbol(Symbol::RBrace) {
        let decorators = parse_decorators(stream);
        let token = stream.peek().clone();
        match &token.kind {
            TokenKind::Keyword(Keyword::Template) if decorators.is_empty() => {
                instance.template.fields = parse_template(stream)?;
            }
            TokenKind::Keyword(Keyword::Constructor) if decorators.is_empty() => {
                instance.constructors.push(parse_constructor(stream)?);
            }
            TokenKind::Keyword(Keyword::Field) | TokenKind::Keyword(Keyword::Repeatable) => {
                let field = parse_field_declaration(stream, &ctx.registry, scope, &instance, decorators)?;
                instance.fields.push(field);
            }
            _ if !decorators.is_empty() => {
                return Err(invalid_decorator(&decorators[0], "this declaration", &token.location));
            }
            _ => return Err(stream.unexpected("\"template\", \"field\" or \"constructor\"")),
        }
        stream.eat_symbol(Symbol::Semicolon);
    }
    stream.eat_symbol(Symbol::Semicolon);

    let handle = ctx.registry.register_type(instance)?;
    debug!(name = %handle.name, code = %handle.code, fields = handle.fields.len(), "registered type");
    Ok(handle)
}

fn parse_template(stream: &mut TokenStream) -> Result<Vec<TemplateField>, KdlError> {
    stream.expect_keyword(Keyword::Template)?;
    let entries = parse_template_entries(stream)?;
    stream.eat_symbol(Symbol::Semicolon);
    Ok(entries)
}

fn parse_template_entries(stream: &mut TokenStream) -> Result<Vec<TemplateField>, KdlError> {
    stream.expect_symbol(Symbol::LBrace)?;
    let mut entries = Vec::new();
    while !stream.eat_symbol(Symbol::RBrace) {
        let kind = match &stream.peek().kind {
            TokenKind::BinaryType(kind) => kind.clone(),
            _ => return Err(stream.unexpected("binary field type")),
        };
        stream.advance();
        let (label, _) = stream.expect_string()?;
        let mut entry = TemplateField::new(kind, &label);
        if stream.peek().is_symbol(Symbol::LBrace) {
            entry.entries = parse_template_entries(stream)?;
        }
        stream.expect_symbol(Symbol::Semicolon)?;
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_constructor(stream: &mut TokenStream) -> Result<Constructor, KdlError> {
    stream.expect_keyword(Keyword::Constructor)?;
    stream.expect_symbol(Symbol::LParen)?;
    let mut parameters = Vec::new();
    if !stream.eat_symbol(Symbol::RParen) {
        loop {
            parameters.push(stream.expect_identifier()?.0);
            if stream.eat_symbol(Symbol::RParen) {
                break;
            }
            stream.expect_symbol(Symbol::Comma)?;
        }
    }

    stream.expect_symbol(Symbol::LBrace)?;
    let mut body = Vec::new();
    while !stream.eat_symbol(Symbol::RBrace) {
        let statement = stream.take_expression(|t| t.is_symbol(Symbol::Semicolon))?;
        if !statement.get(1).map_or(false, |t| t.is_symbol(Symbol::Assign)) {
            return Err(KdlError::compile(
                ReasonCode::UnexpectedToken,
                "constructor statements must be assignments",
                &statement[0].location,
            ));
        }
        stream.expect_symbol(Symbol::Semicolon)?;
        body.push(statement);
    }
    stream.eat_symbol(Symbol::Semicolon);

    Ok(Constructor { parameters, body })
}

/// `[repeatable<lower, upper, CountLabel>] field("Name") { value… }`
fn parse_field_declaration(
    stream: &mut TokenStream,
    registry: &TypeRegistry,
    scope: &mut Scope,
    instance: &TypeInstance,
    decorators: Vec<Decorator>,
) -> Result<Field, KdlError> {
    for decorator in &decorators {
        if matches!(decorator, Decorator::Builtin | Decorator::NoDeclaration | Decorator::Condition(_)) {
            return Err(invalid_decorator(decorator, "a field", &stream.location()));
        }
    }

    let repeatable = if stream.eat_keyword(Keyword::Repeatable) {
        stream.expect_operator(Operator::Less)?;
        let lower = parse_bound(stream)?;
        stream.expect_symbol(Symbol::Comma)?;
        let upper = parse_bound(stream)?;
        stream.expect_symbol(Symbol::Comma)?;
        let (count_label, _) = stream.expect_identifier()?;
        stream.expect_operator(Operator::Greater)?;
        Some(Repeatable { lower, upper, count_label })
    } else {
        None
    };

    stream.expect_keyword(Keyword::Field)?;
    stream.expect_symbol(Symbol::LParen)?;
    let (name, name_at) = stream.expect_string()?;
    stream.expect_symbol(Symbol::RParen)?;

    if instance.field_named(&name).is_some() {
        return Err(KdlError::compile(
            ReasonCode::UnexpectedToken,
            format!("field \"{}\" is declared twice on \"{}\"", name, instance.name),
            &name_at,
        ));
    }

    let entries: &[TemplateField] = match &repeatable {
        Some(repeat) => instance
            .template
            .field(&repeat.count_label)
            .map(|list| list.entries.as_slice())
            .unwrap_or(&[]),
        None => &instance.template.fields,
    };

    let mut field = Field::new(&name, Vec::new());
    field.decorators = decorators;
    field.repeatable = repeatable;

    stream.expect_symbol(Symbol::LBrace)?;
    while !stream.eat_symbol(Symbol::RBrace) {
        let mut value = parse_value_part(stream, registry, scope, entries)?;
        while stream.peek().is_identifier("join") {
            stream.advance();
            value.joined.push(parse_value_part(stream, registry, scope, entries)?);
        }
        stream.expect_symbol(Symbol::Semicolon)?;
        field.values.push(value);
    }
    stream.eat_symbol(Symbol::Semicolon);

    Ok(field)
}

fn parse_bound(stream: &mut TokenStream) -> Result<i64, KdlError> {
    let negative = stream.eat_operator(Operator::Minus);
    let (value, _) = stream.expect_integer()?;
    Ok(if negative { -value } else { value })
}

/// `Label [as Type] [[Symbol = expr, …]] [= default]`
fn parse_value_part(
    stream: &mut TokenStream,
    registry: &TypeRegistry,
    scope: &mut Scope,
    entries: &[TemplateField],
) -> Result<FieldValue, KdlError> {
    let (label, label_at) = stream.expect_identifier()?;

    let value_type = if stream.eat_keyword(Keyword::As) {
        parse_type_descriptor(stream, registry)?
    } else {
        match entries.iter().find(|e| e.label == label) {
            Some(entry) => ValueType::for_binary(&entry.kind),
            None => {
                return Err(KdlError::compile(
                    ReasonCode::UnknownTemplateLabel,
                    format!("value \"{}\" has no template entry to take its type from", label),
                    &label_at,
                ))
            }
        }
    };

    let mut value = FieldValue::new(&label, value_type);

    if stream.eat_symbol(Symbol::LBracket) {
        while !stream.eat_symbol(Symbol::RBracket) {
            let (symbol, _) = stream.expect_identifier()?;
            stream.expect_symbol(Symbol::Assign)?;
            let tokens = stream.take_expression(|t| {
                t.is_symbol(Symbol::Comma) || t.is_symbol(Symbol::Semicolon) || t.is_symbol(Symbol::RBracket)
            })?;
            let constant = evaluate(&tokens, scope)?;
            value.symbols.insert(symbol, constant);
            if !stream.eat_symbol(Symbol::Comma) {
                stream.eat_symbol(Symbol::Semicolon);
            }
        }
    }

    if stream.eat_symbol(Symbol::Assign) {
        let tokens = stream.take_expression(|t| t.is_symbol(Symbol::Semicolon) || t.is_identifier("join"))?;
        value.default = Some(tokens);
    }

    Ok(value)
}

fn descriptor_argument(stream: &mut TokenStream) -> Result<String, KdlError> {
    let text = match &stream.peek().kind {
        TokenKind::Identifier(name) => name.clone(),
        TokenKind::String(text) => text.clone(),
        _ => return Err(stream.unexpected("type argument")),
    };
    stream.advance();
    Ok(text)
}

/// `Integer`, `Reference<Type>`, `File<"png", "tga">`, a registered type…
pub fn parse_type_descriptor(stream: &mut TokenStream, registry: &TypeRegistry) -> Result<ValueType, KdlError> {
    let (name, at) = stream.expect_identifier()?;

    let mut arguments = Vec::new();
    if stream.eat_operator(Operator::Less) {
        loop {
            arguments.push(descriptor_argument(stream)?);
            if stream.eat_operator(Operator::Greater) {
                break;
            }
            stream.expect_symbol(Symbol::Comma)?;
        }
    }

    let hint = |arguments: &[String]| match arguments {
        [source, target] => Ok(ImportHint {
            source: source.to_ascii_lowercase(),
            target: target.to_ascii_lowercase(),
        }),
        _ => Err(KdlError::compile(
            ReasonCode::UnexpectedToken,
            format!("{} takes a source and a target format", name),
            &at,
        )),
    };

    let value_type = match (name.as_str(), arguments.as_slice()) {
        ("Integer", []) => ValueType::Integer,
        ("String", []) => ValueType::String,
        ("Boolean", []) => ValueType::Boolean,
        ("Color", []) => ValueType::Color,
        ("Rect", []) => ValueType::Rect,
        ("Data", []) => ValueType::Data,
        ("Reference", []) => ValueType::Reference(None),
        ("Reference", [target]) => ValueType::Reference(Some(target.clone())),
        ("File", []) => ValueType::File(None),
        ("File", args) => ValueType::File(Some(hint(args)?)),
        ("Files", args) => ValueType::Files(hint(args)?),
        (other, []) if registry.type_named(other).is_some() => ValueType::Nested(other.to_string()),
        (other, _) => {
            return Err(KdlError::compile(
                ReasonCode::UnknownType,
                format!("unknown value type \"{}\"", other),
                &at,
            ))
        }
    };
    Ok(value_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::import::PassthroughConverter;
    use crate::scene_encoder::BinaryInterfaceEncoder;
    use crate::token::BinaryFieldType;
    use crate::tokenizer::tokenize;
    use std::path::PathBuf;

    fn parse(text: &str) -> Result<(TypeRegistry, TypeHandle), KdlError> {
        let options = CompileOptions::default();
        let mut ctx = Context::new(
            TypeRegistry::with_builtins()?,
            &options,
            &PassthroughConverter,
            &BinaryInterfaceEncoder,
            PathBuf::from("."),
        );
        let mut stream = TokenStream::new(tokenize(text, "types.kdl"));
        let mut scope = Scope::new();
        let decorators = parse_decorators(&mut stream);
        let handle = parse_type(&mut stream, &mut ctx, &mut scope, decorators)?;
        Ok((ctx.registry, handle))
    }

    const WIDGET: &str = r#"
        @api("A widget")
        type Widget : "wdgt" {
            template {
                DWRD "Count";
                HWRD "Flags";
                HBYT "Style";
                RSRC "Ref";
                OCNT "Items" {
                    PSTR "Text";
                };
            };
            field("Count") { Count = 1; };
            @deprecated field("Flags") {
                Flags [ Alpha = 0x01, Beta = 0x02 ] join Style [ Bold = 1 << 2 ];
            };
            field("Ref") { Ref as Reference<Widget>; };
            repeatable<0, 4, Items> field("Item") { Text = "item " + FieldNumber; };
            constructor(count) { this.Count = count; };
        };
    "#;

    #[test]
    fn parses_a_complete_type() {
        let (_registry, widget) = parse(WIDGET).unwrap();
        assert_eq!(widget.code, TypeCode(*b"wdgt"));
        assert!(matches!(widget.decorators[0], Decorator::Api(_)));
        assert_eq!(widget.template.fields.len(), 5);
        assert_eq!(widget.template.fields[4].kind, BinaryFieldType::Ocnt);
        assert_eq!(widget.template.fields[4].entries[0].label, "Text");

        let count = widget.field_named("Count").unwrap();
        assert_eq!(count.values[0].value_type, ValueType::Integer);
        assert_eq!(count.values[0].default.as_ref().map(|d| d.len()), Some(1));

        let flags = widget.field_named("Flags").unwrap();
        assert!(flags.has_decorator(&Decorator::Deprecated));
        assert_eq!(flags.values[0].symbols.get("Beta").and_then(|t| t.as_integer()), Some(2));
        assert_eq!(flags.values[0].joined[0].label, "Style");
        assert_eq!(flags.values[0].joined[0].symbols.get("Bold").and_then(|t| t.as_integer()), Some(4));

        let reference = widget.field_named("Ref").unwrap();
        assert_eq!(reference.values[0].value_type, ValueType::Reference(Some("Widget".into())));

        let item = widget.field_named("Item").unwrap();
        assert_eq!(item.repeatable.as_ref().map(|r| r.count_label.as_str()), Some("Items"));
        assert_eq!(item.values[0].value_type, ValueType::String);

        assert_eq!(widget.constructors[0].parameters, vec!["count"]);
        assert_eq!(widget.constructors[0].body.len(), 1);
    }

    #[test]
    fn type_descriptors() {
        let registry = TypeRegistry::with_builtins().unwrap();
        let parse = |text: &str| {
            let mut stream = TokenStream::new(tokenize(text, "t"));
            parse_type_descriptor(&mut stream, &registry)
        };
        assert_eq!(
            parse("Files<\"PNG\", tga>").unwrap(),
            ValueType::Files(ImportHint { source: "png".into(), target: "tga".into() })
        );
        assert_eq!(parse("File").unwrap(), ValueType::File(None));
        assert_eq!(parse("StaticImage").unwrap(), ValueType::Nested("StaticImage".into()));
        assert_eq!(parse("Nope").unwrap_err().code(), Some(ReasonCode::UnknownType));
        assert_eq!(parse("Files<png>").unwrap_err().code(), Some(ReasonCode::UnexpectedToken));
    }

    #[test]
    fn rejects_bad_declarations() {
        let code = |text: &str| parse(text).unwrap_err().code();
        assert_eq!(code(r#"type A : "toolong" { }"#), Some(ReasonCode::InvalidTemplate));
        assert_eq!(code(r#"type StaticImage : "xxxx" { }"#), Some(ReasonCode::DuplicateType));
        assert_eq!(
            code(r#"type A : "aaaa" { template { DWRD "X"; }; field("Y") { Y; }; }"#),
            Some(ReasonCode::UnknownTemplateLabel)
        );
        assert_eq!(
            code(r#"@condition(true) type A : "aaaa" { }"#),
            Some(ReasonCode::InvalidDecorator)
        );
        assert_eq!(
            code(r#"type A : "aaaa" { template { DWRD "X"; }; @builtin field("X") { X; }; }"#),
            Some(ReasonCode::InvalidDecorator)
        );
        assert_eq!(
            code(r#"type A : "aaaa" { template { OCNT "L" { DWRD "V"; }; }; repeatable<3, 1, L> field("V") { V; }; }"#),
            Some(ReasonCode::RepeatBoundExceeded)
        );
    }
}
