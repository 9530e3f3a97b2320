//! Field assignments inside `new` blocks.
//!
//! A field is assigned either positionally (`Field = a, b;`) or by label
//! (`Field { Label = a; }`). Each value is one of the special forms
//! (`default`, `new`, `import`, a bitmask join) or a plain expression, and
//! ends up as a [`ValueContainer`] under its template label.

use crate::declaration::parse_new;
use crate::error::{KdlError, Location, ReasonCode};
use crate::helpers::{install_value_helpers, RECT_TYPE};
use crate::import::import_files;
use crate::interpreter::evaluate;
use crate::registry::{Field, FieldValue, ValueType};
use crate::resource::{Context, ValueContainer};
use crate::scope::Scope;
use crate::stream::TokenStream;
use crate::token::{Compound, Decorator, Keyword, Operator, Reference, Symbol, Token, TokenKind};
use crate::type_parser::parse_decorators;
use indexmap::IndexMap;
use tracing::{trace, warn};

pub type Values = IndexMap<String, ValueContainer>;

/// Parses `Field = …;` or `Field { … }` against the active type and stores
/// the results in `values`. Returns the field's name.
pub fn parse_field(
    stream: &mut TokenStream,
    ctx: &mut Context,
    scope: &mut Scope,
    values: &mut Values,
) -> Result<String, KdlError> {
    let (name, at) = stream.expect_identifier()?;
    let instance = ctx.current_type.clone().ok_or_else(|| {
        KdlError::compile(ReasonCode::UnknownField, format!("field \"{}\" outside of a declaration", name), &at)
    })?;
    let field = instance.field_named(&name).ok_or_else(|| {
        KdlError::compile(
            ReasonCode::UnknownField,
            format!("no field \"{}\" on type \"{}\"", name, instance.name),
            &at,
        )
    })?;
    if field.has_decorator(&Decorator::Deprecated) {
        warn!(field = %name, r#type = %instance.name, location = %at, "field is deprecated");
    }

    match &field.repeatable {
        Some(repeat) => {
            let counter = ctx.repeat_counters.entry(repeat.count_label.clone()).or_insert(repeat.lower);
            let number = *counter;
            if number > repeat.upper {
                return Err(KdlError::compile(
                    ReasonCode::RepeatBoundExceeded,
                    format!(
                        "field \"{}\" repeats more than {} times",
                        name,
                        repeat.upper - repeat.lower + 1
                    ),
                    &at,
                ));
            }
            *counter += 1;
            trace!(field = %name, count = number, "repeated field");

            let mut item_scope = scope.child();
            item_scope.set_variable("FieldNumber", Token::integer(number, &at));
            let mut entry = Values::new();
            parse_assignment(stream, ctx, &mut item_scope, field, &mut entry)?;

            let list = values
                .entry(repeat.count_label.clone())
                .or_insert_with(|| ValueContainer::List(Vec::new()));
            if let ValueContainer::List(items) = list {
                items.push(entry);
            }
        }
        None => {
            trace!(field = %name, "field");
            parse_assignment(stream, ctx, scope, field, values)?;
        }
    }

    Ok(name)
}

fn parse_assignment(
    stream: &mut TokenStream,
    ctx: &mut Context,
    scope: &mut Scope,
    field: &Field,
    out: &mut Values,
) -> Result<(), KdlError> {
    let at = stream.location();
    let mut assigned = vec![false; field.values.len()];

    if stream.eat_symbol(Symbol::LBrace) {
        while !stream.eat_symbol(Symbol::RBrace) {
            let (label, label_at) = stream.expect_identifier()?;
            let index = field.values.iter().position(|v| v.label == label).ok_or_else(|| {
                KdlError::compile(
                    ReasonCode::UnknownField,
                    format!("field \"{}\" has no value \"{}\"", field.name, label),
                    &label_at,
                )
            })?;
            stream.expect_symbol(Symbol::Assign)?;
            parse_value(stream, ctx, scope, &field.values[index], out)?;
            stream.expect_symbol(Symbol::Semicolon)?;
            assigned[index] = true;
        }
        stream.eat_symbol(Symbol::Semicolon);
    } else {
        stream.expect_symbol(Symbol::Assign)?;
        let mut index = 0;
        loop {
            let slot = field.values.get(index).ok_or_else(|| {
                KdlError::compile(
                    ReasonCode::TooManyValues,
                    format!("field \"{}\" takes at most {} values", field.name, field.values.len()),
                    &stream.location(),
                )
            })?;
            parse_value(stream, ctx, scope, slot, out)?;
            assigned[index] = true;
            index += 1;
            if !stream.eat_symbol(Symbol::Comma) {
                break;
            }
        }
        stream.expect_symbol(Symbol::Semicolon)?;
    }

    for (slot, _) in field.values.iter().zip(assigned).filter(|(_, done)| !done) {
        if has_default(slot) {
            let synthetic = [Token::new(TokenKind::DefaultValue, at.clone())];
            store_expression(ctx, scope, slot, &synthetic, out)?;
        }
    }
    Ok(())
}

/// Stores the defaults of every value of `field`. Used by `@synthesize`.
pub fn synthesize_field(ctx: &Context, scope: &Scope, field: &Field, out: &mut Values) -> Result<(), KdlError> {
    if field.repeatable.is_some() {
        return Ok(());
    }
    for slot in &field.values {
        if has_default(slot) {
            let synthetic = [Token::new(TokenKind::DefaultValue, Location::builtin())];
            store_expression(ctx, scope, slot, &synthetic, out)?;
        }
    }
    Ok(())
}

/// A slot can be filled from defaults when it or any joined companion has one.
fn has_default(slot: &FieldValue) -> bool {
    slot.default.is_some() || slot.joined.iter().any(|j| j.default.is_some())
}

fn parse_value(
    stream: &mut TokenStream,
    ctx: &mut Context,
    scope: &mut Scope,
    slot: &FieldValue,
    out: &mut Values,
) -> Result<(), KdlError> {
    let at = stream.location();

    if matches!(stream.peek().kind, TokenKind::Decorator(_)) || stream.peek().is_keyword(Keyword::New) {
        let decorators = parse_decorators(stream);
        let declared = match &slot.value_type {
            ValueType::Reference(target) => target.as_ref().and_then(|t| ctx.registry.type_named(t)),
            other => {
                return Err(KdlError::compile(
                    ReasonCode::ValueTypeMismatch,
                    format!("value \"{}\" of type {:?} cannot hold a new resource", slot.label, other),
                    &at,
                ))
            }
        };
        let reference = parse_new(stream, ctx, scope, declared, decorators)?;
        out.insert(slot.label.clone(), ValueContainer::Reference(reference));
        return Ok(());
    }

    if stream.eat_keyword(Keyword::Import) {
        let mut paths = Vec::new();
        let multi = stream.eat_symbol(Symbol::LBrace);
        if multi {
            while !stream.eat_symbol(Symbol::RBrace) {
                let tokens = stream.take_expression(|t| t.is_symbol(Symbol::Semicolon))?;
                paths.push(import_path(&tokens, scope)?);
                stream.expect_symbol(Symbol::Semicolon)?;
            }
        } else {
            let tokens = stream.take_expression(value_end)?;
            paths.push(import_path(&tokens, scope)?);
        }
        let bytes = import_files(&paths, multi, &slot.value_type, &ctx.import_root, ctx.converter, &at)?;
        out.insert(slot.label.clone(), ValueContainer::Data(bytes));
        return Ok(());
    }

    let tokens = stream.take_expression(value_end)?;
    store_expression(ctx, scope, slot, &tokens, out)
}

fn value_end(token: &Token) -> bool {
    token.is_symbol(Symbol::Comma) || token.is_symbol(Symbol::Semicolon)
}

fn import_path(tokens: &[Token], scope: &mut Scope) -> Result<(String, Location), KdlError> {
    let value = evaluate(tokens, scope)?;
    match value.kind {
        TokenKind::String(path) => Ok((path, value.location)),
        _ => Err(KdlError::compile(
            ReasonCode::ValueTypeMismatch,
            format!("import expects a file path, found {}", value.type_name()),
            &value.location,
        )),
    }
}

fn is_default(tokens: &[Token]) -> bool {
    matches!(
        tokens,
        [Token { kind: TokenKind::DefaultValue | TokenKind::Keyword(Keyword::Default), .. }]
    )
}

fn has_top_level(tokens: &[Token], op: Operator) -> bool {
    split_top_level(tokens, op).len() > 1
}

fn split_top_level(tokens: &[Token], op: Operator) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::Symbol(Symbol::LParen | Symbol::LBracket | Symbol::LBrace) => depth += 1,
            TokenKind::Symbol(Symbol::RParen | Symbol::RBracket | Symbol::RBrace) => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::Operator(o) if *o == op && depth == 0 => {
                parts.push(&tokens[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[start..]);
    parts
}

/// Resolves one value expression for `slot` (and its joined companions)
/// and stores the result.
fn store_expression(
    ctx: &Context,
    scope: &Scope,
    slot: &FieldValue,
    tokens: &[Token],
    out: &mut Values,
) -> Result<(), KdlError> {
    let at = tokens.first().map(|t| t.location.clone()).unwrap_or_else(Location::builtin);
    let bitmask = !slot.joined.is_empty() || (!slot.symbols.is_empty() && has_top_level(tokens, Operator::BitOr));

    if bitmask {
        let slots: Vec<&FieldValue> = std::iter::once(slot).chain(slot.joined.iter()).collect();
        for (slot, mask) in slots.iter().zip(join_masks(ctx, scope, &slots, tokens)?) {
            out.insert(slot.label.clone(), ValueContainer::Integer(mask));
        }
        return Ok(());
    }

    if is_default(tokens) {
        let default = slot.default.as_deref().ok_or_else(|| {
            KdlError::compile(
                ReasonCode::ValueTypeMismatch,
                format!("value \"{}\" has no default", slot.label),
                &at,
            )
        })?;
        return store_expression(ctx, scope, slot, default, out);
    }

    let token = evaluate_value(ctx, scope, slot, tokens)?;
    store_token(slot, token, out)
}

/// Each `|` separated part is looked up in the primary symbol table, then in
/// the joined ones, and its bits go to the mask of the slot that defines it.
/// Literals and other expressions go to the primary mask.
fn join_masks(ctx: &Context, scope: &Scope, slots: &[&FieldValue], tokens: &[Token]) -> Result<Vec<i64>, KdlError> {
    let mut masks = vec![0i64; slots.len()];

    for part in split_top_level(tokens, Operator::BitOr) {
        let first = part.first().ok_or_else(|| {
            KdlError::compile(
                ReasonCode::MalformedExpression,
                "empty operand in bitmask",
                &tokens.first().map(|t| t.location.clone()).unwrap_or_else(Location::builtin),
            )
        })?;

        if is_default(part) {
            for (mask, slot) in masks.iter_mut().zip(slots) {
                if let Some(default) = &slot.default {
                    *mask |= join_masks(ctx, scope, &[*slot], default)?[0];
                }
            }
            continue;
        }

        if let [Token { kind: TokenKind::Identifier(name), .. }] = part {
            if scope.variable(name).is_none() {
                let found = slots
                    .iter()
                    .enumerate()
                    .find_map(|(index, slot)| slot.symbols.get(name).map(|value| (index, value)));
                match found {
                    Some((index, value)) => {
                        masks[index] |= mask_bits(value)?;
                        continue;
                    }
                    None => {
                        return Err(KdlError::compile(
                            ReasonCode::UnknownSymbol,
                            format!("\"{}\" is not a symbol of \"{}\"", name, slots[0].label),
                            &first.location,
                        ))
                    }
                }
            }
        }

        let value = evaluate_value(ctx, scope, slots[0], part)?;
        masks[0] |= mask_bits(&value)?;
    }

    Ok(masks)
}

fn mask_bits(token: &Token) -> Result<i64, KdlError> {
    match token.kind {
        TokenKind::Integer(value) => Ok(value),
        TokenKind::Boolean(value) => Ok(value as i64),
        _ => Err(KdlError::compile(
            ReasonCode::ValueTypeMismatch,
            format!("bitmask operand must be an integer, found {}", token.type_name()),
            &token.location,
        )),
    }
}

/// Evaluates `tokens` in a child of `scope` that also holds the slot's
/// symbols and the helpers of its value type.
fn evaluate_value(ctx: &Context, scope: &Scope, slot: &FieldValue, tokens: &[Token]) -> Result<Token, KdlError> {
    let mut local = scope.child();
    for (name, value) in &slot.symbols {
        local.set_variable(name, value.clone());
    }
    install_value_helpers(&mut local, &slot.value_type, &ctx.registry);
    let mut token = evaluate(tokens, &mut local)?;

    if let ValueType::Reference(target) = &slot.value_type {
        if let TokenKind::Integer(id) = token.kind {
            token.kind = TokenKind::Reference(Reference::new(id));
        }
        if let TokenKind::Reference(reference) = &mut token.kind {
            if reference.type_name.is_none() {
                reference.type_name = target.clone();
            }
        }
    }
    if let TokenKind::Reference(reference) = &mut token.kind {
        if reference.type_code.is_none() {
            let code = reference
                .type_name
                .as_deref()
                .and_then(|name| ctx.registry.type_named(name))
                .map(|t| t.code);
            reference.type_code = code;
        }
    }
    Ok(token)
}

fn mismatch(slot: &FieldValue, token: &Token) -> KdlError {
    KdlError::compile(
        ReasonCode::ValueTypeMismatch,
        format!(
            "value \"{}\" of type {:?} cannot hold {} \"{}\"",
            slot.label,
            slot.value_type,
            token.type_name(),
            token
        ),
        &token.location,
    )
}

fn store_token(slot: &FieldValue, token: Token, out: &mut Values) -> Result<(), KdlError> {
    let value = match (&slot.value_type, &token.kind) {
        (ValueType::Integer | ValueType::Color, TokenKind::Integer(v)) => ValueContainer::Integer(*v),
        (ValueType::Integer | ValueType::Boolean, TokenKind::Boolean(b)) => ValueContainer::Integer(*b as i64),
        (ValueType::Boolean, TokenKind::Integer(v)) => ValueContainer::Integer((*v != 0) as i64),
        (ValueType::String, TokenKind::String(s)) => ValueContainer::String(s.clone()),
        (ValueType::Reference(_), TokenKind::Reference(r)) => ValueContainer::Reference(r.clone()),
        (ValueType::Rect, TokenKind::Compound(c)) if c.type_name == RECT_TYPE => rect_container(c),
        (ValueType::Data | ValueType::File(_) | ValueType::Files(_), TokenKind::String(s)) => {
            ValueContainer::Data(s.clone().into_bytes())
        }
        (ValueType::Nested(name), TokenKind::Compound(c)) if &c.type_name == name => {
            return flatten_into(&slot.label, c, out);
        }
        _ => return Err(mismatch(slot, &token)),
    };
    out.insert(slot.label.clone(), value);
    Ok(())
}

fn rect_container(compound: &Compound) -> ValueContainer {
    let get = |label: &str| compound.get(label).and_then(|t| t.as_integer()).unwrap_or(0);
    ValueContainer::Rect {
        x:      get("X"),
        y:      get("Y"),
        width:  get("Width"),
        height: get("Height"),
    }
}

/// Stores a constructed compound as `label.Sub` values. Rect compounds stay
/// whole.
fn flatten_into(label: &str, compound: &Compound, out: &mut Values) -> Result<(), KdlError> {
    for (sub, token) in &compound.values {
        let key = format!("{}.{}", label, sub);
        let value = match &token.kind {
            TokenKind::Compound(inner) if inner.type_name == RECT_TYPE => rect_container(inner),
            TokenKind::Compound(inner) => {
                flatten_into(&key, inner, out)?;
                continue;
            }
            TokenKind::Integer(v) => ValueContainer::Integer(*v),
            TokenKind::Boolean(b) => ValueContainer::Integer(*b as i64),
            TokenKind::String(s) => ValueContainer::String(s.clone()),
            TokenKind::Reference(r) => ValueContainer::Reference(r.clone()),
            _ => {
                return Err(KdlError::compile(
                    ReasonCode::ValueTypeMismatch,
                    format!("\"{}\" cannot hold {} \"{}\"", key, token.type_name(), token),
                    &token.location,
                ))
            }
        };
        out.insert(key, value);
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
    use crate::type_parser::parse_type;
    use std::path::PathBuf;

    const TYPES: &str = r#"
        type Point : "pnt " {
            template { DWRD "X"; DWRD "Y"; };
            field("X") { X; };
            field("Y") { Y; };
            constructor(x, y) { this.X = x; this.Y = y; };
        };
        type Widget : "wdgt" {
            template {
                DWRD "Count";
                HWRD "Flags";
                HBYT "Style";
                NESTED<Point> "Origin";
                RECT "Bounds";
                OCNT "Items" { PSTR "Text"; DWRD "Number"; };
                DWRD "Level";
                HWRD "Mode";
                HBYT "Weight";
            };
            field("Count") { Count = 7; };
            field("Flags") {
                Flags [ Alpha = 0x01, Beta = 0x02, Gamma = 0x04 ] = Alpha
                join Style [ Bold = 0x10, Italic = 0x20 ] = Italic;
            };
            field("Origin") { Origin as Point; };
            field("Bounds") { Bounds as Rect; };
            repeatable<1, 2, Items> field("Item") { Text; Number = FieldNumber; };
            field("Shade") {
                Level;
                Mode [ Dim = 0x01, Lit = 0x02 ] join Weight [ Light = 0x40, Heavy = 0x80 ] = Heavy;
            };
        };
    "#;

    fn run(body: &str) -> Result<Values, KdlError> {
        let options = CompileOptions::default();
        let mut ctx = Context::new(
            TypeRegistry::with_builtins()?,
            &options,
            &PassthroughConverter,
            &BinaryInterfaceEncoder,
            PathBuf::from("."),
        );
        let mut scope = Scope::new();
        let mut stream = TokenStream::new(tokenize(TYPES, "types.kdl"));
        while !stream.finished() {
            parse_type(&mut stream, &mut ctx, &mut scope, Vec::new())?;
        }
        ctx.current_type = ctx.registry.type_named("Widget");

        let mut values = Values::new();
        let mut stream = TokenStream::new(tokenize(body, "body.kdl"));
        while !stream.finished() {
            parse_field(&mut stream, &mut ctx, &mut scope, &mut values)?;
        }
        Ok(values)
    }

    fn int(values: &Values, label: &str) -> Option<i64> {
        match values.get(label) {
            Some(ValueContainer::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    #[test]
    fn plain_values_and_defaults() {
        let values = run("Count = 2 * 21;").unwrap();
        assert_eq!(int(&values, "Count"), Some(42));
        let values = run("Count = default;").unwrap();
        assert_eq!(int(&values, "Count"), Some(7));
    }

    #[test]
    fn bitmask_join_is_order_independent() {
        let a = run("Flags = Alpha | Beta | Bold;").unwrap();
        let b = run("Flags = Bold | Beta | Alpha;").unwrap();
        assert_eq!(int(&a, "Flags"), Some(0x03));
        assert_eq!(int(&a, "Style"), Some(0x10));
        assert_eq!(a, b);

        let values = run("Flags = default | Gamma;").unwrap();
        assert_eq!(int(&values, "Flags"), Some(0x05));
        assert_eq!(int(&values, "Style"), Some(0x20));

        let err = run("Flags = Alpha | Delta;").unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::UnknownSymbol));
    }

    #[test]
    fn unassigned_joined_companion_takes_its_default() {
        let values = run("Shade = 5;").unwrap();
        assert_eq!(int(&values, "Level"), Some(5));
        assert_eq!(int(&values, "Mode"), Some(0));
        assert_eq!(int(&values, "Weight"), Some(0x80));

        let values = run("Shade = 5, Lit;").unwrap();
        assert_eq!(int(&values, "Mode"), Some(0x02));
        assert_eq!(int(&values, "Weight"), Some(0));
    }

    #[test]
    fn constructors_and_rects() {
        let values = run("Origin = Point(3, 4); Bounds = frame(1, 2, 30, 40);").unwrap();
        assert_eq!(int(&values, "Origin.X"), Some(3));
        assert_eq!(int(&values, "Origin.Y"), Some(4));
        assert_eq!(
            values.get("Bounds"),
            Some(&ValueContainer::Rect { x: 1, y: 2, width: 30, height: 40 })
        );
        let err = run("Origin = 5;").unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::ValueTypeMismatch));
    }

    #[test]
    fn repeated_fields_count_from_lower_bound() {
        let values = run(r#"Item = "a"; Item { Text = "b"; }; Item = "c";"#).unwrap_err();
        assert_eq!(values.code(), Some(ReasonCode::RepeatBoundExceeded));

        let values = run(r#"Item = "a"; Item { Text = "b"; };"#).unwrap();
        let items = match values.get("Items") {
            Some(ValueContainer::List(items)) => items,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get("Text"), Some(&ValueContainer::String("a".into())));
        assert_eq!(items[0].get("Number"), Some(&ValueContainer::Integer(1)));
        assert_eq!(items[1].get("Number"), Some(&ValueContainer::Integer(2)));
    }

    #[test]
    fn shape_errors() {
        let code = |body: &str| run(body).unwrap_err().code();
        assert_eq!(code("Size = 1;"), Some(ReasonCode::UnknownField));
        assert_eq!(code("Count = 1, 2;"), Some(ReasonCode::TooManyValues));
        assert_eq!(code("Count { Nope = 1; }"), Some(ReasonCode::UnknownField));
        assert_eq!(code("Count = import \"x.bin\";"), Some(ReasonCode::ImportNotAllowed));
        assert_eq!(code("Count = 1"), Some(ReasonCode::UnexpectedEndOfInput));
    }
}
