//! Native functions installed into value scopes: color and rect helpers,
//! and constructors of source-defined types.

use crate::error::{KdlError, Location, ReasonCode};
use crate::interpreter::execute;
use crate::registry::{TypeHandle, TypeRegistry, ValueType};
use crate::scope::{native, Scope};
use crate::token::{Compound, Token, TokenKind};
use std::rc::Rc;

pub const RECT_TYPE: &str = "Rect";

pub(crate) fn argument_count(name: &str, args: &[Token], expected: usize, at: &Location) -> Result<(), KdlError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(KdlError::compile(
            ReasonCode::ArgumentMismatch,
            format!("{}() takes {} arguments but {} were given", name, expected, args.len()),
            at,
        ))
    }
}

pub(crate) fn integer_argument(name: &str, arg: &Token) -> Result<i64, KdlError> {
    match arg.kind {
        TokenKind::Integer(value) => Ok(value),
        _ => Err(KdlError::compile(
            ReasonCode::ArgumentMismatch,
            format!("{}() expects integer arguments, found {}", name, arg.type_name()),
            &arg.location,
        )),
    }
}

fn channel(name: &str, arg: &Token) -> Result<i64, KdlError> {
    let value = integer_argument(name, arg)?;
    if (0..=255).contains(&value) {
        Ok(value)
    } else {
        Err(KdlError::compile(
            ReasonCode::ValueOutOfRange,
            format!("{}() channel {} is outside 0..255", name, value),
            &arg.location,
        ))
    }
}

/// Packs channels as `0xAARRGGBB`.
pub fn pack_color(red: i64, green: i64, blue: i64, alpha: i64) -> i64 {
    (alpha << 24) | (red << 16) | (green << 8) | blue
}

pub fn install_color_helpers(scope: &mut Scope) {
    scope.add_function(
        "rgb",
        native(|args, at| {
            argument_count("rgb", args, 3, at)?;
            let color = pack_color(channel("rgb", &args[0])?, channel("rgb", &args[1])?, channel("rgb", &args[2])?, 255);
            Ok(Token::integer(color, at))
        }),
    );
    scope.add_function(
        "rgba",
        native(|args, at| {
            argument_count("rgba", args, 4, at)?;
            let color = pack_color(
                channel("rgba", &args[0])?,
                channel("rgba", &args[1])?,
                channel("rgba", &args[2])?,
                channel("rgba", &args[3])?,
            );
            Ok(Token::integer(color, at))
        }),
    );
}

/// A `Rect` compound with `X`, `Y`, `Width` and `Height` values.
pub fn rect_compound(values: [i64; 4], at: &Location) -> Token {
    let mut compound = Compound::new(RECT_TYPE);
    for (label, value) in ["X", "Y", "Width", "Height"].iter().zip(values) {
        compound.values.push((label.to_string(), Token::integer(value, at)));
    }
    Token::new(TokenKind::Compound(compound), at.clone())
}

pub fn install_rect_helpers(scope: &mut Scope) {
    for name in ["frame", "rect"] {
        scope.add_function(
            name,
            native(move |args, at| {
                argument_count(name, args, 4, at)?;
                let mut values = [0; 4];
                for (slot, arg) in values.iter_mut().zip(args) {
                    *slot = integer_argument(name, arg)?;
                }
                Ok(rect_compound(values, at))
            }),
        );
    }
}

/// Installs the helpers a value of `value_type` may use: color and rect
/// helpers for those types, and for nested types the constructors of the
/// type and of every type nested inside it.
pub fn install_value_helpers(scope: &mut Scope, value_type: &ValueType, registry: &TypeRegistry) {
    match value_type {
        ValueType::Color => install_color_helpers(scope),
        ValueType::Rect => install_rect_helpers(scope),
        ValueType::Nested(name) => {
            install_color_helpers(scope);
            install_rect_helpers(scope);
            install_constructors(scope, &Rc::new(registry.nested_closure(name)));
        }
        _ => {}
    }
}

pub fn install_constructors(scope: &mut Scope, types: &Rc<Vec<TypeHandle>>) {
    for instance in types.iter().filter(|t| !t.constructors.is_empty()) {
        let instance = Rc::clone(instance);
        let types = Rc::clone(types);
        let name = instance.name.clone();
        scope.add_function(&name, native(move |args, at| construct(&instance, &types, args, at)));
    }
}

/// Runs the constructor matching the argument count in a fresh scope and
/// gathers its `this.*` bindings into a compound.
fn construct(
    instance: &TypeHandle,
    types: &Rc<Vec<TypeHandle>>,
    args: &[Token],
    at: &Location,
) -> Result<Token, KdlError> {
    let constructor = instance
        .constructors
        .iter()
        .find(|c| c.parameters.len() == args.len())
        .ok_or_else(|| {
            KdlError::compile(
                ReasonCode::ArgumentMismatch,
                format!("no constructor of {} takes {} arguments", instance.name, args.len()),
                at,
            )
        })?;

    let mut scope = Scope::new();
    install_color_helpers(&mut scope);
    install_rect_helpers(&mut scope);
    install_constructors(&mut scope, types);
    for (parameter, arg) in constructor.parameters.iter().zip(args) {
        scope.set_variable(parameter, arg.clone());
    }
    for statement in &constructor.body {
        execute(statement, &mut scope)?;
    }

    let mut compound = Compound::new(&instance.name);
    for (name, value) in scope.local_variables_with_prefix("this.") {
        compound.values.push((name["this.".len()..].to_string(), value));
    }
    Ok(Token::new(TokenKind::Compound(compound), at.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::evaluate;
    use crate::registry::{Constructor, Field, FieldValue, TemplateField, TypeInstance};
    use crate::token::BinaryFieldType;
    use crate::tokenizer::tokenize;
    use kdl_format::TypeCode;

    fn eval(text: &str, scope: &mut Scope) -> Result<Token, KdlError> {
        evaluate(&tokenize(text, "test.kdl"), scope)
    }

    fn statements(text: &str) -> Vec<Vec<Token>> {
        text.split(';')
            .filter(|s| !s.trim().is_empty())
            .map(|s| tokenize(s, "test.kdl"))
            .collect()
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();

        let mut point = TypeInstance::new("Point", TypeCode(*b"pnt "));
        point.template.fields = vec![
            TemplateField::new(BinaryFieldType::Dwrd, "X"),
            TemplateField::new(BinaryFieldType::Dwrd, "Y"),
        ];
        point.constructors.push(Constructor {
            parameters: vec!["x".into(), "y".into()],
            body: statements("this.X = x; this.Y = y"),
        });
        registry.register_type(point).unwrap();

        let mut marker = TypeInstance::new("Marker", TypeCode(*b"mrkr"));
        marker.template.fields = vec![
            TemplateField::new(BinaryFieldType::Nested("Point".into()), "Origin"),
            TemplateField::new(BinaryFieldType::Hlng, "Tint"),
        ];
        marker.fields.push(Field::new(
            "Origin",
            vec![FieldValue::new("Origin", ValueType::Nested("Point".into()))],
        ));
        marker.constructors.push(Constructor {
            parameters: vec!["x".into(), "y".into()],
            body: statements("this.Origin = Point(x * 2, y); this.Tint = rgb(255, 0, 0)"),
        });
        registry.register_type(marker).unwrap();
        registry
    }

    #[test]
    fn color_helpers_pack_argb() {
        let mut scope = Scope::new();
        install_color_helpers(&mut scope);
        assert_eq!(eval("rgb(1, 2, 3)", &mut scope).unwrap().kind, TokenKind::Integer(0xFF01_0203));
        assert_eq!(eval("rgba(1, 2, 3, 4)", &mut scope).unwrap().kind, TokenKind::Integer(0x0401_0203));
        let err = eval("rgb(1, 2)", &mut scope).unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::ArgumentMismatch));
        let err = eval("rgb(1, 2, 300)", &mut scope).unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::ValueOutOfRange));
    }

    #[test]
    fn rect_helpers_build_compounds() {
        let mut scope = Scope::new();
        install_rect_helpers(&mut scope);
        let token = eval("frame(1, 2, 3, 4)", &mut scope).unwrap();
        match token.kind {
            TokenKind::Compound(c) => {
                assert_eq!(c.type_name, RECT_TYPE);
                assert_eq!(c.get("Height").and_then(|t| t.as_integer()), Some(4));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn nested_constructors_are_installed_transitively() {
        let registry = registry();
        let mut scope = Scope::new();
        install_value_helpers(&mut scope, &ValueType::Nested("Marker".into()), &registry);
        let token = eval("Marker(3, 4)", &mut scope).unwrap();
        let compound = match token.kind {
            TokenKind::Compound(c) => c,
            other => panic!("unexpected {:?}", other),
        };
        let flat: Vec<(String, Option<i64>)> = compound
            .flatten()
            .into_iter()
            .map(|(label, token)| (label, token.as_integer()))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("Origin.X".to_string(), Some(6)),
                ("Origin.Y".to_string(), Some(4)),
                ("Tint".to_string(), Some(0xFFFF_0000)),
            ]
        );
        assert!(scope.function("Point").is_some());
        let err = eval("Marker(1)", &mut scope).unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::ArgumentMismatch));
    }
}
