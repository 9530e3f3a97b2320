//! `scene` and `dialog` blocks.
//!
//! A scene is parsed into a [`SceneInterface`], handed to the context's
//! interface encoder, and stored as the single `Data` value of a
//! `SceneInterface` resource.

use crate::builtins::SCENE_INTERFACE;
use crate::error::{KdlError, Location, ReasonCode};
use crate::helpers::{argument_count, install_color_helpers, install_rect_helpers, RECT_TYPE};
use crate::interpreter::{evaluate, execute};
use crate::resource::{Context, ResourceInstance, ValueContainer};
use crate::scene::{
    Action, AttributeKind, Background, ElementKind, ElementValue, Rect, SceneElement, SceneInterface,
};
use crate::scope::{native, Scope};
use crate::stream::TokenStream;
use crate::token::{Compound, Keyword, Operator, Reference, Symbol, Token, TokenKind};
use indexmap::IndexMap;
use tracing::debug;

const ALIGNMENTS: &[(&str, i64)] = &[
    ("Left", 0),
    ("Top", 0),
    ("Center", 1),
    ("Middle", 1),
    ("Right", 2),
    ("Bottom", 2),
];

fn compound(type_name: &str, values: Vec<(String, Token)>, at: &Location) -> Token {
    let mut compound = Compound::new(type_name);
    compound.values = values;
    Token::new(TokenKind::Compound(compound), at.clone())
}

fn reference_argument(function: &str, arg: &Token) -> Result<Token, KdlError> {
    match &arg.kind {
        TokenKind::Reference(_) => Ok(arg.clone()),
        TokenKind::Integer(id) => Ok(Token::reference(Reference::new(*id), &arg.location)),
        _ => Err(KdlError::compile(
            ReasonCode::ArgumentMismatch,
            format!("{}() expects a resource reference, found {}", function, arg.type_name()),
            &arg.location,
        )),
    }
}

fn string_argument(function: &str, arg: &Token) -> Result<Token, KdlError> {
    match &arg.kind {
        TokenKind::String(_) => Ok(arg.clone()),
        _ => Err(KdlError::compile(
            ReasonCode::ArgumentMismatch,
            format!("{}() expects a string, found {}", function, arg.type_name()),
            &arg.location,
        )),
    }
}

fn install_reference_helper(scope: &mut Scope, name: &'static str) {
    scope.add_function(
        name,
        native(move |args, at| {
            argument_count(name, args, 1, at)?;
            Ok(compound(name, vec![("Reference".into(), reference_argument(name, &args[0])?)], at))
        }),
    );
}

/// Helpers and constants available to scene and element attribute values.
pub fn install_scene_helpers(scope: &mut Scope) {
    install_color_helpers(scope);
    install_rect_helpers(scope);

    let location = Location::builtin();
    for (name, value) in ALIGNMENTS {
        scope.set_variable(name, Token::integer(*value, &location));
    }

    install_reference_helper(scope, "Image");
    install_reference_helper(scope, "PushScene");
    install_reference_helper(scope, "Script");

    scope.add_function(
        "Function",
        native(|args, at| {
            argument_count("Function", args, 1, at)?;
            Ok(compound("Function", vec![("Name".into(), string_argument("Function", &args[0])?)], at))
        }),
    );
    scope.add_function(
        "ImageList",
        native(|args, at| {
            let values = args
                .iter()
                .enumerate()
                .map(|(index, arg)| reference_argument("ImageList", arg).map(|r| (index.to_string(), r)))
                .collect::<Result<Vec<_>, KdlError>>()?;
            Ok(compound("ImageList", values, at))
        }),
    );
    scope.add_function(
        "StringList",
        native(|args, at| {
            let values = args
                .iter()
                .enumerate()
                .map(|(index, arg)| (index.to_string(), Token::string(&arg.coerce_string(), &arg.location)))
                .collect();
            Ok(compound("StringList", values, at))
        }),
    );
    scope.add_function(
        "Get",
        native(|args, at| {
            if args.is_empty() || args.len() % 2 == 0 {
                return Err(KdlError::compile(
                    ReasonCode::ArgumentMismatch,
                    "Get() takes a reference followed by key/value pairs",
                    at,
                ));
            }
            let mut values = vec![("Reference".to_string(), reference_argument("Get", &args[0])?)];
            for pair in args[1..].chunks(2) {
                let key = string_argument("Get", &pair[0])?.coerce_string();
                values.push((key, pair[1].clone()));
            }
            Ok(compound("Get", values, at))
        }),
    );
}

fn invalid(msg: impl Into<String>, at: &Location) -> KdlError {
    KdlError::compile(ReasonCode::InvalidAttributeValue, msg, at)
}

fn single<'t>(name: &str, values: &'t [Token], at: &Location) -> Result<&'t Token, KdlError> {
    match values {
        [value] => Ok(value),
        _ => Err(invalid(format!("{} takes one value, found {}", name, values.len()), at)),
    }
}

fn integer(name: &str, token: &Token) -> Result<i64, KdlError> {
    match token.kind {
        TokenKind::Integer(v) => Ok(v),
        TokenKind::Boolean(b) => Ok(b as i64),
        _ => Err(invalid(
            format!("{} expects an integer, found {}", name, token.type_name()),
            &token.location,
        )),
    }
}

fn rect_of(compound: &Compound) -> Rect {
    let get = |label: &str| compound.get(label).and_then(|t| t.as_integer()).unwrap_or(0);
    Rect {
        x:      get("X"),
        y:      get("Y"),
        width:  get("Width"),
        height: get("Height"),
    }
}

/// `Frame = x, y, w, h;` or `Frame = frame(x, y, w, h);`
fn rect_value(name: &str, values: &[Token], at: &Location) -> Result<Rect, KdlError> {
    match values {
        [Token { kind: TokenKind::Compound(c), .. }] if c.type_name == RECT_TYPE => Ok(rect_of(c)),
        [x, y, width, height] => Ok(Rect {
            x:      integer(name, x)?,
            y:      integer(name, y)?,
            width:  integer(name, width)?,
            height: integer(name, height)?,
        }),
        _ => Err(invalid(format!("{} takes four values or a frame()", name), at)),
    }
}

fn compound_reference(compound: &Compound, at: &Location) -> Result<Reference, KdlError> {
    match compound.get("Reference").map(|t| &t.kind) {
        Some(TokenKind::Reference(r)) => Ok(r.clone()),
        _ => Err(invalid(format!("{} is missing its reference", compound.type_name), at)),
    }
}

fn references(compound: &Compound) -> Vec<Reference> {
    compound
        .values
        .iter()
        .filter_map(|(_, token)| match &token.kind {
            TokenKind::Reference(r) => Some(r.clone()),
            _ => None,
        })
        .collect()
}

/// Converts an evaluated attribute value into its structured form.
pub fn element_value(token: &Token) -> Result<ElementValue, KdlError> {
    let at = &token.location;
    let value = match &token.kind {
        TokenKind::Integer(v) => ElementValue::Integer(*v),
        TokenKind::Boolean(b) => ElementValue::Integer(*b as i64),
        TokenKind::String(s) => ElementValue::Text(s.clone()),
        TokenKind::Reference(r) => ElementValue::Reference(r.clone()),
        TokenKind::Compound(c) => match c.type_name.as_str() {
            RECT_TYPE => ElementValue::Rect(rect_of(c)),
            "Image" => ElementValue::Image(compound_reference(c, at)?),
            "ImageList" => ElementValue::ImageList(references(c)),
            "StringList" => ElementValue::StringList(c.values.iter().map(|(_, t)| t.coerce_string()).collect()),
            "Get" => {
                let mut side_values = Vec::new();
                for (key, value) in c.values.iter().skip(1) {
                    side_values.push((key.clone(), element_value(value)?));
                }
                ElementValue::Lookup {
                    reference: compound_reference(c, at)?,
                    side_values,
                }
            }
            "PushScene" => ElementValue::Action(Action::PushScene(compound_reference(c, at)?)),
            "Script" => ElementValue::Action(Action::Script(compound_reference(c, at)?)),
            "Function" => ElementValue::Action(Action::Function(
                c.get("Name").map(|t| t.coerce_string()).unwrap_or_default(),
            )),
            other => return Err(invalid(format!("{} values cannot be used in a scene", other), at)),
        },
        _ => return Err(invalid(format!("{} values cannot be used in a scene", token.type_name()), at)),
    };
    Ok(value)
}

fn attribute_value(kind: AttributeKind, values: &[Token], at: &Location) -> Result<ElementValue, KdlError> {
    let name = kind.name();
    let value = match kind {
        AttributeKind::Frame => ElementValue::Rect(rect_value(name, values, at)?),
        AttributeKind::AxisOrigin => match values {
            [x, y] => ElementValue::Point {
                x: integer(name, x)?,
                y: integer(name, y)?,
            },
            _ => return Err(invalid(format!("{} takes two values", name), at)),
        },
        AttributeKind::Color
        | AttributeKind::BackgroundColor
        | AttributeKind::SelectionColor
        | AttributeKind::BorderColor => {
            let token = single(name, values, at)?;
            let color = u32::try_from(integer(name, token)?)
                .map_err(|_| invalid(format!("{} is not a 32-bit color", token), &token.location))?;
            ElementValue::Color(color)
        }
        AttributeKind::FontSize
        | AttributeKind::HorizontalAlignment
        | AttributeKind::VerticalAlignment
        | AttributeKind::Weight => ElementValue::Integer(integer(name, single(name, values, at)?)?),
        AttributeKind::Hidden => ElementValue::Integer((integer(name, single(name, values, at)?)? != 0) as i64),
        AttributeKind::Font => match &single(name, values, at)?.kind {
            TokenKind::String(font) => ElementValue::Text(font.clone()),
            _ => return Err(invalid("Font expects a font name", at)),
        },
        AttributeKind::Action => match element_value(single(name, values, at)?)? {
            action @ ElementValue::Action(_) => action,
            _ => return Err(invalid("Action expects PushScene(), Function() or Script()", at)),
        },
        AttributeKind::Value => match values {
            [value] => element_value(value)?,
            _ if values.iter().all(|v| matches!(v.kind, TokenKind::String(_))) => {
                ElementValue::StringList(values.iter().map(|v| v.coerce_string()).collect())
            }
            _ => return Err(invalid("several values must all be strings", at)),
        },
    };
    Ok(value)
}

/// `= expr, expr, …;` evaluated in the attribute scope.
fn parse_attribute_values(stream: &mut TokenStream, scope: &mut Scope) -> Result<Vec<Token>, KdlError> {
    stream.expect_symbol(Symbol::Assign)?;
    let mut values = Vec::new();
    loop {
        let tokens = stream.take_expression(|t| t.is_symbol(Symbol::Comma) || t.is_symbol(Symbol::Semicolon))?;
        values.push(evaluate(&tokens, scope)?);
        if !stream.eat_symbol(Symbol::Comma) {
            break;
        }
    }
    stream.expect_symbol(Symbol::Semicolon)?;
    Ok(values)
}

fn set_scene_attribute(
    interface: &mut SceneInterface,
    name: &str,
    values: &[Token],
    at: &Location,
) -> Result<(), KdlError> {
    match name {
        "Title" => interface.title = single(name, values, at)?.coerce_string(),
        "Flags" => {
            let token = single(name, values, at)?;
            interface.flags = u16::try_from(integer(name, token)?)
                .map_err(|_| invalid(format!("Flags {} do not fit 16 bits", token), &token.location))?;
        }
        "Size" => match values {
            [width, height] => interface.size = (integer(name, width)?, integer(name, height)?),
            _ => return Err(invalid("Size takes a width and a height", at)),
        },
        "Frame" => interface.frame = Some(rect_value(name, values, at)?),
        "Background" => {
            interface.background = match values {
                [single] => Background::Single(element_value(single)?),
                [start, middle, end] => Background::Stretch(Box::new([
                    element_value(start)?,
                    element_value(middle)?,
                    element_value(end)?,
                ])),
                _ => return Err(invalid("Background takes one value or three stretch parts", at)),
            }
        }
        other => {
            return Err(KdlError::compile(
                ReasonCode::UnknownAttribute,
                format!("scenes have no attribute \"{}\"", other),
                at,
            ))
        }
    }
    Ok(())
}

fn parse_element(stream: &mut TokenStream, scope: &Scope) -> Result<SceneElement, KdlError> {
    let mut locals = scope.child();
    let (name, at) = stream.expect_identifier()?;
    let kind = ElementKind::from_name(&name).ok_or_else(|| {
        KdlError::compile(ReasonCode::UnknownElement, format!("unknown element kind \"{}\"", name), &at)
    })?;

    let mut id = String::new();
    if stream.eat_symbol(Symbol::LParen) {
        id = stream.expect_string()?.0;
        stream.expect_symbol(Symbol::RParen)?;
    }

    let mut element = SceneElement {
        kind,
        id,
        attributes: Vec::new(),
        location: at,
    };

    stream.expect_symbol(Symbol::LBrace)?;
    while !stream.eat_symbol(Symbol::RBrace) {
        if let TokenKind::Variable(_) = stream.peek().kind {
            let statement = stream.take_expression(|t| t.is_symbol(Symbol::Semicolon))?;
            execute(&statement, &mut locals)?;
            stream.expect_symbol(Symbol::Semicolon)?;
            continue;
        }
        let (attribute, attribute_at) = stream.expect_identifier()?;
        let kind = AttributeKind::from_name(&attribute).ok_or_else(|| {
            KdlError::compile(
                ReasonCode::UnknownAttribute,
                format!("{} elements have no attribute \"{}\"", element.kind.name(), attribute),
                &attribute_at,
            )
        })?;
        let values = parse_attribute_values(stream, &mut locals)?;
        let value = attribute_value(kind, &values, &attribute_at)?;
        match element.attributes.iter_mut().find(|(k, _)| *k == kind) {
            Some(slot) => slot.1 = value,
            None => element.attributes.push((kind, value)),
        }
    }
    stream.eat_symbol(Symbol::Semicolon);
    Ok(element)
}

/// `scene <id> ["Name"] { attributes and elements }`, or the same with
/// `dialog`. Returns the reference of the produced interface resource.
pub fn parse_scene(stream: &mut TokenStream, ctx: &mut Context, scope: &mut Scope) -> Result<Reference, KdlError> {
    let at = stream.location();
    let dialog = if stream.eat_keyword(Keyword::Scene) {
        false
    } else if stream.eat_keyword(Keyword::Dialog) {
        true
    } else {
        return Err(stream.unexpected("\"scene\" or \"dialog\""));
    };

    stream.expect_operator(Operator::Less)?;
    let tokens = stream.take_expression(|t| t.is_operator(Operator::Greater))?;
    stream.expect_operator(Operator::Greater)?;
    let reference = match evaluate(&tokens, scope)? {
        Token { kind: TokenKind::Reference(r), .. } => r,
        Token { kind: TokenKind::Integer(id), .. } => Reference::new(id),
        other => {
            return Err(KdlError::compile(
                ReasonCode::MalformedReference,
                format!("scene id must be a reference, found {}", other.type_name()),
                &other.location,
            ))
        }
    };

    let name = match &stream.peek().kind {
        TokenKind::String(_) => stream.expect_string()?.0,
        _ => String::new(),
    };

    let mut interface = SceneInterface {
        dialog,
        title: name.clone(),
        ..SceneInterface::default()
    };

    let mut attributes = scope.child();
    install_scene_helpers(&mut attributes);

    stream.expect_symbol(Symbol::LBrace)?;
    while !stream.eat_symbol(Symbol::RBrace) {
        match (&stream.peek().kind, &stream.peek_at(1).kind) {
            (TokenKind::Variable(_), _) => {
                let statement = stream.take_expression(|t| t.is_symbol(Symbol::Semicolon))?;
                execute(&statement, &mut attributes)?;
                stream.expect_symbol(Symbol::Semicolon)?;
            }
            (TokenKind::Identifier(_), TokenKind::Symbol(Symbol::Assign)) => {
                let (attribute, attribute_at) = stream.expect_identifier()?;
                let values = parse_attribute_values(stream, &mut attributes)?;
                set_scene_attribute(&mut interface, &attribute, &values, &attribute_at)?;
            }
            (TokenKind::Identifier(_), _) => {
                let element = parse_element(stream, &attributes)?;
                interface.elements.push(element);
            }
            _ => return Err(stream.unexpected("scene attribute or element")),
        }
    }
    stream.eat_symbol(Symbol::Semicolon);

    let instance = ctx.registry.type_named(SCENE_INTERFACE).ok_or_else(|| {
        KdlError::compile(ReasonCode::UnknownType, format!("unknown type \"{}\"", SCENE_INTERFACE), &at)
    })?;
    let id = ctx.claim_id(&instance.name, &reference, &at)?;
    let reference = Reference {
        id,
        type_name: Some(instance.name.clone()),
        type_code: Some(instance.code),
        container: reference.container,
        sentinel: None,
    };

    let data = ctx
        .interface_encoder
        .encode(&interface)
        .map_err(|e| KdlError::compile(e.code(), e.to_string(), &at))?;
    debug!(reference = %reference, elements = interface.elements.len(), bytes = data.len(), "encoded scene");

    let mut values = IndexMap::new();
    values.insert("Data".to_string(), ValueContainer::Data(data));
    ctx.push_resource(ResourceInstance {
        reference: reference.clone(),
        name,
        location: at,
        values,
    });
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::import::PassthroughConverter;
    use crate::registry::TypeRegistry;
    use crate::scene_encoder::{decode_interface, BinaryInterfaceEncoder};
    use crate::tokenizer::tokenize;
    use std::path::PathBuf;

    fn compile(text: &str) -> Result<Vec<ResourceInstance>, KdlError> {
        let options = CompileOptions::default();
        let mut ctx = Context::new(
            TypeRegistry::with_builtins()?,
            &options,
            &PassthroughConverter,
            &BinaryInterfaceEncoder,
            PathBuf::from("."),
        );
        let mut scope = Scope::new();
        let mut stream = TokenStream::new(tokenize(text, "scene.kdl"));
        while !stream.finished() {
            parse_scene(&mut stream, &mut ctx, &mut scope)?;
        }
        Ok(ctx.resources)
    }

    fn interface(resource: &ResourceInstance) -> SceneInterface {
        match resource.value("Data") {
            Some(ValueContainer::Data(bytes)) => decode_interface(bytes).unwrap(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn main_scene_with_one_button() {
        let resources = compile(
            r#"scene <1000> "Main" { Size = 320, 240; Button("ok") { Frame = 0,0,80,24; Value = "OK"; } }"#,
        )
        .unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].reference.id, 1000);
        assert_eq!(resources[0].reference.type_name.as_deref(), Some(SCENE_INTERFACE));

        let scene = interface(&resources[0]);
        assert_eq!(scene.title, "Main");
        assert_eq!(scene.size, (320, 240));
        assert_eq!(scene.elements.len(), 1);
        let button = &scene.elements[0];
        assert_eq!(button.kind, ElementKind::Button);
        assert_eq!(button.id, "ok");
        assert_eq!(
            button.attribute(AttributeKind::Frame),
            Some(&ElementValue::Rect(Rect { x: 0, y: 0, width: 80, height: 24 }))
        );
        assert_eq!(button.attribute(AttributeKind::Value), Some(&ElementValue::Text("OK".into())));
    }

    #[test]
    fn dialog_with_helpers() {
        let resources = compile(
            r#"dialog <#auto> "Confirm" {
                Title = "Are you sure?";
                Frame = frame(10, 10, 200, 100);
                Background = Image(#StaticImage.1), Image(#StaticImage.2), Image(#StaticImage.3);
                $inset = 8;
                Label { Frame = $inset, $inset, 100, 20; Color = rgb(255, 0, 0); HorizontalAlignment = Center; }
                Button("yes") { Action = PushScene(#1001); Value = Get(#5, "Row", 2); }
                List { Value = "a", "b"; Hidden = true; }
            }"#,
        )
        .unwrap();
        assert_eq!(resources[0].reference.id, 128);
        let scene = interface(&resources[0]);
        assert!(scene.dialog);
        assert_eq!(scene.title, "Are you sure?");
        assert_eq!(scene.frame, Some(Rect { x: 10, y: 10, width: 200, height: 100 }));
        assert!(matches!(scene.background, Background::Stretch(_)));

        let label = &scene.elements[0];
        assert_eq!(label.id, "");
        assert_eq!(label.attribute(AttributeKind::Color), Some(&ElementValue::Color(0xFFFF_0000)));
        assert_eq!(label.attribute(AttributeKind::HorizontalAlignment), Some(&ElementValue::Integer(1)));

        let button = &scene.elements[1];
        match button.attribute(AttributeKind::Action) {
            Some(ElementValue::Action(Action::PushScene(r))) => assert_eq!(r.id, 1001),
            other => panic!("unexpected {:?}", other),
        }
        match button.attribute(AttributeKind::Value) {
            Some(ElementValue::Lookup { reference, side_values }) => {
                assert_eq!(reference.id, 5);
                assert_eq!(side_values, &vec![("Row".to_string(), ElementValue::Integer(2))]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let list = &scene.elements[2];
        assert_eq!(
            list.attribute(AttributeKind::Value),
            Some(&ElementValue::StringList(vec!["a".into(), "b".into()]))
        );
        assert_eq!(list.attribute(AttributeKind::Hidden), Some(&ElementValue::Integer(1)));
    }

    #[test]
    fn element_variables_stay_in_their_element() {
        let resources = compile(
            r#"scene <1> { $w = 3; Label { $w = 5; Frame = $w, 0, 1, 1; } Label { Frame = $w, 0, 1, 1; } }"#,
        )
        .unwrap();
        let scene = interface(&resources[0]);
        let x = |i: usize| match scene.elements[i].attribute(AttributeKind::Frame) {
            Some(ElementValue::Rect(rect)) => rect.x,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!((x(0), x(1)), (5, 3));

        let err = compile(r#"scene <1> { Label { $h = 5; } Label { Frame = 0, 0, 1, $h; } }"#).unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::UnresolvedName));
    }

    #[test]
    fn scene_errors() {
        let code = |text: &str| compile(text).unwrap_err().code();
        assert_eq!(code("scene <1> { Gizmo { } }"), Some(ReasonCode::UnknownElement));
        assert_eq!(code("scene <1> { Button { Sparkle = 1; } }"), Some(ReasonCode::UnknownAttribute));
        assert_eq!(code("scene <1> { Opacity = 1; }"), Some(ReasonCode::UnknownAttribute));
        assert_eq!(code("scene <1> { Button { Frame = 1, 2; } }"), Some(ReasonCode::InvalidAttributeValue));
        assert_eq!(code("scene <1> { Size = 40000, 1; }"), Some(ReasonCode::ValueOutOfRange));
        assert_eq!(code("scene <1> { } scene <1> { }"), Some(ReasonCode::DuplicateResource));
        assert_eq!(code("scene <\"x\"> { }"), Some(ReasonCode::MalformedReference));
        assert_eq!(code("scene <1> { Label { Value = Get(#1, \"k\"); } }"), Some(ReasonCode::ArgumentMismatch));
    }
}
