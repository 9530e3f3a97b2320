//! The binary UI format stored in `SceneInterface` resources.
//!
//! ```text
//! "SCN1" options:u16 flags:u16 title:PSTR width:i16 height:i16 frame:4*i16
//! background:(u8 kind, 0/1/3 values) count:u16 element*
//! element := kind:u8 id:PSTR count:u16 (tag:u8 value)*
//! ```

use crate::scene::{
    Action, AttributeKind, Background, ElementKind, ElementValue, Rect, SceneElement,
    SceneInterface,
};
use crate::error::{Location, ReasonCode};
use crate::token::Reference;
use kdl_format::{ByteBuffer, ByteBufferMut};
use thiserror::Error;

pub const INTERFACE_MAGIC: &[u8; 4] = b"SCN1";

const OPTION_DIALOG: u16 = 1 << 0;
const OPTION_FRAME: u16 = 1 << 1;

const VALUE_INTEGER: u8 = 0;
const VALUE_TEXT: u8 = 1;
const VALUE_REFERENCE: u8 = 2;
const VALUE_RECT: u8 = 3;
const VALUE_POINT: u8 = 4;
const VALUE_COLOR: u8 = 5;
const VALUE_IMAGE: u8 = 6;
const VALUE_IMAGE_LIST: u8 = 7;
const VALUE_STRING_LIST: u8 = 8;
const VALUE_LOOKUP: u8 = 9;
const VALUE_ACTION: u8 = 10;

#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    #[error("{0}")]
    OutOfRange(String),
    #[error("{0}")]
    Failed(String),
}

impl EncodeError {
    pub fn code(&self) -> ReasonCode {
        match self {
            EncodeError::OutOfRange(_) => ReasonCode::ValueOutOfRange,
            EncodeError::Failed(_) => ReasonCode::InterfaceEncodingFailed,
        }
    }
}

/// Turns a parsed scene into the bytes of its `SceneInterface` resource.
pub trait InterfaceEncoder {
    fn encode(&self, interface: &SceneInterface) -> Result<Vec<u8>, EncodeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryInterfaceEncoder;

impl InterfaceEncoder for BinaryInterfaceEncoder {
    fn encode(&self, interface: &SceneInterface) -> Result<Vec<u8>, EncodeError> {
        let mut bb = ByteBufferMut::new();
        bb.write_bytes(INTERFACE_MAGIC);

        let mut options = 0;
        if interface.dialog {
            options |= OPTION_DIALOG;
        }
        if interface.frame.is_some() {
            options |= OPTION_FRAME;
        }
        bb.write_u16(options);
        bb.write_u16(interface.flags);
        bb.write_pstr(&interface.title);
        write_coordinate(&mut bb, interface.size.0)?;
        write_coordinate(&mut bb, interface.size.1)?;
        write_rect(&mut bb, &interface.frame.unwrap_or_default())?;

        match &interface.background {
            Background::None => bb.write_byte(0),
            Background::Single(value) => {
                bb.write_byte(1);
                write_value(&mut bb, value)?;
            }
            Background::Stretch(parts) => {
                bb.write_byte(2);
                for part in parts.iter() {
                    write_value(&mut bb, part)?;
                }
            }
        }

        bb.write_u16(count(interface.elements.len())?);
        for element in &interface.elements {
            bb.write_byte(element.kind.tag());
            bb.write_pstr(&element.id);
            bb.write_u16(count(element.attributes.len())?);
            for (kind, value) in &element.attributes {
                bb.write_byte(kind.tag());
                write_value(&mut bb, value)?;
            }
        }

        Ok(bb.data())
    }
}

fn count(len: usize) -> Result<u16, EncodeError> {
    u16::try_from(len).map_err(|_| EncodeError::OutOfRange(format!("{} entries do not fit a u16 count", len)))
}

fn write_coordinate(bb: &mut ByteBufferMut, value: i64) -> Result<(), EncodeError> {
    let value = i16::try_from(value)
        .map_err(|_| EncodeError::OutOfRange(format!("coordinate {} is out of range", value)))?;
    bb.write_i16(value);
    Ok(())
}

fn write_rect(bb: &mut ByteBufferMut, rect: &Rect) -> Result<(), EncodeError> {
    for value in [rect.x, rect.y, rect.width, rect.height] {
        write_coordinate(bb, value)?;
    }
    Ok(())
}

fn write_reference(bb: &mut ByteBufferMut, reference: &Reference) {
    bb.write_i64(reference.id);
    bb.write_pstr(reference.type_name.as_deref().unwrap_or(""));
    bb.write_pstr(reference.container.as_deref().unwrap_or(""));
}

fn write_value(bb: &mut ByteBufferMut, value: &ElementValue) -> Result<(), EncodeError> {
    match value {
        ElementValue::Integer(v) => {
            bb.write_byte(VALUE_INTEGER);
            bb.write_i64(*v);
        }
        ElementValue::Text(text) => {
            bb.write_byte(VALUE_TEXT);
            bb.write_lstr(text);
        }
        ElementValue::Reference(r) => {
            bb.write_byte(VALUE_REFERENCE);
            write_reference(bb, r);
        }
        ElementValue::Rect(rect) => {
            bb.write_byte(VALUE_RECT);
            write_rect(bb, rect)?;
        }
        ElementValue::Point { x, y } => {
            bb.write_byte(VALUE_POINT);
            write_coordinate(bb, *x)?;
            write_coordinate(bb, *y)?;
        }
        ElementValue::Color(color) => {
            bb.write_byte(VALUE_COLOR);
            bb.write_u32(*color);
        }
        ElementValue::Image(r) => {
            bb.write_byte(VALUE_IMAGE);
            write_reference(bb, r);
        }
        ElementValue::ImageList(images) => {
            bb.write_byte(VALUE_IMAGE_LIST);
            bb.write_u16(count(images.len())?);
            for image in images {
                write_reference(bb, image);
            }
        }
        ElementValue::StringList(items) => {
            bb.write_byte(VALUE_STRING_LIST);
            bb.write_u16(count(items.len())?);
            for item in items {
                bb.write_lstr(item);
            }
        }
        ElementValue::Lookup { reference, side_values } => {
            bb.write_byte(VALUE_LOOKUP);
            write_reference(bb, reference);
            bb.write_u16(count(side_values.len())?);
            for (key, value) in side_values {
                bb.write_pstr(key);
                write_value(bb, value)?;
            }
        }
        ElementValue::Action(action) => {
            bb.write_byte(VALUE_ACTION);
            match action {
                Action::None => bb.write_byte(0),
                Action::PushScene(r) => {
                    bb.write_byte(1);
                    write_reference(bb, r);
                }
                Action::Function(name) => {
                    bb.write_byte(2);
                    bb.write_lstr(name);
                }
                Action::Script(r) => {
                    bb.write_byte(3);
                    write_reference(bb, r);
                }
            }
        }
    }
    Ok(())
}

/// Reads back what [`BinaryInterfaceEncoder`] wrote. Element locations are
/// not stored and come back as builtin locations.
pub fn decode_interface(buffer: &[u8]) -> Result<SceneInterface, String> {
    let mut bb = ByteBuffer::new(buffer);
    let truncated = |what: &str| format!("interface data truncated while reading {}", what);

    if bb.read_bytes(4).map_err(|_| truncated("magic"))? != INTERFACE_MAGIC {
        return Err("not a scene interface (bad magic)".to_string());
    }
    let options = bb.read_u16().map_err(|_| truncated("options"))?;
    let flags = bb.read_u16().map_err(|_| truncated("flags"))?;
    let title = bb.read_pstr().map_err(|_| truncated("title"))?.into_owned();
    let width = bb.read_i16().map_err(|_| truncated("size"))? as i64;
    let height = bb.read_i16().map_err(|_| truncated("size"))? as i64;
    let frame = read_rect(&mut bb)?;

    let background = match bb.read_byte().map_err(|_| truncated("background"))? {
        0 => Background::None,
        1 => Background::Single(read_value(&mut bb)?),
        2 => Background::Stretch(Box::new([
            read_value(&mut bb)?,
            read_value(&mut bb)?,
            read_value(&mut bb)?,
        ])),
        other => return Err(format!("unknown background kind {}", other)),
    };

    let element_count = bb.read_u16().map_err(|_| truncated("element count"))?;
    let mut elements = Vec::with_capacity(element_count as usize);
    for _ in 0..element_count {
        let tag = bb.read_byte().map_err(|_| truncated("element kind"))?;
        let kind = ElementKind::from_tag(tag).ok_or_else(|| format!("unknown element kind {}", tag))?;
        let id = bb.read_pstr().map_err(|_| truncated("element id"))?.into_owned();
        let attribute_count = bb.read_u16().map_err(|_| truncated("attribute count"))?;
        let mut attributes = Vec::with_capacity(attribute_count as usize);
        for _ in 0..attribute_count {
            let tag = bb.read_byte().map_err(|_| truncated("attribute tag"))?;
            let attribute = AttributeKind::from_tag(tag).ok_or_else(|| format!("unknown attribute {}", tag))?;
            attributes.push((attribute, read_value(&mut bb)?));
        }
        elements.push(SceneElement {
            kind,
            id,
            attributes,
            location: Location::builtin(),
        });
    }

    if !bb.is_exhausted() {
        return Err("trailing bytes after interface data".to_string());
    }

    Ok(SceneInterface {
        dialog: options & OPTION_DIALOG != 0,
        title,
        flags,
        size: (width, height),
        frame: if options & OPTION_FRAME != 0 { Some(frame) } else { None },
        background,
        elements,
    })
}

fn read_rect(bb: &mut ByteBuffer) -> Result<Rect, String> {
    let mut read = || bb.read_i16().map(i64::from).map_err(|_| "interface data truncated while reading rect".to_string());
    Ok(Rect {
        x:      read()?,
        y:      read()?,
        width:  read()?,
        height: read()?,
    })
}

fn read_reference(bb: &mut ByteBuffer) -> Result<Reference, String> {
    let truncated = || "interface data truncated while reading reference".to_string();
    let id = bb.read_i64().map_err(|_| truncated())?;
    let type_name = bb.read_pstr().map_err(|_| truncated())?;
    let container = bb.read_pstr().map_err(|_| truncated())?;
    let optional = |text: &str| if text.is_empty() { None } else { Some(text.to_string()) };
    Ok(Reference {
        type_name: optional(&type_name),
        container: optional(&container),
        ..Reference::new(id)
    })
}

fn read_value(bb: &mut ByteBuffer) -> Result<ElementValue, String> {
    let truncated = || "interface data truncated while reading value".to_string();
    let tag = bb.read_byte().map_err(|_| truncated())?;
    Ok(match tag {
        VALUE_INTEGER => ElementValue::Integer(bb.read_i64().map_err(|_| truncated())?),
        VALUE_TEXT => ElementValue::Text(bb.read_lstr().map_err(|_| truncated())?.into_owned()),
        VALUE_REFERENCE => ElementValue::Reference(read_reference(bb)?),
        VALUE_RECT => ElementValue::Rect(read_rect(bb)?),
        VALUE_POINT => {
            let x = bb.read_i16().map_err(|_| truncated())? as i64;
            let y = bb.read_i16().map_err(|_| truncated())? as i64;
            ElementValue::Point { x, y }
        }
        VALUE_COLOR => ElementValue::Color(bb.read_u32().map_err(|_| truncated())?),
        VALUE_IMAGE => ElementValue::Image(read_reference(bb)?),
        VALUE_IMAGE_LIST => {
            let n = bb.read_u16().map_err(|_| truncated())?;
            let mut images = Vec::with_capacity(n as usize);
            for _ in 0..n {
                images.push(read_reference(bb)?);
            }
            ElementValue::ImageList(images)
        }
        VALUE_STRING_LIST => {
            let n = bb.read_u16().map_err(|_| truncated())?;
            let mut items = Vec::with_capacity(n as usize);
            for _ in 0..n {
                items.push(bb.read_lstr().map_err(|_| truncated())?.into_owned());
            }
            ElementValue::StringList(items)
        }
        VALUE_LOOKUP => {
            let reference = read_reference(bb)?;
            let n = bb.read_u16().map_err(|_| truncated())?;
            let mut side_values = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let key = bb.read_pstr().map_err(|_| truncated())?.into_owned();
                side_values.push((key, read_value(bb)?));
            }
            ElementValue::Lookup { reference, side_values }
        }
        VALUE_ACTION => ElementValue::Action(match bb.read_byte().map_err(|_| truncated())? {
            0 => Action::None,
            1 => Action::PushScene(read_reference(bb)?),
            2 => Action::Function(bb.read_lstr().map_err(|_| truncated())?.into_owned()),
            3 => Action::Script(read_reference(bb)?),
            other => return Err(format!("unknown action kind {}", other)),
        }),
        other => return Err(format!("unknown value tag {}", other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SceneInterface {
        SceneInterface {
            dialog: true,
            title: "Settings".into(),
            flags: 0x0004,
            size: (320, 240),
            frame: Some(Rect { x: 10, y: 20, width: 300, height: 200 }),
            background: Background::Stretch(Box::new([
                ElementValue::Image(Reference::typed(1, "StaticImage")),
                ElementValue::Color(0xFF10_2030),
                ElementValue::Image(Reference::typed(3, "StaticImage")),
            ])),
            elements: vec![SceneElement {
                kind: ElementKind::Checkbox,
                id: "sound".into(),
                attributes: vec![
                    (AttributeKind::Frame, ElementValue::Rect(Rect { x: 0, y: 0, width: 80, height: 24 })),
                    (AttributeKind::AxisOrigin, ElementValue::Point { x: -4, y: 4 }),
                    (
                        AttributeKind::Value,
                        ElementValue::Lookup {
                            reference: Reference::typed(7, "Preferences"),
                            side_values: vec![("Key".into(), ElementValue::Text("sound".into()))],
                        },
                    ),
                    (AttributeKind::Action, ElementValue::Action(Action::Function("toggle".into()))),
                    (AttributeKind::Font, ElementValue::StringList(vec!["a".into(), "b".into()])),
                ],
                location: Location::builtin(),
            }],
        }
    }

    #[test]
    fn decode_reverses_encode() {
        let interface = sample();
        let bytes = BinaryInterfaceEncoder.encode(&interface).unwrap();
        assert_eq!(&bytes[..4], INTERFACE_MAGIC);
        assert_eq!(decode_interface(&bytes).unwrap(), interface);
    }

    #[test]
    fn frameless_scene_decodes_without_frame() {
        let interface = SceneInterface {
            title: "Main".into(),
            ..SceneInterface::default()
        };
        let bytes = BinaryInterfaceEncoder.encode(&interface).unwrap();
        let decoded = decode_interface(&bytes).unwrap();
        assert_eq!(decoded.frame, None);
        assert!(!decoded.dialog);
    }

    #[test]
    fn out_of_range_coordinates_fail() {
        let interface = SceneInterface {
            size: (70_000, 10),
            ..SceneInterface::default()
        };
        let err = BinaryInterfaceEncoder.encode(&interface).unwrap_err();
        assert_eq!(err.code(), ReasonCode::ValueOutOfRange);
    }

    #[test]
    fn truncated_data_is_rejected() {
        let bytes = BinaryInterfaceEncoder.encode(&sample()).unwrap();
        assert!(decode_interface(&bytes[..bytes.len() - 1]).is_err());
        assert!(decode_interface(b"XXXX").is_err());
    }
}
