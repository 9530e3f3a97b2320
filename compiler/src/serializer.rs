//! Lays resource values out in the order and widths of their type's binary
//! template, and reads them back.

use crate::error::{KdlError, Location, ReasonCode};
use crate::registry::{TemplateField, TypeRegistry};
use crate::resource::{ResourceInstance, ValueContainer};
use crate::token::{BinaryFieldType, Reference};
use indexmap::IndexMap;
use kdl_format::{ByteBuffer, ByteBufferMut, Resource, CONTAINER_ATTRIBUTE};

/// Encodes one compiled declaration into a [`Resource`]. Values missing from
/// the instance encode as zero or empty.
pub fn encode_resource(instance: &ResourceInstance, registry: &TypeRegistry) -> Result<Resource, KdlError> {
    let type_name = instance.reference.type_name.as_deref().unwrap_or_default();
    let definition = registry.type_named(type_name).ok_or_else(|| {
        KdlError::compile(
            ReasonCode::UnknownType,
            format!("unknown type \"{}\"", type_name),
            &instance.location,
        )
    })?;

    let writer = TemplateWriter {
        registry,
        at: &instance.location,
    };
    let mut bb = ByteBufferMut::new();
    writer.write_fields(&mut bb, &definition.template.fields, &instance.values, "")?;

    let mut resource = Resource::new(
        definition.code,
        &definition.name,
        instance.reference.id,
        &instance.name,
        bb.data(),
    );
    if let Some(container) = &instance.reference.container {
        resource
            .attributes
            .insert(CONTAINER_ATTRIBUTE.to_string(), container.clone());
    }
    Ok(resource)
}

struct TemplateWriter<'r> {
    registry: &'r TypeRegistry,
    at:       &'r Location,
}

impl TemplateWriter<'_> {
    fn write_fields(
        &self,
        bb: &mut ByteBufferMut,
        fields: &[TemplateField],
        values: &IndexMap<String, ValueContainer>,
        prefix: &str,
    ) -> Result<(), KdlError> {
        for field in fields {
            let label = format!("{}{}", prefix, field.label);
            self.write_field(bb, field, &label, values)?;
        }
        Ok(())
    }

    fn mismatch(&self, field: &TemplateField, label: &str, value: &ValueContainer) -> KdlError {
        KdlError::compile(
            ReasonCode::TemplateMismatch,
            format!("{} field \"{}\" cannot encode {:?}", field.kind, label, value),
            self.at,
        )
    }

    fn out_of_range(&self, label: &str, msg: String) -> KdlError {
        KdlError::compile(ReasonCode::ValueOutOfRange, format!("\"{}\": {}", label, msg), self.at)
    }

    fn write_integer(&self, bb: &mut ByteBufferMut, signed: bool, width: usize, value: i64, label: &str) -> Result<(), KdlError> {
        let fits = match (signed, width) {
            (true, 8) => true,
            (true, bytes) => {
                let bound = 1i64 << (bytes * 8 - 1);
                (-bound..bound).contains(&value)
            }
            (false, 8) => value >= 0,
            (false, bytes) => (0..(1i64 << (bytes * 8))).contains(&value),
        };
        if !fits {
            let kind = if signed { "signed" } else { "unsigned" };
            return Err(self.out_of_range(label, format!("{} does not fit a {} {}-bit field", value, kind, width * 8)));
        }
        match width {
            1 => bb.write_byte(value as u8),
            2 => bb.write_u16(value as u16),
            4 => bb.write_u32(value as u32),
            _ => bb.write_u64(value as u64),
        }
        Ok(())
    }

    fn write_field(
        &self,
        bb: &mut ByteBufferMut,
        field: &TemplateField,
        label: &str,
        values: &IndexMap<String, ValueContainer>,
    ) -> Result<(), KdlError> {
        let value = values.get(label);

        if let Some((signed, width)) = field.kind.integer_width() {
            let number = match value {
                None => 0,
                Some(ValueContainer::Integer(v)) => *v,
                Some(ValueContainer::Reference(r)) => r.id,
                Some(other) => return Err(self.mismatch(field, label, other)),
            };
            return self.write_integer(bb, signed, width, number, label);
        }

        match &field.kind {
            BinaryFieldType::Bool => match value {
                None => bb.write_bool(false),
                Some(ValueContainer::Integer(v)) => bb.write_bool(*v != 0),
                Some(other) => return Err(self.mismatch(field, label, other)),
            },

            BinaryFieldType::Cstr
            | BinaryFieldType::Pstr
            | BinaryFieldType::Ostr
            | BinaryFieldType::Lstr
            | BinaryFieldType::FixedCstr(_) => {
                let text = match value {
                    None => "",
                    Some(ValueContainer::String(s)) => s.as_str(),
                    Some(other) => return Err(self.mismatch(field, label, other)),
                };
                match &field.kind {
                    BinaryFieldType::Cstr => bb.write_cstr(text),
                    BinaryFieldType::Lstr => bb.write_lstr(text),
                    BinaryFieldType::FixedCstr(width) => bb.write_fixed_str(text, *width as usize),
                    _ if text.len() > u8::MAX as usize => {
                        return Err(self.out_of_range(
                            label,
                            format!("{} bytes do not fit a {} field", text.len(), field.kind),
                        ))
                    }
                    BinaryFieldType::Ostr => bb.write_ostr(text),
                    _ => bb.write_pstr(text),
                }
            }

            BinaryFieldType::Rect => {
                let (x, y, width, height) = match value {
                    None => (0, 0, 0, 0),
                    Some(ValueContainer::Rect { x, y, width, height }) => (*x, *y, *width, *height),
                    Some(other) => return Err(self.mismatch(field, label, other)),
                };
                let bottom = y
                    .checked_add(height)
                    .ok_or_else(|| self.out_of_range(label, format!("{} + {} overflows", y, height)))?;
                let right = x
                    .checked_add(width)
                    .ok_or_else(|| self.out_of_range(label, format!("{} + {} overflows", x, width)))?;
                for coordinate in [y, x, bottom, right] {
                    let coordinate = i16::try_from(coordinate)
                        .map_err(|_| self.out_of_range(label, format!("coordinate {} does not fit 16 bits", coordinate)))?;
                    bb.write_i16(coordinate);
                }
            }

            BinaryFieldType::Rsrc => match value {
                None => bb.write_i64(0),
                Some(ValueContainer::Reference(r)) => bb.write_i64(r.id),
                Some(ValueContainer::Integer(v)) => bb.write_i64(*v),
                Some(other) => return Err(self.mismatch(field, label, other)),
            },

            BinaryFieldType::Hexd | BinaryFieldType::ByteCode(_) => {
                let bytes: &[u8] = match value {
                    None => &[],
                    Some(ValueContainer::Data(bytes)) => bytes,
                    Some(ValueContainer::String(s)) => s.as_bytes(),
                    Some(other) => return Err(self.mismatch(field, label, other)),
                };
                if let BinaryFieldType::ByteCode(_) = field.kind {
                    let len = u32::try_from(bytes.len())
                        .map_err(|_| self.out_of_range(label, format!("{} bytes of code", bytes.len())))?;
                    bb.write_u32(len);
                }
                bb.write_bytes(bytes);
            }

            BinaryFieldType::Ocnt => {
                let empty = Vec::new();
                let entries = match value {
                    None => &empty,
                    Some(ValueContainer::List(entries)) => entries,
                    Some(other) => return Err(self.mismatch(field, label, other)),
                };
                let count = u16::try_from(entries.len())
                    .map_err(|_| self.out_of_range(label, format!("{} entries", entries.len())))?;
                bb.write_u16(count);
                for entry in entries {
                    self.write_fields(bb, &field.entries, entry, "")?;
                }
            }

            BinaryFieldType::Nested(name) => {
                let nested = self.registry.type_named(name).ok_or_else(|| {
                    KdlError::compile(ReasonCode::UnknownType, format!("unknown type \"{}\"", name), self.at)
                })?;
                self.write_fields(bb, &nested.template.fields, values, &format!("{}.", label))?;
            }

            _ => {}
        }
        Ok(())
    }
}

/// Reads the values of `resource` back according to its type's template.
/// `RSRC` fields come back as untyped references.
pub fn decode_resource(
    resource: &Resource,
    registry: &TypeRegistry,
) -> Result<IndexMap<String, ValueContainer>, KdlError> {
    let definition = registry
        .type_with_code(resource.type_code)
        .ok_or_else(|| KdlError::DecodeError(format!("no type with code \"{}\"", resource.type_code)))?;
    let mut bb = ByteBuffer::new(&resource.data);
    let mut values = IndexMap::new();
    read_fields(&mut bb, registry, &definition.template.fields, "", &mut values)?;
    if !bb.is_exhausted() {
        return Err(KdlError::DecodeError(format!(
            "{} trailing bytes after the fields of {} {}",
            bb.read_remaining().len(),
            definition.name,
            resource.id
        )));
    }
    Ok(values)
}

fn read_fields(
    bb: &mut ByteBuffer,
    registry: &TypeRegistry,
    fields: &[TemplateField],
    prefix: &str,
    values: &mut IndexMap<String, ValueContainer>,
) -> Result<(), KdlError> {
    for field in fields {
        let label = format!("{}{}", prefix, field.label);
        let failed = |_| KdlError::DecodeError(format!("failed to read {} field \"{}\"", field.kind, label));

        if let Some((signed, width)) = field.kind.integer_width() {
            let value = match (signed, width) {
                (true, 1) => bb.read_i8().map(i64::from),
                (true, 2) => bb.read_i16().map(i64::from),
                (true, 4) => bb.read_i32().map(i64::from),
                (true, _) => bb.read_i64(),
                (false, 1) => bb.read_byte().map(i64::from),
                (false, 2) => bb.read_u16().map(i64::from),
                (false, 4) => bb.read_u32().map(i64::from),
                (false, _) => bb.read_u64().map(|v| v as i64),
            }
            .map_err(failed)?;
            values.insert(label, ValueContainer::Integer(value));
            continue;
        }

        let value = match &field.kind {
            BinaryFieldType::Bool => ValueContainer::Integer(bb.read_bool().map_err(failed)? as i64),
            BinaryFieldType::Cstr => ValueContainer::String(bb.read_cstr().map_err(failed)?.into_owned()),
            BinaryFieldType::Pstr => ValueContainer::String(bb.read_pstr().map_err(failed)?.into_owned()),
            BinaryFieldType::Ostr => ValueContainer::String(bb.read_ostr().map_err(failed)?.into_owned()),
            BinaryFieldType::Lstr => ValueContainer::String(bb.read_lstr().map_err(failed)?.into_owned()),
            BinaryFieldType::FixedCstr(width) => {
                ValueContainer::String(bb.read_fixed_str(*width as usize).map_err(failed)?.into_owned())
            }
            BinaryFieldType::Rect => {
                let mut sides = [0i64; 4];
                for side in sides.iter_mut() {
                    *side = bb.read_i16().map_err(failed)? as i64;
                }
                let [top, left, bottom, right] = sides;
                ValueContainer::Rect {
                    x:      left,
                    y:      top,
                    width:  right - left,
                    height: bottom - top,
                }
            }
            BinaryFieldType::Rsrc => ValueContainer::Reference(Reference::new(bb.read_i64().map_err(failed)?)),
            BinaryFieldType::Hexd => ValueContainer::Data(bb.read_remaining().to_vec()),
            BinaryFieldType::ByteCode(_) => {
                let len = bb.read_u32().map_err(failed)? as usize;
                ValueContainer::Data(bb.read_bytes(len).map_err(failed)?.to_vec())
            }
            BinaryFieldType::Ocnt => {
                let count = bb.read_u16().map_err(failed)?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let mut entry = IndexMap::new();
                    read_fields(bb, registry, &field.entries, "", &mut entry)?;
                    entries.push(entry);
                }
                ValueContainer::List(entries)
            }
            BinaryFieldType::Nested(name) => {
                let nested = registry
                    .type_named(name)
                    .ok_or_else(|| KdlError::DecodeError(format!("unknown nested type \"{}\"", name)))?;
                read_fields(bb, registry, &nested.template.fields, &format!("{}.", label), values)?;
                continue;
            }
            _ => continue,
        };
        values.insert(label, value);
    }
    Ok(())
}
