use crate::{
    bb::{ByteBuffer, ByteBufferMut},
    resource::{Resource, TypeCode},
};
use std::collections::BTreeMap;

pub const CONTAINER_MAGIC: &[u8; 4] = b"KDLR";
pub const CONTAINER_VERSION: u16 = 1;

/// Encode a list of compiled resources into a single container blob.
pub fn encode_container(resources: &[Resource]) -> Vec<u8> {
    let mut bb = ByteBufferMut::new();
    bb.write_bytes(CONTAINER_MAGIC);
    bb.write_u16(CONTAINER_VERSION);
    bb.write_u32(resources.len() as u32);

    for resource in resources {
        bb.write_bytes(resource.type_code.as_bytes());
        bb.write_i64(resource.id);
        bb.write_pstr(&resource.type_name);
        bb.write_pstr(&resource.name);

        bb.write_u16(resource.attributes.len() as u16);
        for (key, value) in &resource.attributes {
            bb.write_pstr(key);
            bb.write_pstr(value);
        }

        bb.write_u32(resource.data.len() as u32);
        bb.write_bytes(&resource.data);
    }

    bb.data()
}

/// Decode a container blob back into its resources.
/// Returns a description of the first read failure.
pub fn decode_container(buffer: &[u8]) -> Result<Vec<Resource>, String> {
    let mut bb = ByteBuffer::new(buffer);

    let magic = bb
        .read_bytes(4)
        .map_err(|_| "Failed to read container magic".to_string())?;
    if magic != CONTAINER_MAGIC {
        return Err(format!("Invalid container magic {:?}", magic));
    }

    let version = bb
        .read_u16()
        .map_err(|_| "Failed to read container version".to_string())?;
    if version != CONTAINER_VERSION {
        return Err(format!("Unsupported container version {}", version));
    }

    let count = bb
        .read_u32()
        .map_err(|_| "Failed to read resource count".to_string())?;

    let mut resources = Vec::with_capacity(count as usize);
    for index in 0..count {
        let code = bb
            .read_bytes(4)
            .map_err(|_| format!("Failed to read type code of resource {}", index))?;
        let type_code = TypeCode([code[0], code[1], code[2], code[3]]);

        let id = bb
            .read_i64()
            .map_err(|_| format!("Failed to read id of resource {}", index))?;
        let type_name = bb
            .read_pstr()
            .map_err(|_| format!("Failed to read type name of resource {}", index))?
            .into_owned();
        let name = bb
            .read_pstr()
            .map_err(|_| format!("Failed to read name of resource {}", index))?
            .into_owned();

        let attribute_count = bb
            .read_u16()
            .map_err(|_| format!("Failed to read attribute count of resource {}", index))?;
        let mut attributes = BTreeMap::new();
        for _ in 0..attribute_count {
            let key = bb
                .read_pstr()
                .map_err(|_| format!("Failed to read attribute key of resource {}", index))?;
            let value = bb
                .read_pstr()
                .map_err(|_| format!("Failed to read attribute value of resource {}", index))?;
            attributes.insert(key.into_owned(), value.into_owned());
        }

        let len = bb
            .read_u32()
            .map_err(|_| format!("Failed to read data length of resource {}", index))?;
        let data = bb
            .read_bytes(len as usize)
            .map_err(|_| format!("Resource {} data is truncated", index))?
            .to_vec();

        resources.push(Resource {
            type_code,
            type_name,
            id,
            name,
            attributes,
            data,
        });
    }

    if !bb.is_exhausted() {
        return Err(format!(
            "{} trailing bytes after the last resource",
            buffer.len() - bb.index()
        ));
    }

    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::CONTAINER_ATTRIBUTE;

    #[test]
    fn container_preserves_resources() {
        let mut image = Resource::new(TypeCode(*b"simg"), "StaticImage", 128, "Logo", vec![1, 2, 3]);
        image
            .attributes
            .insert(CONTAINER_ATTRIBUTE.to_string(), "Menus".to_string());
        let script = Resource::new(TypeCode(*b"LuaS"), "LuaScript", -5, "", vec![]);

        let blob = encode_container(&[image.clone(), script.clone()]);
        assert_eq!(&blob[..4], CONTAINER_MAGIC);

        let decoded = decode_container(&blob).unwrap();
        assert_eq!(decoded, vec![image, script]);
    }

    #[test]
    fn container_rejects_bad_magic_and_truncation() {
        assert!(decode_container(b"NOPE").is_err());

        let blob = encode_container(&[Resource::new(
            TypeCode(*b"simg"),
            "StaticImage",
            1,
            "x",
            vec![9; 10],
        )]);
        let err = decode_container(&blob[..blob.len() - 2]).unwrap_err();
        assert!(err.contains("truncated"), "{}", err);
    }
}
