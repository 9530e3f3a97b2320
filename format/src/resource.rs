use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A four byte resource type code, e.g. `simg` or `LuaS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeCode(pub [u8; 4]);

impl TypeCode {
    pub fn new(bytes: [u8; 4]) -> Self {
        TypeCode(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl FromStr for TypeCode {
    type Err = String;

    /// Parses a code from exactly four bytes of text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 {
            return Err(format!("type code \"{}\" must be exactly 4 bytes", s));
        }
        Ok(TypeCode([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for TypeCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TypeCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// One compiled resource as consumed by the runtime resource manager.
///
/// `data` holds the binary fields laid out in the order and widths of the
/// resource type's template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub type_code:  TypeCode,
    pub type_name:  String,
    pub id:         i64,
    pub name:       String,
    pub attributes: BTreeMap<String, String>,
    pub data:       Vec<u8>,
}

impl Resource {
    pub fn new(type_code: TypeCode, type_name: &str, id: i64, name: &str, data: Vec<u8>) -> Self {
        Resource {
            type_code,
            type_name:  type_name.to_string(),
            id,
            name:       name.to_string(),
            attributes: BTreeMap::new(),
            data,
        }
    }

    /// The namespace the resource was declared in, if any.
    pub fn container(&self) -> Option<&str> {
        self.attributes.get(CONTAINER_ATTRIBUTE).map(String::as_str)
    }
}

/// Attribute key under which a resource's container (namespace) is stored.
pub const CONTAINER_ATTRIBUTE: &str = "namespace";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_code_parses_four_bytes() {
        let code: TypeCode = "simg".parse().unwrap();
        assert_eq!(code.as_bytes(), b"simg");
        assert_eq!(code.to_string(), "simg");
        assert!("img".parse::<TypeCode>().is_err());
        assert!("image".parse::<TypeCode>().is_err());
    }

    #[test]
    fn container_attribute_lookup() {
        let mut resource = Resource::new(TypeCode(*b"simg"), "StaticImage", 128, "Logo", vec![]);
        assert_eq!(resource.container(), None);
        resource
            .attributes
            .insert(CONTAINER_ATTRIBUTE.to_string(), "Menus".to_string());
        assert_eq!(resource.container(), Some("Menus"));
    }
}
