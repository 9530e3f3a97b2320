//! kdl
//!
//! Facade over the KDL resource compiler and its binary format.
//!
//! - `Compiler` / `compile_source` turn KDL source into resources
//! - `encode_container` / `decode_container` read and write resource files
//! - `decode_to_json` renders a resource file for inspection

pub use kdl_compiler::error::{KdlError, Location, ReasonCode};
pub use kdl_compiler::{
    compile_source, decode_resource, encode_resource, CompileOptions, Compilation, Compiler,
    ResourceInstance, TypeRegistry, ValueContainer,
};
pub use kdl_format::{decode_container, encode_container, Resource, TypeCode};

use kdl_compiler::value_parser::Values;
use serde::Serialize;

#[derive(Serialize)]
struct ResourceView<'a> {
    #[serde(flatten)]
    resource: &'a Resource,
    /// Field values, for resources of a built-in type.
    #[serde(skip_serializing_if = "Option::is_none")]
    values:   Option<Values>,
}

/// Decode a resource file into a pretty-printed JSON string. Resources of
/// built-in types also show their decoded field values.
pub fn decode_to_json(buffer: &[u8]) -> Result<String, KdlError> {
    let resources = decode_container(buffer).map_err(KdlError::DecodeError)?;
    let registry = TypeRegistry::with_builtins()?;

    let views = resources
        .iter()
        .map(|resource| -> Result<ResourceView, KdlError> {
            let values = match registry.type_with_code(resource.type_code) {
                Some(_) => Some(decode_resource(resource, &registry)?),
                None => None,
            };
            Ok(ResourceView { resource, values })
        })
        .collect::<Result<Vec<_>, KdlError>>()?;

    serde_json::to_string_pretty(&views).map_err(|e| KdlError::DecodeError(e.to_string()))
}

pub mod error {
    pub use kdl_compiler::error::{KdlError, Location, ReasonCode};
}

pub mod format {
    pub use kdl_format::*;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_resources_with_builtin_values() {
        let compilation = compile_source(
            r#"
            declare Package { new (#300, "Core") { Name = "core"; Resource = #LuaScript.9; }; }
            "#,
            "core.kdl",
        )
        .unwrap();
        let mut resources = compilation.resources.clone();
        resources.push(Resource::new(TypeCode(*b"zzzz"), "Unknown", 1, "raw", vec![1, 2]));

        let json = decode_to_json(&encode_container(&resources)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["type_code"], "pckg");
        assert_eq!(value[0]["id"], 300);
        assert_eq!(value[0]["values"]["Name"]["String"], "core");
        assert_eq!(value[0]["values"]["Resources"]["List"][0]["Resource"]["Reference"]["id"], 9);
        assert!(value[1].get("values").is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(decode_to_json(b"nope"), Err(KdlError::DecodeError(_))));
    }
}
