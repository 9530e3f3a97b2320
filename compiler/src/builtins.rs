use crate::error::{KdlError, Location};
use crate::registry::{
    Field, FieldValue, ImportHint, Repeatable, TemplateField, TypeInstance, TypeRegistry, ValueType,
};
use crate::scene::ElementKind;
use crate::token::{BinaryFieldType, Decorator, Token};
use kdl_format::TypeCode;

pub const SCENE_INTERFACE: &str = "SceneInterface";

fn builtin(name: &str, code: &[u8; 4], template: Vec<TemplateField>, fields: Vec<Field>) -> TypeInstance {
    let mut instance = TypeInstance::new(name, TypeCode(*code));
    instance.decorators.push(Decorator::Builtin);
    instance.template.fields = template;
    instance.fields = fields;
    instance
}

fn single(name: &str, value_type: ValueType) -> Field {
    Field::new(name, vec![FieldValue::new(name, value_type)])
}

fn image_hint() -> ImportHint {
    ImportHint {
        source: "png".to_string(),
        target: "tga".to_string(),
    }
}

fn reference_to(name: &str) -> ValueType {
    ValueType::Reference(Some(name.to_string()))
}

fn builtin_types() -> Vec<TypeInstance> {
    let mut scene_interface = builtin(
        SCENE_INTERFACE,
        b"scin",
        vec![TemplateField::new(BinaryFieldType::Hexd, "Data")],
        vec![single("Data", ValueType::Data)],
    );
    scene_interface.decorators.push(Decorator::NoDeclaration);

    let mut kind = FieldValue::new("Kind", ValueType::Integer);
    let location = Location::builtin();
    for (index, element) in ElementKind::ALL.iter().enumerate() {
        kind.symbols.insert(element.name().to_string(), Token::integer(index as i64, &location));
    }
    let mut element = Field::new(
        "Element",
        vec![
            FieldValue::new("Index", ValueType::Integer),
            FieldValue::new("Name", ValueType::String),
            kind,
        ],
    );
    element.repeatable = Some(Repeatable {
        lower:       0,
        upper:       255,
        count_label: "Elements".to_string(),
    });

    let mut resource = single("Resource", ValueType::Reference(None));
    resource.repeatable = Some(Repeatable {
        lower:       0,
        upper:       1000,
        count_label: "Resources".to_string(),
    });

    vec![
        builtin(
            "LuaScript",
            b"LuaS",
            vec![TemplateField::new(BinaryFieldType::ByteCode("Lua".into()), "Script")],
            vec![single("Script", ValueType::Data)],
        ),
        builtin(
            "VertexShader",
            b"vshd",
            vec![TemplateField::new(BinaryFieldType::Hexd, "Source")],
            vec![single("Source", ValueType::Data)],
        ),
        builtin(
            "FragmentShader",
            b"fshd",
            vec![TemplateField::new(BinaryFieldType::Hexd, "Source")],
            vec![single("Source", ValueType::Data)],
        ),
        builtin(
            "ShaderSet",
            b"shdr",
            vec![
                TemplateField::new(BinaryFieldType::Rsrc, "Vertex"),
                TemplateField::new(BinaryFieldType::Rsrc, "Fragment"),
            ],
            vec![
                single("Vertex", reference_to("VertexShader")),
                single("Fragment", reference_to("FragmentShader")),
            ],
        ),
        builtin(
            "SpriteSet",
            b"sprs",
            vec![TemplateField::new(BinaryFieldType::Hexd, "Sprites")],
            vec![single("Sprites", ValueType::Files(image_hint()))],
        ),
        builtin(
            "StaticImage",
            b"simg",
            vec![TemplateField::new(BinaryFieldType::Hexd, "Image")],
            vec![single("Image", ValueType::File(Some(image_hint())))],
        ),
        scene_interface,
        builtin(
            "SceneDefinition",
            b"scdf",
            vec![
                TemplateField::new(BinaryFieldType::Rsrc, "Interface"),
                TemplateField::new(BinaryFieldType::Rsrc, "Script"),
                TemplateField::new(BinaryFieldType::Rsrc, "Background"),
                TemplateField::list(
                    "Elements",
                    vec![
                        TemplateField::new(BinaryFieldType::Dwrd, "Index"),
                        TemplateField::new(BinaryFieldType::Pstr, "Name"),
                        TemplateField::new(BinaryFieldType::Dwrd, "Kind"),
                    ],
                ),
            ],
            vec![
                single("Interface", reference_to(SCENE_INTERFACE)),
                single("Script", reference_to("LuaScript")),
                single("Background", reference_to("StaticImage")),
                element,
            ],
        ),
        builtin(
            "Package",
            b"pckg",
            vec![
                TemplateField::new(BinaryFieldType::Cstr, "Name"),
                TemplateField::new(BinaryFieldType::Cstr, "Version"),
                TemplateField::new(BinaryFieldType::Cstr, "Author"),
                TemplateField::list("Resources", vec![TemplateField::new(BinaryFieldType::Rsrc, "Resource")]),
            ],
            vec![
                single("Name", ValueType::String),
                single("Version", ValueType::String),
                single("Author", ValueType::String),
                resource,
            ],
        ),
    ]
}

impl TypeRegistry {
    /// A registry holding the built-in resource types.
    pub fn with_builtins() -> Result<Self, KdlError> {
        let mut registry = TypeRegistry::new();
        for instance in builtin_types() {
            registry.register_type(instance)?;
        }
        Ok(registry)
    }
}
