use crate::error::{KdlError, Location, ReasonCode};
use crate::token::{BinaryFieldType, Decorator, Token};
use indexmap::IndexMap;
use kdl_format::TypeCode;
use serde::Serialize;
use std::rc::Rc;

pub type TypeHandle = Rc<TypeInstance>;

/// One entry of a binary template. Only `OCNT` entries carry sub-entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateField {
    pub label: String,
    pub kind:  BinaryFieldType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<TemplateField>,
}

impl TemplateField {
    pub fn new(kind: BinaryFieldType, label: &str) -> Self {
        TemplateField {
            label: label.to_string(),
            kind,
            entries: Vec::new(),
        }
    }

    pub fn list(label: &str, entries: Vec<TemplateField>) -> Self {
        TemplateField {
            label: label.to_string(),
            kind: BinaryFieldType::Ocnt,
            entries,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BinaryTemplate {
    pub fields: Vec<TemplateField>,
}

impl BinaryTemplate {
    pub fn field(&self, label: &str) -> Option<&TemplateField> {
        self.fields.iter().find(|f| f.label == label)
    }
}

/// Source and target format of an imported asset, e.g. `png` to `tga`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportHint {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValueType {
    Integer,
    String,
    Boolean,
    Reference(Option<String>),
    Color,
    Rect,
    Data,
    File(Option<ImportHint>),
    Files(ImportHint),
    Nested(String),
}

impl ValueType {
    /// The value type implied by a template field when none is declared.
    pub fn for_binary(kind: &BinaryFieldType) -> Self {
        match kind {
            BinaryFieldType::Cstr
            | BinaryFieldType::Pstr
            | BinaryFieldType::FixedCstr(_)
            | BinaryFieldType::Lstr
            | BinaryFieldType::Ostr => ValueType::String,
            BinaryFieldType::Rect => ValueType::Rect,
            BinaryFieldType::Rsrc => ValueType::Reference(None),
            BinaryFieldType::Hexd | BinaryFieldType::ByteCode(_) => ValueType::Data,
            BinaryFieldType::Bool => ValueType::Boolean,
            BinaryFieldType::Nested(name) => ValueType::Nested(name.clone()),
            _ => ValueType::Integer,
        }
    }

    pub fn accepts_import(&self) -> bool {
        matches!(self, ValueType::Data | ValueType::File(_) | ValueType::Files(_))
    }

    pub fn accepts_multi_import(&self) -> bool {
        matches!(self, ValueType::Files(_))
    }

    pub fn import_hint(&self) -> Option<&ImportHint> {
        match self {
            ValueType::File(hint) => hint.as_ref(),
            ValueType::Files(hint) => Some(hint),
            _ => None,
        }
    }
}

/// One value slot of a field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValue {
    pub label:      String,
    pub value_type: ValueType,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub symbols: IndexMap<String, Token>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Vec<Token>>,
    /// Companion values that share this value's bitmask expression.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub joined: Vec<FieldValue>,
}

impl FieldValue {
    pub fn new(label: &str, value_type: ValueType) -> Self {
        FieldValue {
            label: label.to_string(),
            value_type,
            symbols: IndexMap::new(),
            default: None,
            joined: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repeatable {
    pub lower:       i64,
    pub upper:       i64,
    pub count_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<Decorator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeatable: Option<Repeatable>,
    pub values: Vec<FieldValue>,
}

impl Field {
    pub fn new(name: &str, values: Vec<FieldValue>) -> Self {
        Field {
            name: name.to_string(),
            decorators: Vec::new(),
            repeatable: None,
            values,
        }
    }

    pub fn has_decorator(&self, decorator: &Decorator) -> bool {
        self.decorators.contains(decorator)
    }
}

/// `constructor(a, b) { this.X = a; }`: parameter names and one token list
/// per body statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Constructor {
    pub parameters: Vec<String>,
    #[serde(skip)]
    pub body: Vec<Vec<Token>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeInstance {
    pub name: String,
    pub code: TypeCode,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<Decorator>,
    pub template: BinaryTemplate,
    pub fields: Vec<Field>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub constructors: Vec<Constructor>,
    #[serde(skip)]
    pub location: Location,
}

impl TypeInstance {
    pub fn new(name: &str, code: TypeCode) -> Self {
        TypeInstance {
            name: name.to_string(),
            code,
            decorators: Vec::new(),
            template: BinaryTemplate::default(),
            fields: Vec::new(),
            constructors: Vec::new(),
            location: Location::builtin(),
        }
    }

    pub fn has_decorator(&self, decorator: &Decorator) -> bool {
        self.decorators.contains(decorator)
    }

    pub fn is_builtin(&self) -> bool {
        self.has_decorator(&Decorator::Builtin)
    }

    pub fn is_declarable(&self) -> bool {
        !self.has_decorator(&Decorator::NoDeclaration)
    }

    pub fn field_named(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// All known types, by name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: IndexMap<String, TypeHandle>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    pub fn register_type(&mut self, instance: TypeInstance) -> Result<TypeHandle, KdlError> {
        if self.types.contains_key(&instance.name) {
            return Err(KdlError::compile(
                ReasonCode::DuplicateType,
                format!("type \"{}\" is already defined", instance.name),
                &instance.location,
            ));
        }
        if let Some(existing) = self.type_with_code(instance.code) {
            return Err(KdlError::compile(
                ReasonCode::DuplicateType,
                format!(
                    "type code \"{}\" of \"{}\" is already used by \"{}\"",
                    instance.code, instance.name, existing.name
                ),
                &instance.location,
            ));
        }
        self.validate(&instance)?;

        let handle = Rc::new(instance);
        self.types.insert(handle.name.clone(), Rc::clone(&handle));
        Ok(handle)
    }

    pub fn type_named(&self, name: &str) -> Option<TypeHandle> {
        self.types.get(name).cloned()
    }

    pub fn type_with_code(&self, code: TypeCode) -> Option<TypeHandle> {
        self.types.values().find(|t| t.code == code).cloned()
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeInstance> {
        self.types.values().map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Every storable value label of a type: plain template labels, and the
    /// labels of `NESTED<T>` fields flattened as `Label.Sub`.
    pub fn template_labels(&self, instance: &TypeInstance) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_labels(&instance.template.fields, "", &mut out);
        out
    }

    fn collect_labels(&self, fields: &[TemplateField], prefix: &str, out: &mut Vec<String>) {
        for field in fields {
            let label = format!("{}{}", prefix, field.label);
            match &field.kind {
                BinaryFieldType::Nested(name) => {
                    if let Some(nested) = self.type_named(name) {
                        self.collect_labels(&nested.template.fields, &format!("{}.", label), out);
                    }
                }
                _ => out.push(label),
            }
        }
    }

    /// Whether a value labelled `label` (or a nested value flattened under
    /// it) can be stored in the given template entries.
    pub fn accepts_label(&self, fields: &[TemplateField], label: &str) -> bool {
        let mut labels = Vec::new();
        self.collect_labels(fields, "", &mut labels);
        let prefix = format!("{}.", label);
        labels.iter().any(|l| l == label || l.starts_with(&prefix))
    }

    /// The named type followed by every non-builtin type reachable through
    /// its nested value types and `NESTED<T>` template fields.
    pub fn nested_closure(&self, name: &str) -> Vec<TypeHandle> {
        let mut out: Vec<TypeHandle> = Vec::new();
        let mut pending = vec![name.to_string()];

        while let Some(name) = pending.pop() {
            if out.iter().any(|t| t.name == name) {
                continue;
            }
            let instance = match self.type_named(&name) {
                Some(instance) if !instance.is_builtin() => instance,
                _ => continue,
            };
            for field in &instance.fields {
                for value in field.values.iter().chain(field.values.iter().flat_map(|v| v.joined.iter())) {
                    if let ValueType::Nested(nested) = &value.value_type {
                        pending.push(nested.clone());
                    }
                }
            }
            for entry in &instance.template.fields {
                if let BinaryFieldType::Nested(nested) = &entry.kind {
                    pending.push(nested.clone());
                }
            }
            out.push(instance);
        }

        out
    }

    fn validate(&self, instance: &TypeInstance) -> Result<(), KdlError> {
        let invalid = |msg: String| {
            Err(KdlError::compile(ReasonCode::InvalidTemplate, msg, &instance.location))
        };

        for entry in &instance.template.fields {
            self.validate_entry(instance, entry)?;
        }

        let fields = &instance.template.fields;
        if let Some(position) = fields.iter().position(|f| self.reads_to_end(f)) {
            if position + 1 != fields.len() {
                return invalid(format!(
                    "{} \"{}\" reads to the end of the resource and must be the last template field",
                    fields[position].kind, fields[position].label
                ));
            }
        }

        for field in &instance.fields {
            let entries = match &field.repeatable {
                Some(repeat) => {
                    if repeat.lower < 0 || repeat.lower > repeat.upper {
                        return Err(KdlError::compile(
                            ReasonCode::RepeatBoundExceeded,
                            format!(
                                "field \"{}\" has invalid repeat bounds <{}, {}>",
                                field.name, repeat.lower, repeat.upper
                            ),
                            &instance.location,
                        ));
                    }
                    match instance.template.field(&repeat.count_label) {
                        Some(list) if list.kind == BinaryFieldType::Ocnt => list.entries.as_slice(),
                        _ => {
                            return invalid(format!(
                                "repeatable field \"{}\" counts \"{}\", which is not an OCNT list of \"{}\"",
                                field.name, repeat.count_label, instance.name
                            ))
                        }
                    }
                }
                None => instance.template.fields.as_slice(),
            };

            let values = field.values.iter().chain(field.values.iter().flat_map(|v| v.joined.iter()));
            for value in values {
                if !self.accepts_label(entries, &value.label) {
                    return Err(KdlError::compile(
                        ReasonCode::UnknownTemplateLabel,
                        format!(
                            "value \"{}\" of field \"{}\" is not in the template of \"{}\"",
                            value.label, field.name, instance.name
                        ),
                        &instance.location,
                    ));
                }
                if let ValueType::Nested(name) = &value.value_type {
                    if self.type_named(name).is_none() && name != &instance.name {
                        return Err(KdlError::compile(
                            ReasonCode::UnknownType,
                            format!("unknown type \"{}\"", name),
                            &instance.location,
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// HEXD takes every remaining byte, and so does a NESTED type whose
    /// template ends in one.
    fn reads_to_end(&self, field: &TemplateField) -> bool {
        match &field.kind {
            BinaryFieldType::Hexd => true,
            BinaryFieldType::Nested(name) => self
                .type_named(name)
                .and_then(|nested| nested.template.fields.last().map(|last| self.reads_to_end(last)))
                .unwrap_or(false),
            _ => false,
        }
    }

    fn validate_entry(&self, instance: &TypeInstance, entry: &TemplateField) -> Result<(), KdlError> {
        let invalid = |msg: String| {
            Err(KdlError::compile(ReasonCode::InvalidTemplate, msg, &instance.location))
        };
        match &entry.kind {
            BinaryFieldType::Ocnt if entry.entries.is_empty() => {
                invalid(format!("OCNT \"{}\" declares no entries", entry.label))
            }
            BinaryFieldType::Nested(name) if self.type_named(name).is_none() => {
                invalid(format!("NESTED<{}> names an unknown type", name))
            }
            BinaryFieldType::Ocnt => {
                for sub in &entry.entries {
                    self.validate_entry(instance, sub)?;
                    if self.reads_to_end(sub) {
                        return invalid(format!(
                            "OCNT \"{}\" entries cannot hold {} \"{}\"",
                            entry.label, sub.kind, sub.label
                        ));
                    }
                }
                Ok(())
            }
            _ if !entry.entries.is_empty() => {
                invalid(format!("only OCNT entries may have sub-entries, \"{}\" is {}", entry.label, entry.kind))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> TypeInstance {
        let mut t = TypeInstance::new("Point", TypeCode(*b"pnt "));
        t.template.fields = vec![
            TemplateField::new(BinaryFieldType::Dwrd, "X"),
            TemplateField::new(BinaryFieldType::Dwrd, "Y"),
        ];
        t.fields = vec![
            Field::new("X", vec![FieldValue::new("X", ValueType::Integer)]),
            Field::new("Y", vec![FieldValue::new("Y", ValueType::Integer)]),
        ];
        t
    }

    fn marker() -> TypeInstance {
        let mut t = TypeInstance::new("Marker", TypeCode(*b"mrkr"));
        t.template.fields = vec![
            TemplateField::new(BinaryFieldType::Nested("Point".into()), "Origin"),
            TemplateField::list("Tags", vec![TemplateField::new(BinaryFieldType::Pstr, "Tag")]),
        ];
        let mut tag = Field::new("Tag", vec![FieldValue::new("Tag", ValueType::String)]);
        tag.repeatable = Some(Repeatable {
            lower: 0,
            upper: 3,
            count_label: "Tags".into(),
        });
        t.fields = vec![
            Field::new("Origin", vec![FieldValue::new("Origin", ValueType::Nested("Point".into()))]),
            tag,
        ];
        t
    }

    #[test]
    fn registers_and_looks_up() {
        let mut registry = TypeRegistry::new();
        let handle = registry.register_type(point()).unwrap();
        assert_eq!(handle.name, "Point");
        assert!(registry.type_named("Point").is_some());
        assert!(registry.type_with_code(TypeCode(*b"pnt ")).is_some());
        assert!(registry.type_named("Nope").is_none());
    }

    #[test]
    fn rejects_duplicate_names_and_codes() {
        let mut registry = TypeRegistry::new();
        registry.register_type(point()).unwrap();
        let err = registry.register_type(point()).unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::DuplicateType));

        let other = TypeInstance::new("Other", TypeCode(*b"pnt "));
        let err = registry.register_type(other).unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::DuplicateType));
    }

    #[test]
    fn flattens_nested_labels() {
        let mut registry = TypeRegistry::new();
        registry.register_type(point()).unwrap();
        let marker = registry.register_type(marker()).unwrap();
        assert_eq!(registry.template_labels(&marker), vec!["Origin.X", "Origin.Y", "Tags"]);
        assert!(registry.accepts_label(&marker.template.fields, "Origin"));
        assert!(!registry.accepts_label(&marker.template.fields, "Ori"));
    }

    #[test]
    fn rejects_invalid_templates() {
        let mut registry = TypeRegistry::new();
        let err = registry.register_type(marker()).unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::InvalidTemplate));

        let mut empty = TypeInstance::new("Empty", TypeCode(*b"empt"));
        empty.template.fields = vec![TemplateField::list("Items", Vec::new())];
        let err = registry.register_type(empty).unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::InvalidTemplate));

        let mut stray = point();
        stray.fields.push(Field::new("Z", vec![FieldValue::new("Z", ValueType::Integer)]));
        let err = registry.register_type(stray).unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::UnknownTemplateLabel));
    }

    #[test]
    fn hexd_must_close_the_template() {
        let mut registry = TypeRegistry::new();
        let mut blob = TypeInstance::new("Blob", TypeCode(*b"blob"));
        blob.template.fields = vec![
            TemplateField::new(BinaryFieldType::Dwrd, "Size"),
            TemplateField::new(BinaryFieldType::Hexd, "Data"),
        ];
        registry.register_type(blob).unwrap();

        let mut early = TypeInstance::new("Early", TypeCode(*b"erly"));
        early.template.fields = vec![
            TemplateField::new(BinaryFieldType::Hexd, "Data"),
            TemplateField::new(BinaryFieldType::Dwrd, "Size"),
        ];
        let err = registry.register_type(early).unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::InvalidTemplate));

        let mut wrapped = TypeInstance::new("Wrapped", TypeCode(*b"wrap"));
        wrapped.template.fields = vec![
            TemplateField::new(BinaryFieldType::Nested("Blob".into()), "Inner"),
            TemplateField::new(BinaryFieldType::Hbyt, "Flag"),
        ];
        let err = registry.register_type(wrapped).unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::InvalidTemplate));

        let mut listed = TypeInstance::new("Listed", TypeCode(*b"lstd"));
        listed.template.fields = vec![TemplateField::list(
            "Chunks",
            vec![TemplateField::new(BinaryFieldType::Hexd, "Chunk")],
        )];
        let err = registry.register_type(listed).unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::InvalidTemplate));

        let mut tail = TypeInstance::new("Tail", TypeCode(*b"tail"));
        tail.template.fields = vec![
            TemplateField::new(BinaryFieldType::Hbyt, "Flag"),
            TemplateField::new(BinaryFieldType::Nested("Blob".into()), "Inner"),
        ];
        assert!(registry.register_type(tail).is_ok());
    }

    #[test]
    fn nested_closure_is_transitive() {
        let mut registry = TypeRegistry::new();
        registry.register_type(point()).unwrap();
        registry.register_type(marker()).unwrap();
        let names: Vec<String> = registry
            .nested_closure("Marker")
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, vec!["Marker", "Point"]);
    }
}
