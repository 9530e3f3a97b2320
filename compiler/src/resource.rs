use crate::config::CompileOptions;
use crate::error::{KdlError, Location, ReasonCode};
use crate::import::AssetConverter;
use crate::registry::{TypeHandle, TypeRegistry};
use crate::scene_encoder::InterfaceEncoder;
use crate::token::Reference;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::mem;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use tracing::debug;

/// A concrete value stored under a template label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValueContainer {
    Integer(i64),
    String(String),
    Data(Vec<u8>),
    Reference(Reference),
    Rect {
        x:      i64,
        y:      i64,
        width:  i64,
        height: i64,
    },
    /// Entries of an `OCNT` list, one value map per occurrence.
    List(Vec<IndexMap<String, ValueContainer>>),
}

/// One compiled declaration. `values` only ever holds labels of the type's
/// template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceInstance {
    pub reference: Reference,
    pub name:      String,
    #[serde(skip)]
    pub location:  Location,
    pub values:    IndexMap<String, ValueContainer>,
}

impl ResourceInstance {
    pub fn value(&self, label: &str) -> Option<&ValueContainer> {
        self.values.get(label)
    }
}

/// Per-compile state threaded through every parse call.
pub struct Context<'a> {
    pub registry:          TypeRegistry,
    pub options:           &'a CompileOptions,
    pub converter:         &'a dyn AssetConverter,
    pub interface_encoder: &'a dyn InterfaceEncoder,
    pub import_root:       PathBuf,
    pub current_type:      Option<TypeHandle>,
    /// Next count value for each repeatable field, keyed by count label.
    pub repeat_counters:   HashMap<String, i64>,
    pub resources:         Vec<ResourceInstance>,
    pub suppress_resources: bool,
    depth:                 usize,
    claimed_ids:           HashMap<String, BTreeSet<i64>>,
}

impl<'a> Context<'a> {
    pub fn new(
        registry: TypeRegistry,
        options: &'a CompileOptions,
        converter: &'a dyn AssetConverter,
        interface_encoder: &'a dyn InterfaceEncoder,
        import_root: PathBuf,
    ) -> Self {
        Context {
            registry,
            options,
            converter,
            interface_encoder,
            import_root,
            current_type: None,
            repeat_counters: HashMap::new(),
            resources: Vec::new(),
            suppress_resources: options.suppress_resources,
            depth: 0,
            claimed_ids: HashMap::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Enter an inline declaration. The returned guard gives the inner
    /// declaration fresh repeat counters and puts back the enclosing
    /// counters, active type and suppression flag when dropped, on every
    /// exit path.
    pub fn enter_nested(&mut self, at: &Location) -> Result<NestedGuard<'_, 'a>, KdlError> {
        if self.depth >= self.options.max_nesting_depth {
            return Err(KdlError::compile(
                ReasonCode::NestingTooDeep,
                format!(
                    "declarations nested deeper than {} levels",
                    self.options.max_nesting_depth
                ),
                at,
            ));
        }
        self.depth += 1;
        let saved_counters = mem::take(&mut self.repeat_counters);
        let saved_type = self.current_type.clone();
        let saved_suppress = self.suppress_resources;
        Ok(NestedGuard {
            context: self,
            saved_counters,
            saved_type,
            saved_suppress,
        })
    }

    /// Resolve the id of a new resource of `type_name`: `#auto` takes the
    /// lowest free id at or above the configured first auto id, explicit ids
    /// must be unused for the type. Ids are only recorded when resources are
    /// actually produced.
    pub fn claim_id(&mut self, type_name: &str, reference: &Reference, at: &Location) -> Result<i64, KdlError> {
        let first_auto_id = self.options.first_auto_id;
        let suppress = self.suppress_resources;
        let claimed = self.claimed_ids.entry(type_name.to_string()).or_default();

        let id = if reference.is_auto() {
            let mut id = first_auto_id;
            while claimed.contains(&id) {
                id += 1;
            }
            id
        } else if claimed.contains(&reference.id) {
            return Err(KdlError::compile(
                ReasonCode::DuplicateResource,
                format!("a {} with id {} is already declared", type_name, reference.id),
                at,
            ));
        } else {
            reference.id
        };

        if !suppress {
            claimed.insert(id);
        }
        Ok(id)
    }

    /// Appends a finished resource unless creation is suppressed.
    pub fn push_resource(&mut self, instance: ResourceInstance) {
        if self.suppress_resources {
            debug!(name = %instance.name, reference = %instance.reference, "resource suppressed");
            return;
        }
        debug!(
            name = %instance.name,
            reference = %instance.reference,
            values = instance.values.len(),
            "declared resource"
        );
        self.resources.push(instance);
    }
}

pub struct NestedGuard<'c, 'a> {
    context:        &'c mut Context<'a>,
    saved_counters: HashMap<String, i64>,
    saved_type:     Option<TypeHandle>,
    saved_suppress: bool,
}

impl<'a> Deref for NestedGuard<'_, 'a> {
    type Target = Context<'a>;

    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl<'a> DerefMut for NestedGuard<'_, 'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context
    }
}

impl Drop for NestedGuard<'_, '_> {
    fn drop(&mut self) {
        self.context.repeat_counters = mem::take(&mut self.saved_counters);
        self.context.current_type = self.saved_type.take();
        self.context.suppress_resources = self.saved_suppress;
        self.context.depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::PassthroughConverter;
    use crate::scene_encoder::BinaryInterfaceEncoder;

    fn with_context<F: FnOnce(&mut Context)>(options: CompileOptions, f: F) {
        let registry = TypeRegistry::new();
        let mut context = Context::new(
            registry,
            &options,
            &PassthroughConverter,
            &BinaryInterfaceEncoder,
            PathBuf::from("."),
        );
        f(&mut context);
    }

    #[test]
    fn nested_guard_restores_state() {
        with_context(CompileOptions::default(), |ctx| {
            ctx.repeat_counters.insert("Elements".into(), 3);
            {
                let mut inner = ctx.enter_nested(&Location::builtin()).unwrap();
                assert!(inner.repeat_counters.is_empty());
                inner.repeat_counters.insert("Elements".into(), 9);
                inner.suppress_resources = true;
                assert_eq!(inner.depth(), 1);
            }
            assert_eq!(ctx.repeat_counters.get("Elements"), Some(&3));
            assert!(!ctx.suppress_resources);
            assert_eq!(ctx.depth(), 0);
        });
    }

    #[test]
    fn nested_guard_restores_on_error_paths() {
        fn fails(ctx: &mut Context) -> Result<(), KdlError> {
            let mut inner = ctx.enter_nested(&Location::builtin())?;
            inner.repeat_counters.insert("Resources".into(), 1);
            Err(KdlError::compile(ReasonCode::UnknownField, "boom", &Location::builtin()))
        }
        with_context(CompileOptions::default(), |ctx| {
            assert!(fails(ctx).is_err());
            assert!(ctx.repeat_counters.is_empty());
            assert_eq!(ctx.depth(), 0);
        });
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let options = CompileOptions {
            max_nesting_depth: 1,
            ..CompileOptions::default()
        };
        with_context(options, |ctx| {
            let mut inner = ctx.enter_nested(&Location::builtin()).unwrap();
            let err = inner.enter_nested(&Location::builtin()).err().unwrap();
            assert_eq!(err.code(), Some(ReasonCode::NestingTooDeep));
        });
    }

    #[test]
    fn auto_ids_skip_claimed_ids() {
        with_context(CompileOptions::default(), |ctx| {
            let at = Location::builtin();
            assert_eq!(ctx.claim_id("Widget", &Reference::new(128), &at).unwrap(), 128);
            assert_eq!(ctx.claim_id("Widget", &Reference::auto(), &at).unwrap(), 129);
            assert_eq!(ctx.claim_id("Other", &Reference::auto(), &at).unwrap(), 128);
            let err = ctx.claim_id("Widget", &Reference::new(128), &at).unwrap_err();
            assert_eq!(err.code(), Some(ReasonCode::DuplicateResource));
        });
    }
}
