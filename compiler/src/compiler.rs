use crate::config::CompileOptions;
use crate::error::KdlError;
use crate::import::{AssetConverter, PassthroughConverter};
use crate::parser::parse_file;
use crate::registry::TypeRegistry;
use crate::resource::{Context, ResourceInstance};
use crate::scene_encoder::{BinaryInterfaceEncoder, InterfaceEncoder};
use crate::scope::Scope;
use crate::serializer::encode_resource;
use crate::stream::TokenStream;
use crate::tokenizer::tokenize;
use kdl_format::{encode_container, Resource};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Compiles KDL source against a type registry that starts out with the
/// built-in types. Each compile works on its own copy of the registry, so
/// types defined by one source never leak into the next.
pub struct Compiler {
    options:           CompileOptions,
    registry:          TypeRegistry,
    converter:         Box<dyn AssetConverter>,
    interface_encoder: Box<dyn InterfaceEncoder>,
}

/// The output of one successful compile.
#[derive(Debug)]
pub struct Compilation {
    /// Declarations in source order, with their evaluated values.
    pub instances: Vec<ResourceInstance>,
    /// The same declarations laid out by their binary templates.
    pub resources: Vec<Resource>,
    /// Built-in types plus every type the source defined.
    pub registry:  TypeRegistry,
}

impl Compilation {
    /// The resource container file for all compiled resources.
    pub fn to_container(&self) -> Vec<u8> {
        encode_container(&self.resources)
    }
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Result<Self, KdlError> {
        Ok(Compiler {
            options,
            registry: TypeRegistry::with_builtins()?,
            converter: Box::new(PassthroughConverter),
            interface_encoder: Box::new(BinaryInterfaceEncoder),
        })
    }

    pub fn with_converter(mut self, converter: impl AssetConverter + 'static) -> Self {
        self.converter = Box::new(converter);
        self
    }

    pub fn with_interface_encoder(mut self, encoder: impl InterfaceEncoder + 'static) -> Self {
        self.interface_encoder = Box::new(encoder);
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Compile source text. `file` only names the source in diagnostics;
    /// imports resolve against the configured import root, or the working
    /// directory when there is none.
    pub fn compile_str(&self, text: &str, file: &str) -> Result<Compilation, KdlError> {
        let import_root = self.options.import_root.clone().unwrap_or_else(|| PathBuf::from("."));
        self.compile(text, file, import_root)
    }

    /// Compile a source file. Imports resolve against the configured import
    /// root, or the directory holding the file.
    pub fn compile_file(&self, path: &Path) -> Result<Compilation, KdlError> {
        let text = fs::read_to_string(path)?;
        let import_root = match &self.options.import_root {
            Some(root) => root.clone(),
            None => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        self.compile(&text, &path.display().to_string(), import_root)
    }

    #[instrument(skip(self, text), fields(bytes = text.len()))]
    fn compile(&self, text: &str, file: &str, import_root: PathBuf) -> Result<Compilation, KdlError> {
        info!(import_root = %import_root.display(), "compiling");

        let mut stream = TokenStream::new(tokenize(text, file));
        let mut ctx = Context::new(
            self.registry.clone(),
            &self.options,
            self.converter.as_ref(),
            self.interface_encoder.as_ref(),
            import_root,
        );
        let mut scope = Scope::new();
        parse_file(&mut stream, &mut ctx, &mut scope)?;

        let resources = ctx
            .resources
            .iter()
            .map(|instance| encode_resource(instance, &ctx.registry))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            resources = resources.len(),
            types = ctx.registry.len(),
            suppressed = ctx.options.suppress_resources,
            "compiled"
        );
        Ok(Compilation {
            instances: ctx.resources,
            resources,
            registry: ctx.registry,
        })
    }
}

/// Compile `text` with default options and the built-in types.
pub fn compile_source(text: &str, file: &str) -> Result<Compilation, KdlError> {
    Compiler::new(CompileOptions::default())?.compile_str(text, file)
}
