//! kdl-compiler
//!
//! This crate implements:
//!  1) A regex lexeme scanner and a tokenizer that classifies lexemes into
//!     typed tokens (references, decorators, template types, operators, ...),
//!  2) An expression interpreter over lexically chained scopes,
//!  3) A type registry with binary templates, seeded with the built-in types
//!     and extended by `type` definitions in source,
//!  4) Parsers for `declare`/`new` resource declarations and `scene`/`dialog`
//!     interfaces,
//!  5) `encode_resource` / `decode_resource`, which lay values out by template,
//!  6) Error types (`KdlError`) with stable `KDLnnn` reason codes.
//!
//! ```
//! use kdl_compiler::compile_source;
//!
//! let compilation = compile_source(
//!     r#"declare Package { new (#128, "Core") { Name = "core"; Version = "1.0"; }; }"#,
//!     "core.kdl",
//! )
//! .unwrap();
//! assert_eq!(compilation.resources[0].id, 128);
//! ```

pub mod builtins;
pub mod compiler;
pub mod config;
pub mod declaration;
pub mod error;
pub mod helpers;
pub mod import;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod registry;
pub mod resource;
pub mod scene;
pub mod scene_encoder;
pub mod scene_parser;
pub mod scope;
pub mod serializer;
pub mod stream;
pub mod token;
pub mod tokenizer;
pub mod type_parser;
pub mod value_parser;

pub use compiler::{compile_source, Compilation, Compiler};
pub use config::CompileOptions;
pub use error::{KdlError, Location, ReasonCode};
pub use import::{AssetConverter, PassthroughConverter};
pub use registry::TypeRegistry;
pub use resource::{ResourceInstance, ValueContainer};
pub use scene_encoder::{decode_interface, BinaryInterfaceEncoder, EncodeError, InterfaceEncoder};
pub use serializer::{decode_resource, encode_resource};
