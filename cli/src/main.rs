use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use kdl::{decode_to_json, CompileOptions, Compilation, Compiler, KdlError, TypeRegistry};

#[derive(Parser)]
#[command(name = "kdlc")]
#[command(about = "Compile KDL resource definitions and inspect resource files", long_about = None)]
struct Cli {
    /// Log compiler internals (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a `.kdl` source file into a `.kdat` resource file
    Compile {
        /// Input `.kdl` file
        #[arg(short, long)]
        input: PathBuf,

        /// Output `.kdat` file (defaults to same name + `.kdat`)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Parse and validate only, write nothing
        #[arg(long)]
        dry_run: bool,

        /// JSON file with compile options
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory imports resolve against (defaults to the input's directory)
        #[arg(long)]
        import_root: Option<PathBuf>,
    },

    /// Check a `.kdl` source file without producing resources
    Check {
        /// Input `.kdl` file
        #[arg(short, long)]
        input: PathBuf,

        /// JSON file with compile options
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Decode a `.kdat` resource file to JSON (printed to stdout)
    Dump {
        /// Input `.kdat` file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the type registry as JSON: the built-in types, plus the types
    /// defined by a source file when one is given
    Types {
        /// Optional `.kdl` file whose type definitions are included
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

/// Logs go to stderr. `RUST_LOG` overrides the default filter.
fn init_logging(verbose: bool) {
    let default = if verbose { "warn,kdl_compiler=debug" } else { "warn,kdl_compiler=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_options(config: Option<&Path>) -> Result<CompileOptions, KdlError> {
    match config {
        Some(path) => {
            debug!(config = %path.display(), "loading compile options");
            CompileOptions::load(path)
        }
        None => Ok(CompileOptions::default()),
    }
}

fn compile(input: &Path, options: CompileOptions) -> Result<Compilation, KdlError> {
    Compiler::new(options)?.compile_file(input)
}

fn main() -> Result<(), KdlError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Compile { input, output, dry_run, config, import_root } => {
            let mut options = load_options(config.as_deref())?;
            if *dry_run {
                options.suppress_resources = true;
            }
            if let Some(root) = import_root {
                options.import_root = Some(root.clone());
            }
            let dry_run = options.suppress_resources;

            let compilation = compile(input, options)?;
            if dry_run {
                println!("Checked {} ({} types)", input.display(), compilation.registry.len());
                return Ok(());
            }

            let out_path = if let Some(o) = output {
                o.clone()
            } else {
                let mut p = input.clone();
                p.set_extension("kdat");
                p
            };
            fs::write(&out_path, compilation.to_container())?;
            println!(
                "Compiled {} → {} ({} resources)",
                input.display(),
                out_path.display(),
                compilation.resources.len()
            );
            Ok(())
        }

        Commands::Check { input, config } => {
            let mut options = load_options(config.as_deref())?;
            options.suppress_resources = true;
            let compilation = compile(input, options)?;
            println!("Checked {} ({} types)", input.display(), compilation.registry.len());
            Ok(())
        }

        Commands::Dump { input } => {
            let data = fs::read(input)?;
            let json = decode_to_json(&data)?;
            println!("{}", json);
            Ok(())
        }

        Commands::Types { input } => {
            let registry = match input {
                Some(path) => {
                    let options = CompileOptions {
                        suppress_resources: true,
                        ..CompileOptions::default()
                    };
                    compile(path, options)?.registry
                }
                None => TypeRegistry::with_builtins()?,
            };
            let types: Vec<_> = registry.types().collect();
            let json = serde_json::to_string_pretty(&types).map_err(|e| KdlError::DecodeError(e.to_string()))?;
            println!("{}", json);
            Ok(())
        }
    }
}
