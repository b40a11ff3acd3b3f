//! Trellis CLI
//!
//! Usage:
//!   trellis render <ID> [--templates DIR] [--cache DIR] [--ext EXT] [--data FILE] [--config FILE]
//!   trellis compile <FILE> [--data FILE]
//!   trellis check <FILE>... [--data FILE]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trellis::{
    context_from_json, CompileError, Compiler, Context, Engine, EngineConfig, FunctionRegistry,
    RenderError, SourceStore, TemplateId,
};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Compile and render trellis templates")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a template by id and print the output
    Render {
        /// Template id, e.g. `pages.home`
        id: String,

        /// Template source directory
        #[arg(long)]
        templates: Option<PathBuf>,

        /// Directory for compiled forms
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Template file suffix
        #[arg(long)]
        ext: Option<String>,

        /// JSON file with the render data
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Engine configuration (TOML format)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Compile one template file and print its compiled form
    Compile {
        file: PathBuf,

        /// JSON file whose shape guides member resolution
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Compile template files and report diagnostics
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// JSON file whose shape guides member resolution
        #[arg(short, long)]
        data: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trellis=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Render {
            id,
            templates,
            cache,
            ext,
            data,
            config,
        } => render(&id, templates, cache, ext, data.as_deref(), config.as_deref()),
        Command::Compile { file, data } => compile(&file, data.as_deref()),
        Command::Check { files, data } => check(&files, data.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("Error: {}", message);
            }
            ExitCode::FAILURE
        }
    }
}

fn render(
    id: &str,
    templates: Option<PathBuf>,
    cache: Option<PathBuf>,
    ext: Option<String>,
    data: Option<&Path>,
    config: Option<&Path>,
) -> Result<(), String> {
    let mut config = match config {
        Some(path) => EngineConfig::from_file(path)
            .map_err(|e| format!("loading config '{}': {}", path.display(), e))?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = templates {
        config = config.with_template_dir(dir);
    }
    if let Some(dir) = cache {
        config = config.with_cache_dir(dir);
    }
    if let Some(ext) = ext {
        config = config.with_extension(ext);
    }

    let data = load_data(data)?;
    let engine = Engine::new(config).map_err(|e| e.to_string())?;
    match engine.render(id, data) {
        Ok(output) => {
            print!("{}", output);
            Ok(())
        }
        Err(RenderError::Compile { template, source }) => {
            let text = template
                .parse::<TemplateId>()
                .and_then(|id| engine.store().read(&id))
                .unwrap_or_default();
            eprint!("{}", source.format(&text, &template));
            Err(String::new())
        }
        Err(e) => Err(e.to_string()),
    }
}

fn compile(file: &Path, data: Option<&Path>) -> Result<(), String> {
    let data = load_data(data)?;
    let json = compile_file(file, &data)?
        .to_json()
        .map_err(|e| format!("encoding compiled form: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn check(files: &[PathBuf], data: Option<&Path>) -> Result<(), String> {
    let data = load_data(data)?;
    let mut failed = 0;
    for file in files {
        match compile_file(file, &data) {
            Ok(_) => eprintln!("ok: {}", file.display()),
            Err(message) => {
                failed += 1;
                if !message.is_empty() {
                    eprintln!("Error: {}", message);
                }
            }
        }
    }
    if failed > 0 {
        return Err(format!("{} of {} template(s) failed", failed, files.len()));
    }
    Ok(())
}

/// Compile with the builtin filters; diagnostics are printed to stderr
fn compile_file(file: &Path, data: &Context) -> Result<trellis::Template, String> {
    let source = fs::read_to_string(file)
        .map_err(|e| format!("reading file '{}': {}", file.display(), e))?;

    let mut registry = FunctionRegistry::new();
    trellis::register_builtins(&mut registry).map_err(|e| e.to_string())?;

    Compiler::new(&registry)
        .compile_with(&source, data)
        .map_err(|err: CompileError| {
            let name = file.display().to_string();
            eprint!("{}", err.format(&source, &name));
            String::new()
        })
}

fn load_data(path: Option<&Path>) -> Result<Context, String> {
    let Some(path) = path else {
        return Ok(Context::new());
    };
    let text = fs::read_to_string(path)
        .map_err(|e| format!("reading data file '{}': {}", path.display(), e))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| format!("parsing data file '{}': {}", path.display(), e))?;
    Ok(context_from_json(json))
}
