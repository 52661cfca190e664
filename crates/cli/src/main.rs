use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use basehound::expand_module_inputs;
use basehound_core::loader::AutoLoader;
use basehound_core::matcher::{find_derived, list_types};
use basehound_core::report::{rendered_names, write_names, NameStyle};
use basehound_core::resolver::RunContext;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Type-hierarchy search across .NET modules.
///
/// This CLI is a thin wrapper around `basehound-core` (exposed in code as
/// `basehound_core`). All substantive logic lives in the library so it can be
/// tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "basehound",
    version = basehound_core::version(),
    about = "Finds every type deriving from a given base across .NET modules",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan modules for all types transitively deriving from a base type.
    ///
    /// Matched names go to stdout (or `--output`), one per line, in the
    /// order they were encountered. The match count goes to stderr so that
    /// piped output stays a clean name list.
    FindDerived {
        /// Fully-qualified name of the base type (e.g. `Acme.Ui.Component`).
        #[arg(long)]
        base: String,

        /// Module files to scan, or directories to expand into module files.
        #[arg(required = true)]
        modules: Vec<PathBuf>,

        /// Extra directory to probe when resolving external references.
        /// Repeatable; probed in the order given, after each module's own
        /// directory.
        #[arg(short = 'r', long = "reference-dir")]
        reference_dir: Vec<PathBuf>,

        /// Write matched names to this file instead of stdout.
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Print simple names ("Widget") instead of qualified ones.
        #[arg(long, default_value_t = false)]
        short_names: bool,

        /// Emit the full scan report (matches and skipped modules) as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List every type defined in a single module, in definition order.
    ListTypes {
        /// Module file to inspect.
        module: PathBuf,

        /// Emit JSON instead of one name per line.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::FindDerived { base, modules, reference_dir, output, short_names, json } => {
            find_derived_command(&base, &modules, reference_dir, output, short_names, json)?
        }
        Command::ListTypes { module, json } => list_types_command(&module, json)?,
    }

    Ok(())
}

/// Filtered stderr logging; `RUST_LOG` overrides the default of warnings only.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();
}

fn find_derived_command(
    base: &str,
    modules: &[PathBuf],
    reference_dirs: Vec<PathBuf>,
    output: Option<PathBuf>,
    short_names: bool,
    json: bool,
) -> Result<()> {
    let module_paths = expand_module_inputs(modules)?;
    let mut ctx = RunContext::new(Box::new(AutoLoader), reference_dirs);

    let report = find_derived(&mut ctx, &module_paths, base)
        .with_context(|| format!("Scan for types deriving from `{base}` failed"))?;

    eprintln!("Found {} derived type(s)", report.matches.len());

    let style = if short_names { NameStyle::Short } else { NameStyle::Full };
    let rendered = if json {
        let mut serialized =
            serde_json::to_string_pretty(&report).context("Failed to serialize scan report")?;
        serialized.push('\n');
        serialized.into_bytes()
    } else {
        let mut buf = Vec::new();
        write_names(&mut buf, &rendered_names(&report, style))?;
        buf
    };

    match output {
        Some(path) => fs::write(&path, rendered)
            .with_context(|| format!("Failed to write results to {}", path.display()))?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&rendered).context("Failed to write results to stdout")?;
            stdout.flush()?;
        }
    }

    Ok(())
}

fn list_types_command(module: &PathBuf, json: bool) -> Result<()> {
    let mut ctx = RunContext::new(Box::new(AutoLoader), Vec::new());
    let names = list_types(&mut ctx, module)
        .with_context(|| format!("Failed to load module {}", module.display()))?;

    if json {
        let serialized =
            serde_json::to_string_pretty(&names).context("Failed to serialize type list")?;
        println!("{serialized}");
    } else {
        let mut stdout = io::stdout().lock();
        write_names(&mut stdout, &names)?;
    }

    Ok(())
}
