//! bmad - BMAD project detection and auto-execution.
//!
//! Every subcommand prints pretty JSON on stdout. Logs go to stderr.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bmad_pipeline::{BmadSystem, ConfigStore};

/// Detect BMAD projects and track their automatic execution
#[derive(Parser)]
#[command(name = "bmad")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON, or TOML with a .toml extension)
    #[arg(short, long, global = true, env = "BMAD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show component health and executor statistics
    Status,

    /// Read or write configuration
    Config {
        #[command(subcommand)]
        operation: ConfigOperation,
    },

    /// Run detection on content without side effects
    Detect {
        #[command(flatten)]
        input: Input,
    },

    /// Run content through the full pipeline and wait for the execution
    Execute {
        #[command(flatten)]
        input: Input,

        /// Execution options (key=value, values parsed as JSON when possible)
        #[arg(short, long = "opt", value_name = "KEY=VALUE")]
        opts: Vec<String>,
    },

    /// Show execution counts and configuration counters
    Stats,

    /// Change the execution mode and persist it
    Mode {
        /// New mode (toggles when omitted)
        #[arg(value_enum)]
        mode: Option<Mode>,
    },

    /// Validate a response object against the configured rules
    Validate {
        #[command(flatten)]
        input: Input,
    },

    /// Show the configured response templates
    Templates,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigOperation {
    /// Print the full configuration tree
    Show,

    /// Print the value at a dotted path
    Get {
        /// Dotted path (e.g. responses.templates)
        path: String,
    },

    /// Set the value at a dotted path and save
    Set {
        /// Dotted path
        path: String,

        /// Value, parsed as JSON when possible
        value: String,
    },

    /// Print the configuration file location
    Path,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    On,
    Off,
    Toggle,
}

/// Content given inline, from a file, or on stdin.
#[derive(clap::Args)]
struct Input {
    /// Inline content (reads stdin when neither this nor --file is given)
    content: Option<String>,

    /// Read content from a file
    #[arg(short, long, conflicts_with = "content")]
    file: Option<PathBuf>,
}

impl Input {
    fn read(self) -> Result<String> {
        if let Some(content) = self.content {
            return Ok(content);
        }
        if let Some(path) = self.file {
            return std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()));
        }
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).context("Failed to read stdin")?;
        Ok(buf)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    if let Commands::Completions { shell } = cli.command {
        cmd_completions(shell);
        return Ok(());
    }

    let store = match &cli.config {
        Some(path) => ConfigStore::open(path)?,
        None => ConfigStore::open_default()?,
    };
    let system = BmadSystem::new(Arc::new(store));

    match cli.command {
        Commands::Status => print_json(&system.status()),
        Commands::Config { operation } => cmd_config(&system, operation),
        Commands::Detect { input } => print_json(&system.detect(&input.read()?)?),
        Commands::Execute { input, opts } => cmd_execute(&system, &input.read()?, &opts),
        Commands::Stats => print_json(&system.stats()),
        Commands::Mode { mode } => cmd_mode(&system, mode.unwrap_or(Mode::Toggle)),
        Commands::Validate { input } => cmd_validate(&system, &input.read()?),
        Commands::Templates => print_json(&system.templates()),
        Commands::Completions { .. } => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a CLI value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_options(opts: &[String]) -> Result<Map<String, Value>> {
    let mut options = Map::new();
    for opt in opts {
        let Some((key, value)) = opt.split_once('=') else {
            anyhow::bail!("Invalid option '{opt}': expected KEY=VALUE");
        };
        options.insert(key.trim().to_string(), parse_value(value));
    }
    Ok(options)
}

/// Handle configuration commands.
fn cmd_config(system: &BmadSystem, operation: ConfigOperation) -> Result<()> {
    match operation {
        ConfigOperation::Show => print_json(&system.config_all()),
        ConfigOperation::Get { path } => match system.config_get(&path) {
            Some(value) => print_json(&value),
            None => anyhow::bail!("No value at '{path}'"),
        },
        ConfigOperation::Set { path, value } => {
            system.config_set(&path, parse_value(&value))?;
            system.save_config()?;
            print_json(&system.config_get(&path))
        }
        ConfigOperation::Path => {
            if let Some(path) = system.config().path() {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}

/// Run the pipeline and wait for the execution, if one was started.
fn cmd_execute(system: &BmadSystem, content: &str, opts: &[String]) -> Result<()> {
    let options = parse_options(opts)?;

    let rt = tokio::runtime::Runtime::new()?;
    let response = rt.block_on(async {
        let mut response = system.execute(content, options)?;
        if let Some(record) = response.execution.take() {
            response.execution = Some(system.wait(&record.id.to_string()).await?);
        }
        Ok::<_, bmad_pipeline::PipelineError>(response)
    })?;

    // Keep the counters across invocations.
    system.save_config()?;
    print_json(&response)?;

    match response.execution.as_ref().and_then(|record| record.failure()) {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

fn cmd_mode(system: &BmadSystem, mode: Mode) -> Result<()> {
    let enabled = match mode {
        Mode::Toggle => system.toggle_execution_mode()?,
        Mode::On | Mode::Off => {
            let enabled = matches!(mode, Mode::On);
            system.config().set_execution_mode(enabled);
            system.save_config()?;
            enabled
        }
    };
    print_json(&serde_json::json!({ "executionEnabled": enabled }))
}

fn cmd_validate(system: &BmadSystem, raw: &str) -> Result<()> {
    // Unparsable input is itself a validation failure.
    let response = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    let result = system.validate_response(&response);
    print_json(&result)?;
    if !result.valid {
        anyhow::bail!("Response failed validation: {}", result.messages().join("; "));
    }
    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "bmad", &mut io::stdout());
}
