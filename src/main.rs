//! personal-infra - render the proxy deployment templates

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use personal_infra::compiler::DeploymentBuilder;
use personal_infra::context::{ContextFile, DeploymentContext, Environment};
use personal_infra::template::{self, OutputFormat, StackTemplate};

/// Render the personal proxy infrastructure into provisioning-engine templates
#[derive(Parser, Debug)]
#[command(name = "personal-infra", version, about, long_about = None)]
struct Cli {
    /// Context value as key=value (repeatable), e.g. `-c useWarp=true`
    #[arg(short = 'c', long = "context", global = true)]
    context: Vec<String>,

    /// JSON file with a top-level `context` object
    #[arg(long, global = true)]
    context_file: Option<PathBuf>,

    /// Account to pin into the templates
    #[arg(long, env = "CDK_DEFAULT_ACCOUNT", global = true)]
    account: Option<String>,

    /// Region to pin into the templates
    #[arg(long, env = "CDK_DEFAULT_REGION", global = true)]
    region: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the deployment and write both stack templates
    Synth {
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Write `<Stack>.template.<ext>` files here instead of stdout
        #[arg(short = 'o', long)]
        output_dir: Option<PathBuf>,
    },

    /// Print every logical resource ID per stack
    List,

    /// Print the JSON schema of the context file
    Schema,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => OutputFormat::Json,
            Format::Yaml => OutputFormat::Yaml,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries templates only
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Commands::Schema = cli.command {
        let schema = schemars::schema_for!(ContextFile);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let context = load_context(&cli)?;
    let graph = DeploymentBuilder::new(&context).build()?;
    let stacks = template::render(&graph)?;

    match cli.command {
        Commands::Synth { format, output_dir } => synth(&stacks, format.into(), output_dir),
        Commands::List => {
            list(&stacks);
            Ok(())
        }
        Commands::Schema => Ok(()),
    }
}

/// Merge file context, command-line pairs (which win) and the environment
fn load_context(cli: &Cli) -> anyhow::Result<DeploymentContext> {
    let environment = Environment {
        account: cli.account.clone(),
        region: cli.region.clone(),
    };
    Ok(DeploymentContext::from_sources(
        cli.context_file.as_deref(),
        cli.context.as_slice(),
        environment,
    )?)
}

fn synth(
    stacks: &[StackTemplate],
    format: OutputFormat,
    output_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    match output_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            for stack in stacks {
                let path = dir.join(stack.file_name(format));
                std::fs::write(&path, stack.serialize(format)?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(stack = %stack.name, path = %path.display(), "wrote template");
            }
        }
        None => {
            for stack in stacks {
                if format == OutputFormat::Yaml {
                    println!("# {}", stack.name);
                    println!("---");
                }
                println!("{}", stack.serialize(format)?);
            }
        }
    }
    Ok(())
}

fn list(stacks: &[StackTemplate]) {
    for stack in stacks {
        println!("{}", stack.name);
        for (id, resource) in &stack.template.resources {
            println!("  {id} ({})", resource.type_);
        }
    }
}
