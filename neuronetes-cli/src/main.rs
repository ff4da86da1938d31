//! nnctl: operator CLI for the NeuroNetes control plane.
//!
//! Creates, updates, deletes and inspects the declarative records the
//! controller reconciles. Exit codes: 0 success, 1 validation failure,
//! 2 transient error.

mod manifest;
mod output;

use clap::{Parser, Subcommand};
use manifest::Manifest;
use neuronetes_store::{Kind, Store};
use neuronetes_types::{
    AgentClassSpec, Category, ControlError, ModelSpec, PoolSpec, ToolBindingSpec,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "nnctl")]
#[command(about = "Operate NeuroNetes models, agent classes, pools and tool bindings")]
#[command(version)]
struct Cli {
    /// Record store path (shared with neuronetesd).
    #[arg(long, env = "NEURONETES_STORE_PATH", default_value = "./neuronetes_db")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every record in a YAML manifest (multi-document).
    Apply {
        /// Manifest file.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List records of a kind, or show one as YAML.
    Get {
        /// Record kind: model, agentclass, pool, toolbinding.
        kind: Kind,
        /// Record id; omit to list all.
        id: Option<String>,
    },

    /// Delete a record.
    Delete {
        /// Record kind.
        kind: Kind,
        /// Record id.
        id: String,
    },

    /// Show a record with its status and conditions.
    Describe {
        /// Record kind.
        kind: Kind,
        /// Record id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let store = match Store::open(&cli.store) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("cannot open record store: {e}");
            return ExitCode::from(2);
        }
    };
    match run(&store, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(err: &ControlError) -> u8 {
    match err.category() {
        Category::Validation => 1,
        _ => 2,
    }
}

async fn run(store: &Store, command: Commands) -> Result<(), ControlError> {
    match command {
        Commands::Apply { file } => apply(store, &file).await,
        Commands::Get { kind, id } => output::get(store, kind, id.as_deref()).await,
        Commands::Delete { kind, id } => delete(store, kind, &id).await,
        Commands::Describe { kind, id } => output::describe(store, kind, &id).await,
    }
}

async fn apply(store: &Store, file: &std::path::Path) -> Result<(), ControlError> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| ControlError::Validation(format!("cannot read {}: {e}", file.display())))?;
    let manifests = manifest::parse_all(&content)?;
    if manifests.is_empty() {
        return Err(ControlError::Validation(format!(
            "{} contains no records",
            file.display()
        )));
    }
    for manifest in manifests {
        match manifest {
            Manifest::Model { spec } => {
                neuronetes_types::validate::validate_model(&spec)?;
                let stored = store.apply(spec).await?;
                println!("model/{} applied (generation {})", stored.id, stored.generation);
            }
            Manifest::AgentClass { spec } => {
                neuronetes_types::validate::validate_agent_class(&spec)?;
                let stored = store.apply(spec).await?;
                println!(
                    "agentclass/{} applied (generation {})",
                    stored.id, stored.generation
                );
            }
            Manifest::Pool { spec } => {
                neuronetes_types::validate::validate_pool(&spec)?;
                let stored = store.apply(spec).await?;
                println!("pool/{} applied (generation {})", stored.id, stored.generation);
            }
            Manifest::ToolBinding { spec } => {
                neuronetes_types::validate::validate_tool_binding(&spec)?;
                let stored = store.apply(spec).await?;
                println!(
                    "toolbinding/{} applied (generation {})",
                    stored.id, stored.generation
                );
            }
        }
    }
    Ok(())
}

async fn delete(store: &Store, kind: Kind, id: &str) -> Result<(), ControlError> {
    let existed = match kind {
        Kind::Model => store.delete::<ModelSpec>(id).await?,
        Kind::AgentClass => store.delete::<AgentClassSpec>(id).await?,
        Kind::Pool => store.delete::<PoolSpec>(id).await?,
        Kind::ToolBinding => store.delete::<ToolBindingSpec>(id).await?,
    };
    if !existed {
        return Err(ControlError::Validation(format!("{kind}/{id} not found")));
    }
    println!("{kind}/{id} deleted");
    Ok(())
}
