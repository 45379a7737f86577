//! # Autodidact CLI
//!
//! ## Usage
//!
//! ```bash
//! autodidact --config ./config/autodidact.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `autodidact init` | Create the SQLite database and schema |
//! | `autodidact serve` | Start the HTTP API |
//! | `autodidact generate "<topic>"` | Generate and store a syllabus tree |
//! | `autodidact elaborate <id>` | Expand a topic with generated content |
//! | `autodidact show <id>` | Print a topic tree |
//! | `autodidact models` | List models offered by the generation backend |

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autodidact::config::{self, Config};
use autodidact::generation::Generator;
use autodidact::models::{TopicStatus, TopicTree};
use autodidact::store::Store;
use autodidact::synchronizer::TreeSynchronizer;
use autodidact::{migrate, query, server};

/// Autodidact: generate, grow, and track a personal learning hierarchy.
#[derive(Parser)]
#[command(name = "autodidact", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/autodidact.toml")]
    config: PathBuf,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Generate a syllabus for a topic and store it.
    Generate {
        /// What to learn, in plain language.
        prompt: String,

        /// Model to use instead of the configured default.
        #[arg(long)]
        model: Option<String>,

        /// Attach the new tree under an existing topic.
        #[arg(long)]
        parent: Option<String>,
    },

    /// Expand an existing topic with an explanation, subtopics, concepts,
    /// and resources.
    Elaborate {
        topic_id: String,

        /// What to focus on.
        #[arg(long, default_value = "")]
        instruction: String,

        #[arg(long)]
        model: Option<String>,
    },

    /// Print a topic and its descendants.
    Show { topic_id: String },

    /// List the models offered by the generation backend.
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("autodidact={},tower_http={}", log_level, log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Generate {
            prompt,
            model,
            parent,
        } => {
            let (store, generator) = open(&cfg).await?;
            let tree = generator.generate_tree(&prompt, model.as_deref()).await?;
            let sync = TreeSynchronizer::new(store.clone());
            let root = sync
                .materialize_tree(&tree, parent.as_deref(), None)
                .await?;
            println!("Created topic {} ({} nodes)", root.id, tree.node_count());
            print_tree(&store, &root.id).await?;
            store.close().await;
        }
        Commands::Elaborate {
            topic_id,
            instruction,
            model,
        } => {
            let (store, generator) = open(&cfg).await?;
            let topic = query::get_topic(store.pool(), &topic_id).await?;
            let elaboration = generator
                .generate_elaboration(
                    &topic.title,
                    topic.description.as_deref().unwrap_or(""),
                    &instruction,
                    model.as_deref(),
                )
                .await?;
            let sync = TreeSynchronizer::new(store.clone());
            sync.merge_elaboration(&topic_id, &elaboration).await?;
            println!(
                "Elaborated {}: +{} subtopics, +{} concepts, +{} resources",
                topic.title,
                elaboration.subtopics.len(),
                elaboration.concepts.len(),
                elaboration.resources.len()
            );
            print_tree(&store, &topic_id).await?;
            store.close().await;
        }
        Commands::Show { topic_id } => {
            let store = Store::open(&cfg).await?;
            print_tree(&store, &topic_id).await?;
            store.close().await;
        }
        Commands::Models => {
            let generator = Generator::from_config(&cfg.generation)?;
            for model in generator.list_models().await? {
                println!("{}\t{}", model.name, model.display_name);
            }
        }
    }

    Ok(())
}

async fn open(cfg: &Config) -> anyhow::Result<(Store, Generator)> {
    let generator = Generator::from_config(&cfg.generation)?;
    let store = Store::open(cfg).await?;
    Ok((store, generator))
}

async fn print_tree(store: &Store, topic_id: &str) -> anyhow::Result<()> {
    let tree = query::topic_tree(store.pool(), topic_id).await?;
    let counts = query::concept_counts(store.pool()).await?;
    let mut out = String::new();
    render_tree(&tree, &counts, 0, &mut out);
    print!("{}", out);
    Ok(())
}

fn render_tree(tree: &TopicTree, counts: &HashMap<String, i64>, depth: usize, out: &mut String) {
    let topic = &tree.topic;
    let mark = match topic.status {
        TopicStatus::Completed => "x",
        TopicStatus::Pending => " ",
    };
    out.push_str(&format!(
        "{}[{}] {}. {}",
        "  ".repeat(depth),
        mark,
        topic.order_index,
        topic.title
    ));
    if let Some(n) = counts.get(&topic.id).filter(|n| **n > 0) {
        out.push_str(&format!(" ({} concepts)", n));
    }
    out.push_str(&format!("  {}\n", topic.id));
    for child in &tree.children {
        render_tree(child, counts, depth + 1, out);
    }
}
