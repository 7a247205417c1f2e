//! Lorekeep CLI - branching dialogue graphs for narrative content

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use lorekeep_core::commands::DialogueCommands;
use lorekeep_core::config::{Config, GENERATION_API_KEY_ENV};
use lorekeep_core::Error;
use lorekeep_core::domain::dialogue::{
    Conversation, ConversationPayload, DialogueGraph, GraphView, Relation, Utterance,
};
use lorekeep_core::generation::{GenerationBridge, HttpUtteranceGenerator};
use lorekeep_core::infrastructure::dialogue::SqliteDialogueGraph;
use lorekeep_core::projection::{JsonlOutboxSink, ProjectionDispatcher, ProjectionSink};
use lorekeep_core::storage::{Database, DatabaseConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "lorekeep")]
#[command(author, version, about = "Branching dialogue graphs for narrative content", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Database file (overrides store.path)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage conversations
    Conversations {
        #[command(subcommand)]
        action: ConversationAction,
    },

    /// Manage utterances
    Utterances {
        #[command(subcommand)]
        action: UtteranceAction,
    },

    /// Manage weighted branches
    Branches {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Walk a conversation
    Paths {
        #[command(subcommand)]
        action: PathAction,
    },

    /// Show the subgraph reachable from a conversation's root
    Graph {
        conversation_id: String,
        /// Hops from the root, 1-25 (out of range uses 10)
        #[arg(short, long, default_value_t = 10, allow_negative_numbers = true)]
        depth: i64,
    },

    /// Export a conversation as JSON
    Export {
        conversation_id: String,
        #[arg(short, long, default_value_t = 10, allow_negative_numbers = true)]
        depth: i64,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a conversation from a JSON file
    Import {
        file: PathBuf,
        /// Keep identifiers from the file and merge into existing rows
        #[arg(long)]
        preserve_ids: bool,
    },

    /// Append generated utterances to a conversation
    Expand {
        conversation_id: String,
        #[arg(short = 'n', long, default_value_t = 3)]
        count: usize,
        /// Scene description passed to the generator
        #[arg(short, long, default_value = "")]
        context: String,
        /// Attach to this utterance instead of the root
        #[arg(long)]
        from: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ConversationAction {
    /// Create a conversation
    Create { title: String },
    /// List all conversations
    List,
    /// Show conversation details
    Show { id: String },
}

#[derive(Subcommand)]
enum UtteranceAction {
    /// Add the root utterance of a conversation
    AddRoot {
        conversation_id: String,
        text: String,
        #[arg(short, long)]
        character: Option<String>,
    },
    /// Add a NEXT utterance after an existing one
    AddNext {
        from_id: String,
        text: String,
        #[arg(short, long)]
        character: Option<String>,
    },
    /// Show utterance details (including deleted ones)
    Show { id: String },
    /// Update text and tags, guarded by the current version
    Update {
        id: String,
        text: String,
        /// Version the update is based on
        #[arg(long)]
        version: i64,
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// Soft-delete an utterance
    Delete { id: String },
}

#[derive(Subcommand)]
enum BranchAction {
    /// Add a BRANCH_TO edge
    Add {
        from_id: String,
        to_id: String,
        #[arg(short, long, allow_negative_numbers = true)]
        weight: Option<f64>,
    },
    /// Change the weight of an existing branch
    SetWeight {
        from_id: String,
        to_id: String,
        #[arg(allow_negative_numbers = true)]
        weight: f64,
    },
}

#[derive(Subcommand)]
enum PathAction {
    /// Follow NEXT edges from the root
    Linear { conversation_id: String },
    /// Sample a weighted random walk
    Random {
        conversation_id: String,
        /// Steps to take, 1-50 (out of range uses 20)
        #[arg(short, long, default_value_t = 20, allow_negative_numbers = true)]
        max_depth: i64,
        /// Seed for a reproducible walk (overrides graph.random_seed)
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
}

/// Command handlers plus the resources they hold open
struct Engine {
    db: Database,
    dispatcher: ProjectionDispatcher,
    commands: DialogueCommands,
}

impl Engine {
    async fn open(config: &Config, database: Option<&Path>, seed: Option<u64>) -> anyhow::Result<Self> {
        let db_config = match database {
            Some(path) => DatabaseConfig::with_path(path).max_connections(config.store.max_connections),
            None => DatabaseConfig::from_store_config(&config.store),
        };
        let db = Database::new(db_config).await?;
        debug!(path = %db.path().display(), "Database opened");

        let graph: Arc<dyn DialogueGraph> = match seed {
            Some(seed) => Arc::new(SqliteDialogueGraph::with_seed(db.graph(), seed)),
            None => Arc::new(SqliteDialogueGraph::from_config(db.graph(), &config.graph)),
        };

        let mut sinks: Vec<Arc<dyn ProjectionSink>> = Vec::new();
        if let Some(path) = &config.projection.outbox_path {
            match JsonlOutboxSink::open(path).await {
                Ok(sink) => sinks.push(Arc::new(sink)),
                Err(e) => warn!(path = %path.display(), error = %e, "Outbox unavailable, events will not be mirrored"),
            }
        }
        let dispatcher = ProjectionDispatcher::spawn(sinks, config.projection.channel_capacity);

        let mut commands = DialogueCommands::new(graph.clone()).with_publisher(dispatcher.publisher());
        match HttpUtteranceGenerator::from_config(&config.generation) {
            Ok(generator) => {
                let bridge = GenerationBridge::new(graph, Arc::new(generator))
                    .with_max_count(config.generation.max_count);
                commands = commands.with_generation(bridge);
            }
            Err(e) => debug!(error = %e, "Generation disabled"),
        }

        Ok(Self {
            db,
            dispatcher,
            commands,
        })
    }

    async fn close(self) {
        let delivered = self.dispatcher.shutdown().await;
        debug!(delivered, "Projection drained");
        self.db.close().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("lorekeep=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Config { action } => cmd_config(action, out),
        Commands::Doctor => cmd_doctor(cli.database.as_deref(), out).await,
        command => {
            let config = Config::load()?;
            let seed = match &command {
                Commands::Paths {
                    action: PathAction::Random { seed, .. },
                } => *seed,
                _ => None,
            };
            let engine = Engine::open(&config, cli.database.as_deref(), seed).await?;
            let result = run(&engine.commands, command, out).await;
            engine.close().await;
            result
        }
    }
}

async fn run(commands: &DialogueCommands, command: Commands, out: Output) -> anyhow::Result<()> {
    match command {
        Commands::Conversations { action } => cmd_conversations(commands, action, out).await,
        Commands::Utterances { action } => cmd_utterances(commands, action, out).await,
        Commands::Branches { action } => cmd_branches(commands, action, out).await,
        Commands::Paths { action } => cmd_paths(commands, action, out).await,
        Commands::Graph {
            conversation_id,
            depth,
        } => cmd_graph(commands, &conversation_id, depth, out).await,
        Commands::Export {
            conversation_id,
            depth,
            output,
        } => cmd_export(commands, &conversation_id, depth, output.as_deref(), out).await,
        Commands::Import { file, preserve_ids } => cmd_import(commands, &file, preserve_ids, out).await,
        Commands::Expand {
            conversation_id,
            count,
            context,
            from,
        } => cmd_expand(commands, &conversation_id, count, &context, from.as_deref(), out).await,
        Commands::Config { .. } | Commands::Doctor => Ok(()),
    }
}

// ============================================================================
// Output
// ============================================================================

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn print_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Informational line, suppressed by `--quiet`
    fn note(&self, message: impl std::fmt::Display) {
        if !self.quiet {
            println!("{}", message);
        }
    }
}

fn print_utterance(u: &Utterance) {
    println!("Utterance: {}", u.id);
    println!("  Text: {}", u.text);
    if let Some(character) = &u.character_id {
        println!("  Character: {}", character);
    }
    println!("  Version: {}", u.version);
    if u.deleted {
        println!("  Deleted: yes");
    }
    if !u.tags.is_empty() {
        let tags: Vec<&str> = u.tags.iter().map(String::as_str).collect();
        println!("  Tags: {}", tags.join(", "));
    }
    println!("  Created: {}", u.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", u.updated_at.format("%Y-%m-%d %H:%M:%S"));
}

fn print_line(u: &Utterance) {
    match &u.character_id {
        Some(character) => println!("  [{}] {}: {}", u.id, character, u.text),
        None => println!("  [{}] {}", u.id, u.text),
    }
}

fn print_relation(r: &Relation) {
    match r.weight {
        Some(weight) => println!("  {} -{}({})-> {}", r.from, r.rel_type, weight, r.to),
        None => println!("  {} -{}-> {}", r.from, r.rel_type, r.to),
    }
}

fn print_conversation(c: &Conversation) {
    println!("Conversation: {}", c.title);
    println!("  ID: {}", c.id);
    println!("  Created: {}", c.created_at.format("%Y-%m-%d %H:%M:%S"));
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_conversations(
    commands: &DialogueCommands,
    action: ConversationAction,
    out: Output,
) -> anyhow::Result<()> {
    match action {
        ConversationAction::Create { title } => {
            let conversation = commands.create_conversation(&title).await?;
            info!(conversation_id = %conversation.id, "Conversation created");
            if out.json() {
                return out.print_json(&conversation);
            }
            if out.quiet {
                println!("{}", conversation.id);
            } else {
                println!("Conversation created successfully!");
                println!("  ID: {}", conversation.id);
                println!("  Title: {}", conversation.title);
                println!("\nNext: lorekeep utterances add-root {} \"<text>\"", conversation.id);
            }
        }
        ConversationAction::List => {
            let conversations = commands.list_conversations().await?;
            if out.json() {
                return out.print_json(&conversations);
            }
            if conversations.is_empty() {
                out.note("No conversations found.\n\nCreate one with: lorekeep conversations create <title>");
            } else {
                out.note("Conversations:");
                for c in conversations {
                    println!("  {} - {}", c.id, c.title);
                }
            }
        }
        ConversationAction::Show { id } => {
            let conversation = commands
                .get_conversation(&id)
                .await?
                .ok_or_else(|| Error::ConversationNotFound(id.clone()))?;
            let path = commands.get_linear_path(&id).await?.unwrap_or_default();

            if out.json() {
                #[derive(Serialize)]
                struct Details<'a> {
                    #[serde(flatten)]
                    conversation: &'a Conversation,
                    linear_path: &'a [Utterance],
                }
                return out.print_json(&Details {
                    conversation: &conversation,
                    linear_path: &path,
                });
            }

            print_conversation(&conversation);
            if path.is_empty() {
                println!("  No root utterance yet.");
            } else {
                println!("  Linear path ({} utterances):", path.len());
                path.iter().for_each(print_line);
            }
        }
    }
    Ok(())
}

async fn cmd_utterances(
    commands: &DialogueCommands,
    action: UtteranceAction,
    out: Output,
) -> anyhow::Result<()> {
    match action {
        UtteranceAction::AddRoot {
            conversation_id,
            text,
            character,
        } => {
            let utterance = commands
                .add_root_utterance(&conversation_id, &text, character.as_deref())
                .await?
                .ok_or_else(|| {
                    anyhow!(
                        "Cannot add a root to '{}': the conversation does not exist or already has a live root. \
                         Update the existing root with `lorekeep utterances update` instead.",
                        conversation_id
                    )
                })?;
            report_created(&utterance, out)
        }
        UtteranceAction::AddNext {
            from_id,
            text,
            character,
        } => {
            let utterance = commands
                .add_next_utterance(&from_id, &text, character.as_deref())
                .await?
                .ok_or_else(|| Error::UtteranceNotFound(from_id.clone()))?;
            report_created(&utterance, out)
        }
        UtteranceAction::Show { id } => {
            let utterance = commands
                .get_utterance(&id)
                .await?
                .ok_or_else(|| anyhow!("Utterance '{}' not found.", id))?;
            if out.json() {
                return out.print_json(&utterance);
            }
            print_utterance(&utterance);
            Ok(())
        }
        UtteranceAction::Update {
            id,
            text,
            version,
            tags,
        } => {
            let utterance = commands
                .update_utterance(&id, &text, &tags, version)
                .await?
                .ok_or_else(|| {
                    anyhow!(
                        "Update rejected: utterance '{}' is missing, deleted, or no longer at version {}. \
                         Run `lorekeep utterances show {}` for the current version.",
                        id,
                        version,
                        id
                    )
                })?;
            if out.json() {
                return out.print_json(&utterance);
            }
            out.note(format!("Utterance '{}' updated to version {}.", utterance.id, utterance.version));
            Ok(())
        }
        UtteranceAction::Delete { id } => {
            let deleted = commands.delete_utterance(&id).await?;
            if out.json() {
                return out.print_json(&serde_json::json!({ "id": id, "deleted": deleted }));
            }
            if deleted {
                out.note(format!("Utterance '{}' deleted.", id));
            } else {
                out.note(format!("Utterance '{}' was already deleted or does not exist.", id));
            }
            Ok(())
        }
    }
}

fn report_created(utterance: &Utterance, out: Output) -> anyhow::Result<()> {
    if out.json() {
        return out.print_json(utterance);
    }
    if out.quiet {
        println!("{}", utterance.id);
    } else {
        println!("Utterance created: {}", utterance.id);
    }
    Ok(())
}

async fn cmd_branches(commands: &DialogueCommands, action: BranchAction, out: Output) -> anyhow::Result<()> {
    let relation = match action {
        BranchAction::Add {
            from_id,
            to_id,
            weight,
        } => commands.add_branch(&from_id, &to_id, weight).await?,
        BranchAction::SetWeight {
            from_id,
            to_id,
            weight,
        } => commands.set_branch_weight(&from_id, &to_id, weight).await?,
    };

    if out.json() {
        return out.print_json(&relation);
    }
    out.note(format!(
        "Branch {} -> {} (weight {})",
        relation.from,
        relation.to,
        relation.sampling_weight()
    ));
    Ok(())
}

async fn cmd_paths(commands: &DialogueCommands, action: PathAction, out: Output) -> anyhow::Result<()> {
    let path = match action {
        PathAction::Linear { conversation_id } => {
            commands.get_linear_path(&conversation_id).await?.ok_or_else(|| {
                anyhow!(
                    "Conversation '{}' not found or has no live root.",
                    conversation_id
                )
            })?
        }
        PathAction::Random {
            conversation_id,
            max_depth,
            ..
        } => commands.get_random_path(&conversation_id, max_depth).await?,
    };

    if out.json() {
        return out.print_json(&path);
    }
    if path.is_empty() {
        out.note("Empty path.");
    } else {
        path.iter().for_each(print_line);
    }
    Ok(())
}

async fn cmd_graph(
    commands: &DialogueCommands,
    conversation_id: &str,
    depth: i64,
    out: Output,
) -> anyhow::Result<()> {
    let view: GraphView = commands
        .get_graph(conversation_id, depth)
        .await?
        .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_string()))?;

    if out.json() {
        return out.print_json(&view);
    }
    if view.is_empty() {
        out.note("Conversation has no root utterance.");
        return Ok(());
    }
    println!("Nodes ({}):", view.nodes.len());
    view.nodes.iter().for_each(print_line);
    println!("Relations ({}):", view.relations.len());
    view.relations.iter().for_each(print_relation);
    Ok(())
}

async fn cmd_export(
    commands: &DialogueCommands,
    conversation_id: &str,
    depth: i64,
    output: Option<&Path>,
    out: Output,
) -> anyhow::Result<()> {
    let payload = commands
        .export(conversation_id, depth)
        .await?
        .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_string()))?;
    let json = serde_json::to_string_pretty(&payload)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write export file: {}", path.display()))?;
            out.note(format!(
                "Exported {} utterances and {} relations to {}",
                payload.utterances.len(),
                payload.relations.len(),
                path.display()
            ));
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn cmd_import(
    commands: &DialogueCommands,
    file: &Path,
    preserve_ids: bool,
    out: Output,
) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read import file: {}", file.display()))?;
    let payload: ConversationPayload = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse import file: {}", file.display()))?;

    let conversation = commands.import(&payload, preserve_ids).await?;
    if out.json() {
        return out.print_json(&conversation);
    }
    if out.quiet {
        println!("{}", conversation.id);
    } else {
        println!("Imported conversation '{}'", conversation.title);
        println!("  ID: {}", conversation.id);
        println!("  Utterances: {}", payload.utterances.len());
        println!("  Relations: {}", payload.relations.len());
    }
    Ok(())
}

async fn cmd_expand(
    commands: &DialogueCommands,
    conversation_id: &str,
    count: usize,
    context: &str,
    from: Option<&str>,
    out: Output,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let appended = commands
        .auto_expand(conversation_id, count, context, from, &cancel)
        .await?;

    if out.json() {
        return out.print_json(&appended);
    }
    if appended.is_empty() {
        out.note("No utterances generated.");
    } else {
        out.note(format!("Appended {} utterances:", appended.len()));
        appended.iter().for_each(print_line);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, out: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            out.note(format!("Set {} = {}", key, value));
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if out.json() {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                return out.print_json(&map);
            }
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
    }
    Ok(())
}

async fn cmd_doctor(database: Option<&Path>, out: Output) -> anyhow::Result<()> {
    out.note("Lorekeep Health Check\n=====================\n");

    let mut all_ok = true;

    let config = match Config::load() {
        Ok(config) => {
            out.note("[OK] Configuration: Valid");
            config
        }
        Err(e) => {
            out.note(format!("[!!] Configuration: Error - {}", e));
            return Err(anyhow!("Health check failed"));
        }
    };

    match config.generation.resolved_api_key() {
        Ok(Some(_)) => out.note("[OK] Generation API Key: Configured"),
        Ok(None) => {
            warn!("Generation API key not configured");
            out.note(format!(
                "[--] Generation API Key: Not configured (set {} to enable `lorekeep expand`)",
                GENERATION_API_KEY_ENV
            ));
        }
        Err(e) => {
            all_ok = false;
            out.note(format!("[!!] Generation API Key: Error - {}", e));
        }
    }

    let db_config = match database {
        Some(path) => DatabaseConfig::with_path(path),
        None => DatabaseConfig::from_store_config(&config.store),
    };
    match Database::new(db_config).await {
        Ok(db) => {
            match db.health_check().await {
                Ok(()) => out.note(format!("[OK] Database: {}", db.path().display())),
                Err(e) => {
                    all_ok = false;
                    out.note(format!("[!!] Database: Error - {}", e));
                }
            }
            match db.migration_status().await {
                Ok(status) if !status.needs_migration => out.note(format!(
                    "[OK] Schema: version {}",
                    status.current_version
                )),
                Ok(status) => {
                    all_ok = false;
                    out.note(format!(
                        "[!!] Schema: version {} (expected {})",
                        status.current_version, status.target_version
                    ));
                }
                Err(e) => {
                    all_ok = false;
                    out.note(format!("[!!] Schema: Error - {}", e));
                }
            }
            db.close().await;
        }
        Err(e) => {
            all_ok = false;
            out.note(format!("[!!] Database: Error - {:#}", e));
        }
    }

    match &config.projection.outbox_path {
        Some(path) => out.note(format!("[OK] Outbox: {}", path.display())),
        None => out.note("[--] Outbox: Disabled"),
    }

    if let Ok(path) = Config::config_path() {
        out.note(format!("\nConfig file: {}", path.display()));
    }

    if all_ok {
        out.note("\nAll checks passed.");
        Ok(())
    } else {
        Err(anyhow!("Health check failed"))
    }
}
