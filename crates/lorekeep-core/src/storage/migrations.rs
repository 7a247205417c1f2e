//! Database migrations
//!
//! Bootstrap statements for the dialogue property graph. Migrations are versioned,
//! idempotent, and applied automatically on database connection.
//!
//! Layout: two node tables (`conversations`, `utterances`) and one relationship
//! table (`relations`) holding `ROOT`, `NEXT` and `BRANCH_TO` edges.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Dialogue graph schema
const MIGRATION_V1: &str = r#"
    -- Conversation nodes
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    -- Utterance nodes (tags stored as a sorted JSON array)
    CREATE TABLE IF NOT EXISTS utterances (
        id TEXT PRIMARY KEY NOT NULL,
        text TEXT NOT NULL,
        character_id TEXT,
        version INTEGER NOT NULL DEFAULT 1 CHECK (version >= 1),
        deleted INTEGER NOT NULL DEFAULT 0 CHECK (deleted IN (0, 1)),
        tags TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    -- Relationships; ROOT starts at a conversation, the others at an utterance
    CREATE TABLE IF NOT EXISTS relations (
        from_id TEXT NOT NULL,
        to_id TEXT NOT NULL,
        rel_type TEXT NOT NULL CHECK (rel_type IN ('ROOT', 'NEXT', 'BRANCH_TO')),
        weight REAL CHECK (weight IS NULL OR weight > 0),
        created_at TEXT NOT NULL,
        PRIMARY KEY (from_id, to_id, rel_type)
    );

    -- At most one ROOT edge per conversation
    CREATE UNIQUE INDEX IF NOT EXISTS idx_relations_single_root
        ON relations(from_id) WHERE rel_type = 'ROOT';
"#;

/// Migration 2: Lookup indexes
const MIGRATION_V2: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_utterances_character_id ON utterances(character_id);
    CREATE INDEX IF NOT EXISTS idx_relations_from_type ON relations(from_id, rel_type);
    CREATE INDEX IF NOT EXISTS idx_relations_to_type ON relations(to_id, rel_type);
    CREATE INDEX IF NOT EXISTS idx_conversations_created_at ON conversations(created_at);
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Dialogue graph schema");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Lookup indexes");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}
