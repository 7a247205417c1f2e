//! Transactional access to the dialogue property graph
//!
//! The graph engine never touches the pool directly. Every engine operation opens
//! exactly one session here, runs its statements on [`ReadSession::conn`] /
//! [`WriteSession::conn`], and finishes it. Dropping a session without finishing it
//! rolls the transaction back.

use std::sync::Arc;

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::Result;

/// Read/write transaction primitives over a SQLite pool
#[derive(Debug, Clone)]
pub struct GraphStore {
    pool: SqlitePool,
    /// Serializes writers of this process; SQLite admits a single writer anyway
    write_gate: Arc<Mutex<()>>,
}

impl GraphStore {
    /// Wrap an existing pool (the schema must already be migrated)
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a read transaction
    pub async fn read(&self) -> Result<ReadSession> {
        let tx = self.pool.begin().await?;
        Ok(ReadSession { tx })
    }

    /// Begin a write transaction
    ///
    /// Waits for the write gate before taking a connection so queued writers do not
    /// hold pool slots.
    pub async fn write(&self) -> Result<WriteSession> {
        let gate = self.write_gate.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteSession { tx, _gate: gate })
    }
}

/// A read-only transaction
pub struct ReadSession {
    tx: Transaction<'static, Sqlite>,
}

impl ReadSession {
    /// Connection to run statements on
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// End the transaction
    pub async fn finish(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// A write transaction holding the process-wide write gate
pub struct WriteSession {
    tx: Transaction<'static, Sqlite>,
    _gate: OwnedMutexGuard<()>,
}

impl WriteSession {
    /// Connection to run statements on
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Commit all statements of this session
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        debug!("Graph write committed");
        Ok(())
    }

    /// Discard all statements of this session
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        debug!("Graph write rolled back");
        Ok(())
    }
}
