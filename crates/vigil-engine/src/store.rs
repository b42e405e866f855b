//! Where hosts and scripts come from and where results go.
//!
//! Host and script records are owned by an external inventory service; the
//! engine only reads them. Results are insert-only.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument};
use vigil_core::{
    CheckStatus, Credential, ErrorCode, ExecutionResult, Host, Protocol, Script, SessionId,
};

use crate::error::{EngineError, Result};

#[async_trait]
pub trait Inventory: Send + Sync {
    async fn host(&self, id: &str) -> Result<Option<Host>>;
    async fn script(&self, id: &str) -> Result<Option<Script>>;
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(&self, result: &ExecutionResult) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// Create the inventory and result tables.
///
/// Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS hosts (
            id          TEXT PRIMARY KEY,
            address     TEXT NOT NULL,
            port        INTEGER,
            protocol    TEXT NOT NULL,
            username    TEXT NOT NULL,
            credential  TEXT NOT NULL,
            use_tls     INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS scripts (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL DEFAULT '',
            command     TEXT NOT NULL,
            processor   TEXT,
            reference   TEXT
        );
        CREATE TABLE IF NOT EXISTS execution_results (
            id                 TEXT PRIMARY KEY,
            session_id         TEXT NOT NULL,
            host_id            TEXT NOT NULL,
            script_id          TEXT NOT NULL,
            success            INTEGER NOT NULL,
            output             TEXT NOT NULL,
            error              TEXT NOT NULL,
            check_status       TEXT NOT NULL,
            error_code         INTEGER,
            error_description  TEXT,
            actual_data        TEXT,
            executed_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_results_session
            ON execution_results(session_id, executed_at);
        CREATE INDEX IF NOT EXISTS idx_results_host_script
            ON execution_results(host_id, script_id, executed_at DESC);",
    )?;
    Ok(())
}

/// SQLite-backed [`Inventory`] and [`ResultSink`] over one connection.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an open connection, creating tables as needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| EngineError::LockPoisoned)
    }

    /// Insert or replace a host record. Used by embedders and tests that
    /// have no external inventory.
    pub fn put_host(&self, host: &Host) -> Result<()> {
        let credential = serde_json::to_string(&host.credential)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO hosts
             (id, address, port, protocol, username, credential, use_tls)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                host.id,
                host.address,
                host.port,
                host.protocol.to_string(),
                host.username,
                credential,
                host.use_tls,
            ],
        )?;
        Ok(())
    }

    pub fn put_script(&self, script: &Script) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO scripts (id, name, command, processor, reference)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                script.id,
                script.name,
                script.command,
                script.processor,
                script.reference
            ],
        )?;
        Ok(())
    }

    /// Every result of one run, in execution order.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn results_for_session(&self, session_id: &SessionId) -> Result<Vec<ExecutionResult>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, session_id, host_id, script_id, success, output, error,
                    check_status, error_code, error_description, actual_data, executed_at
             FROM execution_results
             WHERE session_id = ?1
             ORDER BY executed_at, id",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], |row| {
            Ok(RawResult {
                id: row.get(0)?,
                session_id: row.get(1)?,
                host_id: row.get(2)?,
                script_id: row.get(3)?,
                success: row.get(4)?,
                output: row.get(5)?,
                error: row.get(6)?,
                check_status: row.get(7)?,
                error_code: row.get(8)?,
                error_description: row.get(9)?,
                actual_data: row.get(10)?,
                executed_at: row.get(11)?,
            })
        })?;
        let results = rows
            .map(|r| r.map_err(EngineError::from).and_then(RawResult::into_result))
            .collect::<Result<Vec<_>>>();
        results
    }
}

#[async_trait]
impl Inventory for SqliteStore {
    #[instrument(skip(self))]
    async fn host(&self, id: &str) -> Result<Option<Host>> {
        let db = self.conn()?;
        let row = db
            .query_row(
                "SELECT id, address, port, protocol, username, credential, use_tls
                 FROM hosts WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<u16>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, bool>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, address, port, protocol, username, credential, use_tls)) = row else {
            return Ok(None);
        };
        let protocol: Protocol = protocol.parse().map_err(EngineError::InvalidRecord)?;
        let credential: Credential = serde_json::from_str(&credential)?;
        Ok(Some(Host {
            id,
            address,
            port,
            protocol,
            username,
            credential,
            use_tls,
        }))
    }

    #[instrument(skip(self))]
    async fn script(&self, id: &str) -> Result<Option<Script>> {
        let db = self.conn()?;
        let script = db
            .query_row(
                "SELECT id, name, command, processor, reference FROM scripts WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Script {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        command: row.get(2)?,
                        processor: row.get(3)?,
                        reference: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(script)
    }
}

#[async_trait]
impl ResultSink for SqliteStore {
    #[instrument(
        skip(self, result),
        fields(host_id = %result.host_id, script_id = %result.script_id)
    )]
    async fn record(&self, result: &ExecutionResult) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO execution_results
             (id, session_id, host_id, script_id, success, output, error,
              check_status, error_code, error_description, actual_data, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                result.id,
                result.session_id.as_str(),
                result.host_id,
                result.script_id,
                result.success,
                result.output,
                result.error,
                result.check_status.to_string(),
                result.error_code.map(|c| c.code()),
                result.error_description,
                result.actual_data,
                result.executed_at.to_rfc3339(),
            ],
        )?;
        debug!(check_status = %result.check_status, "result recorded");
        Ok(())
    }
}

/// Column values before validation.
struct RawResult {
    id: String,
    session_id: String,
    host_id: String,
    script_id: String,
    success: bool,
    output: String,
    error: String,
    check_status: String,
    error_code: Option<i64>,
    error_description: Option<String>,
    actual_data: Option<String>,
    executed_at: String,
}

impl RawResult {
    fn into_result(self) -> Result<ExecutionResult> {
        let check_status: CheckStatus =
            self.check_status.parse().map_err(EngineError::InvalidRecord)?;
        let error_code = match self.error_code {
            Some(n) => Some(
                ErrorCode::from_code(n)
                    .ok_or_else(|| EngineError::InvalidRecord(format!("error code {n}")))?,
            ),
            None => None,
        };
        let executed_at = DateTime::parse_from_rfc3339(&self.executed_at)
            .map_err(|e| EngineError::InvalidRecord(format!("executed_at: {e}")))?
            .with_timezone(&Utc);
        Ok(ExecutionResult {
            id: self.id,
            session_id: SessionId(self.session_id),
            host_id: self.host_id,
            script_id: self.script_id,
            success: self.success,
            output: self.output,
            error: self.error,
            check_status,
            error_code,
            error_description: self.error_description,
            actual_data: self.actual_data,
            executed_at,
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Map-backed store for tests and embedding.
#[derive(Default)]
pub struct InMemoryStore {
    hosts: Mutex<HashMap<String, Host>>,
    scripts: Mutex<HashMap<String, Script>>,
    results: Mutex<Vec<ExecutionResult>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(self, host: Host) -> Self {
        if let Ok(mut hosts) = self.hosts.lock() {
            hosts.insert(host.id.clone(), host);
        }
        self
    }

    pub fn with_script(self, script: Script) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(script.id.clone(), script);
        }
        self
    }

    /// Snapshot of everything recorded so far, in insertion order.
    pub fn results(&self) -> Vec<ExecutionResult> {
        self.results
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Inventory for InMemoryStore {
    async fn host(&self, id: &str) -> Result<Option<Host>> {
        let hosts = self.hosts.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(hosts.get(id).cloned())
    }

    async fn script(&self, id: &str) -> Result<Option<Script>> {
        let scripts = self.scripts.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(scripts.get(id).cloned())
    }
}

#[async_trait]
impl ResultSink for InMemoryStore {
    async fn record(&self, result: &ExecutionResult) -> Result<()> {
        self.results
            .lock()
            .map_err(|_| EngineError::LockPoisoned)?
            .push(result.clone());
        Ok(())
    }
}
