use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduler_jobs (
            id               TEXT    NOT NULL PRIMARY KEY,
            name             TEXT    NOT NULL,
            job_type         TEXT    NOT NULL,
            status           TEXT    NOT NULL DEFAULT 'active',
            schedule_config  TEXT    NOT NULL,   -- JSON ScheduleConfig
            next_run_at      TEXT,               -- NULL while paused, completed or claimed
            run_times        TEXT    NOT NULL DEFAULT '[]',
            remaining_runs   INTEGER,
            tasks            TEXT    NOT NULL,   -- JSON [TaskSpec]
            last_run_at      TEXT,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_scheduler_jobs_due
            ON scheduler_jobs (status, next_run_at);

        CREATE TABLE IF NOT EXISTS scheduler_runs (
            id            TEXT    NOT NULL PRIMARY KEY,
            job_id        TEXT    NOT NULL,
            status        TEXT    NOT NULL,
            started_at    TEXT    NOT NULL,
            finished_at   TEXT,
            session_id    TEXT,
            error         TEXT,
            total_tasks   INTEGER NOT NULL DEFAULT 0,
            failed_tasks  INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_scheduler_runs_job
            ON scheduler_runs (job_id, started_at);
        ",
    )?;
    Ok(())
}
