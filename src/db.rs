use crate::config::Config;
use crate::error::{Result, SchoolError};
use anyhow::Context;
use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DB_FILENAME: &str = "school.sqlite3";

#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub max_connections: usize,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PoolOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            max_connections: cfg.pool_size.max(1),
            acquire_timeout: cfg.pool_acquire_timeout,
            busy_timeout: cfg.busy_timeout,
        }
    }
}

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

/// Workspace database plus a bounded pool of connections to it.
///
/// Every core operation checks out one connection for its whole duration and
/// hands it back when the guard drops. Writers use `BEGIN IMMEDIATE`, so the
/// SQLite lock serialises concurrent activations and promotions.
pub struct Store {
    db_path: PathBuf,
    options: PoolOptions,
    state: Mutex<PoolState>,
    freed: Condvar,
}

impl Store {
    pub fn open(workspace: &Path, options: PoolOptions) -> anyhow::Result<Self> {
        std::fs::create_dir_all(workspace).with_context(|| {
            format!(
                "failed to create workspace directory {}",
                workspace.to_string_lossy()
            )
        })?;
        let db_path = workspace.join(DB_FILENAME);
        let conn = open_connection(&db_path, options.busy_timeout)
            .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
        migrate(&conn).context("failed to prepare workspace schema")?;

        Ok(Self {
            db_path,
            options,
            state: Mutex::new(PoolState {
                idle: vec![conn],
                open: 1,
            }),
            freed: Condvar::new(),
        })
    }

    /// Checks out a connection, opening a new one while under the pool limit.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        let deadline = Instant::now() + self.options.acquire_timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection::new(self, conn));
            }

            if state.open < self.options.max_connections {
                state.open += 1;
                drop(state);
                return match open_connection(&self.db_path, self.options.busy_timeout) {
                    Ok(conn) => Ok(PooledConnection::new(self, conn)),
                    Err(e) => {
                        self.state.lock().open -= 1;
                        self.freed.notify_one();
                        Err(e.into())
                    }
                };
            }

            if self.freed.wait_until(&mut state, deadline).timed_out() && state.idle.is_empty()
            {
                tracing::warn!(
                    timeout_ms = self.options.acquire_timeout.as_millis() as u64,
                    "connection pool exhausted"
                );
                return Err(SchoolError::PoolTimeout(self.options.acquire_timeout));
            }
        }
    }

    fn release(&self, conn: Connection) {
        self.state.lock().idle.push(conn);
        self.freed.notify_one();
    }
}

pub struct PooledConnection<'a> {
    store: &'a Store,
    conn: ManuallyDrop<Connection>,
}

impl<'a> PooledConnection<'a> {
    fn new(store: &'a Store, conn: Connection) -> Self {
        Self {
            store,
            conn: ManuallyDrop::new(conn),
        }
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        // SAFETY: `conn` is taken exactly once, here, and never touched again.
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.store.release(conn);
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            is_graduate INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    ensure_classes_is_graduate(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0,
            graduate_class_id TEXT,
            FOREIGN KEY(graduate_class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_academic_years_active ON academic_years(active)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            academic_year_id TEXT NOT NULL,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0,
            previous_term_id TEXT,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id),
            FOREIGN KEY(previous_term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    ensure_terms_previous_term_id(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_terms_year ON terms(academic_year_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_terms_active ON terms(active)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active'
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_status ON students(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_classes(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            class_id TEXT NOT NULL,
            previous_class_id TEXT,
            term_id TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(previous_class_id) REFERENCES classes(id),
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_classes_class ON student_classes(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_promotions(
            class_id TEXT PRIMARY KEY,
            next_class_id TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(next_class_id) REFERENCES classes(id)
        )",
        [],
    )?;

    // Append-only; the promotion engine only ever reads the newest row.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS promotion_events(
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            previous_term_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            undone INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(previous_term_id) REFERENCES terms(id),
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS promotion_snapshots(
            event_id TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            previous_class_id TEXT,
            term_id TEXT NOT NULL,
            PRIMARY KEY(event_id, assignment_id),
            FOREIGN KEY(event_id) REFERENCES promotion_events(id),
            FOREIGN KEY(assignment_id) REFERENCES student_classes(id)
        )",
        [],
    )?;

    Ok(())
}

// Workspaces created before graduate classes existed lack the flag.
fn ensure_classes_is_graduate(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "is_graduate")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE classes ADD COLUMN is_graduate INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_terms_previous_term_id(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "terms", "previous_term_id")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE terms ADD COLUMN previous_term_id TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool(max: usize, wait_ms: u64) -> PoolOptions {
        PoolOptions {
            max_connections: max,
            acquire_timeout: Duration::from_millis(wait_ms),
            busy_timeout: Duration::from_millis(1000),
        }
    }

    #[test]
    fn open_creates_schema_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path(), small_pool(2, 100)).expect("open store");
        {
            let conn = store.acquire().expect("acquire");
            assert!(table_has_column(&conn, "terms", "previous_term_id").expect("pragma"));
            assert!(table_has_column(&conn, "classes", "is_graduate").expect("pragma"));
        }
        drop(store);
        Store::open(dir.path(), small_pool(2, 100)).expect("reopen store");
    }

    #[test]
    fn exhausted_pool_times_out_then_recovers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path(), small_pool(1, 20)).expect("open store");

        let held = store.acquire().expect("first checkout");
        match store.acquire() {
            Err(SchoolError::PoolTimeout(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("pool should be exhausted"),
        }
        drop(held);
        store.acquire().expect("checkout after release");
    }
}
