pub mod records;
pub mod schema;
pub mod tokens;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Explicitly opened handle on the SQLite backend.
///
/// Cheap to clone; all clones share one connection. After [`Database::close`]
/// every call fails with [`Error::StorageUnavailable`].
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::StorageUnavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::StorageUnavailable(format!("cannot open {}: {}", path.display(), e)))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        info!("Database: opened {}", path.display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        };
        db.execute_init()?;
        Ok(db)
    }

    fn execute_init(&self) -> Result<()> {
        debug!("Database: Initializing schema...");
        self.with_conn(|conn| {
            conn.execute_batch(schema::SCHEMA)?;
            Ok(())
        })?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) -> Result<()> {
        let conn = {
            let mut guard = self.lock()?;
            guard.take()
        };
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| Error::Storage(e))?;
            info!("Database: closed");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.lock()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::StorageUnavailable("database is closed".to_string()))?;
        f(conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut guard = self.lock()?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::StorageUnavailable("database is closed".to_string()))?;
        f(conn)
    }

    /// Run `f` on tokio's blocking pool.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|e| Error::StorageUnavailable(format!("DB lock poisoned: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_close_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");

        let db = Database::open(&path).unwrap();
        assert!(db.is_open());
        assert!(path.exists());

        db.close().unwrap();
        assert!(!db.is_open());
        db.close().unwrap();

        let err = db.with_conn(|_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn test_schema_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.execute_init().unwrap();
        let tables: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('messages', 'token_counters')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[tokio::test]
    async fn test_run_blocking() {
        let db = Database::open_in_memory().unwrap();
        let one: i64 = db
            .run_blocking(|db| db.with_conn(|conn| Ok(conn.query_row("SELECT 1", [], |r| r.get(0))?)))
            .await
            .unwrap();
        assert_eq!(one, 1);
    }
}
