//! Transaction boundary shared by all mappers of a model.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::dbal::Connection;
use crate::error::Result;

/// Starts the shared transaction on the first write and ends it on flush or
/// rollback.
///
/// Every mapper asks for a transaction before writing; only the first request
/// issues BEGIN.
pub struct MapperCoordinator {
    connection: Arc<dyn Connection>,
    active: Mutex<bool>,
}

impl MapperCoordinator {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            active: Mutex::new(false),
        }
    }

    pub fn is_transaction_active(&self) -> bool {
        *self.active.lock()
    }

    /// Begin the transaction unless one is running.
    pub fn begin_transaction(&self) -> Result<()> {
        let mut active = self.active.lock();
        if !*active {
            self.connection.begin_transaction()?;
            *active = true;
        }
        Ok(())
    }

    /// Commit the running transaction. Returns whether there was one.
    pub fn flush(&self) -> Result<bool> {
        let mut active = self.active.lock();
        if !*active {
            debug!("flush without pending writes");
            return Ok(false);
        }
        self.connection.commit_transaction()?;
        *active = false;
        Ok(true)
    }

    /// Roll back the running transaction. Returns whether there was one.
    pub fn rollback(&self) -> Result<bool> {
        let mut active = self.active.lock();
        if !*active {
            return Ok(false);
        }
        // The transaction is over even when the driver reports an error.
        *active = false;
        self.connection.rollback_transaction()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrmConfig;
    use crate::dbal::SqliteConnection;

    #[test]
    fn test_begins_once() {
        let connection = Arc::new(SqliteConnection::open_in_memory(&OrmConfig::default()).unwrap());
        let coordinator = MapperCoordinator::new(connection.clone());
        assert!(!coordinator.is_transaction_active());
        coordinator.begin_transaction().unwrap();
        // A second BEGIN would fail inside a running transaction.
        coordinator.begin_transaction().unwrap();
        assert!(coordinator.is_transaction_active());
        assert!(coordinator.flush().unwrap());
        assert!(!coordinator.flush().unwrap());
        assert!(!coordinator.rollback().unwrap());
    }

    #[test]
    fn test_rollback() {
        let connection = Arc::new(SqliteConnection::open_in_memory(&OrmConfig::default()).unwrap());
        connection.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        let coordinator = MapperCoordinator::new(connection.clone());
        coordinator.begin_transaction().unwrap();
        connection.execute("INSERT INTO t (id) VALUES (?)", &[1.into()]).unwrap();
        assert!(coordinator.rollback().unwrap());
        assert!(connection.query("SELECT id FROM t", &[]).unwrap().is_empty());
    }
}
