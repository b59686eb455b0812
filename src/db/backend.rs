use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

use super::schema::{DELETE_VALUE, GET_VALUE, PUT_VALUE, SCHEMA};

/// The persistent key-value medium behind the record store. Values are
/// opaque serialized documents.
pub trait KvBackend {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn put(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// A counter that moves whenever a different handle on the same storage
    /// commits a write. Writes made through `self` do not move it.
    fn external_revision(&self) -> Result<u64>;
}

pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }
}

impl KvBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(GET_VALUE, params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(PUT_VALUE, params![key, value])?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn.execute(DELETE_VALUE, params![key])?;
        Ok(())
    }

    fn external_revision(&self) -> Result<u64> {
        // data_version only changes for commits made by other connections
        let version: i64 = self
            .conn
            .query_row("PRAGMA data_version", [], |row| row.get(0))?;
        Ok(version as u64)
    }
}

#[derive(Default)]
struct SharedValues {
    values: HashMap<String, String>,
    writes: u64,
}

/// Ephemeral storage. Handles created with [`MemoryBackend::handle`] share
/// the same values, which lets two stores observe each other's writes.
#[derive(Default)]
pub struct MemoryBackend {
    shared: Rc<RefCell<SharedValues>>,
    own_writes: Cell<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn handle(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
            own_writes: Cell::new(0),
        }
    }

    fn record_write(&self, shared: &mut SharedValues) {
        shared.writes += 1;
        self.own_writes.set(self.own_writes.get() + 1);
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.shared.borrow().values.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut shared = self.shared.borrow_mut();
        shared.values.insert(key.to_string(), value.to_string());
        self.record_write(&mut shared);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut shared = self.shared.borrow_mut();
        if shared.values.remove(key).is_some() {
            self.record_write(&mut shared);
        }
        Ok(())
    }

    fn external_revision(&self) -> Result<u64> {
        Ok(self.shared.borrow().writes - self.own_writes.get())
    }
}
