//! The connection collaborator.
//!
//! The engines only need to run a statement with positional parameters and
//! get back either an affected-row count or the returned rows. Vendor
//! differences stay behind [`ConnectionProvider`]; the crate ships a SQLite
//! provider built on rusqlite.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::params_from_iter;
use serde::Deserialize;

use crate::datatype::SqlValue;
use crate::error::{EavaultError, Result};

/// Backend families the engine knows the limits of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Mysql,
    Postgres,
    Tsql,
    Oracle,
}

impl Dialect {
    /// Upper bound on bound parameters (or IN-list members) per statement.
    pub fn max_parameters(&self) -> usize {
        match self {
            Dialect::Sqlite => 999,
            Dialect::Mysql => 65_535,
            Dialect::Postgres => 65_535,
            Dialect::Tsql => 2_100,
            Dialect::Oracle => 1_000,
        }
    }

    /// A batch or chunk size cut down to fit one IN list, leaving one
    /// parameter for the statement's other key.
    pub fn clamp(&self, size: usize) -> usize {
        size.min(self.max_parameters() - 1).max(1)
    }

    pub fn supports_if_not_exists(&self) -> bool {
        matches!(self, Dialect::Sqlite | Dialect::Mysql | Dialect::Postgres)
    }
}

/// One returned row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<SqlValue>);

impl Row {
    pub fn get(&self, index: usize) -> Result<&SqlValue> {
        self.0.get(index).ok_or_else(|| {
            EavaultError::corruption(format!(
                "row has {} columns, wanted column {}",
                self.0.len(),
                index
            ))
        })
    }
    pub fn text(&self, index: usize) -> Result<&str> {
        self.get(index)?.as_str()
    }
    pub fn integer(&self, index: usize) -> Result<i64> {
        self.get(index)?.as_i64()
    }
    pub fn id(&self, index: usize) -> Result<u32> {
        let raw = self.integer(index)?;
        u32::try_from(raw)
            .map_err(|_| EavaultError::corruption(format!("{} is not a valid id", raw)))
    }
    pub fn position(&self, index: usize) -> Result<usize> {
        let raw = self.integer(index)?;
        usize::try_from(raw)
            .map_err(|_| EavaultError::corruption(format!("{} is not a valid position", raw)))
    }
}

pub trait Connection {
    /// Runs a statement and returns the number of affected rows. An update
    /// that matches a row counts it even when the value is unchanged (on
    /// MySQL, connect with `CLIENT_FOUND_ROWS`).
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize>;
    /// Runs a query and returns every row.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;
    /// Runs parameterless statements separated by semicolons.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;
}

pub trait ConnectionProvider: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn Connection + '_>>;
    fn dialect(&self) -> Dialect;
}

// ------------- SQLite -------------
enum Source {
    Shared(Mutex<rusqlite::Connection>),
    File(PathBuf),
}

/// Hands out SQLite connections. A file database gets a fresh connection
/// per acquire; an in-memory database is one connection behind a mutex.
pub struct SqliteProvider {
    source: Source,
    busy_timeout: Duration,
}

impl SqliteProvider {
    pub fn open(path: &Path) -> Result<Self> {
        // fail early on an unusable path
        rusqlite::Connection::open(path)?;
        Ok(Self {
            source: Source::File(path.to_path_buf()),
            busy_timeout: Duration::from_secs(5),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            source: Source::Shared(Mutex::new(rusqlite::Connection::open_in_memory()?)),
            busy_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

impl ConnectionProvider for SqliteProvider {
    fn acquire(&self) -> Result<Box<dyn Connection + '_>> {
        let handle = match &self.source {
            Source::Shared(conn) => Handle::Guard(conn.lock()?),
            Source::File(path) => {
                let conn = rusqlite::Connection::open(path)?;
                conn.busy_timeout(self.busy_timeout)?;
                Handle::Owned(conn)
            }
        };
        Ok(Box::new(SqliteConnection { handle }))
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }
}

enum Handle<'a> {
    Guard(MutexGuard<'a, rusqlite::Connection>),
    Owned(rusqlite::Connection),
}

impl Deref for Handle<'_> {
    type Target = rusqlite::Connection;
    fn deref(&self) -> &rusqlite::Connection {
        match self {
            Handle::Guard(guard) => &**guard,
            Handle::Owned(conn) => conn,
        }
    }
}

pub struct SqliteConnection<'a> {
    handle: Handle<'a>,
}

impl Connection for SqliteConnection<'_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        let mut statement = self.handle.prepare_cached(sql)?;
        Ok(statement.execute(params_from_iter(params.iter()))?)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let mut statement = self.handle.prepare_cached(sql)?;
        let columns = statement.column_count();
        let mut rows = statement.query(params_from_iter(params.iter()))?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(SqlValue::from_value_ref(row.get_ref(i)?));
            }
            collected.push(Row(values));
        }
        Ok(collected)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        Ok(self.handle.execute_batch(sql)?)
    }
}
