//! Per-table run locks. A batch stage holds the lock of its destination table
//! for its whole run; a second attempt on the same table fails fast.

use crate::error::{ReadmartError, Result};
use hashbrown::HashSet;
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct TableLocks {
    held: Mutex<HashSet<String>>,
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, table: &str) -> Result<TableGuard<'_>> {
        if !self.held.lock().insert(table.to_string()) {
            return Err(ReadmartError::RefreshInProgress(table.to_string()));
        }
        Ok(TableGuard {
            locks: self,
            table: table.to_string(),
        })
    }

    pub fn is_held(&self, table: &str) -> bool {
        self.held.lock().contains(table)
    }
}

/// Releases the table when dropped.
#[derive(Debug)]
pub struct TableGuard<'a> {
    locks: &'a TableLocks,
    table: String,
}

impl TableGuard<'_> {
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl Drop for TableGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.table);
    }
}
