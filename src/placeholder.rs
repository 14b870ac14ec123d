use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};

/// A single-assignment cell for a value produced by a queued operation.
///
/// Clones share the same cell, so a handle returned to the caller observes the
/// value once the operation that owns the other handle fulfills it.
pub struct Placeholder<T> {
    cell: Arc<OnceLock<T>>,
}

impl<T> Placeholder<T> {
    /// Create an empty placeholder.
    pub fn new() -> Self {
        Self {
            cell: Arc::new(OnceLock::new()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Store the value.
    ///
    /// # Errors
    /// [`Error::PlaceholderFulfilled`] if a value was already stored; the
    /// existing value is kept.
    pub fn fulfill(&self, value: T) -> Result<()> {
        self.cell.set(value).map_err(|_| Error::PlaceholderFulfilled)
    }

    /// Borrow the stored value.
    ///
    /// # Errors
    /// [`Error::PlaceholderUnfulfilled`] before [`fulfill`](Self::fulfill).
    pub fn get(&self) -> Result<&T> {
        self.cell.get().ok_or(Error::PlaceholderUnfulfilled)
    }

    /// Whether two handles share the same cell.
    pub fn same_cell(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T: Clone> Placeholder<T> {
    pub fn value(&self) -> Result<T> {
        self.get().cloned()
    }
}

impl<T> Clone for Placeholder<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Default for Placeholder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Placeholder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(v) => f.debug_tuple("Placeholder").field(v).finish(),
            None => f.write_str("Placeholder(<pending>)"),
        }
    }
}
