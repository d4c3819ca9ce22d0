//! In-memory cursor windows: append-only-then-frozen snapshots of query
//! results with random-access typed reads.
//!
//! A window owns an ordered row store of fixed-width rows of value cells.
//! The whole result set is cached so a cursor can move backwards as well as
//! forwards. Windows live in a handle registry like connections and
//! statements do; a disposed handle never resolves again.

use std::sync::Arc;
use std::sync::LazyLock;

use ersatzlite_error::{ErsatzError, Result};
use ersatzlite_types::{HandleTable, Value, ValueKind};
use parking_lot::Mutex;
use tracing::debug;

/// One fixed-width row of value cells.
#[derive(Debug, Clone)]
pub struct Row {
    cells: Vec<Value>,
}

impl Row {
    fn filled_with_null(width: usize) -> Self {
        Self {
            cells: vec![Value::Null; width],
        }
    }

    fn get(&self, col: usize) -> Result<&Value> {
        self.cells.get(col).ok_or_else(|| {
            ErsatzError::IndexOutOfRange(format!(
                "Bad column number: {col}, count: {}",
                self.cells.len()
            ))
        })
    }

    fn set(&mut self, col: usize, value: Value) -> Result<()> {
        let len = self.cells.len();
        match self.cells.get_mut(col) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(ErsatzError::IndexOutOfRange(format!(
                "Bad column number: {col}, count: {len}"
            ))),
        }
    }
}

struct RowStore {
    num_columns: usize,
    rows: Vec<Row>,
}

/// A named cursor window owning a row store and a capacity budget.
///
/// The byte budget of the emulated native window is recorded but not
/// enforced; the boolean-returning put contract is preserved so callers that
/// check it keep working.
pub struct Window {
    name: String,
    size_budget: usize,
    store: Mutex<RowStore>,
}

impl Window {
    fn new(name: String, size_budget: usize) -> Self {
        Self {
            name,
            size_budget,
            store: Mutex::new(RowStore {
                num_columns: 0,
                rows: Vec::new(),
            }),
        }
    }

    /// The diagnostic label given at creation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The capacity budget given at creation.
    pub fn size_budget(&self) -> usize {
        self.size_budget
    }

    /// Fix the row width for subsequently allocated rows.
    ///
    /// Returns false if rows were already allocated with a different width.
    pub fn set_num_columns(&self, num_columns: usize) -> bool {
        let mut store = self.store.lock();
        if !store.rows.is_empty() && store.num_columns != num_columns {
            return false;
        }
        store.num_columns = num_columns;
        true
    }

    /// Append one row of NULL cells at the declared width.
    pub fn alloc_row(&self) -> bool {
        let mut store = self.store.lock();
        let width = store.num_columns;
        store.rows.push(Row::filled_with_null(width));
        true
    }

    /// Append one already-filled row (the bulk path used when materializing
    /// statement results).
    pub fn append_row(&self, cells: Vec<Value>) -> Result<()> {
        let mut store = self.store.lock();
        store.rows.push(Row { cells });
        Ok(())
    }

    /// Number of rows currently stored.
    pub fn num_rows(&self) -> usize {
        self.store.lock().rows.len()
    }

    /// Empty all rows, preserving the declared column count.
    pub fn clear(&self) {
        self.store.lock().rows.clear();
    }

    /// Read one cell, cloned out so no lock is held by the caller.
    pub fn value(&self, row: usize, col: usize) -> Result<Value> {
        let store = self.store.lock();
        let stored = store.rows.get(row).ok_or_else(|| {
            ErsatzError::IndexOutOfRange(format!(
                "Bad row number: {row}, count: {}",
                store.rows.len()
            ))
        })?;
        Ok(stored.get(col)?.clone())
    }

    /// Overwrite one cell. In-bounds puts always succeed (the byte budget is
    /// not enforced), hence the constant true.
    pub fn put_value(&self, row: usize, col: usize, value: Value) -> Result<bool> {
        let mut store = self.store.lock();
        let count = store.rows.len();
        let stored = store.rows.get_mut(row).ok_or_else(|| {
            ErsatzError::IndexOutOfRange(format!("Bad row number: {row}, count: {count}"))
        })?;
        stored.set(col, value)?;
        Ok(true)
    }
}

/// The window registry: opaque handles to live windows.
pub struct WindowStore {
    windows: HandleTable<Window>,
}

static GLOBAL: LazyLock<WindowStore> = LazyLock::new(WindowStore::new);

impl WindowStore {
    /// An empty, private store (tests use this for isolation).
    pub fn new() -> Self {
        Self {
            windows: HandleTable::new("window"),
        }
    }

    /// The process-wide store the broker fills result sets into.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Create a window and issue its handle.
    pub fn create(&self, name: &str, size_budget: usize) -> i64 {
        let handle = self
            .windows
            .insert(Window::new(name.to_owned(), size_budget));
        debug!(handle, name, size_budget, "created cursor window");
        handle
    }

    /// Resolve a handle to its window.
    pub fn get(&self, handle: i64) -> Result<Arc<Window>> {
        self.windows.get(handle)
    }

    /// Dispose a window; the handle never resolves again.
    pub fn dispose(&self, handle: i64) -> Result<()> {
        self.windows.remove(handle)?;
        debug!(handle, "disposed cursor window");
        Ok(())
    }

    /// Declared-width setter, see [`Window::set_num_columns`].
    pub fn set_num_columns(&self, handle: i64, num_columns: usize) -> Result<bool> {
        Ok(self.get(handle)?.set_num_columns(num_columns))
    }

    /// Append one NULL-filled row.
    pub fn alloc_row(&self, handle: i64) -> Result<bool> {
        Ok(self.get(handle)?.alloc_row())
    }

    /// Empty all rows, keeping the column count.
    pub fn clear(&self, handle: i64) -> Result<()> {
        self.get(handle)?.clear();
        Ok(())
    }

    /// Number of rows stored.
    pub fn num_rows(&self, handle: i64) -> Result<usize> {
        Ok(self.get(handle)?.num_rows())
    }

    /// The window's diagnostic name.
    pub fn name(&self, handle: i64) -> Result<String> {
        Ok(self.get(handle)?.name().to_owned())
    }

    pub fn put_null(&self, handle: i64, row: usize, col: usize) -> Result<bool> {
        self.get(handle)?.put_value(row, col, Value::Null)
    }

    pub fn put_long(&self, handle: i64, value: i64, row: usize, col: usize) -> Result<bool> {
        self.get(handle)?.put_value(row, col, Value::Integer(value))
    }

    pub fn put_double(&self, handle: i64, value: f64, row: usize, col: usize) -> Result<bool> {
        self.get(handle)?.put_value(row, col, Value::Float(value))
    }

    pub fn put_string(&self, handle: i64, value: &str, row: usize, col: usize) -> Result<bool> {
        self.get(handle)?
            .put_value(row, col, Value::Text(value.to_owned()))
    }

    pub fn put_blob(&self, handle: i64, value: &[u8], row: usize, col: usize) -> Result<bool> {
        self.get(handle)?
            .put_value(row, col, Value::Blob(value.to_vec()))
    }

    /// The type tag stored at (row, col).
    pub fn get_type(&self, handle: i64, row: usize, col: usize) -> Result<ValueKind> {
        Ok(self.get(handle)?.value(row, col)?.kind())
    }

    /// Long read with the documented text-parse coercion; a blob cell is a
    /// type error.
    pub fn get_long(&self, handle: i64, row: usize, col: usize) -> Result<i64> {
        self.get(handle)?
            .value(row, col)?
            .cursor_long()
            .map_err(|_| could_not_convert(row, col))
    }

    /// Double read, same coercions as [`Self::get_long`].
    pub fn get_double(&self, handle: i64, row: usize, col: usize) -> Result<f64> {
        self.get(handle)?
            .value(row, col)?
            .cursor_double()
            .map_err(|_| could_not_convert(row, col))
    }

    /// String read; NULL is absent, a blob cell is a type error.
    pub fn get_string(&self, handle: i64, row: usize, col: usize) -> Result<Option<String>> {
        self.get(handle)?.value(row, col)?.cursor_text().map_err(|_| {
            ErsatzError::DatatypeMismatch(format!(
                "Getting string when column is blob. Row {row}, col {col}"
            ))
        })
    }

    /// Blob read; text cells convert to zero-terminated UTF-8 bytes, NULL
    /// cells to an empty vector, numeric cells are a type error.
    pub fn get_blob(&self, handle: i64, row: usize, col: usize) -> Result<Vec<u8>> {
        self.get(handle)?.value(row, col)?.cursor_blob().map_err(|_| {
            ErsatzError::DatatypeMismatch(format!(
                "Getting blob when column is non-blob. Row {row}, col {col}"
            ))
        })
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new()
    }
}

fn could_not_convert(row: usize, col: usize) -> ErsatzError {
    ErsatzError::DatatypeMismatch(format!("could not convert value at row {row}, col {col}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_with_rows(store: &WindowStore, columns: usize, rows: usize) -> i64 {
        let handle = store.create("test", 16 * 1024);
        assert!(store.set_num_columns(handle, columns).unwrap());
        for _ in 0..rows {
            assert!(store.alloc_row(handle).unwrap());
        }
        handle
    }

    #[test]
    fn put_get_round_trip_per_type() {
        let store = WindowStore::new();
        let w = window_with_rows(&store, 5, 1);

        assert!(store.put_long(w, 42, 0, 0).unwrap());
        assert!(store.put_double(w, 2.5, 0, 1).unwrap());
        assert!(store.put_string(w, "hello", 0, 2).unwrap());
        assert!(store.put_blob(w, &[1, 2, 3], 0, 3).unwrap());
        assert!(store.put_null(w, 0, 4).unwrap());

        assert_eq!(store.get_long(w, 0, 0).unwrap(), 42);
        assert_eq!(store.get_double(w, 0, 1).unwrap(), 2.5);
        assert_eq!(store.get_string(w, 0, 2).unwrap().as_deref(), Some("hello"));
        assert_eq!(store.get_blob(w, 0, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.get_string(w, 0, 4).unwrap(), None);
    }

    #[test]
    fn get_type_tracks_puts() {
        let store = WindowStore::new();
        let w = window_with_rows(&store, 5, 1);
        store.put_null(w, 0, 0).unwrap();
        store.put_long(w, 1, 0, 1).unwrap();
        store.put_double(w, 1.0, 0, 2).unwrap();
        store.put_string(w, "s", 0, 3).unwrap();
        store.put_blob(w, &[0], 0, 4).unwrap();

        assert_eq!(store.get_type(w, 0, 0).unwrap(), ValueKind::Null);
        assert_eq!(store.get_type(w, 0, 1).unwrap(), ValueKind::Integer);
        assert_eq!(store.get_type(w, 0, 2).unwrap(), ValueKind::Float);
        assert_eq!(store.get_type(w, 0, 3).unwrap(), ValueKind::Text);
        assert_eq!(store.get_type(w, 0, 4).unwrap(), ValueKind::Blob);
    }

    #[test]
    fn alloc_row_fills_with_null() {
        let store = WindowStore::new();
        let w = window_with_rows(&store, 3, 1);
        for col in 0..3 {
            assert_eq!(store.get_type(w, 0, col).unwrap(), ValueKind::Null);
        }
    }

    #[test]
    fn blob_read_of_text_is_zero_terminated() {
        let store = WindowStore::new();
        let w = window_with_rows(&store, 1, 1);
        store.put_string(w, "ab", 0, 0).unwrap();
        assert_eq!(store.get_blob(w, 0, 0).unwrap(), vec![0x61, 0x62, 0x00]);
    }

    #[test]
    fn blob_read_of_null_is_empty() {
        let store = WindowStore::new();
        let w = window_with_rows(&store, 1, 1);
        assert_eq!(store.get_blob(w, 0, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn numeric_read_of_text_parses_or_zeroes() {
        let store = WindowStore::new();
        let w = window_with_rows(&store, 2, 1);
        store.put_string(w, "3.5", 0, 0).unwrap();
        store.put_string(w, "junk", 0, 1).unwrap();
        assert_eq!(store.get_long(w, 0, 0).unwrap(), 3);
        assert_eq!(store.get_double(w, 0, 0).unwrap(), 3.5);
        assert_eq!(store.get_long(w, 0, 1).unwrap(), 0);
    }

    #[test]
    fn type_errors_are_reported() {
        let store = WindowStore::new();
        let w = window_with_rows(&store, 2, 1);
        store.put_blob(w, &[1], 0, 0).unwrap();
        store.put_long(w, 5, 0, 1).unwrap();
        assert!(matches!(
            store.get_long(w, 0, 0),
            Err(ErsatzError::DatatypeMismatch(_))
        ));
        assert!(matches!(
            store.get_string(w, 0, 0),
            Err(ErsatzError::DatatypeMismatch(_))
        ));
        assert!(matches!(
            store.get_blob(w, 0, 1),
            Err(ErsatzError::DatatypeMismatch(_))
        ));
    }

    #[test]
    fn out_of_bounds_access_is_reported() {
        let store = WindowStore::new();
        let w = window_with_rows(&store, 2, 1);
        assert!(matches!(
            store.get_long(w, 5, 0),
            Err(ErsatzError::IndexOutOfRange(_))
        ));
        assert!(matches!(
            store.put_long(w, 1, 0, 9),
            Err(ErsatzError::IndexOutOfRange(_))
        ));
    }

    #[test]
    fn set_num_columns_rejects_width_change_after_alloc() {
        let store = WindowStore::new();
        let w = store.create("resize", 1024);
        assert!(store.set_num_columns(w, 2).unwrap());
        assert!(store.alloc_row(w).unwrap());
        assert!(!store.set_num_columns(w, 3).unwrap());
        // Same width is still fine.
        assert!(store.set_num_columns(w, 2).unwrap());
    }

    #[test]
    fn clear_preserves_column_count() {
        let store = WindowStore::new();
        let w = window_with_rows(&store, 2, 3);
        assert_eq!(store.num_rows(w).unwrap(), 3);
        store.clear(w).unwrap();
        assert_eq!(store.num_rows(w).unwrap(), 0);
        assert!(store.alloc_row(w).unwrap());
        assert_eq!(store.get_type(w, 0, 1).unwrap(), ValueKind::Null);
    }

    #[test]
    fn dispose_invalidates_handle() {
        let store = WindowStore::new();
        let w = store.create("gone", 1024);
        store.dispose(w).unwrap();
        assert!(matches!(
            store.num_rows(w),
            Err(ErsatzError::HandleNotFound { .. })
        ));
        assert!(store.dispose(w).is_err());
    }

    #[test]
    fn name_and_budget_are_recorded() {
        let store = WindowStore::new();
        let w = store.create("diagnostic", 4096);
        assert_eq!(store.name(w).unwrap(), "diagnostic");
        assert_eq!(store.get(w).unwrap().size_budget(), 4096);
    }
}
