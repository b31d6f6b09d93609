//! Backing buffers and the windows laid over them.
//!
//! Storage is column-major: a column of the physical buffer is contiguous, and the element at
//! logical `(r, c)` of a view lives at `base + c * physical_rows + r`. All traversal goes through
//! [`View::column_ranges`], which yields one contiguous range per logical column in increasing
//! address order.

use std::cell::{Ref, RefCell, RefMut};
use std::ops::Range;
use std::rc::Rc;

/// Owned contiguous buffer with a fixed physical extent.
#[derive(Debug)]
pub(crate) struct BackingStore {
    rows: usize,
    columns: usize,
    data: RefCell<Vec<f64>>,
}

impl BackingStore {
    pub(crate) fn zeroed(rows: usize, columns: usize) -> Self {
        Self::from_vec(rows, columns, vec![0.0; rows * columns])
    }

    pub(crate) fn from_vec(rows: usize, columns: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), rows * columns);
        Self {
            rows,
            columns,
            data: RefCell::new(data),
        }
    }
}

/// A logical window onto a [`BackingStore`].
#[derive(Debug, Clone)]
pub(crate) struct View {
    pub(crate) store: Rc<BackingStore>,
    pub(crate) base: usize,
    pub(crate) physical_rows: usize,
    pub(crate) physical_columns: usize,
    pub(crate) rows: usize,
    pub(crate) columns: usize,
    pub(crate) transposed: bool,
    pub(crate) copy_on_write: bool,
    pub(crate) immutable: bool,
    pub(crate) serial: u64,
}

impl View {
    /// A full window over a fresh store.
    pub(crate) fn whole(store: BackingStore) -> Self {
        let (rows, columns) = (store.rows, store.columns);
        Self {
            store: Rc::new(store),
            base: 0,
            physical_rows: rows,
            physical_columns: columns,
            rows,
            columns,
            transposed: false,
            copy_on_write: true,
            immutable: false,
            serial: 0,
        }
    }

    /// A sub-window sharing this view's store. The caller has already bounds-checked it.
    pub(crate) fn window(&self, row: usize, column: usize, rows: usize, columns: usize) -> Self {
        Self {
            base: self.offset(row, column),
            rows,
            columns,
            transposed: false,
            ..self.clone()
        }
    }

    #[inline]
    pub(crate) fn offset(&self, row: usize, column: usize) -> usize {
        self.base + column * self.physical_rows + row
    }

    /// One contiguous address range per logical column.
    pub(crate) fn column_ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.columns).map(move |c| {
            let start = self.offset(0, c);
            start..start + self.rows
        })
    }

    pub(crate) fn data(&self) -> Ref<'_, Vec<f64>> {
        self.store.data.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, Vec<f64>> {
        self.store.data.borrow_mut()
    }

    /// True when no other view shares the store.
    pub(crate) fn store_exclusive(&self) -> bool {
        Rc::strong_count(&self.store) == 1
    }

    /// Whether two views describe the same window of the same store.
    pub(crate) fn same_window(&self, other: &View) -> bool {
        Rc::ptr_eq(&self.store, &other.store)
            && self.base == other.base
            && self.rows == other.rows
            && self.columns == other.columns
    }

    /// Copies the logical window into a fresh, densely packed store.
    pub(crate) fn detach(&self) -> Self {
        let data = self.data();
        let mut packed = Vec::with_capacity(self.rows * self.columns);
        if self.rows == self.physical_rows && self.columns == self.physical_columns {
            packed.extend_from_slice(&data[..]);
        } else {
            for range in self.column_ranges() {
                packed.extend_from_slice(&data[range]);
            }
        }
        drop(data);

        let mut fresh = View::whole(BackingStore::from_vec(self.rows, self.columns, packed));
        fresh.transposed = self.transposed;
        fresh.serial = self.serial;
        fresh
    }
}
