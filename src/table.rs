//! Fixed-capacity shared tables.
//!
//! Every worker in the runtime shares two tables: the binding table, which
//! maps a live connection to the channel/handler that owns it, and the reload
//! table, which tracks the last-observed `(inode, mtime)` of watched source
//! files. Both are instances of [`SharedTable`], a fixed-capacity key/value
//! table sized once at startup and never resized.
//!
//! Rows are guarded individually inside the table; callers get atomic
//! `set`/`get`/`delete` operations and layer no locking of their own on top.
//! String columns are width-bounded ([`BoundedStr`]) and truncate
//! deterministically rather than spilling into neighboring rows. Writing past
//! the configured capacity fails with [`TableError::CapacityExceeded`];
//! entries are never silently overwritten to make room.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::ids::ConnId;

/// Byte width of the binding table `channel` column.
pub const CHANNEL_WIDTH: usize = 50;
/// Byte width of the binding table `handler` column.
pub const HANDLER_WIDTH: usize = 100;
/// Byte width of the reload table `mtime` column.
pub const MTIME_WIDTH: usize = 50;

/// Errors surfaced by [`SharedTable`] writes.
///
/// Capacity is a startup-time sizing decision (`worker_num × per-worker
/// capacity`), so hitting this at runtime means the deployment is
/// misconfigured, not that a request went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// The table is full; the write was refused.
    CapacityExceeded { capacity: usize },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::CapacityExceeded { capacity } => {
                write!(
                    f,
                    "shared table capacity exceeded ({capacity} rows); raise the per-worker capacity"
                )
            }
        }
    }
}

impl std::error::Error for TableError {}

/// Inline string column with a fixed byte budget.
///
/// Stores at most `N` bytes of UTF-8. Oversized input is truncated on a
/// character boundary, so a read always returns valid UTF-8 and adjacent
/// columns are never touched.
#[derive(Clone, Copy)]
pub struct BoundedStr<const N: usize> {
    len: u8,
    buf: [u8; N],
}

impl<const N: usize> BoundedStr<N> {
    pub fn new(value: &str) -> Self {
        let mut s = Self::default();
        s.set(value);
        s
    }

    /// Replace the contents, truncating to the column width.
    pub fn set(&mut self, value: &str) {
        let mut end = value.len().min(N);
        while end > 0 && !value.is_char_boundary(end) {
            end -= 1;
        }
        self.buf[..end].copy_from_slice(&value.as_bytes()[..end]);
        self.len = end as u8;
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.len as usize]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for BoundedStr<N> {
    fn default() -> Self {
        Self {
            len: 0,
            buf: [0; N],
        }
    }
}

impl<const N: usize> PartialEq for BoundedStr<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl<const N: usize> Eq for BoundedStr<N> {}

impl<const N: usize> fmt::Debug for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> fmt::Display for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-capacity concurrent key/value table with row-level atomicity.
///
/// Keys are `u64` (connection ids, inodes). Rows live in hash buckets, each
/// guarded by its own lock; a `set` merges a partial update into the existing
/// row or a default row, mirroring column-wise table writes. The total row
/// count is bounded by the capacity chosen at construction; the table never
/// grows.
pub struct SharedTable<V> {
    buckets: Box<[Mutex<Vec<(u64, V)>>]>,
    len: AtomicUsize,
    capacity: usize,
}

impl<V: Clone + Default> SharedTable<V> {
    /// Allocate a table holding at most `capacity` rows.
    pub fn with_capacity(capacity: usize) -> Self {
        let bucket_count = (capacity / 8).max(1);
        let mut buckets = Vec::with_capacity(bucket_count);
        for _ in 0..bucket_count {
            buckets.push(Mutex::new(Vec::new()));
        }
        Self {
            buckets: buckets.into_boxed_slice(),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    fn bucket(&self, key: u64) -> &Mutex<Vec<(u64, V)>> {
        let spread = key.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let idx = (spread % self.buckets.len() as u64) as usize;
        &self.buckets[idx]
    }

    /// Create or update the row for `key`.
    ///
    /// `update` runs against the current row value (or a default row when the
    /// key is new) while the row lock is held, so partial field updates do
    /// not clobber concurrent writers of other fields.
    pub fn set(&self, key: u64, update: impl FnOnce(&mut V)) -> Result<(), TableError> {
        let mut rows = self.bucket(key).lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, value)) = rows.iter_mut().find(|(k, _)| *k == key) {
            update(value);
            return Ok(());
        }
        // New row: reserve a slot against the fixed capacity first.
        let reserved = self
            .len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < self.capacity).then_some(len + 1)
            });
        if reserved.is_err() {
            return Err(TableError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let mut value = V::default();
        update(&mut value);
        rows.push((key, value));
        Ok(())
    }

    /// Read the row for `key`, if present.
    pub fn get(&self, key: u64) -> Option<V> {
        let rows = self.bucket(key).lock().unwrap_or_else(|e| e.into_inner());
        rows.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone())
    }

    /// Remove the row for `key`. Returns whether a row was removed.
    pub fn delete(&self, key: u64) -> bool {
        let mut rows = self.bucket(key).lock().unwrap_or_else(|e| e.into_inner());
        let before = rows.len();
        rows.retain(|(k, _)| *k != key);
        let removed = rows.len() < before;
        if removed {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of rows, fixed at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Row of the connection binding table.
///
/// `channel` and `handler` identify the logical owner of the connection for
/// out-of-band pushes; `http` distinguishes plain HTTP connections from
/// upgraded ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindEntry {
    pub channel: BoundedStr<CHANNEL_WIDTH>,
    pub handler: BoundedStr<HANDLER_WIDTH>,
    pub http: bool,
}

/// Connection binding table shared by all workers.
pub type BindTable = SharedTable<BindEntry>;

impl SharedTable<BindEntry> {
    /// Flag the connection as plain HTTP, preserving any channel binding.
    pub fn mark_http(&self, conn: ConnId) -> Result<(), TableError> {
        self.set(conn.0, |row| row.http = true)
    }

    /// Bind the connection to a channel/handler pair (WebSocket-style
    /// ownership used for server-initiated pushes).
    pub fn bind_channel(&self, conn: ConnId, channel: &str, handler: &str) -> Result<(), TableError> {
        self.set(conn.0, |row| {
            row.channel.set(channel);
            row.handler.set(handler);
            row.http = false;
        })
    }

    pub fn lookup(&self, conn: ConnId) -> Option<BindEntry> {
        self.get(conn.0)
    }

    /// Drop the binding when the connection closes.
    pub fn unbind(&self, conn: ConnId) -> bool {
        self.delete(conn.0)
    }
}

/// Row of the reload table: last-observed modification time for one inode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadEntry {
    pub inode: u64,
    pub mtime: BoundedStr<MTIME_WIDTH>,
}

/// File-change tracking table used by the hot-reload watcher.
pub type ReloadTable = SharedTable<ReloadEntry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_roundtrip() {
        let table = BindTable::with_capacity(16);
        table
            .set(7, |row| {
                row.channel.set("orders");
                row.handler.set("OrderHandler");
                row.http = false;
            })
            .unwrap();
        let entry = table.get(7).unwrap();
        assert_eq!(entry.channel.as_str(), "orders");
        assert_eq!(entry.handler.as_str(), "OrderHandler");
        assert!(!entry.http);
    }

    #[test]
    fn test_delete_then_get_is_none() {
        let table = BindTable::with_capacity(16);
        table.mark_http(ConnId(3)).unwrap();
        assert!(table.delete(3));
        assert!(table.get(3).is_none());
        assert!(!table.delete(3));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_partial_update_preserves_other_columns() {
        let table = BindTable::with_capacity(16);
        table.bind_channel(ConnId(9), "chat", "ChatHandler").unwrap();
        table.mark_http(ConnId(9)).unwrap();
        let entry = table.lookup(ConnId(9)).unwrap();
        assert_eq!(entry.channel.as_str(), "chat");
        assert_eq!(entry.handler.as_str(), "ChatHandler");
        assert!(entry.http);
    }

    #[test]
    fn test_bounded_str_truncates_on_char_boundary() {
        let long = "x".repeat(60);
        let mut col: BoundedStr<CHANNEL_WIDTH> = BoundedStr::default();
        col.set(&long);
        assert_eq!(col.as_str().len(), 50);

        // 4-byte char straddling the boundary is dropped whole.
        let mut tricky = "x".repeat(48);
        tricky.push('\u{1F600}');
        col.set(&tricky);
        assert_eq!(col.as_str(), "x".repeat(48));
    }

    #[test]
    fn test_capacity_exceeded_is_an_error() {
        let table = BindTable::with_capacity(2);
        table.mark_http(ConnId(1)).unwrap();
        table.mark_http(ConnId(2)).unwrap();
        let err = table.mark_http(ConnId(3)).unwrap_err();
        assert_eq!(err, TableError::CapacityExceeded { capacity: 2 });
        // Existing rows are untouched and updatable.
        assert!(table.get(1).is_some());
        table.set(2, |row| row.handler.set("h")).unwrap();
    }

    #[test]
    fn test_concurrent_row_access() {
        use std::sync::Arc;
        let table = Arc::new(BindTable::with_capacity(256));
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for i in 0..50u64 {
                    let key = t * 50 + i;
                    table.set(key, |row| row.http = true).unwrap();
                    assert!(table.get(key).is_some());
                    table.delete(key);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.len(), 0);
    }
}
