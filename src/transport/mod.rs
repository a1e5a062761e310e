//! Bulk-copy transports.
//!
//! A transport drains a [`TabularCursor`] into a destination table. It owns
//! batching and the wire format; the loader owns plan resolution, timeouts,
//! cancellation and closing the cursor.

pub mod copy_text;
pub mod memory;
pub mod postgres;

pub use memory::{MemoryTransport, Table, TableColumn, TransferCounters};
pub use postgres::PgBulkCopy;

use async_trait::async_trait;
use std::time::Duration;

use crate::cursor::TabularCursor;
use crate::error::Result;

/// Per-operation settings handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOptions {
    /// Table name, optionally schema-qualified. Double-quote a part that
    /// itself contains a dot.
    pub destination: String,
    /// Rows per committed batch. `0` sends the whole stream as one batch.
    pub batch_size: usize,
    pub timeout: Duration,
    /// Write nulls as nulls. When off, null values fall back to the
    /// destination column's default.
    pub keep_nulls: bool,
    /// Hold a table lock for the duration of each batch.
    pub table_lock: bool,
}

impl CopyOptions {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            timeout: crate::config::DEFAULT_TIMEOUT,
            keep_nulls: true,
            table_lock: true,
        }
    }

    /// Row limit per batch, `None` when unbounded.
    pub fn rows_per_batch(&self) -> Option<usize> {
        (self.batch_size > 0).then_some(self.batch_size)
    }
}

/// Native bulk-ingestion facility of a destination store.
#[async_trait]
pub trait BulkCopyTransport: Send + Sync {
    /// Advance `cursor` until it is exhausted, writing every row to
    /// `options.destination`. Returns the number of rows written.
    ///
    /// The cursor is handed over unstarted. Implementations must not open
    /// any destination resource before the first row is available.
    async fn write_to_server(
        &self,
        cursor: &mut dyn TabularCursor,
        options: &CopyOptions,
    ) -> Result<u64>;
}
