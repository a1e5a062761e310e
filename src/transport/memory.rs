//! In-memory transport and materialized tables.
//!
//! [`MemoryTransport`] keeps named [`Table`]s behind a mutex and counts the
//! batches and row writes it performs, which makes it the transport of
//! choice for dry runs and tests. [`Table::load`] materializes a record
//! sequence directly, without a loader.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::sync::Arc;

use super::{BulkCopyTransport, CopyOptions};
use crate::cursor::TabularCursor;
use crate::error::{Result, TransportError};
use crate::mapping::MappingSource;
use crate::record::Record;
use crate::registry::PlanRegistry;
use crate::schema::TypeSchema;
use crate::value::{ColumnType, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Value written in place of a null when nulls are not kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Materialized rows with their column layout. Missing values are stored
/// as `Null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<TableColumn>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<TableColumn>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Empty table with the columns of `schema`.
    pub fn for_schema(name: impl Into<String>, schema: &TypeSchema) -> Self {
        let columns = schema
            .columns()
            .iter()
            .map(|column| TableColumn {
                name: column.name.clone(),
                column_type: column.column_type,
                nullable: column.nullable,
                default: None,
            })
            .collect();
        Self::new(name, columns)
    }

    /// Materialize `records` through the global plan registry.
    pub fn load<T, I>(name: impl Into<String>, records: I, source: MappingSource<'_>) -> Result<Self>
    where
        T: Record,
        I: IntoIterator,
        I::Item: Borrow<T>,
        I::IntoIter: Send,
    {
        let mut cursor = PlanRegistry::global().cursor::<T, I>(records, source)?;
        let mut table = Self::for_schema(name, cursor.schema());

        let mut row = vec![Value::Null; table.columns.len()];
        while cursor.advance()? {
            cursor.copy_values(&mut row)?;
            table.rows.push(row.iter().map(normalize).collect());
        }
        cursor.close();
        Ok(table)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|column| column.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value at `row` in the column called `column`.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let ordinal = self.columns.iter().position(|c| c.name == column)?;
        self.rows.get(row)?.get(ordinal)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferCounters {
    pub batches: u64,
    pub row_writes: u64,
}

#[derive(Default)]
struct MemoryStore {
    tables: HashMap<String, Table>,
    counters: TransferCounters,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a destination up front. Later writes must match its column
    /// names and types, in order.
    pub fn create_table(&self, table: Table) {
        self.store.lock().tables.insert(table.name.clone(), table);
    }

    pub fn table(&self, name: &str) -> Option<Table> {
        self.store.lock().tables.get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.store.lock().tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn counters(&self) -> TransferCounters {
        self.store.lock().counters
    }

    /// The store lock is only taken between pulls, so a record source may
    /// read this transport while it is being written to.
    fn copy_rows(&self, cursor: &mut dyn TabularCursor, options: &CopyOptions) -> Result<u64> {
        if !cursor.advance()? {
            log::debug!("no rows for {}, skipping copy", options.destination);
            return Ok(0);
        }

        let columns = (0..cursor.field_count())
            .map(|ordinal| -> Result<TableColumn> {
                Ok(TableColumn {
                    name: cursor.column_name(ordinal)?.to_string(),
                    column_type: cursor.column_type(ordinal)?,
                    nullable: true,
                    default: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let defaults = self.prepare_table(&options.destination, &columns)?;

        let limit = options.rows_per_batch();
        let mut written = 0u64;
        let mut batch = Vec::new();

        loop {
            let mut row = Vec::with_capacity(defaults.len());
            for (ordinal, default) in defaults.iter().enumerate() {
                let value = cursor.value(ordinal)?;
                let stored = match (default, value.is_null(), options.keep_nulls) {
                    (Some(default), true, false) => default.clone(),
                    _ => normalize(value),
                };
                row.push(stored);
            }
            batch.push(row);

            let exhausted = !cursor.advance()?;
            if exhausted || limit.is_some_and(|limit| batch.len() >= limit) {
                written += self.append_batch(&options.destination, &mut batch)?;
            }
            if exhausted {
                break;
            }
        }

        log::debug!("copied {} rows into memory table {}", written, options.destination);
        Ok(written)
    }

    /// Create the destination on first write, or check a declared one
    /// against the cursor's columns. Returns the per-column defaults.
    fn prepare_table(&self, destination: &str, columns: &[TableColumn]) -> Result<Vec<Option<Value>>> {
        let mut store = self.store.lock();
        let table = store
            .tables
            .entry(destination.to_string())
            .or_insert_with(|| Table::new(destination, columns.to_vec()));

        let matches = table.columns.len() == columns.len()
            && table
                .columns
                .iter()
                .zip(columns)
                .all(|(declared, actual)| declared.name == actual.name && declared.column_type == actual.column_type);
        if !matches {
            let describe = |columns: &[TableColumn]| {
                columns
                    .iter()
                    .map(|column| format!("{} {}", column.name, column.column_type.pg_type()))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            return Err(TransportError::Rejected {
                destination: destination.to_string(),
                reason: format!(
                    "columns [{}] do not match table columns [{}]",
                    describe(columns),
                    describe(&table.columns)
                ),
            }
            .into());
        }

        Ok(table.columns.iter().map(|column| column.default.clone()).collect())
    }

    fn append_batch(&self, destination: &str, batch: &mut Vec<Vec<Value>>) -> Result<u64> {
        let mut store = self.store.lock();
        let store = &mut *store;
        let table = store.tables.get_mut(destination).ok_or_else(|| TransportError::Rejected {
            destination: destination.to_string(),
            reason: "table was dropped during the copy".to_string(),
        })?;

        let rows = batch.len() as u64;
        table.rows.append(batch);
        store.counters.batches += 1;
        store.counters.row_writes += rows;
        Ok(rows)
    }
}

#[async_trait]
impl BulkCopyTransport for MemoryTransport {
    async fn write_to_server(
        &self,
        cursor: &mut dyn TabularCursor,
        options: &CopyOptions,
    ) -> Result<u64> {
        self.copy_rows(cursor, options)
    }
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::Missing => Value::Null,
        other => other.clone(),
    }
}
