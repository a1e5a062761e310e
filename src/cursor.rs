//! Tabular cursor over a record sequence.
//!
//! [`TabularCursor`] is the forward-only protocol bulk-copy transports
//! consume: schema introspection, `advance`, positional or named reads.
//! [`RecordCursor`] implements it over any iterator of records, pulling one
//! record per `advance` and extracting it into a single reused row buffer.
//!
//! State machine: `Unstarted -> Active <-> advance -> Exhausted`, with
//! `Closed` reachable from every state and terminal.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::error::PreconditionError;
use crate::record::Record;
use crate::registry::RecordPlan;
use crate::schema::{ColumnDescriptor, TypeSchema};
use crate::value::{ColumnType, FromValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Unstarted,
    Active,
    Exhausted,
    Closed,
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CursorState::Unstarted => "unstarted",
            CursorState::Active => "active",
            CursorState::Exhausted => "exhausted",
            CursorState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Forward-only, pull-based row source.
pub trait TabularCursor: Send {
    fn field_count(&self) -> usize;

    fn column_name(&self, ordinal: usize) -> Result<&str, PreconditionError>;

    fn column_type(&self, ordinal: usize) -> Result<ColumnType, PreconditionError>;

    fn ordinal(&self, name: &str) -> Option<usize>;

    fn state(&self) -> CursorState;

    /// Move to the next row. Returns `false` once the source is exhausted,
    /// and keeps returning `false` on later calls.
    fn advance(&mut self) -> Result<bool, PreconditionError>;

    /// Value of the current row. Only valid after a successful `advance`;
    /// the reference is invalidated by the next one.
    fn value(&self, ordinal: usize) -> Result<&Value, PreconditionError>;

    fn value_by_name(&self, name: &str) -> Result<&Value, PreconditionError> {
        let ordinal = self
            .ordinal(name)
            .ok_or_else(|| PreconditionError::UnknownColumn(name.to_string()))?;
        self.value(ordinal)
    }

    /// Release the record source. Safe to call repeatedly.
    fn close(&mut self);

    fn is_closed(&self) -> bool {
        self.state() == CursorState::Closed
    }
}

pub struct RecordCursor<T, I> {
    plan: Arc<RecordPlan<T>>,
    source: Option<I>,
    row: Vec<Value>,
    state: CursorState,
    rows_read: u64,
}

impl<T, I> RecordCursor<T, I>
where
    T: Record,
    I: Iterator,
    I::Item: Borrow<T>,
{
    pub fn new(plan: Arc<RecordPlan<T>>, source: I) -> Self {
        let row = vec![Value::Null; plan.schema().len()];
        Self {
            plan,
            source: Some(source),
            row,
            state: CursorState::Unstarted,
            rows_read: 0,
        }
    }

    pub fn schema(&self) -> &TypeSchema {
        self.plan.schema()
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Copy the current row into `out`, returning how many values were
    /// copied (the shorter of the two lengths).
    pub fn copy_values(&self, out: &mut [Value]) -> Result<usize, PreconditionError> {
        self.current_row()?;
        let count = out.len().min(self.row.len());
        out[..count].clone_from_slice(&self.row[..count]);
        Ok(count)
    }

    /// Typed read of the current row's value.
    pub fn get<V: FromValue>(&self, ordinal: usize) -> Result<V, PreconditionError> {
        let value = self.value_at(ordinal)?;
        V::from_value(value).ok_or(PreconditionError::InvalidCast {
            ordinal,
            expected: std::any::type_name::<V>(),
            actual: value.kind_name(),
        })
    }

    pub fn is_null(&self, ordinal: usize) -> Result<bool, PreconditionError> {
        Ok(self.value_at(ordinal)?.is_null())
    }

    fn current_row(&self) -> Result<&[Value], PreconditionError> {
        match self.state {
            CursorState::Active => Ok(&self.row),
            CursorState::Closed => Err(PreconditionError::CursorClosed),
            state => Err(PreconditionError::NoCurrentRow(state)),
        }
    }

    fn value_at(&self, ordinal: usize) -> Result<&Value, PreconditionError> {
        let row = self.current_row()?;
        row.get(ordinal).ok_or(PreconditionError::OrdinalOutOfRange {
            ordinal,
            count: row.len(),
        })
    }

    fn descriptor(&self, ordinal: usize) -> Result<&ColumnDescriptor, PreconditionError> {
        let schema = self.plan.schema();
        schema.column(ordinal).ok_or(PreconditionError::OrdinalOutOfRange {
            ordinal,
            count: schema.len(),
        })
    }
}

impl<T, I> TabularCursor for RecordCursor<T, I>
where
    T: Record,
    I: Iterator + Send,
    I::Item: Borrow<T>,
{
    fn field_count(&self) -> usize {
        self.plan.schema().len()
    }

    fn column_name(&self, ordinal: usize) -> Result<&str, PreconditionError> {
        Ok(self.descriptor(ordinal)?.name.as_str())
    }

    fn column_type(&self, ordinal: usize) -> Result<ColumnType, PreconditionError> {
        Ok(self.descriptor(ordinal)?.column_type)
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.plan.schema().ordinal(name)
    }

    fn state(&self) -> CursorState {
        self.state
    }

    fn advance(&mut self) -> Result<bool, PreconditionError> {
        match self.state {
            CursorState::Closed => return Err(PreconditionError::CursorClosed),
            CursorState::Exhausted => return Ok(false),
            CursorState::Unstarted | CursorState::Active => {}
        }

        match self.source.as_mut().and_then(Iterator::next) {
            Some(item) => {
                let record: &T = item.borrow();
                self.plan.accessor().extract(record, &mut self.row);
                self.state = CursorState::Active;
                self.rows_read += 1;
                Ok(true)
            }
            None => {
                self.state = CursorState::Exhausted;
                self.source = None;
                self.row.fill(Value::Null);
                log::trace!(
                    "cursor over {} exhausted after {} rows",
                    self.plan.schema().type_name(),
                    self.rows_read
                );
                Ok(false)
            }
        }
    }

    fn value(&self, ordinal: usize) -> Result<&Value, PreconditionError> {
        self.value_at(ordinal)
    }

    fn close(&mut self) {
        if self.state == CursorState::Closed {
            return;
        }
        self.source = None;
        self.state = CursorState::Closed;
        log::trace!(
            "closed cursor over {} after {} rows",
            self.plan.schema().type_name(),
            self.rows_read
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingOptions, MappingSource};
    use crate::record::Shape;
    use crate::registry::PlanRegistry;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Reading {
        station: String,
        celsius: f32,
    }

    impl Record for Reading {
        fn shape() -> Shape<Self> {
            Shape::<Self>::new("Reading")
                .scalar("station", |r| &r.station)
                .scalar("celsius", |r| &r.celsius)
        }
    }

    fn readings(count: usize) -> Vec<Reading> {
        (0..count)
            .map(|i| Reading {
                station: format!("st-{}", i),
                celsius: i as f32 * 0.5,
            })
            .collect()
    }

    fn open<'a>(
        records: &'a [Reading],
    ) -> RecordCursor<Reading, std::slice::Iter<'a, Reading>> {
        PlanRegistry::new()
            .cursor::<Reading, _>(records, MappingSource::Convention(MappingOptions::default()))
            .unwrap()
    }

    #[test]
    fn test_advance_exhausts_after_n_records() {
        let records = readings(3);
        let mut cursor = open(&records);

        for _ in 0..3 {
            assert!(cursor.advance().unwrap());
        }
        assert!(!cursor.advance().unwrap());
        assert!(!cursor.advance().unwrap());
        assert_eq!(cursor.state(), CursorState::Exhausted);
        assert_eq!(cursor.rows_read(), 3);
    }

    #[test]
    fn test_rows_are_read_by_position_and_name() {
        let records = readings(2);
        let mut cursor = open(&records);

        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value(0).unwrap(), &Value::Text("st-0".to_string()));

        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value_by_name("celsius").unwrap(), &Value::Float32(0.5));
        assert_eq!(cursor.get::<String>(0).unwrap(), "st-1");
        assert!(!cursor.is_null(1).unwrap());

        let mut copy = vec![Value::Null; 5];
        assert_eq!(cursor.copy_values(&mut copy).unwrap(), 2);
        assert_eq!(copy[1], Value::Float32(0.5));
        assert_eq!(copy[2], Value::Null);
    }

    #[test]
    fn test_introspection_is_available_before_advance() {
        let records = readings(1);
        let cursor = open(&records);

        assert_eq!(cursor.field_count(), 2);
        assert_eq!(cursor.column_name(1).unwrap(), "celsius");
        assert_eq!(cursor.column_type(0).unwrap(), ColumnType::Text);
        assert_eq!(cursor.ordinal("station"), Some(0));
        assert!(matches!(
            cursor.column_name(2),
            Err(PreconditionError::OrdinalOutOfRange { ordinal: 2, count: 2 })
        ));
    }

    #[test]
    fn test_reads_outside_an_active_row_fail() {
        let records = readings(1);
        let mut cursor = open(&records);

        assert!(matches!(
            cursor.value(0),
            Err(PreconditionError::NoCurrentRow(CursorState::Unstarted))
        ));

        assert!(cursor.advance().unwrap());
        assert!(matches!(
            cursor.value_by_name("humidity"),
            Err(PreconditionError::UnknownColumn(_))
        ));
        assert!(matches!(
            cursor.get::<i32>(1),
            Err(PreconditionError::InvalidCast { ordinal: 1, .. })
        ));

        assert!(!cursor.advance().unwrap());
        assert!(matches!(
            cursor.value(0),
            Err(PreconditionError::NoCurrentRow(CursorState::Exhausted))
        ));

        cursor.close();
        assert!(matches!(cursor.value(0), Err(PreconditionError::CursorClosed)));
    }

    #[test]
    fn test_close_is_idempotent_and_terminal() {
        let records = readings(2);
        let mut cursor = open(&records);

        assert!(cursor.advance().unwrap());
        cursor.close();
        cursor.close();

        assert!(cursor.is_closed());
        assert!(matches!(cursor.advance(), Err(PreconditionError::CursorClosed)));
        assert_eq!(cursor.field_count(), 2);
    }

    struct DropFlag<I> {
        inner: I,
        dropped: Arc<AtomicBool>,
    }

    impl<I: Iterator> Iterator for DropFlag<I> {
        type Item = I::Item;

        fn next(&mut self) -> Option<Self::Item> {
            self.inner.next()
        }
    }

    impl<I> Drop for DropFlag<I> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_close_releases_the_source() {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = DropFlag {
            inner: readings(4).into_iter(),
            dropped: Arc::clone(&dropped),
        };
        let plan = PlanRegistry::new()
            .plan_for::<Reading>(MappingSource::Convention(MappingOptions::default()))
            .unwrap();
        let mut cursor = RecordCursor::new(plan, source);

        assert!(cursor.advance().unwrap());
        assert!(!dropped.load(Ordering::SeqCst));
        cursor.close();
        assert!(dropped.load(Ordering::SeqCst));
    }
}
