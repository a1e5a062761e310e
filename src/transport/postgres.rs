//! PostgreSQL `COPY ... FROM STDIN` transport.
//!
//! Every batch runs in its own transaction: optional table lock, a
//! transaction-local statement timeout, one `COPY` in text format, commit.
//! Rows are encoded into a reusable buffer and flushed to the server in
//! chunks. A failed or dropped batch rolls back; earlier batches stay
//! committed.

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgCopyIn, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::ops::DerefMut;

use super::copy_text::{self, DEFAULT_MARKER, NULL_MARKER};
use super::{BulkCopyTransport, CopyOptions};
use crate::cursor::TabularCursor;
use crate::error::Result;
use crate::schema::TypeSchema;

/// Encoded bytes buffered before a chunk is sent to the server.
const CHUNK_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct PgBulkCopy {
    pool: PgPool,
}

impl PgBulkCopy {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create `destination` for `schema` unless it already exists.
    pub async fn create_table(&self, destination: &str, schema: &TypeSchema) -> Result<()> {
        let statement = create_table_statement(destination, schema);
        log::debug!("{}", statement);
        sqlx::query(&statement).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl BulkCopyTransport for PgBulkCopy {
    async fn write_to_server(
        &self,
        cursor: &mut dyn TabularCursor,
        options: &CopyOptions,
    ) -> Result<u64> {
        let mut has_row = cursor.advance()?;
        if !has_row {
            log::debug!("no rows for {}, skipping copy", options.destination);
            return Ok(0);
        }

        let statement = copy_statement(&*cursor, options)?;
        let null_marker = if options.keep_nulls {
            NULL_MARKER
        } else {
            DEFAULT_MARKER
        };

        let mut total = 0u64;
        let mut batches = 0usize;
        let mut buffer = String::with_capacity(CHUNK_BYTES);

        while has_row {
            let mut tx = self.pool.begin().await?;
            prepare_batch(&mut tx, options).await?;

            let mut copy = tx.copy_in_raw(&statement).await?;
            let streamed = stream_batch(&mut copy, cursor, options, null_marker, &mut buffer).await;
            let (rows, exhausted) = match streamed {
                Ok(outcome) => outcome,
                Err(err) => {
                    if let Err(abort_err) = copy.abort("bulk load aborted").await {
                        log::debug!("copy abort for {} failed: {}", options.destination, abort_err);
                    }
                    return Err(err);
                }
            };

            copy.finish().await?;
            tx.commit().await?;

            total += rows;
            batches += 1;
            log::debug!(
                "committed batch {} of {} rows into {}",
                batches,
                rows,
                options.destination
            );

            has_row = !exhausted && cursor.advance()?;
        }

        Ok(total)
    }
}

async fn prepare_batch(tx: &mut Transaction<'_, Postgres>, options: &CopyOptions) -> Result<()> {
    if options.table_lock {
        let lock = format!(
            "LOCK TABLE {} IN SHARE ROW EXCLUSIVE MODE",
            quote_qualified(&options.destination)
        );
        sqlx::query(&lock).execute(&mut **tx).await?;
    }

    if !options.timeout.is_zero() {
        let timeout = format!("SET LOCAL statement_timeout = {}", options.timeout.as_millis());
        sqlx::query(&timeout).execute(&mut **tx).await?;
    }

    Ok(())
}

/// Send rows until the batch is full or the cursor runs dry. The cursor is
/// positioned on a row when called. Returns the rows sent and whether the
/// cursor is exhausted.
async fn stream_batch<C>(
    copy: &mut PgCopyIn<C>,
    cursor: &mut dyn TabularCursor,
    options: &CopyOptions,
    null_marker: &str,
    buffer: &mut String,
) -> Result<(u64, bool)>
where
    C: DerefMut<Target = PgConnection>,
{
    let limit = options.rows_per_batch();
    let mut rows = 0u64;

    loop {
        copy_text::encode_row(&*cursor, buffer, null_marker)?;
        rows += 1;

        if buffer.len() >= CHUNK_BYTES {
            log::trace!("flushing {} bytes to {}", buffer.len(), options.destination);
            copy.send(buffer.as_bytes()).await?;
            buffer.clear();
        }

        let batch_full = limit.is_some_and(|limit| rows >= limit as u64);
        let exhausted = !batch_full && !cursor.advance()?;
        if batch_full || exhausted {
            if !buffer.is_empty() {
                copy.send(buffer.as_bytes()).await?;
                buffer.clear();
            }
            return Ok((rows, exhausted));
        }
    }
}

fn copy_statement(cursor: &dyn TabularCursor, options: &CopyOptions) -> Result<String> {
    let columns = (0..cursor.field_count())
        .map(|ordinal| cursor.column_name(ordinal).map(quote_identifier))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let format = if options.keep_nulls {
        "FORMAT text".to_string()
    } else {
        format!("FORMAT text, DEFAULT '{}'", DEFAULT_MARKER)
    };

    Ok(format!(
        "COPY {} ({}) FROM STDIN WITH ({})",
        quote_qualified(&options.destination),
        columns.join(", "),
        format
    ))
}

/// `CREATE TABLE IF NOT EXISTS` for the columns of `schema`, in ordinal order.
pub fn create_table_statement(destination: &str, schema: &TypeSchema) -> String {
    let columns = schema
        .columns()
        .iter()
        .map(|column| {
            let constraint = if column.nullable { "" } else { " NOT NULL" };
            format!(
                "{} {}{}",
                quote_identifier(&column.name),
                column.column_type.pg_type(),
                constraint
            )
        })
        .collect::<Vec<_>>();

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_qualified(destination),
        columns.join(", ")
    )
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name, `public.orders` becoming
/// `"public"."orders"`. As in SQL, a part wrapped in double quotes is one
/// identifier even when it contains dots: `stats."daily.totals"`.
pub fn quote_qualified(name: &str) -> String {
    split_qualified(name)
        .iter()
        .map(|part| quote_identifier(part))
        .collect::<Vec<_>>()
        .join(".")
}

fn split_qualified(name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = name.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted && chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            '"' => quoted = !quoted,
            '.' if !quoted => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::EntityMapping;
    use crate::value::ColumnType;

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote_identifier("order"), "\"order\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_qualified("public.orders"), "\"public\".\"orders\"");
    }

    #[test]
    fn test_quoted_parts_keep_their_dots() {
        assert_eq!(
            quote_qualified("stats.\"daily.totals\""),
            "\"stats\".\"daily.totals\""
        );
        assert_eq!(quote_qualified("\"daily.totals\""), "\"daily.totals\"");
        assert_eq!(quote_qualified("\"we\"\"ird\".t"), "\"we\"\"ird\".\"t\"");
    }

    #[test]
    fn test_create_table_statement_follows_ordinals() {
        let mapping = EntityMapping::builder("Order")
            .scalar("id", "id", ColumnType::Int64)
            .complex("shipping", "Address", |address| {
                address.nullable_scalar("city", "shipping_city", ColumnType::Text)
            })
            .scalar("placed", "placed_at", ColumnType::TimestampTz)
            .build();
        let schema = TypeSchema::resolve(&mapping).unwrap();

        assert_eq!(
            create_table_statement("orders", &schema),
            "CREATE TABLE IF NOT EXISTS \"orders\" (\"id\" bigint NOT NULL, \"shipping_city\" text, \"placed_at\" timestamptz NOT NULL)"
        );
    }
}
