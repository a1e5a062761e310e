//! Bulk load orchestration.
//!
//! A loader resolves the plan for a record type, opens a cursor over the
//! caller's records and hands it to a [`BulkCopyTransport`]. Configuration
//! errors surface before the transport is touched. Whatever the outcome
//! (success, transport error, timeout or cancellation) the transfer is
//! dropped first and the cursor closed after it.

use std::borrow::Borrow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;

use crate::config::BulkLoadSettings;
use crate::cursor::TabularCursor;
use crate::error::{BulkLoadError, PreconditionError, Result, TransportError};
use crate::mapping::{MappingSource, ModelContext};
use crate::record::Record;
use crate::registry::PlanRegistry;
use crate::transport::{BulkCopyTransport, PgBulkCopy};

/// Outcome of a completed bulk insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkInsertSummary {
    pub destination: String,
    pub rows: u64,
    pub elapsed: Duration,
}

pub struct BulkLoader<X> {
    transport: X,
    settings: BulkLoadSettings,
    registry: Arc<PlanRegistry>,
}

impl<X: BulkCopyTransport> BulkLoader<X> {
    /// Loader with default settings and the process-wide plan registry.
    pub fn new(transport: X) -> Self {
        Self {
            transport,
            settings: BulkLoadSettings::default(),
            registry: PlanRegistry::global(),
        }
    }

    pub fn with_settings(mut self, settings: BulkLoadSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_registry(mut self, registry: Arc<PlanRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn transport(&self) -> &X {
        &self.transport
    }

    pub fn settings(&self) -> &BulkLoadSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<PlanRegistry> {
        &self.registry
    }

    /// Stream `records` into `destination`, or into a table named after the
    /// record type when `destination` is `None` or blank. The mapping comes
    /// from `context` when given, otherwise from the record's declared shape.
    pub async fn bulk_insert<R, I>(
        &self,
        records: I,
        destination: Option<&str>,
        context: Option<&ModelContext>,
    ) -> Result<BulkInsertSummary>
    where
        R: Record,
        I: IntoIterator,
        I::Item: Borrow<R>,
        I::IntoIter: Send,
    {
        self.run::<R, I>(records, destination, context, None).await
    }

    /// Like [`bulk_insert`](Self::bulk_insert), abandoning the transfer with
    /// [`BulkLoadError::Cancelled`] once `token` is cancelled. A batch in
    /// flight is rolled back by the transport; committed batches remain.
    pub async fn bulk_insert_with_cancellation<R, I>(
        &self,
        records: I,
        destination: Option<&str>,
        context: Option<&ModelContext>,
        token: &CancellationToken,
    ) -> Result<BulkInsertSummary>
    where
        R: Record,
        I: IntoIterator,
        I::Item: Borrow<R>,
        I::IntoIter: Send,
    {
        self.run::<R, I>(records, destination, context, Some(token)).await
    }

    async fn run<R, I>(
        &self,
        records: I,
        destination: Option<&str>,
        context: Option<&ModelContext>,
        token: Option<&CancellationToken>,
    ) -> Result<BulkInsertSummary>
    where
        R: Record,
        I: IntoIterator,
        I::Item: Borrow<R>,
        I::IntoIter: Send,
    {
        let source = MappingSource::new(context, self.settings.mapping);
        let mut cursor = self.registry.cursor::<R, I>(records, source)?;
        let destination = resolve_destination(destination, cursor.schema().type_name());
        let options = self.settings.copy_options(destination.clone());
        let started = Instant::now();

        let outcome = {
            let transfer = self.transport.write_to_server(&mut cursor, &options);
            let bounded = async {
                if options.timeout.is_zero() {
                    return transfer.await;
                }
                match tokio::time::timeout(options.timeout, transfer).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(options.timeout).into()),
                }
            };

            match token {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(BulkLoadError::Cancelled),
                        result = bounded => result,
                    }
                }
                None => bounded.await,
            }
        };

        cursor.close();

        match outcome {
            Ok(rows) => {
                let elapsed = started.elapsed();
                log::info!(
                    "bulk inserted {} rows into {} in {:?}",
                    rows,
                    destination,
                    elapsed
                );
                Ok(BulkInsertSummary {
                    destination,
                    rows,
                    elapsed,
                })
            }
            Err(err) => {
                match &err {
                    BulkLoadError::Cancelled | BulkLoadError::Transport(TransportError::Timeout(_)) => {
                        log::warn!(
                            "bulk insert into {} abandoned after {} rows: {}",
                            destination,
                            cursor.rows_read(),
                            err
                        );
                    }
                    _ => log::error!("bulk insert into {} failed: {}", destination, err),
                }
                Err(err)
            }
        }
    }
}

/// Caller-supplied destination, or the record type's name when absent or
/// blank.
pub fn resolve_destination(destination: Option<&str>, type_name: &str) -> String {
    match destination.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => type_name.to_string(),
    }
}

/// Synchronous front end over a [`BulkLoader`]. Owns a single-threaded
/// runtime and must not be created or used from within another runtime.
pub struct BlockingBulkLoader<X> {
    loader: BulkLoader<X>,
    runtime: Runtime,
}

impl<X: BulkCopyTransport> BlockingBulkLoader<X> {
    pub fn new(loader: BulkLoader<X>) -> Result<Self> {
        let runtime = blocking_runtime()?;
        Ok(Self { loader, runtime })
    }

    pub fn loader(&self) -> &BulkLoader<X> {
        &self.loader
    }

    pub fn bulk_insert<R, I>(
        &self,
        records: I,
        destination: Option<&str>,
        context: Option<&ModelContext>,
    ) -> Result<BulkInsertSummary>
    where
        R: Record,
        I: IntoIterator,
        I::Item: Borrow<R>,
        I::IntoIter: Send,
    {
        ensure_blocking_allowed()?;
        self.runtime
            .block_on(self.loader.bulk_insert::<R, I>(records, destination, context))
    }
}

impl BlockingBulkLoader<PgBulkCopy> {
    pub fn connect(database_url: &str, settings: BulkLoadSettings) -> Result<Self> {
        let runtime = blocking_runtime()?;
        let transport = runtime.block_on(PgBulkCopy::connect(database_url))?;
        Ok(Self {
            loader: BulkLoader::new(transport).with_settings(settings),
            runtime,
        })
    }
}

fn ensure_blocking_allowed() -> Result<(), PreconditionError> {
    match Handle::try_current() {
        Ok(_) => Err(PreconditionError::BlockingInAsyncContext),
        Err(_) => Ok(()),
    }
}

fn blocking_runtime() -> Result<Runtime> {
    ensure_blocking_allowed()?;
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| TransportError::Runtime(err).into())
}
