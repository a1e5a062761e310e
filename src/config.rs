use std::env;
use std::time::Duration;

use crate::mapping::MappingOptions;
use crate::transport::CopyOptions;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

fn lookup_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn lookup_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn lookup_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Settings applied to every bulk insert issued by a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkLoadSettings {
    /// Rows per committed batch; `0` loads the whole stream as one batch.
    pub batch_size: usize,
    pub timeout: Duration,
    pub keep_nulls: bool,
    pub table_lock: bool,
    /// Conventions used when no model context is supplied.
    pub mapping: MappingOptions,
}

impl Default for BulkLoadSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_TIMEOUT,
            keep_nulls: true,
            table_lock: true,
            mapping: MappingOptions::default(),
        }
    }
}

impl BulkLoadSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Settings read through `lookup`, falling back to the defaults for
    /// absent or unparsable keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            batch_size: lookup_usize(&lookup, "BULKLOAD_BATCH_SIZE", defaults.batch_size),
            timeout: lookup_duration_secs(&lookup, "BULKLOAD_TIMEOUT_SECS", defaults.timeout),
            keep_nulls: lookup_bool(&lookup, "BULKLOAD_KEEP_NULLS", defaults.keep_nulls),
            table_lock: lookup_bool(&lookup, "BULKLOAD_TABLE_LOCK", defaults.table_lock),
            mapping: MappingOptions {
                flatten_embedded: lookup_bool(
                    &lookup,
                    "BULKLOAD_FLATTEN_EMBEDDED",
                    defaults.mapping.flatten_embedded,
                ),
                prefix_embedded_columns: lookup_bool(
                    &lookup,
                    "BULKLOAD_PREFIX_EMBEDDED",
                    defaults.mapping.prefix_embedded_columns,
                ),
            },
        }
    }

    pub fn copy_options(&self, destination: impl Into<String>) -> CopyOptions {
        CopyOptions {
            destination: destination.into(),
            batch_size: self.batch_size,
            timeout: self.timeout,
            keep_nulls: self.keep_nulls,
            table_lock: self.table_lock,
        }
    }
}
