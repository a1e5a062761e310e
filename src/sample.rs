//! Sample record model used by the CLI and the integration tests.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::mapping::{EntityMapping, ModelContext};
use crate::record::{Record, Shape};
use crate::value::ColumnType;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub postal_code: Option<String>,
}

impl Record for Address {
    fn shape() -> Shape<Self> {
        Shape::<Self>::new("Address")
            .scalar("street", |a| &a.street)
            .scalar("city", |a| &a.city)
            .scalar("postal_code", |a| &a.postal_code)
    }
}

/// One column per supported primitive, plain and optional, plus an
/// embedded address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleEntity {
    pub id: i32,
    pub name: String,
    pub date_time: NaiveDateTime,
    pub date_time_offset: DateTime<Utc>,
    pub decimal: Decimal,
    pub double: f64,
    pub float: f32,
    pub guid: Uuid,
    pub long: i64,
    pub nullable_guid: Option<Uuid>,
    pub nullable_decimal: Option<Decimal>,
    pub nullable_double: Option<f64>,
    pub nullable_float: Option<f32>,
    pub nullable_integer: Option<i32>,
    pub nullable_long: Option<i64>,
    pub address: Option<Address>,
}

impl Record for SampleEntity {
    fn shape() -> Shape<Self> {
        Shape::<Self>::new("SampleEntity")
            .scalar("id", |e| &e.id)
            .scalar("name", |e| &e.name)
            .scalar("date_time", |e| &e.date_time)
            .scalar("date_time_offset", |e| &e.date_time_offset)
            .scalar("decimal", |e| &e.decimal)
            .scalar("double", |e| &e.double)
            .scalar("float", |e| &e.float)
            .scalar("guid", |e| &e.guid)
            .scalar("long", |e| &e.long)
            .scalar("nullable_guid", |e| &e.nullable_guid)
            .scalar("nullable_decimal", |e| &e.nullable_decimal)
            .scalar("nullable_double", |e| &e.nullable_double)
            .scalar("nullable_float", |e| &e.nullable_float)
            .scalar("nullable_integer", |e| &e.nullable_integer)
            .scalar("nullable_long", |e| &e.nullable_long)
            .embedded("address", |e| e.address.as_ref())
    }
}

/// Explicit mapping for [`SampleEntity`]: renamed timestamp columns and
/// unprefixed address columns.
pub fn sample_context() -> ModelContext {
    let mapping = EntityMapping::builder("SampleEntity")
        .scalar("id", "id", ColumnType::Int32)
        .scalar("name", "name", ColumnType::Text)
        .scalar("date_time", "created_at", ColumnType::Timestamp)
        .scalar("date_time_offset", "created_at_tz", ColumnType::TimestampTz)
        .scalar("decimal", "amount", ColumnType::Decimal)
        .scalar("double", "ratio", ColumnType::Float64)
        .scalar("float", "score", ColumnType::Float32)
        .scalar("guid", "guid", ColumnType::Uuid)
        .scalar("long", "counter", ColumnType::Int64)
        .nullable_scalar("nullable_guid", "parent_guid", ColumnType::Uuid)
        .nullable_scalar("nullable_decimal", "discount", ColumnType::Decimal)
        .nullable_scalar("nullable_double", "weight", ColumnType::Float64)
        .nullable_scalar("nullable_float", "rating", ColumnType::Float32)
        .nullable_scalar("nullable_integer", "rank", ColumnType::Int32)
        .nullable_scalar("nullable_long", "sequence", ColumnType::Int64)
        .complex("address", "Address", |address| {
            address
                .nullable_scalar("street", "street", ColumnType::Text)
                .nullable_scalar("city", "city", ColumnType::Text)
                .nullable_scalar("postal_code", "postal_code", ColumnType::Text)
        })
        .build();

    ModelContext::builder().entity::<SampleEntity>(mapping).build()
}

const CITIES: [&str; 5] = ["Lisbon", "Oslo", "Tallinn", "Porto", "Ghent"];

/// Random [`SampleEntity`] generator. Ids are sequential from 1; every fifth
/// record has no address. Timestamps are truncated to microseconds so they
/// survive a database round trip unchanged.
pub struct SampleEntityBuilder {
    rng: StdRng,
    next_id: i32,
    now: DateTime<Utc>,
}

impl SampleEntityBuilder {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            next_id: 1,
            now: Utc::now().trunc_subsecs(6),
        }
    }

    /// Use a fixed creation time instead of the current time.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now.trunc_subsecs(6);
        self
    }

    pub fn create(&mut self) -> SampleEntity {
        let id = self.next_id;
        self.next_id += 1;

        let rng = &mut self.rng;
        let address = (id % 5 != 0).then(|| Address {
            street: format!("{} Harbour Road", rng.gen_range(1..400)),
            city: CITIES[rng.gen_range(0..CITIES.len())].to_string(),
            postal_code: rng
                .gen_bool(0.7)
                .then(|| format!("{:05}", rng.gen_range(0..100_000))),
        });

        SampleEntity {
            id,
            name: format!("Person{}", rng.gen_range(0..i32::MAX)),
            date_time: self.now.naive_utc(),
            date_time_offset: self.now,
            decimal: Decimal::new(rng.gen_range(0..10_000_000), 4),
            double: rng.r#gen(),
            float: rng.r#gen(),
            guid: random_uuid(rng),
            long: rng.gen_range(0..i64::MAX),
            nullable_guid: rng.gen_bool(0.5).then(|| random_uuid(rng)),
            nullable_decimal: rng
                .gen_bool(0.5)
                .then(|| Decimal::new(rng.gen_range(0..10_000_000), 4)),
            nullable_double: rng.gen_bool(0.5).then(|| rng.r#gen()),
            nullable_float: rng.gen_bool(0.5).then(|| rng.r#gen()),
            nullable_integer: rng.gen_bool(0.5).then(|| rng.gen_range(-1000..1000)),
            nullable_long: rng.gen_bool(0.5).then(|| rng.gen_range(0..1_000_000)),
            address,
        }
    }

    pub fn create_many(&mut self, count: usize) -> Vec<SampleEntity> {
        (0..count).map(|_| self.create()).collect()
    }
}

impl Default for SampleEntityBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn random_uuid(rng: &mut StdRng) -> Uuid {
    uuid::Builder::from_random_bytes(rng.r#gen::<u128>().to_le_bytes()).into_uuid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingOptions, MappingSource};
    use crate::registry::PlanRegistry;

    #[test]
    fn test_seeded_builders_repeat() {
        let now = Utc::now();
        let first = SampleEntityBuilder::with_seed(7).at(now).create_many(10);
        let second = SampleEntityBuilder::with_seed(7).at(now).create_many(10);

        assert_eq!(first, second);
        assert_eq!(first[0].id, 1);
        assert_eq!(first[9].id, 10);
        assert!(first[4].address.is_none());
        assert!(first[3].address.is_some());
    }

    #[test]
    fn test_convention_and_context_mappings_agree_on_width() {
        let registry = PlanRegistry::new();
        let context = sample_context();

        let by_convention = registry
            .plan_for::<SampleEntity>(MappingSource::Convention(MappingOptions::default()))
            .unwrap();
        let by_context = registry
            .plan_for::<SampleEntity>(MappingSource::Context(&context))
            .unwrap();

        assert_eq!(by_convention.schema().len(), 18);
        assert_eq!(by_context.schema().len(), 18);
        assert_eq!(by_convention.schema().ordinal("address_postal_code"), Some(17));
        assert_eq!(by_context.schema().ordinal("postal_code"), Some(17));
        assert_eq!(by_context.schema().ordinal("created_at"), Some(2));
    }
}
