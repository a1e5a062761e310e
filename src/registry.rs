//! Plan registry.
//!
//! Resolving a schema and compiling its accessor happens once per record type
//! and mapping; the resulting [`RecordPlan`] is shared read-only by every
//! cursor afterwards.
//!
//! ## Design
//!
//! - Uses DashMap so lookups from concurrent loaders only contend per shard
//! - First use compiles while holding the entry's shard lock, so a plan is
//!   built at most once per key even when many tasks race for it
//! - Explicit mappings are keyed by content, so rebuilding an equal
//!   `ModelContext` reuses the cached plan instead of adding one
//! - Failed builds are not cached; the error is returned to the caller
//! - No eviction: entries live until `remove` or `clear`

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::{Any, TypeId};
use std::borrow::Borrow;
use std::sync::{Arc, OnceLock};

use crate::accessor::CompiledAccessor;
use crate::cursor::RecordCursor;
use crate::error::ConfigurationError;
use crate::mapping::{EntityMapping, MappingOrigin, MappingSource};
use crate::record::Record;
use crate::schema::TypeSchema;

/// Resolved schema and compiled accessor for one record type.
pub struct RecordPlan<T> {
    schema: Arc<TypeSchema>,
    accessor: CompiledAccessor<T>,
}

impl<T: Record> RecordPlan<T> {
    pub fn build(mapping: &EntityMapping) -> Result<Self, ConfigurationError> {
        let schema = TypeSchema::resolve(mapping)?;
        let shape = T::shape();
        shape.check_embedded_types(mapping.mappings())?;
        let accessor = CompiledAccessor::compile_shape(&shape, &schema)?;
        Ok(Self {
            schema: Arc::new(schema),
            accessor,
        })
    }

    pub fn schema(&self) -> &Arc<TypeSchema> {
        &self.schema
    }

    pub fn accessor(&self) -> &CompiledAccessor<T> {
        &self.accessor
    }
}

type PlanKey = (TypeId, MappingOrigin);

static GLOBAL: OnceLock<Arc<PlanRegistry>> = OnceLock::new();

#[derive(Default)]
pub struct PlanRegistry {
    plans: DashMap<PlanKey, Arc<dyn Any + Send + Sync>>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by loaders that are not given their own.
    pub fn global() -> Arc<PlanRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(PlanRegistry::new())))
    }

    /// Cached plan for `T`, building it on first use.
    pub fn plan_for<T: Record>(
        &self,
        source: MappingSource<'_>,
    ) -> Result<Arc<RecordPlan<T>>, ConfigurationError> {
        let key = (TypeId::of::<T>(), source.origin::<T>()?);

        if let Some(plan) = self.plans.get(&key) {
            return Ok(downcast::<T>(Arc::clone(plan.value())));
        }

        match self.plans.entry(key) {
            Entry::Occupied(entry) => Ok(downcast::<T>(Arc::clone(entry.get()))),
            Entry::Vacant(entry) => {
                let origin = &entry.key().1;
                let plan = Arc::new(RecordPlan::<T>::build(&origin.entity_mapping::<T>())?);
                log::debug!(
                    "registered plan for {} ({} columns, {} mapping)",
                    plan.schema().type_name(),
                    plan.schema().len(),
                    origin.kind_name()
                );
                entry.insert(Arc::clone(&plan) as Arc<dyn Any + Send + Sync>);
                Ok(plan)
            }
        }
    }

    /// Build and cache the plan for `T` ahead of the first bulk insert.
    pub fn precompile<T: Record>(&self, source: MappingSource<'_>) -> Result<(), ConfigurationError> {
        self.plan_for::<T>(source).map(|_| ())
    }

    /// Install an explicitly built plan, replacing any cached one.
    pub fn register<T: Record>(
        &self,
        source: MappingSource<'_>,
        plan: RecordPlan<T>,
    ) -> Result<Arc<RecordPlan<T>>, ConfigurationError> {
        let plan = Arc::new(plan);
        self.plans.insert(
            (TypeId::of::<T>(), source.origin::<T>()?),
            Arc::clone(&plan) as Arc<dyn Any + Send + Sync>,
        );
        Ok(plan)
    }

    pub fn contains<T: Record>(&self, source: MappingSource<'_>) -> bool {
        source
            .origin::<T>()
            .is_ok_and(|origin| self.plans.contains_key(&(TypeId::of::<T>(), origin)))
    }

    pub fn remove<T: Record>(&self, source: MappingSource<'_>) -> bool {
        source
            .origin::<T>()
            .is_ok_and(|origin| self.plans.remove(&(TypeId::of::<T>(), origin)).is_some())
    }

    pub fn clear(&self) {
        self.plans.clear();
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Open a cursor over `records` using the cached plan for `T`.
    pub fn cursor<T, I>(
        &self,
        records: I,
        source: MappingSource<'_>,
    ) -> Result<RecordCursor<T, I::IntoIter>, ConfigurationError>
    where
        T: Record,
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let plan = self.plan_for::<T>(source)?;
        Ok(RecordCursor::new(plan, records.into_iter()))
    }
}

fn downcast<T: Record>(plan: Arc<dyn Any + Send + Sync>) -> Arc<RecordPlan<T>> {
    match plan.downcast::<RecordPlan<T>>() {
        Ok(plan) => plan,
        Err(_) => unreachable!("plan registry entry does not match its key type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingOptions, ModelContext};
    use crate::record::Shape;
    use crate::value::ColumnType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static SENSOR_SHAPES: AtomicUsize = AtomicUsize::new(0);

    struct Sensor {
        id: i64,
        reading: f64,
    }

    impl Record for Sensor {
        fn shape() -> Shape<Self> {
            SENSOR_SHAPES.fetch_add(1, Ordering::SeqCst);
            Shape::<Self>::new("Sensor")
                .scalar("id", |s| &s.id)
                .scalar("reading", |s| &s.reading)
        }
    }

    struct Gauge {
        level: i32,
    }

    impl Record for Gauge {
        fn shape() -> Shape<Self> {
            Shape::<Self>::new("Gauge").scalar("level", |g| &g.level)
        }
    }

    fn convention() -> MappingSource<'static> {
        MappingSource::Convention(MappingOptions::default())
    }

    #[test]
    fn test_concurrent_first_use_builds_once() {
        let registry = PlanRegistry::new();
        let before = SENSOR_SHAPES.load(Ordering::SeqCst);

        let plans: Vec<Arc<RecordPlan<Sensor>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| registry.plan_for::<Sensor>(convention()).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // One shape for the conventional mapping, one for compilation.
        assert_eq!(SENSOR_SHAPES.load(Ordering::SeqCst) - before, 2);
        assert!(plans.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_origins_are_cached_separately() {
        let registry = PlanRegistry::new();
        let context = ModelContext::builder()
            .entity::<Gauge>(
                EntityMapping::builder("Gauge")
                    .scalar("level", "gauge_level", ColumnType::Int32)
                    .build(),
            )
            .build();

        let by_convention = registry.plan_for::<Gauge>(convention()).unwrap();
        let by_context = registry
            .plan_for::<Gauge>(MappingSource::Context(&context))
            .unwrap();

        assert_eq!(by_convention.schema().column(0).unwrap().name, "level");
        assert_eq!(by_context.schema().column(0).unwrap().name, "gauge_level");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_failed_builds_are_not_cached() {
        let registry = PlanRegistry::new();
        let context = ModelContext::builder()
            .entity::<Gauge>(
                EntityMapping::builder("Gauge")
                    .scalar("pressure", "pressure", ColumnType::Int32)
                    .build(),
            )
            .build();

        let source = MappingSource::Context(&context);
        assert!(registry.plan_for::<Gauge>(source).is_err());
        assert!(!registry.contains::<Gauge>(source));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_remove_and_clear() {
        let registry = PlanRegistry::new();
        let mapping = EntityMapping::builder("Gauge")
            .scalar("level", "lvl", ColumnType::Int32)
            .build();

        let plan = registry
            .register::<Gauge>(convention(), RecordPlan::build(&mapping).unwrap())
            .unwrap();
        let cached = registry.plan_for::<Gauge>(convention()).unwrap();
        assert!(Arc::ptr_eq(&plan, &cached));
        assert_eq!(cached.schema().column(0).unwrap().name, "lvl");

        assert!(registry.remove::<Gauge>(convention()));
        assert!(!registry.contains::<Gauge>(convention()));

        registry.precompile::<Gauge>(convention()).unwrap();
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_global_registry_is_shared() {
        assert!(Arc::ptr_eq(&PlanRegistry::global(), &PlanRegistry::global()));
    }

    fn gauge_context() -> ModelContext {
        ModelContext::builder()
            .entity::<Gauge>(
                EntityMapping::builder("Gauge")
                    .scalar("level", "gauge_level", ColumnType::Int32)
                    .build(),
            )
            .build()
    }

    #[test]
    fn test_equal_contexts_share_one_plan() {
        let registry = PlanRegistry::new();
        let first = registry
            .plan_for::<Gauge>(MappingSource::Context(&gauge_context()))
            .unwrap();

        for _ in 0..100 {
            let context = gauge_context();
            let plan = registry
                .plan_for::<Gauge>(MappingSource::Context(&context))
                .unwrap();
            assert!(Arc::ptr_eq(&first, &plan));
        }

        assert_eq!(registry.len(), 1);
        assert!(registry.contains::<Gauge>(MappingSource::Context(&gauge_context())));
    }

    #[test]
    fn test_mistyped_embedded_mapping_fails_to_build() {
        struct Housing {
            gauge: Option<Gauge>,
        }

        impl Record for Housing {
            fn shape() -> Shape<Self> {
                Shape::<Self>::new("Housing").embedded("gauge", |h| h.gauge.as_ref())
            }
        }

        let mapping = EntityMapping::builder("Housing")
            .complex("gauge", "Thermometer", |gauge| {
                gauge.nullable_scalar("level", "level", ColumnType::Int32)
            })
            .build();

        assert!(matches!(
            RecordPlan::<Housing>::build(&mapping),
            Err(ConfigurationError::TypeMismatch { .. })
        ));
    }
}
