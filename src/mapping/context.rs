use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConfigurationError;
use crate::mapping::EntityMapping;
use crate::record::Record;

/// Explicit mapping metadata for a set of record types.
///
/// Compiled plans are cached by mapping content, not by context instance, so
/// contexts built repeatedly with the same mappings share one plan per type.
#[derive(Debug)]
pub struct ModelContext {
    entities: HashMap<TypeId, Arc<EntityMapping>>,
}

impl ModelContext {
    pub fn builder() -> ModelContextBuilder {
        ModelContextBuilder::default()
    }

    pub fn contains<T: Record>(&self) -> bool {
        self.entities.contains_key(&TypeId::of::<T>())
    }

    pub fn mapping_for<T: Record>(&self) -> Result<Arc<EntityMapping>, ConfigurationError> {
        self.entities
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| ConfigurationError::UnmappedType(std::any::type_name::<T>().to_string()))
    }
}

#[derive(Debug, Default)]
pub struct ModelContextBuilder {
    entities: HashMap<TypeId, Arc<EntityMapping>>,
}

impl ModelContextBuilder {
    /// Register the mapping for record type `T`, replacing any earlier one.
    pub fn entity<T: Record>(mut self, mapping: EntityMapping) -> Self {
        self.entities.insert(TypeId::of::<T>(), Arc::new(mapping));
        self
    }

    pub fn build(self) -> ModelContext {
        ModelContext {
            entities: self.entities,
        }
    }
}

/// How mappings are derived when no model context is supplied.
///
/// Embedded values are flattened into columns by default, and their columns
/// are prefixed with the embedding property's column name (`address_city`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappingOptions {
    pub flatten_embedded: bool,
    pub prefix_embedded_columns: bool,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            flatten_embedded: true,
            prefix_embedded_columns: true,
        }
    }
}

/// Where the mapping for a record type comes from.
#[derive(Debug, Clone, Copy)]
pub enum MappingSource<'a> {
    Context(&'a ModelContext),
    Convention(MappingOptions),
}

/// Cache identity of the mapping for one record type: the explicit mapping
/// itself, or the options conventions are derived with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MappingOrigin {
    Explicit(Arc<EntityMapping>),
    Convention(MappingOptions),
}

impl MappingOrigin {
    pub fn kind_name(&self) -> &'static str {
        match self {
            MappingOrigin::Explicit(_) => "explicit",
            MappingOrigin::Convention(_) => "convention",
        }
    }

    pub fn entity_mapping<T: Record>(&self) -> Arc<EntityMapping> {
        match self {
            MappingOrigin::Explicit(mapping) => Arc::clone(mapping),
            MappingOrigin::Convention(options) => Arc::new(conventional_mapping::<T>(options)),
        }
    }
}

impl<'a> MappingSource<'a> {
    pub fn new(context: Option<&'a ModelContext>, options: MappingOptions) -> Self {
        match context {
            Some(context) => MappingSource::Context(context),
            None => MappingSource::Convention(options),
        }
    }

    /// Cache identity for `T`. Fails when a context has no mapping for `T`.
    pub fn origin<T: Record>(&self) -> Result<MappingOrigin, ConfigurationError> {
        match self {
            MappingSource::Context(context) => Ok(MappingOrigin::Explicit(context.mapping_for::<T>()?)),
            MappingSource::Convention(options) => Ok(MappingOrigin::Convention(*options)),
        }
    }

    pub fn entity_mapping<T: Record>(&self) -> Result<Arc<EntityMapping>, ConfigurationError> {
        Ok(self.origin::<T>()?.entity_mapping::<T>())
    }
}

/// Mapping derived from `T`'s declared shape.
pub fn conventional_mapping<T: Record>(options: &MappingOptions) -> EntityMapping {
    let shape = T::shape();
    EntityMapping::new(shape.type_name(), shape.conventional_mappings(options, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::PropertyMapping;
    use crate::record::Shape;
    use crate::value::ColumnType;

    struct Point {
        x: i32,
        y: i32,
    }

    impl Record for Point {
        fn shape() -> Shape<Self> {
            Shape::<Self>::new("Point").scalar("x", |p| &p.x).scalar("y", |p| &p.y)
        }
    }

    struct Unmapped;

    impl Record for Unmapped {
        fn shape() -> Shape<Self> {
            Shape::<Self>::new("Unmapped")
        }
    }

    fn point_context(column: &str) -> ModelContext {
        ModelContext::builder()
            .entity::<Point>(
                EntityMapping::builder("Point")
                    .scalar("x", column, ColumnType::Int32)
                    .build(),
            )
            .build()
    }

    #[test]
    fn test_origin_follows_mapping_content() {
        let first = point_context("px");
        let second = point_context("px");
        let renamed = point_context("x_pos");

        let origin = |context: &ModelContext| MappingSource::Context(context).origin::<Point>().unwrap();
        assert_eq!(origin(&first), origin(&second));
        assert_ne!(origin(&first), origin(&renamed));
        assert_eq!(origin(&first).kind_name(), "explicit");

        assert_eq!(
            MappingSource::new(None, MappingOptions::default())
                .origin::<Point>()
                .unwrap(),
            MappingOrigin::Convention(MappingOptions::default())
        );
        assert!(matches!(
            MappingSource::Context(&first).origin::<Unmapped>(),
            Err(ConfigurationError::UnmappedType(_))
        ));
    }

    #[test]
    fn test_context_lookup_by_record_type() {
        let context = ModelContext::builder()
            .entity::<Point>(
                EntityMapping::builder("Point")
                    .scalar("x", "px", ColumnType::Int32)
                    .build(),
            )
            .build();

        assert!(context.contains::<Point>());
        assert!(!context.contains::<Unmapped>());
        assert_eq!(context.mapping_for::<Point>().unwrap().mappings().len(), 1);

        let err = MappingSource::Context(&context)
            .entity_mapping::<Unmapped>()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnmappedType(_)));
    }

    #[test]
    fn test_conventional_mapping_uses_property_names() {
        let mapping = conventional_mapping::<Point>(&MappingOptions::default());
        assert_eq!(mapping.entity_type(), "Point");
        let columns: Vec<_> = mapping
            .mappings()
            .iter()
            .map(|m| match m {
                PropertyMapping::Scalar(scalar) => scalar.column.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(columns, vec!["x", "y"]);
    }
}
