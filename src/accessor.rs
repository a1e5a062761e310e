//! Accessor compilation.
//!
//! A [`CompiledAccessor`] holds one getter per column, indexed by ordinal.
//! Each getter is composed once from the record's [`Shape`](crate::record::Shape):
//! embedded steps become nested closures and the leaf becomes the scalar's
//! typed getter, so extracting a row performs no name lookups at all.

use crate::error::ConfigurationError;
use crate::record::{Getter, Record, Shape};
use crate::schema::TypeSchema;
use crate::value::Value;

pub struct CompiledAccessor<T> {
    getters: Vec<Getter<T>>,
}

impl<T: Record> CompiledAccessor<T> {
    /// Build the getters for every column of `schema`. Fails if the schema was
    /// resolved for another type, references properties `T` does not
    /// declare, or disagrees with a property's declared type or optionality.
    pub fn compile(schema: &TypeSchema) -> Result<Self, ConfigurationError> {
        Self::compile_shape(&T::shape(), schema)
    }

    pub(crate) fn compile_shape(shape: &Shape<T>, schema: &TypeSchema) -> Result<Self, ConfigurationError> {
        if shape.type_name() != schema.type_name() {
            return Err(ConfigurationError::TypeMismatch {
                mapped: schema.type_name().to_string(),
                actual: shape.type_name().to_string(),
            });
        }

        let getters = schema
            .columns()
            .iter()
            .map(|column| shape.compile_path(column.access_path.steps(), column))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!(
            "compiled {} column accessors for {}",
            getters.len(),
            shape.type_name()
        );

        Ok(Self { getters })
    }

    pub fn column_count(&self) -> usize {
        self.getters.len()
    }

    /// Write every column of `record` into `buffer[ordinal]`.
    ///
    /// # Panics
    ///
    /// If `buffer` is shorter than the column count.
    pub fn extract(&self, record: &T, buffer: &mut [Value]) {
        assert!(
            buffer.len() >= self.getters.len(),
            "row buffer holds {} values but the accessor writes {}",
            buffer.len(),
            self.getters.len()
        );

        for (slot, getter) in buffer.iter_mut().zip(&self.getters) {
            *slot = getter(record);
        }
    }

    pub fn extract_row(&self, record: &T) -> Vec<Value> {
        self.getters.iter().map(|getter| getter(record)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{EntityMapping, MappingOptions, conventional_mapping};
    use crate::record::Shape;
    use crate::value::ColumnType;

    #[derive(Clone)]
    struct Dimensions {
        width: f64,
        height: Option<f64>,
    }

    impl Record for Dimensions {
        fn shape() -> Shape<Self> {
            Shape::<Self>::new("Dimensions")
                .scalar("width", |d| &d.width)
                .scalar("height", |d| &d.height)
        }
    }

    #[derive(Clone)]
    struct Crate {
        label: String,
        weight: i32,
        size: Option<Dimensions>,
        fragile: bool,
    }

    impl Record for Crate {
        fn shape() -> Shape<Self> {
            Shape::<Self>::new("Crate")
                .scalar("label", |c| &c.label)
                .scalar("weight", |c| &c.weight)
                .embedded("size", |c| c.size.as_ref())
                .scalar("fragile", |c| &c.fragile)
        }
    }

    fn compile_conventional() -> (TypeSchema, CompiledAccessor<Crate>) {
        let mapping = conventional_mapping::<Crate>(&MappingOptions::default());
        let schema = TypeSchema::resolve(&mapping).unwrap();
        let accessor = CompiledAccessor::<Crate>::compile(&schema).unwrap();
        (schema, accessor)
    }

    #[test]
    fn test_extracted_row_matches_direct_reads() {
        let (schema, accessor) = compile_conventional();
        let record = Crate {
            label: "tiles".to_string(),
            weight: 42,
            size: Some(Dimensions {
                width: 1.5,
                height: None,
            }),
            fragile: true,
        };

        assert_eq!(accessor.column_count(), schema.len());
        assert_eq!(
            schema.column_names().collect::<Vec<_>>(),
            vec!["label", "weight", "size_width", "size_height", "fragile"]
        );
        assert_eq!(
            accessor.extract_row(&record),
            vec![
                Value::Text("tiles".to_string()),
                Value::Int32(42),
                Value::Float64(1.5),
                Value::Null,
                Value::Bool(true),
            ]
        );
    }

    #[test]
    fn test_absent_embedded_value_yields_missing_only_beneath_it() {
        let (_, accessor) = compile_conventional();
        let record = Crate {
            label: "loose".to_string(),
            weight: 3,
            size: None,
            fragile: false,
        };

        let mut buffer = vec![Value::Null; accessor.column_count()];
        accessor.extract(&record, &mut buffer);

        assert_eq!(buffer[0], Value::Text("loose".to_string()));
        assert_eq!(buffer[1], Value::Int32(3));
        assert_eq!(buffer[2], Value::Missing);
        assert_eq!(buffer[3], Value::Missing);
        assert_eq!(buffer[4], Value::Bool(false));
    }

    #[test]
    fn test_unknown_property_fails_compilation() {
        let mapping = EntityMapping::builder("Crate")
            .scalar("label", "label", ColumnType::Text)
            .scalar("volume", "volume", ColumnType::Float64)
            .build();
        let schema = TypeSchema::resolve(&mapping).unwrap();

        let err = CompiledAccessor::<Crate>::compile(&schema).err().unwrap();
        assert!(matches!(
            err,
            ConfigurationError::PropertyNotFound { ref type_name, ref property } if type_name == "Crate" && property == "volume"
        ));
    }

    #[test]
    fn test_schema_for_another_type_is_rejected() {
        let mapping = EntityMapping::builder("Pallet")
            .scalar("label", "label", ColumnType::Text)
            .build();
        let schema = TypeSchema::resolve(&mapping).unwrap();

        let err = CompiledAccessor::<Crate>::compile(&schema).err().unwrap();
        assert!(matches!(err, ConfigurationError::TypeMismatch { .. }));
    }

    #[test]
    #[should_panic(expected = "row buffer holds 1 values")]
    fn test_short_buffer_panics() {
        let (_, accessor) = compile_conventional();
        let record = Crate {
            label: String::new(),
            weight: 0,
            size: None,
            fragile: false,
        };
        let mut buffer = vec![Value::Null];
        accessor.extract(&record, &mut buffer);
    }

    #[test]
    fn test_mapped_column_type_must_match_the_field() {
        let mapping = EntityMapping::builder("Crate")
            .scalar("label", "label", ColumnType::Text)
            .scalar("weight", "weight", ColumnType::Text)
            .build();
        let schema = TypeSchema::resolve(&mapping).unwrap();

        let err = CompiledAccessor::<Crate>::compile(&schema).err().unwrap();
        assert!(matches!(
            err,
            ConfigurationError::ColumnTypeMismatch {
                ref property,
                mapped: ColumnType::Text,
                declared: ColumnType::Int32,
                ..
            } if property == "weight"
        ));
    }

    #[test]
    fn test_optional_field_needs_a_nullable_column() {
        let not_null = EntityMapping::builder("Crate")
            .complex("size", "Dimensions", |size| {
                size.scalar("height", "height", ColumnType::Float64)
            })
            .build();
        let schema = TypeSchema::resolve(&not_null).unwrap();

        let err = CompiledAccessor::<Crate>::compile(&schema).err().unwrap();
        assert!(matches!(
            err,
            ConfigurationError::NullabilityMismatch { ref property, ref column, .. }
                if property == "height" && column == "height"
        ));

        let nullable = EntityMapping::builder("Crate")
            .nullable_scalar("label", "label", ColumnType::Text)
            .complex("size", "Dimensions", |size| {
                size.nullable_scalar("height", "height", ColumnType::Float64)
            })
            .build();
        let schema = TypeSchema::resolve(&nullable).unwrap();
        assert_eq!(CompiledAccessor::<Crate>::compile(&schema).unwrap().column_count(), 2);
    }
}
