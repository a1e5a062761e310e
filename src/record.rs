//! Record declarations.
//!
//! A record type describes its properties once through a [`Shape`]: scalar
//! properties with a typed getter, and embedded properties pointing at another
//! [`Record`]. The shape is what the accessor compiler navigates when it turns
//! a column's access path into a getter closure, and what convention-based
//! mappings are derived from when no model context is supplied.
//!
//! ```rust,ignore
//! impl Record for Customer {
//!     fn shape() -> Shape<Self> {
//!         Shape::<Self>::new("Customer")
//!             .scalar("id", |c| &c.id)
//!             .scalar("name", |c| &c.name)
//!             .embedded("address", |c| c.address.as_ref())
//!     }
//! }
//! ```

use std::sync::Arc;

use crate::error::ConfigurationError;
use crate::mapping::{ComplexPropertyMapping, MappingOptions, PropertyMapping, ScalarPropertyMapping};
use crate::schema::ColumnDescriptor;
use crate::value::{ColumnType, ColumnValue, Value};

/// Extracts one column value from a record.
pub type Getter<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;

/// A type whose instances can be streamed as rows.
pub trait Record: Sized + Send + Sync + 'static {
    fn shape() -> Shape<Self>;
}

/// Declared properties of a record type, in declaration order.
pub struct Shape<T> {
    type_name: &'static str,
    properties: Vec<Property<T>>,
}

struct Property<T> {
    name: &'static str,
    kind: PropertyKind<T>,
}

enum PropertyKind<T> {
    Scalar {
        column_type: ColumnType,
        nullable: bool,
        getter: Getter<T>,
    },
    Embedded(Box<dyn EmbeddedProperty<T>>),
}

impl<T> PropertyKind<T> {
    fn kind_name(&self) -> &'static str {
        match self {
            PropertyKind::Scalar { .. } => "scalar",
            PropertyKind::Embedded(_) => "embedded",
        }
    }
}

/// Type-erased link from a parent record to an embedded record type.
trait EmbeddedProperty<T>: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn compile(&self, rest: &[String], column: &ColumnDescriptor) -> Result<Getter<T>, ConfigurationError>;

    fn check_embedded_types(&self, mappings: &[PropertyMapping]) -> Result<(), ConfigurationError>;

    fn conventional_mappings(
        &self,
        options: &MappingOptions,
        prefix: Option<&str>,
    ) -> Vec<PropertyMapping>;
}

struct Embedded<T, U> {
    get: fn(&T) -> Option<&U>,
}

impl<T: Record, U: Record> EmbeddedProperty<T> for Embedded<T, U> {
    fn type_name(&self) -> &'static str {
        U::shape().type_name
    }

    fn compile(&self, rest: &[String], column: &ColumnDescriptor) -> Result<Getter<T>, ConfigurationError> {
        let inner = U::shape().compile_path(rest, column)?;
        let get = self.get;
        Ok(Arc::new(move |record: &T| match get(record) {
            Some(nested) => inner(nested),
            None => Value::Missing,
        }))
    }

    fn check_embedded_types(&self, mappings: &[PropertyMapping]) -> Result<(), ConfigurationError> {
        U::shape().check_embedded_types(mappings)
    }

    fn conventional_mappings(
        &self,
        options: &MappingOptions,
        prefix: Option<&str>,
    ) -> Vec<PropertyMapping> {
        U::shape().conventional_mappings(options, prefix)
    }
}

impl<T: Record> Shape<T> {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            properties: Vec::new(),
        }
    }

    /// Declare a scalar property. Its column type and nullability come from
    /// the field's [`ColumnValue`] implementation.
    pub fn scalar<V>(mut self, name: &'static str, get: fn(&T) -> &V) -> Self
    where
        V: ColumnValue + 'static,
    {
        self.properties.push(Property {
            name,
            kind: PropertyKind::Scalar {
                column_type: V::COLUMN_TYPE,
                nullable: V::NULLABLE,
                getter: Arc::new(move |record: &T| get(record).to_value()),
            },
        });
        self
    }

    /// Declare an embedded property whose own properties are inlined as
    /// columns. `get` returns `None` when the embedded value is absent.
    pub fn embedded<U: Record>(mut self, name: &'static str, get: fn(&T) -> Option<&U>) -> Self {
        self.properties.push(Property {
            name,
            kind: PropertyKind::Embedded(Box::new(Embedded { get })),
        });
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn property_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.properties.iter().map(|property| property.name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    fn property(&self, name: &str) -> Result<&Property<T>, ConfigurationError> {
        self.properties
            .iter()
            .find(|property| property.name == name)
            .ok_or_else(|| ConfigurationError::PropertyNotFound {
                type_name: self.type_name.to_string(),
                property: name.to_string(),
            })
    }

    /// Resolve the access path of `column` into a getter. Every step but the
    /// last must be embedded; the last must be a scalar whose declared type
    /// matches the column, and an optional field needs a nullable column.
    pub(crate) fn compile_path(
        &self,
        path: &[String],
        column: &ColumnDescriptor,
    ) -> Result<Getter<T>, ConfigurationError> {
        let Some((step, rest)) = path.split_first() else {
            return Err(ConfigurationError::PropertyNotFound {
                type_name: self.type_name.to_string(),
                property: String::new(),
            });
        };

        let property = self.property(step)?;
        match (&property.kind, rest.is_empty()) {
            (
                PropertyKind::Scalar {
                    column_type,
                    nullable,
                    getter,
                },
                true,
            ) => {
                if *column_type != column.column_type {
                    return Err(ConfigurationError::ColumnTypeMismatch {
                        type_name: self.type_name.to_string(),
                        property: step.clone(),
                        column: column.name.clone(),
                        mapped: column.column_type,
                        declared: *column_type,
                    });
                }
                if *nullable && !column.nullable {
                    return Err(ConfigurationError::NullabilityMismatch {
                        type_name: self.type_name.to_string(),
                        property: step.clone(),
                        column: column.name.clone(),
                    });
                }
                Ok(Arc::clone(getter))
            }
            (PropertyKind::Embedded(embedded), false) => embedded.compile(rest, column),
            (kind, leaf) => Err(ConfigurationError::PropertyKindMismatch {
                type_name: self.type_name.to_string(),
                property: step.clone(),
                expected: if leaf { "scalar" } else { "embedded" },
                actual: kind.kind_name(),
            }),
        }
    }

    /// Check that every complex mapping names the type actually embedded
    /// under its property. Unknown properties are left to `compile_path`.
    pub(crate) fn check_embedded_types(&self, mappings: &[PropertyMapping]) -> Result<(), ConfigurationError> {
        for mapping in mappings {
            let PropertyMapping::Complex(complex) = mapping else {
                continue;
            };
            let Ok(property) = self.property(&complex.property) else {
                continue;
            };
            if let PropertyKind::Embedded(embedded) = &property.kind {
                if embedded.type_name() != complex.complex_type {
                    return Err(ConfigurationError::TypeMismatch {
                        mapped: complex.complex_type.clone(),
                        actual: embedded.type_name().to_string(),
                    });
                }
                embedded.check_embedded_types(&complex.mappings)?;
            }
        }
        Ok(())
    }

    /// Mapping derived from the declaration itself: scalar properties map to
    /// columns of the same name, embedded ones are flattened or skipped.
    pub(crate) fn conventional_mappings(
        &self,
        options: &MappingOptions,
        prefix: Option<&str>,
    ) -> Vec<PropertyMapping> {
        let mut mappings = Vec::with_capacity(self.properties.len());

        for property in &self.properties {
            let column = match prefix {
                Some(prefix) => format!("{}_{}", prefix, property.name),
                None => property.name.to_string(),
            };

            match &property.kind {
                PropertyKind::Scalar {
                    column_type,
                    nullable,
                    ..
                } => mappings.push(PropertyMapping::Scalar(ScalarPropertyMapping {
                    property: property.name.to_string(),
                    column,
                    column_type: *column_type,
                    nullable: *nullable,
                })),
                PropertyKind::Embedded(embedded) => {
                    if !options.flatten_embedded {
                        log::debug!(
                            "not flattening embedded property {}.{}",
                            self.type_name,
                            property.name
                        );
                        continue;
                    }

                    let nested_prefix = options.prefix_embedded_columns.then_some(column.as_str());
                    let mut nested = embedded.conventional_mappings(options, nested_prefix);
                    // an absent embedded value nulls every column beneath it
                    mark_nullable(&mut nested);
                    mappings.push(PropertyMapping::Complex(ComplexPropertyMapping {
                        property: property.name.to_string(),
                        complex_type: embedded.type_name().to_string(),
                        mappings: nested,
                    }));
                }
            }
        }

        mappings
    }
}

fn mark_nullable(mappings: &mut [PropertyMapping]) {
    for mapping in mappings {
        match mapping {
            PropertyMapping::Scalar(scalar) => scalar.nullable = true,
            PropertyMapping::Complex(complex) => mark_nullable(&mut complex.mappings),
            PropertyMapping::Navigation(_) => {}
        }
    }
}
