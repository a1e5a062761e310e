//! Schema resolution.
//!
//! Walks an [`EntityMapping`] depth first and assigns every scalar leaf a
//! column ordinal. The walk carries the current [`AccessPath`] as a value, so
//! resolution has no shared state and the same mapping always yields the same
//! columns in the same order.

use std::collections::HashMap;
use std::fmt;

use crate::error::ConfigurationError;
use crate::mapping::{EntityMapping, PropertyMapping};
use crate::value::ColumnType;

/// Property names leading from the record root to a scalar leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AccessPath {
    steps: Vec<String>,
}

impl AccessPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// A new path extended by one step; `self` is left untouched.
    pub fn child(&self, step: &str) -> Self {
        let mut steps = Vec::with_capacity(self.steps.len() + 1);
        steps.extend(self.steps.iter().cloned());
        steps.push(step.to_string());
        Self { steps }
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_nested(&self) -> bool {
        self.steps.len() > 1
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.steps.join("."))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub ordinal: usize,
    pub access_path: AccessPath,
}

/// Ordered destination columns of one record type. Immutable once resolved.
#[derive(Debug, Clone)]
pub struct TypeSchema {
    type_name: String,
    columns: Vec<ColumnDescriptor>,
    ordinals: HashMap<String, usize>,
}

impl TypeSchema {
    pub fn resolve(mapping: &EntityMapping) -> Result<Self, ConfigurationError> {
        let mut resolver = SchemaResolver::default();
        resolver.visit(mapping.entity_type(), mapping.mappings(), &AccessPath::root())?;

        if resolver.columns.is_empty() {
            return Err(ConfigurationError::EmptySchema(mapping.entity_type().to_string()));
        }

        log::debug!(
            "resolved {} columns for {}",
            resolver.columns.len(),
            mapping.entity_type()
        );

        Ok(Self {
            type_name: mapping.entity_type().to_string(),
            columns: resolver.columns,
            ordinals: resolver.ordinals,
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, ordinal: usize) -> Option<&ColumnDescriptor> {
        self.columns.get(ordinal)
    }

    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.ordinals.get(name).copied()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|column| column.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[derive(Default)]
struct SchemaResolver {
    columns: Vec<ColumnDescriptor>,
    ordinals: HashMap<String, usize>,
}

impl SchemaResolver {
    fn visit(
        &mut self,
        type_name: &str,
        mappings: &[PropertyMapping],
        path: &AccessPath,
    ) -> Result<(), ConfigurationError> {
        for mapping in mappings {
            match mapping {
                PropertyMapping::Scalar(scalar) => {
                    let ordinal = self.columns.len();
                    if self.ordinals.insert(scalar.column.clone(), ordinal).is_some() {
                        return Err(ConfigurationError::DuplicateColumn {
                            type_name: type_name.to_string(),
                            column: scalar.column.clone(),
                        });
                    }

                    self.columns.push(ColumnDescriptor {
                        name: scalar.column.clone(),
                        column_type: scalar.column_type,
                        nullable: scalar.nullable,
                        ordinal,
                        access_path: path.child(&scalar.property),
                    });
                }
                PropertyMapping::Complex(complex) => {
                    self.visit(&complex.complex_type, &complex.mappings, &path.child(&complex.property))?;
                }
                PropertyMapping::Navigation(_) => {
                    return Err(ConfigurationError::UnsupportedMapping {
                        type_name: type_name.to_string(),
                        property: mapping.property().to_string(),
                        kind: mapping.kind_name(),
                    });
                }
            }
        }

        Ok(())
    }
}
