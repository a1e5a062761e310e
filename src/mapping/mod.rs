//! Declarative mapping metadata.
//!
//! An [`EntityMapping`] describes how one record type lands in a destination
//! table: scalar properties map to named, typed columns, complex properties
//! inline a nested set of mappings, and navigation properties describe
//! relations. Only scalar and complex shapes can be bulk loaded; navigation
//! mappings are rejected by the schema resolver.
//!
//! Mappings come either from a [`ModelContext`] (explicit metadata) or are
//! derived from the record's declared shape by convention, see
//! [`MappingSource`].

pub mod context;

pub use context::{
    MappingOptions, MappingOrigin, MappingSource, ModelContext, ModelContextBuilder,
    conventional_mapping,
};

use crate::value::ColumnType;

/// One property mapping in a mapping tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyMapping {
    Scalar(ScalarPropertyMapping),
    Complex(ComplexPropertyMapping),
    Navigation(NavigationPropertyMapping),
}

impl PropertyMapping {
    pub fn property(&self) -> &str {
        match self {
            PropertyMapping::Scalar(scalar) => &scalar.property,
            PropertyMapping::Complex(complex) => &complex.property,
            PropertyMapping::Navigation(navigation) => &navigation.property,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PropertyMapping::Scalar(_) => "scalar",
            PropertyMapping::Complex(_) => "complex",
            PropertyMapping::Navigation(navigation) => match navigation.multiplicity {
                Multiplicity::One => "navigation",
                Multiplicity::Many => "collection",
            },
        }
    }
}

/// Scalar property stored in a single column. The column name may differ
/// from the property name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScalarPropertyMapping {
    pub property: String,
    pub column: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// Embedded value whose properties are inlined as further columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComplexPropertyMapping {
    pub property: String,
    pub complex_type: String,
    pub mappings: Vec<PropertyMapping>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Multiplicity {
    One,
    Many,
}

/// Relation to another entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NavigationPropertyMapping {
    pub property: String,
    pub target: String,
    pub multiplicity: Multiplicity,
}

/// Mapping tree for one record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityMapping {
    entity_type: String,
    mappings: Vec<PropertyMapping>,
}

impl EntityMapping {
    pub fn new(entity_type: impl Into<String>, mappings: Vec<PropertyMapping>) -> Self {
        Self {
            entity_type: entity_type.into(),
            mappings,
        }
    }

    pub fn builder(entity_type: impl Into<String>) -> MappingBuilder {
        MappingBuilder::new(entity_type)
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn mappings(&self) -> &[PropertyMapping] {
        &self.mappings
    }
}

/// Fluent construction of an [`EntityMapping`]. Declaration order is column
/// order.
#[derive(Debug, Clone)]
pub struct MappingBuilder {
    type_name: String,
    mappings: Vec<PropertyMapping>,
}

impl MappingBuilder {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            mappings: Vec::new(),
        }
    }

    pub fn scalar(
        self,
        property: impl Into<String>,
        column: impl Into<String>,
        column_type: ColumnType,
    ) -> Self {
        self.push_scalar(property.into(), column.into(), column_type, false)
    }

    pub fn nullable_scalar(
        self,
        property: impl Into<String>,
        column: impl Into<String>,
        column_type: ColumnType,
    ) -> Self {
        self.push_scalar(property.into(), column.into(), column_type, true)
    }

    /// Map an embedded property; `build` receives a builder for the embedded
    /// type's own mappings.
    pub fn complex<F>(mut self, property: impl Into<String>, complex_type: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(MappingBuilder) -> MappingBuilder,
    {
        let nested = build(MappingBuilder::new(complex_type));
        self.mappings.push(PropertyMapping::Complex(ComplexPropertyMapping {
            property: property.into(),
            complex_type: nested.type_name,
            mappings: nested.mappings,
        }));
        self
    }

    pub fn navigation(self, property: impl Into<String>, target: impl Into<String>) -> Self {
        self.push_navigation(property.into(), target.into(), Multiplicity::One)
    }

    pub fn collection(self, property: impl Into<String>, target: impl Into<String>) -> Self {
        self.push_navigation(property.into(), target.into(), Multiplicity::Many)
    }

    pub fn build(self) -> EntityMapping {
        EntityMapping::new(self.type_name, self.mappings)
    }

    fn push_scalar(mut self, property: String, column: String, column_type: ColumnType, nullable: bool) -> Self {
        self.mappings.push(PropertyMapping::Scalar(ScalarPropertyMapping {
            property,
            column,
            column_type,
            nullable,
        }));
        self
    }

    fn push_navigation(mut self, property: String, target: String, multiplicity: Multiplicity) -> Self {
        self.mappings.push(PropertyMapping::Navigation(NavigationPropertyMapping {
            property,
            target,
            multiplicity,
        }));
        self
    }
}
