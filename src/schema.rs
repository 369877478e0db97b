// Copyright 2023 Greptime Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Nested columnar type descriptions
//!
//! A [`TypeDescription`] is built once per conversion session and shared
//! read-only by the converter tree and the row batch derived from it.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use snafu::ensure;

use crate::{error, Result};

/// Largest decimal precision an `i128` unscaled value can hold.
pub const MAX_DECIMAL_PRECISION: u8 = 38;
pub const DEFAULT_DECIMAL_PRECISION: u8 = 38;
pub const DEFAULT_DECIMAL_SCALE: u8 = 10;
pub const DEFAULT_MAX_LENGTH: u32 = 255;

/// Kind of a schema node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Char,
    Varchar,
    Decimal,
    Timestamp,
    Binary,
    Struct,
    List,
    Map,
}

impl TypeCategory {
    /// Type name as written in a type expression
    pub fn name(&self) -> &'static str {
        match self {
            TypeCategory::Boolean => "boolean",
            TypeCategory::Byte => "tinyint",
            TypeCategory::Short => "smallint",
            TypeCategory::Int => "int",
            TypeCategory::Long => "bigint",
            TypeCategory::Float => "float",
            TypeCategory::Double => "double",
            TypeCategory::String => "string",
            TypeCategory::Char => "char",
            TypeCategory::Varchar => "varchar",
            TypeCategory::Decimal => "decimal",
            TypeCategory::Timestamp => "timestamp",
            TypeCategory::Binary => "binary",
            TypeCategory::Struct => "struct",
            TypeCategory::List => "array",
            TypeCategory::Map => "map",
        }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            TypeCategory::Struct | TypeCategory::List | TypeCategory::Map
        )
    }
}

impl fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TypeCategory {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "boolean" => TypeCategory::Boolean,
            "tinyint" => TypeCategory::Byte,
            "smallint" => TypeCategory::Short,
            "int" => TypeCategory::Int,
            "bigint" => TypeCategory::Long,
            "float" => TypeCategory::Float,
            "double" => TypeCategory::Double,
            "string" => TypeCategory::String,
            "char" => TypeCategory::Char,
            "varchar" => TypeCategory::Varchar,
            "decimal" => TypeCategory::Decimal,
            "timestamp" => TypeCategory::Timestamp,
            "binary" => TypeCategory::Binary,
            "struct" => TypeCategory::Struct,
            "array" => TypeCategory::List,
            "map" => TypeCategory::Map,
            _ => return error::UnknownCategorySnafu { name: s }.fail(),
        })
    }
}

/// Immutable schema tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescription {
    category: TypeCategory,
    children: Vec<TypeDescription>,
    field_names: Vec<String>,
    precision: u8,
    scale: u8,
    max_length: u32,
}

impl TypeDescription {
    fn new(category: TypeCategory) -> Self {
        Self {
            category,
            children: Vec::new(),
            field_names: Vec::new(),
            precision: DEFAULT_DECIMAL_PRECISION,
            scale: DEFAULT_DECIMAL_SCALE,
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    /// Create a primitive node from its category name.
    /// Composite categories must use their dedicated constructors.
    pub fn primitive(category: TypeCategory) -> Result<Self> {
        ensure!(
            category.is_primitive(),
            error::InvalidSchemaSnafu {
                schema: category.name(),
                reason: "composite type needs children",
            }
        );
        Ok(Self::new(category))
    }

    pub fn create_boolean() -> Self {
        Self::new(TypeCategory::Boolean)
    }

    pub fn create_byte() -> Self {
        Self::new(TypeCategory::Byte)
    }

    pub fn create_short() -> Self {
        Self::new(TypeCategory::Short)
    }

    pub fn create_int() -> Self {
        Self::new(TypeCategory::Int)
    }

    pub fn create_long() -> Self {
        Self::new(TypeCategory::Long)
    }

    pub fn create_float() -> Self {
        Self::new(TypeCategory::Float)
    }

    pub fn create_double() -> Self {
        Self::new(TypeCategory::Double)
    }

    pub fn create_string() -> Self {
        Self::new(TypeCategory::String)
    }

    pub fn create_char() -> Self {
        Self::new(TypeCategory::Char)
    }

    pub fn create_varchar() -> Self {
        Self::new(TypeCategory::Varchar)
    }

    pub fn create_decimal() -> Self {
        Self::new(TypeCategory::Decimal)
    }

    pub fn create_timestamp() -> Self {
        Self::new(TypeCategory::Timestamp)
    }

    pub fn create_binary() -> Self {
        Self::new(TypeCategory::Binary)
    }

    /// Create an empty struct; add fields with [`TypeDescription::add_field`]
    pub fn create_struct() -> Self {
        Self::new(TypeCategory::Struct)
    }

    pub fn create_list(element: TypeDescription) -> Self {
        let mut list = Self::new(TypeCategory::List);
        list.children.push(element);
        list
    }

    /// Map keys are always converted as strings, whatever `key` declares.
    pub fn create_map(key: TypeDescription, value: TypeDescription) -> Self {
        let mut map = Self::new(TypeCategory::Map);
        map.children.push(key);
        map.children.push(value);
        map
    }

    /// Append a field to a struct node
    pub fn add_field<T: Into<String>>(mut self, name: T, field_type: TypeDescription) -> Self {
        self.field_names.push(name.into());
        self.children.push(field_type);
        self
    }

    pub fn with_precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn category(&self) -> TypeCategory {
        self.category
    }

    /// Ordered children; empty for primitives
    pub fn children(&self) -> &[TypeDescription] {
        &self.children
    }

    /// Struct field names in declaration order, one per child
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    pub fn max_length(&self) -> u32 {
        self.max_length
    }

    /// Look up a struct field's type by name
    pub fn field(&self, name: &str) -> Option<&TypeDescription> {
        self.field_names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.children[i])
    }

    /// Check that this node can be the root of a conversion session.
    pub fn validate_root(&self) -> Result<()> {
        ensure!(
            self.category == TypeCategory::Struct,
            error::RootNotStructSnafu {
                actual: self.to_string(),
            }
        );
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        match self.category {
            TypeCategory::Struct => {
                ensure!(
                    self.field_names.len() == self.children.len(),
                    error::InvalidSchemaSnafu {
                        schema: self.to_string(),
                        reason: "field names do not match children",
                    }
                );
                let mut seen = HashSet::with_capacity(self.field_names.len());
                for name in &self.field_names {
                    ensure!(
                        seen.insert(name.as_str()),
                        error::InvalidSchemaSnafu {
                            schema: self.to_string(),
                            reason: format!("duplicate field name {name}"),
                        }
                    );
                }
            }
            TypeCategory::List => self.expect_children(1)?,
            TypeCategory::Map => self.expect_children(2)?,
            TypeCategory::Decimal => {
                ensure!(
                    (1..=MAX_DECIMAL_PRECISION).contains(&self.precision)
                        && self.scale <= self.precision,
                    error::InvalidSchemaSnafu {
                        schema: self.to_string(),
                        reason: "decimal precision must be 1..=38 and scale <= precision",
                    }
                );
            }
            _ => self.expect_children(0)?,
        }
        self.children.iter().try_for_each(TypeDescription::validate)
    }

    fn expect_children(&self, expected: usize) -> Result<()> {
        ensure!(
            self.children.len() == expected,
            error::InvalidSchemaSnafu {
                schema: self.to_string(),
                reason: format!(
                    "{} expects {} children, got {}",
                    self.category,
                    expected,
                    self.children.len()
                ),
            }
        );
        Ok(())
    }
}

impl fmt::Display for TypeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            TypeCategory::Decimal => write!(f, "decimal({},{})", self.precision, self.scale),
            TypeCategory::Char | TypeCategory::Varchar => {
                write!(f, "{}({})", self.category, self.max_length)
            }
            TypeCategory::Struct => {
                f.write_str("struct<")?;
                for (i, (name, child)) in self.field_names.iter().zip(&self.children).enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{name}:{child}")?;
                }
                f.write_str(">")
            }
            TypeCategory::List | TypeCategory::Map => {
                write!(f, "{}<", self.category)?;
                for (i, child) in self.children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(">")
            }
            _ => f.write_str(self.category.name()),
        }
    }
}
