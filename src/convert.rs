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

//! Type-directed conversion of JSON values into column cells
//!
//! [`Converter::build`] walks a schema tree once and produces a parallel tree
//! of converters. Converting a record never inspects the schema again: each
//! node only matches its own vector kind.

use std::sync::Arc;

use serde_json::{Map, Value};
use snafu::{ensure, OptionExt, ResultExt};

use crate::batch::RowBatch;
use crate::coerce;
use crate::schema::{TypeCategory, TypeDescription};
use crate::vector::{
    ColumnVector, ColumnVectorOps, ListColumnVector, MapColumnVector, StructColumnVector,
};
use crate::{error, Result};

/// What to do with a value that cannot be stored in its column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversionErrorPolicy {
    /// Fail the whole session
    #[default]
    Abort,
    /// Null the offending cell and keep going
    NullCell,
}

/// One node of the converter tree
#[derive(Debug, Clone)]
pub enum Converter {
    Boolean,
    /// Integer columns of any width
    Long(TypeCategory),
    /// Float and double columns
    Double(TypeCategory),
    /// String, char and varchar columns
    String(TypeCategory),
    Binary,
    Decimal,
    Timestamp,
    Struct(StructConverter),
    List(ListConverter),
    Map(MapConverter),
}

impl Converter {
    /// Build the converter tree for `schema`
    pub fn build(schema: &TypeDescription) -> Result<Self> {
        Ok(match schema.category() {
            TypeCategory::Boolean => Converter::Boolean,
            category @ (TypeCategory::Byte
            | TypeCategory::Short
            | TypeCategory::Int
            | TypeCategory::Long) => Converter::Long(category),
            category @ (TypeCategory::Float | TypeCategory::Double) => Converter::Double(category),
            category @ (TypeCategory::String | TypeCategory::Char | TypeCategory::Varchar) => {
                Converter::String(category)
            }
            TypeCategory::Binary => Converter::Binary,
            TypeCategory::Decimal => Converter::Decimal,
            TypeCategory::Timestamp => Converter::Timestamp,
            TypeCategory::Struct => Converter::Struct(StructConverter::new(schema)?),
            TypeCategory::List => Converter::List(ListConverter {
                element: Box::new(Converter::build(child(schema, 0)?)?),
            }),
            TypeCategory::Map => Converter::Map(MapConverter {
                value: Box::new(Converter::build(child(schema, 1)?)?),
            }),
        })
    }

    /// Convert `value` into `vector[row]`. JSON null marks the cell null
    /// and writes nothing else, at every nesting level.
    pub fn convert(
        &self,
        value: &Value,
        vector: &mut ColumnVector,
        row: usize,
        policy: ConversionErrorPolicy,
    ) -> Result<()> {
        if value.is_null() {
            vector.set_null(row);
            return Ok(());
        }
        match self.write(value, vector, row, policy) {
            Err(e) if policy == ConversionErrorPolicy::NullCell && e.is_cell_error() => {
                vector.set_null(row);
                Ok(())
            }
            other => other,
        }
    }

    fn write(
        &self,
        value: &Value,
        vector: &mut ColumnVector,
        row: usize,
        policy: ConversionErrorPolicy,
    ) -> Result<()> {
        match (self, vector) {
            (Converter::Boolean, ColumnVector::Long(v)) => {
                v.set(row, i64::from(coerce::to_bool(value)?));
            }
            (Converter::Long(category), ColumnVector::Long(v)) => {
                v.set(row, coerce::to_long(value, *category)?);
            }
            (Converter::Double(category), ColumnVector::Double(v)) => {
                v.set(row, coerce::to_double(value, *category)?);
            }
            (Converter::String(category), ColumnVector::Bytes(v)) => {
                v.set_val(row, coerce::to_str(value, *category)?.as_bytes());
            }
            (Converter::Binary, ColumnVector::Bytes(v)) => {
                let text = coerce::to_str(value, TypeCategory::Binary)?;
                v.set_val(row, &coerce::parse_hex(text)?);
            }
            (Converter::Decimal, ColumnVector::Decimal(v)) => {
                let text = coerce::to_str(value, TypeCategory::Decimal)?;
                match coerce::parse_decimal(text, v.precision(), v.scale())? {
                    Some(unscaled) => v.set(row, unscaled),
                    None => v.set_null(row),
                }
            }
            (Converter::Timestamp, ColumnVector::Timestamp(v)) => {
                let text = coerce::to_str(value, TypeCategory::Timestamp)?;
                v.set(row, coerce::parse_timestamp(text)?);
            }
            (Converter::Struct(c), ColumnVector::Struct(v)) => c.write(value, v, row, policy)?,
            (Converter::List(c), ColumnVector::List(v)) => c.write(value, v, row, policy)?,
            (Converter::Map(c), ColumnVector::Map(v)) => c.write(value, v, row, policy)?,
            (converter, _) => {
                return error::VectorMismatchSnafu {
                    expected: converter.vector_kind(),
                }
                .fail();
            }
        }
        Ok(())
    }

    fn vector_kind(&self) -> &'static str {
        match self {
            Converter::Boolean | Converter::Long(_) => "long",
            Converter::Double(_) => "double",
            Converter::String(_) | Converter::Binary => "bytes",
            Converter::Decimal => "decimal",
            Converter::Timestamp => "timestamp",
            Converter::Struct(_) => "struct",
            Converter::List(_) => "list",
            Converter::Map(_) => "map",
        }
    }
}

fn child(schema: &TypeDescription, index: usize) -> Result<&TypeDescription> {
    schema
        .children()
        .get(index)
        .context(error::InvalidSchemaSnafu {
            schema: schema.to_string(),
            reason: format!("missing child type {index}"),
        })
}

/// Looks up each declared field by name in a JSON object
#[derive(Debug, Clone)]
pub struct StructConverter {
    field_names: Vec<String>,
    children: Vec<Converter>,
}

impl StructConverter {
    fn new(schema: &TypeDescription) -> Result<Self> {
        let children = schema
            .children()
            .iter()
            .map(Converter::build)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            field_names: schema.field_names().to_vec(),
            children,
        })
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    fn write(
        &self,
        value: &Value,
        vector: &mut StructColumnVector,
        row: usize,
        policy: ConversionErrorPolicy,
    ) -> Result<()> {
        coerce::check_accepted(value, TypeCategory::Struct)?;
        if let Value::Object(object) = value {
            self.write_fields(object, &mut vector.fields, row, policy)?;
        }
        Ok(())
    }

    /// Absent keys null the field's cell without invoking its converter.
    /// Present keys of the wrong type fail inside the child converter.
    fn write_fields(
        &self,
        object: &Map<String, Value>,
        fields: &mut [ColumnVector],
        row: usize,
        policy: ConversionErrorPolicy,
    ) -> Result<()> {
        for ((name, converter), field) in self
            .field_names
            .iter()
            .zip(&self.children)
            .zip(fields.iter_mut())
        {
            match object.get(name) {
                None => field.set_null(row),
                Some(value) => converter
                    .convert(value, field, row, policy)
                    .context(error::ConvertFieldSnafu { field: name })?,
            }
        }
        Ok(())
    }
}

/// Writes array elements into the list's flat child vector
#[derive(Debug, Clone)]
pub struct ListConverter {
    element: Box<Converter>,
}

impl ListConverter {
    fn write(
        &self,
        value: &Value,
        vector: &mut ListColumnVector,
        row: usize,
        policy: ConversionErrorPolicy,
    ) -> Result<()> {
        coerce::check_accepted(value, TypeCategory::List)?;
        let Value::Array(elements) = value else {
            return Ok(());
        };
        let offset = vector.start_row(row, elements.len())?;
        for (i, element) in elements.iter().enumerate() {
            self.element
                .convert(element, &mut vector.child, offset + i, policy)?;
        }
        Ok(())
    }
}

/// Writes object entries as string keys and converted values, in input order
#[derive(Debug, Clone)]
pub struct MapConverter {
    value: Box<Converter>,
}

impl MapConverter {
    fn write(
        &self,
        value: &Value,
        vector: &mut MapColumnVector,
        row: usize,
        policy: ConversionErrorPolicy,
    ) -> Result<()> {
        coerce::check_accepted(value, TypeCategory::Map)?;
        let Value::Object(entries) = value else {
            return Ok(());
        };
        let offset = vector.start_row(row, entries.len())?;
        for (i, (key, entry)) in entries.iter().enumerate() {
            let nested = offset + i;
            vector.keys.set_val(nested, key.as_bytes());
            self.value
                .convert(entry, &mut vector.values, nested, policy)
                .context(error::ConvertFieldSnafu { field: key })?;
        }
        Ok(())
    }
}

/// Root converter: maps one JSON object onto one row of a [`RowBatch`]
#[derive(Debug, Clone)]
pub struct RecordConverter {
    schema: Arc<TypeDescription>,
    root: StructConverter,
    policy: ConversionErrorPolicy,
}

impl RecordConverter {
    pub fn new(schema: Arc<TypeDescription>) -> Result<Self> {
        Self::with_policy(schema, ConversionErrorPolicy::default())
    }

    pub fn with_policy(schema: Arc<TypeDescription>, policy: ConversionErrorPolicy) -> Result<Self> {
        schema.validate_root()?;
        let root = StructConverter::new(&schema)?;
        Ok(Self {
            schema,
            root,
            policy,
        })
    }

    pub fn schema(&self) -> &Arc<TypeDescription> {
        &self.schema
    }

    pub fn policy(&self) -> ConversionErrorPolicy {
        self.policy
    }

    /// Allocate a batch laid out for this converter's schema
    pub fn create_row_batch(&self, capacity: usize) -> Result<RowBatch> {
        RowBatch::new(self.schema.clone(), capacity)
    }

    /// Convert `record` into row `batch.size()` and count it.
    ///
    /// On error the row is not counted; cells already written for it are
    /// overwritten by the next conversion at the same index.
    pub fn write_record(&self, record: &Map<String, Value>, batch: &mut RowBatch) -> Result<()> {
        ensure!(
            !batch.is_full(),
            error::BatchFullSnafu {
                capacity: batch.capacity(),
            }
        );
        self.validate_batch_schema(batch)?;

        let row = batch.size();
        self.root
            .write_fields(record, batch.columns_mut(), row, self.policy)?;
        batch.commit_row();
        Ok(())
    }

    fn validate_batch_schema(&self, batch: &RowBatch) -> Result<()> {
        // Fast path: batches made by `create_row_batch` share the same Arc
        if Arc::ptr_eq(&self.schema, batch.schema()) || self.schema == *batch.schema() {
            return Ok(());
        }
        Self::schema_mismatch_error(&self.schema, batch.schema())
    }

    #[cold]
    fn schema_mismatch_error(expected: &TypeDescription, actual: &TypeDescription) -> Result<()> {
        error::SchemaMismatchSnafu {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .fail()
    }
}
