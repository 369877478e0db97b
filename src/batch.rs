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

//! Fixed-capacity columnar row batch
//!
//! A [`RowBatch`] is allocated once per session and reused: [`RowBatch::reset`]
//! clears the row count, null flags and child counts but keeps every backing
//! allocation.

use std::sync::Arc;

use serde_json::{Map, Value};
use snafu::ensure;

use crate::schema::TypeDescription;
use crate::vector::{ColumnVector, ColumnVectorOps};
use crate::{error, Result};

/// Default number of rows per batch
pub const DEFAULT_BATCH_CAPACITY: usize = 1024;

/// One column vector per top-level field of a struct schema
#[derive(Debug, Clone)]
pub struct RowBatch {
    schema: Arc<TypeDescription>,
    capacity: usize,
    size: usize,
    columns: Vec<ColumnVector>,
}

impl RowBatch {
    /// Allocate a batch for `schema`, which must have a struct root
    pub fn new(schema: Arc<TypeDescription>, capacity: usize) -> Result<Self> {
        ensure!(capacity > 0, error::InvalidCapacitySnafu);
        schema.validate_root()?;

        let columns = schema
            .children()
            .iter()
            .map(|child| ColumnVector::from_type(child, capacity))
            .collect();

        Ok(Self {
            schema,
            capacity,
            size: 0,
            columns,
        })
    }

    pub fn with_default_capacity(schema: Arc<TypeDescription>) -> Result<Self> {
        Self::new(schema, DEFAULT_BATCH_CAPACITY)
    }

    pub fn schema(&self) -> &Arc<TypeDescription> {
        &self.schema
    }

    /// Number of rows converted into this batch
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    pub fn columns(&self) -> &[ColumnVector] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&ColumnVector> {
        self.columns.get(index)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnVector> {
        self.schema
            .field_names()
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.columns.get(i))
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [ColumnVector] {
        &mut self.columns
    }

    /// Count the row just converted at index `size`
    pub(crate) fn commit_row(&mut self) {
        debug_assert!(self.size < self.capacity);
        self.size += 1;
    }

    /// Clear rows, null flags and child counts, keeping allocations
    pub fn reset(&mut self) {
        self.size = 0;
        self.columns.iter_mut().for_each(ColumnVectorOps::reset);
    }

    /// Whether list/map children may grow past their allocation
    pub fn set_growable(&mut self, growable: bool) {
        self.columns
            .iter_mut()
            .for_each(|c| c.set_growable(growable));
    }

    /// Snapshot every list/map child count in depth-first order
    pub fn child_counts(&self) -> Vec<usize> {
        let mut counts = Vec::new();
        self.columns
            .iter()
            .for_each(|c| c.collect_child_counts(&mut counts));
        counts
    }

    /// Roll child counts back to a snapshot from [`RowBatch::child_counts`]
    pub fn restore_child_counts(&mut self, counts: &[usize]) {
        let mut iter = counts.iter();
        self.columns
            .iter_mut()
            .for_each(|c| c.restore_child_counts(&mut iter));
    }

    /// Materialize one converted row as a JSON object
    pub fn row(&self, row: usize) -> Option<Value> {
        if row >= self.size {
            return None;
        }
        let object: Map<String, Value> = self
            .schema
            .field_names()
            .iter()
            .zip(&self.columns)
            .map(|(name, column)| (name.clone(), column.value_at(row)))
            .collect();
        Some(Value::Object(object))
    }

    pub fn rows(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.size).filter_map(|row| self.row(row))
    }
}
