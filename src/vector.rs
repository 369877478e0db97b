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

//! Per-field column vectors backing a [`RowBatch`](crate::batch::RowBatch)
//!
//! Every vector allocates its backing storage up front and keeps it across
//! resets. Variable-length fields (list, map) share one flat child vector for
//! the whole batch, addressed through per-row `offset`/`length` and a running
//! `child_count`.

use chrono::{DateTime, NaiveDateTime};
use enum_dispatch::enum_dispatch;
use serde_json::{Map, Number, Value};
use snafu::ensure;

use crate::coerce::format_decimal;
use crate::schema::{TypeCategory, TypeDescription};
use crate::{error, Result};

/// Per-row null flags with a "no nulls yet" fast path
#[derive(Debug, Clone)]
pub struct NullMask {
    is_null: Vec<bool>,
    no_nulls: bool,
}

impl NullMask {
    pub fn with_size(size: usize) -> Self {
        Self {
            is_null: vec![false; size],
            no_nulls: true,
        }
    }

    pub fn set_null(&mut self, row: usize) {
        self.no_nulls = false;
        self.is_null[row] = true;
    }

    pub fn is_null(&self, row: usize) -> bool {
        !self.no_nulls && self.is_null[row]
    }

    pub fn no_nulls(&self) -> bool {
        self.no_nulls
    }

    fn resize(&mut self, size: usize) {
        if size > self.is_null.len() {
            self.is_null.resize(size, false);
        }
    }

    fn reset(&mut self) {
        if !self.no_nulls {
            self.is_null.iter_mut().for_each(|flag| *flag = false);
        }
        self.no_nulls = true;
    }
}

/// Operations shared by every vector kind
#[enum_dispatch]
pub trait ColumnVectorOps {
    /// Number of allocated row slots
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow backing storage to hold at least `size` rows, keeping contents
    fn ensure_size(&mut self, size: usize);

    /// Clear null flags and child counts; allocations are kept
    fn reset(&mut self);

    fn nulls(&self) -> &NullMask;

    fn nulls_mut(&mut self) -> &mut NullMask;

    fn set_null(&mut self, row: usize) {
        self.nulls_mut().set_null(row);
    }

    fn is_null(&self, row: usize) -> bool {
        self.nulls().is_null(row)
    }

    fn no_nulls(&self) -> bool {
        self.nulls().no_nulls()
    }

    /// Materialize one cell; null cells become `Value::Null`
    fn value_at(&self, row: usize) -> Value;

    /// Allow list/map children to grow past their allocation
    fn set_growable(&mut self, _growable: bool) {}

    /// Append the child counts of this subtree in depth-first order
    fn collect_child_counts(&self, _out: &mut Vec<usize>) {}

    /// Restore child counts captured by `collect_child_counts`
    fn restore_child_counts(&mut self, _counts: &mut std::slice::Iter<'_, usize>) {}
}

/// Closed set of vector kinds, one per schema category family
#[enum_dispatch(ColumnVectorOps)]
#[derive(Debug, Clone)]
pub enum ColumnVector {
    Long(LongColumnVector),
    Double(DoubleColumnVector),
    Bytes(BytesColumnVector),
    Decimal(DecimalColumnVector),
    Timestamp(TimestampColumnVector),
    Struct(StructColumnVector),
    List(ListColumnVector),
    Map(MapColumnVector),
}

impl ColumnVector {
    /// Allocate the vector tree for `schema` with `size` row slots.
    /// `schema` must have passed [`TypeDescription::validate_root`].
    pub fn from_type(schema: &TypeDescription, size: usize) -> Self {
        match schema.category() {
            TypeCategory::Boolean
            | TypeCategory::Byte
            | TypeCategory::Short
            | TypeCategory::Int
            | TypeCategory::Long => LongColumnVector::new(schema.category(), size).into(),
            TypeCategory::Float | TypeCategory::Double => DoubleColumnVector::new(size).into(),
            TypeCategory::String | TypeCategory::Char | TypeCategory::Varchar => {
                BytesColumnVector::new(size, false).into()
            }
            TypeCategory::Binary => BytesColumnVector::new(size, true).into(),
            TypeCategory::Decimal => {
                DecimalColumnVector::new(size, schema.precision(), schema.scale()).into()
            }
            TypeCategory::Timestamp => TimestampColumnVector::new(size).into(),
            TypeCategory::Struct => StructColumnVector::new(
                schema.field_names().to_vec(),
                schema
                    .children()
                    .iter()
                    .map(|child| ColumnVector::from_type(child, size))
                    .collect(),
                size,
            )
            .into(),
            TypeCategory::List => {
                let child = ColumnVector::from_type(&schema.children()[0], size);
                ListColumnVector::new(size, child).into()
            }
            TypeCategory::Map => {
                let values = ColumnVector::from_type(&schema.children()[1], size);
                MapColumnVector::new(size, values).into()
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ColumnVector::Long(_) => "long",
            ColumnVector::Double(_) => "double",
            ColumnVector::Bytes(_) => "bytes",
            ColumnVector::Decimal(_) => "decimal",
            ColumnVector::Timestamp(_) => "timestamp",
            ColumnVector::Struct(_) => "struct",
            ColumnVector::List(_) => "list",
            ColumnVector::Map(_) => "map",
        }
    }

    pub fn as_long(&self) -> Option<&LongColumnVector> {
        match self {
            ColumnVector::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<&DoubleColumnVector> {
        match self {
            ColumnVector::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&BytesColumnVector> {
        match self {
            ColumnVector::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<&DecimalColumnVector> {
        match self {
            ColumnVector::Decimal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&TimestampColumnVector> {
        match self {
            ColumnVector::Timestamp(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructColumnVector> {
        match self {
            ColumnVector::Struct(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListColumnVector> {
        match self {
            ColumnVector::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapColumnVector> {
        match self {
            ColumnVector::Map(v) => Some(v),
            _ => None,
        }
    }
}

fn grown_size(current: usize, needed: usize) -> usize {
    needed.max(current.saturating_mul(2))
}

/// Integer and boolean cells, stored widened to `i64`
#[derive(Debug, Clone)]
pub struct LongColumnVector {
    nulls: NullMask,
    category: TypeCategory,
    values: Vec<i64>,
}

impl LongColumnVector {
    pub fn new(category: TypeCategory, size: usize) -> Self {
        Self {
            nulls: NullMask::with_size(size),
            category,
            values: vec![0; size],
        }
    }

    pub fn set(&mut self, row: usize, value: i64) {
        self.values[row] = value;
    }

    pub fn value(&self, row: usize) -> Option<i64> {
        (!self.is_null(row)).then(|| self.values[row])
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn category(&self) -> TypeCategory {
        self.category
    }
}

impl ColumnVectorOps for LongColumnVector {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn ensure_size(&mut self, size: usize) {
        if size > self.values.len() {
            self.values.resize(size, 0);
            self.nulls.resize(size);
        }
    }

    fn reset(&mut self) {
        self.nulls.reset();
    }

    fn nulls(&self) -> &NullMask {
        &self.nulls
    }

    fn nulls_mut(&mut self) -> &mut NullMask {
        &mut self.nulls
    }

    fn value_at(&self, row: usize) -> Value {
        match self.value(row) {
            None => Value::Null,
            Some(v) if self.category == TypeCategory::Boolean => Value::Bool(v != 0),
            Some(v) => Value::from(v),
        }
    }
}

/// Floating cells, stored widened to `f64`
#[derive(Debug, Clone)]
pub struct DoubleColumnVector {
    nulls: NullMask,
    values: Vec<f64>,
}

impl DoubleColumnVector {
    pub fn new(size: usize) -> Self {
        Self {
            nulls: NullMask::with_size(size),
            values: vec![0.0; size],
        }
    }

    pub fn set(&mut self, row: usize, value: f64) {
        self.values[row] = value;
    }

    pub fn value(&self, row: usize) -> Option<f64> {
        (!self.is_null(row)).then(|| self.values[row])
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl ColumnVectorOps for DoubleColumnVector {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn ensure_size(&mut self, size: usize) {
        if size > self.values.len() {
            self.values.resize(size, 0.0);
            self.nulls.resize(size);
        }
    }

    fn reset(&mut self) {
        self.nulls.reset();
    }

    fn nulls(&self) -> &NullMask {
        &self.nulls
    }

    fn nulls_mut(&mut self) -> &mut NullMask {
        &mut self.nulls
    }

    fn value_at(&self, row: usize) -> Value {
        self.value(row)
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number)
    }
}

/// String and binary cells as slices of one shared byte buffer
#[derive(Debug, Clone)]
pub struct BytesColumnVector {
    nulls: NullMask,
    binary: bool,
    buffer: Vec<u8>,
    start: Vec<usize>,
    length: Vec<usize>,
}

impl BytesColumnVector {
    pub fn new(size: usize, binary: bool) -> Self {
        Self {
            nulls: NullMask::with_size(size),
            binary,
            buffer: Vec::new(),
            start: vec![0; size],
            length: vec![0; size],
        }
    }

    /// Copy `bytes` into the shared buffer and point `row` at them
    pub fn set_val(&mut self, row: usize, bytes: &[u8]) {
        self.start[row] = self.buffer.len();
        self.length[row] = bytes.len();
        self.buffer.extend_from_slice(bytes);
    }

    pub fn bytes(&self, row: usize) -> Option<&[u8]> {
        if self.is_null(row) {
            return None;
        }
        let start = self.start[row];
        Some(&self.buffer[start..start + self.length[row]])
    }

    /// UTF-8 view of a cell; `None` for nulls and invalid UTF-8
    pub fn str(&self, row: usize) -> Option<&str> {
        self.bytes(row).and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}

impl ColumnVectorOps for BytesColumnVector {
    fn len(&self) -> usize {
        self.start.len()
    }

    fn ensure_size(&mut self, size: usize) {
        if size > self.start.len() {
            self.start.resize(size, 0);
            self.length.resize(size, 0);
            self.nulls.resize(size);
        }
    }

    fn reset(&mut self) {
        self.nulls.reset();
        self.buffer.clear();
    }

    fn nulls(&self) -> &NullMask {
        &self.nulls
    }

    fn nulls_mut(&mut self) -> &mut NullMask {
        &mut self.nulls
    }

    fn value_at(&self, row: usize) -> Value {
        match self.bytes(row) {
            None => Value::Null,
            Some(b) if self.binary => Value::String(hex::encode(b)),
            Some(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

/// Decimal cells as unscaled `i128` at the column scale
#[derive(Debug, Clone)]
pub struct DecimalColumnVector {
    nulls: NullMask,
    precision: u8,
    scale: u8,
    values: Vec<i128>,
}

impl DecimalColumnVector {
    pub fn new(size: usize, precision: u8, scale: u8) -> Self {
        Self {
            nulls: NullMask::with_size(size),
            precision,
            scale,
            values: vec![0; size],
        }
    }

    pub fn set(&mut self, row: usize, unscaled: i128) {
        self.values[row] = unscaled;
    }

    pub fn value(&self, row: usize) -> Option<i128> {
        (!self.is_null(row)).then(|| self.values[row])
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }
}

impl ColumnVectorOps for DecimalColumnVector {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn ensure_size(&mut self, size: usize) {
        if size > self.values.len() {
            self.values.resize(size, 0);
            self.nulls.resize(size);
        }
    }

    fn reset(&mut self) {
        self.nulls.reset();
    }

    fn nulls(&self) -> &NullMask {
        &self.nulls
    }

    fn nulls_mut(&mut self) -> &mut NullMask {
        &mut self.nulls
    }

    fn value_at(&self, row: usize) -> Value {
        self.value(row).map_or(Value::Null, |v| {
            Value::String(format_decimal(v, self.scale))
        })
    }
}

/// Timestamp cells as epoch milliseconds plus nanosecond-of-second
#[derive(Debug, Clone)]
pub struct TimestampColumnVector {
    nulls: NullMask,
    millis: Vec<i64>,
    nanos: Vec<u32>,
}

impl TimestampColumnVector {
    pub fn new(size: usize) -> Self {
        Self {
            nulls: NullMask::with_size(size),
            millis: vec![0; size],
            nanos: vec![0; size],
        }
    }

    pub fn set(&mut self, row: usize, value: NaiveDateTime) {
        let utc = value.and_utc();
        self.millis[row] = utc.timestamp_millis();
        self.nanos[row] = utc.timestamp_subsec_nanos();
    }

    pub fn value(&self, row: usize) -> Option<NaiveDateTime> {
        if self.is_null(row) {
            return None;
        }
        let secs = self.millis[row].div_euclid(1000);
        DateTime::from_timestamp(secs, self.nanos[row]).map(|dt| dt.naive_utc())
    }

    pub fn millis(&self) -> &[i64] {
        &self.millis
    }

    pub fn nanos(&self) -> &[u32] {
        &self.nanos
    }
}

impl ColumnVectorOps for TimestampColumnVector {
    fn len(&self) -> usize {
        self.millis.len()
    }

    fn ensure_size(&mut self, size: usize) {
        if size > self.millis.len() {
            self.millis.resize(size, 0);
            self.nanos.resize(size, 0);
            self.nulls.resize(size);
        }
    }

    fn reset(&mut self) {
        self.nulls.reset();
    }

    fn nulls(&self) -> &NullMask {
        &self.nulls
    }

    fn nulls_mut(&mut self) -> &mut NullMask {
        &mut self.nulls
    }

    fn value_at(&self, row: usize) -> Value {
        self.value(row).map_or(Value::Null, |ts| {
            Value::String(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())
        })
    }
}

/// One child vector per declared field, indexed by the parent row
#[derive(Debug, Clone)]
pub struct StructColumnVector {
    nulls: NullMask,
    field_names: Vec<String>,
    pub(crate) fields: Vec<ColumnVector>,
}

impl StructColumnVector {
    pub fn new(field_names: Vec<String>, fields: Vec<ColumnVector>, size: usize) -> Self {
        Self {
            nulls: NullMask::with_size(size),
            field_names,
            fields,
        }
    }

    pub fn fields(&self) -> &[ColumnVector] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ColumnVector> {
        self.field_names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.fields[i])
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }
}

impl ColumnVectorOps for StructColumnVector {
    fn len(&self) -> usize {
        self.nulls.is_null.len()
    }

    fn ensure_size(&mut self, size: usize) {
        self.nulls.resize(size);
        self.fields.iter_mut().for_each(|f| f.ensure_size(size));
    }

    fn reset(&mut self) {
        self.nulls.reset();
        self.fields.iter_mut().for_each(ColumnVectorOps::reset);
    }

    fn nulls(&self) -> &NullMask {
        &self.nulls
    }

    fn nulls_mut(&mut self) -> &mut NullMask {
        &mut self.nulls
    }

    fn value_at(&self, row: usize) -> Value {
        if self.is_null(row) {
            return Value::Null;
        }
        let object: Map<String, Value> = self
            .field_names
            .iter()
            .zip(&self.fields)
            .map(|(name, field)| (name.clone(), field.value_at(row)))
            .collect();
        Value::Object(object)
    }

    fn set_growable(&mut self, growable: bool) {
        self.fields
            .iter_mut()
            .for_each(|f| f.set_growable(growable));
    }

    fn collect_child_counts(&self, out: &mut Vec<usize>) {
        self.fields.iter().for_each(|f| f.collect_child_counts(out));
    }

    fn restore_child_counts(&mut self, counts: &mut std::slice::Iter<'_, usize>) {
        self.fields
            .iter_mut()
            .for_each(|f| f.restore_child_counts(counts));
    }
}

/// Offset/length bookkeeping shared by list and map vectors
#[derive(Debug, Clone)]
pub struct ChildIndex {
    offsets: Vec<usize>,
    lengths: Vec<usize>,
    child_count: usize,
    growable: bool,
}

impl ChildIndex {
    fn with_size(size: usize) -> Self {
        Self {
            offsets: vec![0; size],
            lengths: vec![0; size],
            child_count: 0,
            growable: true,
        }
    }

    /// Claim `len` child slots for `row` and return the first one.
    /// `child_len` is the current child allocation. When the claim does not
    /// fit, the second value is the size the caller must grow children to.
    fn claim(&mut self, row: usize, len: usize, child_len: usize) -> Result<(usize, Option<usize>)> {
        let offset = self.child_count;
        let needed = offset + len;
        let grow_to = if needed > child_len {
            ensure!(
                self.growable,
                error::ChildOverflowSnafu {
                    needed,
                    capacity: child_len,
                }
            );
            Some(grown_size(child_len, needed))
        } else {
            None
        };
        self.offsets[row] = offset;
        self.lengths[row] = len;
        self.child_count = needed;
        Ok((offset, grow_to))
    }

    fn resize(&mut self, size: usize) {
        if size > self.offsets.len() {
            self.offsets.resize(size, 0);
            self.lengths.resize(size, 0);
        }
    }

    pub fn offset(&self, row: usize) -> usize {
        self.offsets[row]
    }

    pub fn length(&self, row: usize) -> usize {
        self.lengths[row]
    }

    pub fn child_count(&self) -> usize {
        self.child_count
    }
}

/// Variable-length list cells over one flat child vector
#[derive(Debug, Clone)]
pub struct ListColumnVector {
    nulls: NullMask,
    index: ChildIndex,
    pub(crate) child: Box<ColumnVector>,
}

impl ListColumnVector {
    pub fn new(size: usize, child: ColumnVector) -> Self {
        Self {
            nulls: NullMask::with_size(size),
            index: ChildIndex::with_size(size),
            child: Box::new(child),
        }
    }

    /// Reserve `len` element slots for `row`, growing the child if allowed
    pub fn start_row(&mut self, row: usize, len: usize) -> Result<usize> {
        let (offset, grow_to) = self.index.claim(row, len, self.child.len())?;
        if let Some(size) = grow_to {
            self.child.ensure_size(size);
        }
        Ok(offset)
    }

    pub fn offset(&self, row: usize) -> usize {
        self.index.offset(row)
    }

    pub fn length(&self, row: usize) -> usize {
        self.index.length(row)
    }

    pub fn child_count(&self) -> usize {
        self.index.child_count()
    }

    pub fn child(&self) -> &ColumnVector {
        &self.child
    }
}

impl ColumnVectorOps for ListColumnVector {
    fn len(&self) -> usize {
        self.index.offsets.len()
    }

    fn ensure_size(&mut self, size: usize) {
        self.nulls.resize(size);
        self.index.resize(size);
    }

    fn reset(&mut self) {
        self.nulls.reset();
        self.index.child_count = 0;
        self.child.reset();
    }

    fn nulls(&self) -> &NullMask {
        &self.nulls
    }

    fn nulls_mut(&mut self) -> &mut NullMask {
        &mut self.nulls
    }

    fn value_at(&self, row: usize) -> Value {
        if self.is_null(row) {
            return Value::Null;
        }
        let offset = self.offset(row);
        Value::Array(
            (offset..offset + self.length(row))
                .map(|i| self.child.value_at(i))
                .collect(),
        )
    }

    fn set_growable(&mut self, growable: bool) {
        self.index.growable = growable;
        self.child.set_growable(growable);
    }

    fn collect_child_counts(&self, out: &mut Vec<usize>) {
        out.push(self.index.child_count);
        self.child.collect_child_counts(out);
    }

    fn restore_child_counts(&mut self, counts: &mut std::slice::Iter<'_, usize>) {
        if let Some(count) = counts.next() {
            self.index.child_count = *count;
        }
        self.child.restore_child_counts(counts);
    }
}

/// Map cells: string keys and values at shared nested positions
#[derive(Debug, Clone)]
pub struct MapColumnVector {
    nulls: NullMask,
    index: ChildIndex,
    pub(crate) keys: BytesColumnVector,
    pub(crate) values: Box<ColumnVector>,
}

impl MapColumnVector {
    pub fn new(size: usize, values: ColumnVector) -> Self {
        Self {
            nulls: NullMask::with_size(size),
            index: ChildIndex::with_size(size),
            keys: BytesColumnVector::new(size, false),
            values: Box::new(values),
        }
    }

    /// Reserve `len` entry slots for `row`, growing keys and values if allowed
    pub fn start_row(&mut self, row: usize, len: usize) -> Result<usize> {
        let child_len = self.keys.len().min(self.values.len());
        let (offset, grow_to) = self.index.claim(row, len, child_len)?;
        if let Some(size) = grow_to {
            self.keys.ensure_size(size);
            self.values.ensure_size(size);
        }
        Ok(offset)
    }

    pub fn offset(&self, row: usize) -> usize {
        self.index.offset(row)
    }

    pub fn length(&self, row: usize) -> usize {
        self.index.length(row)
    }

    pub fn child_count(&self) -> usize {
        self.index.child_count()
    }

    pub fn keys(&self) -> &BytesColumnVector {
        &self.keys
    }

    pub fn values(&self) -> &ColumnVector {
        &self.values
    }
}

impl ColumnVectorOps for MapColumnVector {
    fn len(&self) -> usize {
        self.index.offsets.len()
    }

    fn ensure_size(&mut self, size: usize) {
        self.nulls.resize(size);
        self.index.resize(size);
    }

    fn reset(&mut self) {
        self.nulls.reset();
        self.index.child_count = 0;
        self.keys.reset();
        self.values.reset();
    }

    fn nulls(&self) -> &NullMask {
        &self.nulls
    }

    fn nulls_mut(&mut self) -> &mut NullMask {
        &mut self.nulls
    }

    fn value_at(&self, row: usize) -> Value {
        if self.is_null(row) {
            return Value::Null;
        }
        let offset = self.offset(row);
        let object: Map<String, Value> = (offset..offset + self.length(row))
            .map(|i| {
                let key = self
                    .keys
                    .bytes(i)
                    .map(|k| String::from_utf8_lossy(k).into_owned())
                    .unwrap_or_default();
                (key, self.values.value_at(i))
            })
            .collect();
        Value::Object(object)
    }

    fn set_growable(&mut self, growable: bool) {
        self.index.growable = growable;
        self.values.set_growable(growable);
    }

    fn collect_child_counts(&self, out: &mut Vec<usize>) {
        out.push(self.index.child_count);
        self.values.collect_child_counts(out);
    }

    fn restore_child_counts(&mut self, counts: &mut std::slice::Iter<'_, usize>) {
        if let Some(count) = counts.next() {
            self.index.child_count = *count;
        }
        self.values.restore_child_counts(counts);
    }
}
