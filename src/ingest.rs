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

//! Record ingestion loop
//!
//! An [`Ingester`] owns one converter tree and one reusable [`RowBatch`] for
//! the whole session. It pulls records from a [`RecordSource`], converts them
//! row by row and lends each filled batch to a [`BatchSink`]:
//!
//! ```text
//! AwaitingRecord --record--> ConvertingRow --size < capacity--> AwaitingRecord
//!       |                          |
//!       |                          +--size == capacity--> BatchFull --accept, reset--> AwaitingRecord
//!       +--end of input, final flush--> Drained
//! ```

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use derive_builder::Builder;
use serde_json::{Map, Value};
use snafu::IntoError;
use tracing::{debug, info, warn};

use crate::batch::{RowBatch, DEFAULT_BATCH_CAPACITY};
use crate::coerce::SourceKind;
use crate::convert::{ConversionErrorPolicy, RecordConverter};
use crate::error::{self, Error, ErrorKind};
use crate::schema::TypeDescription;
use crate::sink::BatchSink;
use crate::source::{JsonLinesSource, RecordSource};
use crate::Result;

/// Attribute name hosts use to annotate output with the session row count
pub const RECORD_COUNT_ATTRIBUTE: &str = "record.count";

pub const OUTPUT_EXTENSION: &str = "orc";

/// What to do with a record that cannot become a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordErrorPolicy {
    /// Log it and continue with the next record
    #[default]
    Skip,
    /// End the session with the error
    Abort,
}

/// How list/map child vectors react when a row needs more slots than allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildOverflowPolicy {
    /// Grow child vectors on demand
    #[default]
    Grow,
    /// Keep child vectors at their size and move the row to the next batch.
    /// A row that overflows an empty batch grows the children for that row.
    Defer,
}

#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct IngestOptions {
    pub batch_capacity: usize,
    pub on_parse_error: RecordErrorPolicy,
    /// Applies to records that parse but are not JSON objects
    pub on_invalid_record: RecordErrorPolicy,
    pub on_conversion_error: ConversionErrorPolicy,
    pub child_overflow: ChildOverflowPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            on_parse_error: RecordErrorPolicy::default(),
            on_invalid_record: RecordErrorPolicy::default(),
            on_conversion_error: ConversionErrorPolicy::default(),
            child_overflow: ChildOverflowPolicy::default(),
        }
    }
}

impl IngestOptions {
    pub fn builder() -> IngestOptionsBuilder {
        IngestOptionsBuilder::default()
    }

    /// Set the number of rows per batch
    #[must_use]
    pub fn with_batch_capacity(mut self, batch_capacity: usize) -> Self {
        self.batch_capacity = batch_capacity;
        self
    }

    #[must_use]
    pub fn with_parse_error_policy(mut self, policy: RecordErrorPolicy) -> Self {
        self.on_parse_error = policy;
        self
    }

    #[must_use]
    pub fn with_invalid_record_policy(mut self, policy: RecordErrorPolicy) -> Self {
        self.on_invalid_record = policy;
        self
    }

    #[must_use]
    pub fn with_conversion_error_policy(mut self, policy: ConversionErrorPolicy) -> Self {
        self.on_conversion_error = policy;
        self
    }

    #[must_use]
    pub fn with_child_overflow_policy(mut self, policy: ChildOverflowPolicy) -> Self {
        self.child_overflow = policy;
        self
    }
}

/// Loop states; `Drained` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    AwaitingRecord,
    ConvertingRow,
    BatchFull,
    Drained,
}

/// Totals reported at the end of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Rows accepted by the sink. Rows still in the batch when a session
    /// fails are not counted.
    pub record_count: u64,
    pub batch_count: u64,
    pub skipped_records: u64,
}

#[derive(Debug)]
struct PendingRecord {
    line: u64,
    record: Map<String, Value>,
}

/// Drives one conversion session
#[derive(Debug)]
pub struct Ingester {
    converter: RecordConverter,
    batch: RowBatch,
    options: IngestOptions,
    state: IngestState,
    pending: Option<PendingRecord>,
    summary: IngestSummary,
}

impl Ingester {
    /// Set up a session. Schema and option errors surface here, before any
    /// record is read.
    pub fn new(schema: Arc<TypeDescription>, options: IngestOptions) -> Result<Self> {
        let converter = RecordConverter::with_policy(schema, options.on_conversion_error)?;
        let mut batch = converter.create_row_batch(options.batch_capacity)?;
        if options.child_overflow == ChildOverflowPolicy::Defer {
            batch.set_growable(false);
        }

        Ok(Self {
            converter,
            batch,
            options,
            state: IngestState::AwaitingRecord,
            pending: None,
            summary: IngestSummary::default(),
        })
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    pub fn summary(&self) -> IngestSummary {
        self.summary
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// The batch being filled. Rows not yet handed to a sink live here.
    pub fn batch(&self) -> &RowBatch {
        &self.batch
    }

    /// Run the loop until the source is drained
    pub fn run<S, K>(&mut self, source: &mut S, sink: &mut K) -> Result<IngestSummary>
    where
        S: RecordSource + ?Sized,
        K: BatchSink + ?Sized,
    {
        while self.step(source, sink)? != IngestState::Drained {}
        Ok(self.summary)
    }

    /// Perform one transition and return the new state.
    ///
    /// A fatal error moves the loop to `Drained` without a further flush;
    /// batches already accepted by the sink stand.
    pub fn step<S, K>(&mut self, source: &mut S, sink: &mut K) -> Result<IngestState>
    where
        S: RecordSource + ?Sized,
        K: BatchSink + ?Sized,
    {
        let next = match self.state {
            IngestState::AwaitingRecord => self.await_record(source, sink),
            IngestState::ConvertingRow => self.convert_row(sink),
            IngestState::BatchFull => self.flush(sink).map(|_| IngestState::AwaitingRecord),
            IngestState::Drained => Ok(IngestState::Drained),
        };
        match next {
            Ok(state) => {
                self.state = state;
                Ok(state)
            }
            Err(e) => {
                self.state = IngestState::Drained;
                self.pending = None;
                Err(e)
            }
        }
    }

    fn await_record<S, K>(&mut self, source: &mut S, sink: &mut K) -> Result<IngestState>
    where
        S: RecordSource + ?Sized,
        K: BatchSink + ?Sized,
    {
        let line = source.line();
        match source.next_record() {
            None => {
                if !self.batch.is_empty() {
                    self.flush(sink)?;
                }
                info!(
                    records = self.summary.record_count,
                    batches = self.summary.batch_count,
                    skipped = self.summary.skipped_records,
                    "Ingestion drained"
                );
                Ok(IngestState::Drained)
            }
            Some(Ok(Value::Object(record))) => {
                self.pending = Some(PendingRecord {
                    line: source.line(),
                    record,
                });
                Ok(IngestState::ConvertingRow)
            }
            Some(Ok(other)) => {
                let err = error::InvalidRecordSnafu {
                    line: source.line(),
                    actual: SourceKind::of(&other).name(),
                }
                .build();
                self.reject(err, self.options.on_invalid_record)
            }
            Some(Err(e)) if e.kind() == ErrorKind::Parse => {
                self.reject(e, self.options.on_parse_error)
            }
            Some(Err(e)) => {
                warn!(after_line = line, "Record source failed: {}", e);
                Err(e)
            }
        }
    }

    fn reject(&mut self, err: Error, policy: RecordErrorPolicy) -> Result<IngestState> {
        match policy {
            RecordErrorPolicy::Skip => {
                warn!("Skipping record: {}", err);
                self.summary.skipped_records += 1;
                Ok(IngestState::AwaitingRecord)
            }
            RecordErrorPolicy::Abort => Err(err),
        }
    }

    fn convert_row<K>(&mut self, sink: &mut K) -> Result<IngestState>
    where
        K: BatchSink + ?Sized,
    {
        let Some(pending) = self.pending.take() else {
            return Ok(IngestState::AwaitingRecord);
        };
        let defer = self.options.child_overflow == ChildOverflowPolicy::Defer;
        let snapshot = if defer {
            self.batch.child_counts()
        } else {
            Vec::new()
        };

        match self.converter.write_record(&pending.record, &mut self.batch) {
            Ok(()) => Ok(self.row_committed()),
            Err(e) if defer && e.is_child_overflow() => {
                self.batch.restore_child_counts(&snapshot);
                if self.batch.is_empty() {
                    debug!(line = pending.line, "Growing child vectors for oversized record");
                    self.batch.set_growable(true);
                    let result = self.converter.write_record(&pending.record, &mut self.batch);
                    self.batch.set_growable(false);
                    result?;
                    Ok(self.row_committed())
                } else {
                    debug!(line = pending.line, "Deferring record to the next batch: {}", e);
                    self.pending = Some(pending);
                    self.flush(sink)?;
                    Ok(IngestState::ConvertingRow)
                }
            }
            Err(e) => Err(e),
        }
    }

    fn row_committed(&mut self) -> IngestState {
        if self.batch.is_full() {
            IngestState::BatchFull
        } else {
            IngestState::AwaitingRecord
        }
    }

    fn flush<K>(&mut self, sink: &mut K) -> Result<()>
    where
        K: BatchSink + ?Sized,
    {
        debug!(
            rows = self.batch.size(),
            child_counts = ?self.batch.child_counts(),
            "Handing batch to sink"
        );
        sink.accept(&self.batch).map_err(sink_error)?;
        self.summary.record_count += self.batch.size() as u64;
        self.summary.batch_count += 1;
        self.batch.reset();
        Ok(())
    }
}

fn sink_error(err: Error) -> Error {
    if err.kind() == ErrorKind::Sink {
        err
    } else {
        error::SinkSnafu.into_error(Box::new(err))
    }
}

/// Convert a JSON-lines stream in one call
pub fn ingest_json_lines<R, K>(
    schema: Arc<TypeDescription>,
    options: IngestOptions,
    reader: R,
    sink: &mut K,
) -> Result<IngestSummary>
where
    R: BufRead,
    K: BatchSink + ?Sized,
{
    let mut source = JsonLinesSource::new(reader);
    Ingester::new(schema, options)?.run(&mut source, sink)
}

/// Name of the columnar output for `input`: the final extension is replaced
/// with `.orc`, or `.orc` is appended when there is none.
pub fn output_file_name(input: &str) -> String {
    Path::new(input)
        .with_extension(OUTPUT_EXTENSION)
        .to_string_lossy()
        .into_owned()
}
