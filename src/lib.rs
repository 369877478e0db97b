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

//! Converts JSON-lines records into fixed-capacity columnar batches laid out
//! by a nested struct schema.
//!
//! ```no_run
//! use std::io::BufReader;
//! use std::sync::Arc;
//!
//! use json_columnar_ingester::{
//!     ingest_json_lines, IngestOptions, JsonLinesSink, TypeDescription,
//! };
//!
//! # fn main() -> json_columnar_ingester::Result<()> {
//! let schema = TypeDescription::create_struct()
//!     .add_field("id", TypeDescription::create_string())
//!     .add_field("tags", TypeDescription::create_list(TypeDescription::create_string()));
//! let input = BufReader::new(std::io::stdin());
//! let mut sink = JsonLinesSink::new(std::io::stdout());
//!
//! let summary = ingest_json_lines(Arc::new(schema), IngestOptions::default(), input, &mut sink)?;
//! eprintln!("converted {} records", summary.record_count);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod coerce;
pub mod convert;
pub mod error;
pub mod ingest;
pub mod schema;
pub mod sink;
pub mod source;
pub mod vector;

pub use self::batch::{RowBatch, DEFAULT_BATCH_CAPACITY};
pub use self::convert::{ConversionErrorPolicy, Converter, RecordConverter};
pub use self::error::{Error, ErrorKind, Result};
pub use self::ingest::{
    ingest_json_lines, output_file_name, ChildOverflowPolicy, IngestOptions,
    IngestOptionsBuilder, IngestState, IngestSummary, Ingester, RecordErrorPolicy,
    RECORD_COUNT_ATTRIBUTE,
};
pub use self::schema::{TypeCategory, TypeDescription};
pub use self::sink::{BatchSink, JsonLinesSink};
pub use self::source::{JsonLinesSource, RecordSource, ValueSource};
pub use self::vector::{ColumnVector, ColumnVectorOps};
