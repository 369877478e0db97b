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

//! Downstream consumers of filled batches

use std::io::{self, Write};

use snafu::ResultExt;

use crate::batch::RowBatch;
use crate::{error, Result};

/// Receives each filled batch, borrowed for the duration of one call.
///
/// The loop only calls `accept` with `0 < batch.size() <= batch.capacity()`
/// and resets the batch after it returns. An error ends the session.
pub trait BatchSink {
    fn accept(&mut self, batch: &RowBatch) -> Result<()>;
}

impl<F> BatchSink for F
where
    F: FnMut(&RowBatch) -> Result<()>,
{
    fn accept(&mut self, batch: &RowBatch) -> Result<()> {
        self(batch)
    }
}

/// Writes every accepted row back out as one JSON line
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: W,
    rows_written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            rows_written: 0,
        }
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> BatchSink for JsonLinesSink<W> {
    fn accept(&mut self, batch: &RowBatch) -> Result<()> {
        for row in batch.rows() {
            serde_json::to_writer(&mut self.writer, &row)
                .map_err(io::Error::from)
                .context(error::WriteOutputSnafu)?;
            self.writer
                .write_all(b"\n")
                .context(error::WriteOutputSnafu)?;
            self.rows_written += 1;
        }
        self.writer.flush().context(error::WriteOutputSnafu)
    }
}
