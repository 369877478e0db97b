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

use std::io;

use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Root type must be struct, got {}", actual))]
    RootNotStruct {
        actual: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Unknown type category: {}", name))]
    UnknownCategory {
        name: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid schema {}: {}", schema, reason))]
    InvalidSchema {
        schema: String,
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Batch capacity must be greater than zero"))]
    InvalidCapacity {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Batch schema {} does not match converter schema {}", actual, expected))]
    SchemaMismatch {
        expected: String,
        actual: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Batch is full, capacity {}", capacity))]
    BatchFull {
        capacity: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to parse record at line {}", line))]
    ParseRecord {
        line: u64,
        #[snafu(source)]
        error: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Record at line {} is not a JSON object, got {}", line, actual))]
    InvalidRecord {
        line: u64,
        actual: &'static str,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to read input"))]
    ReadInput {
        #[snafu(source)]
        error: io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Expected {}, but got {}", expected, actual))]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid decimal literal: {:?}", literal))]
    InvalidDecimal {
        literal: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid timestamp: {:?}", text))]
    InvalidTimestamp {
        text: String,
        #[snafu(source)]
        error: chrono::ParseError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid hex binary: {:?}", text))]
    InvalidBinary {
        text: String,
        #[snafu(source)]
        error: hex::FromHexError,
        #[snafu(implicit)]
        location: Location,
    },

    // Wraps a conversion failure with the struct field it happened in.
    #[snafu(display("Field {}: {}", field, source))]
    ConvertField {
        field: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("Column vector does not match converter, expected {}", expected))]
    VectorMismatch {
        expected: &'static str,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Child vector overflow: {} slots needed, capacity {}",
        needed,
        capacity
    ))]
    ChildOverflow {
        needed: usize,
        capacity: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Batch sink failed: {}", source))]
    Sink {
        source: Box<dyn std::error::Error + Send + Sync>,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to write output"))]
    WriteOutput {
        #[snafu(source)]
        error: io::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by callers to pick a failure route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    Parse,
    Conversion,
    Sink,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RootNotStruct { .. }
            | Error::UnknownCategory { .. }
            | Error::InvalidSchema { .. }
            | Error::InvalidCapacity { .. }
            | Error::SchemaMismatch { .. } => ErrorKind::Schema,
            Error::ParseRecord { .. } | Error::InvalidRecord { .. } => ErrorKind::Parse,
            Error::TypeMismatch { .. }
            | Error::InvalidDecimal { .. }
            | Error::InvalidTimestamp { .. }
            | Error::InvalidBinary { .. }
            | Error::VectorMismatch { .. }
            | Error::BatchFull { .. }
            | Error::ChildOverflow { .. } => ErrorKind::Conversion,
            Error::ConvertField { source, .. } => source.kind(),
            Error::Sink { .. } | Error::WriteOutput { .. } => ErrorKind::Sink,
            Error::ReadInput { .. } => ErrorKind::Io,
        }
    }

    /// True for a cell-level value that cannot be stored in its column.
    /// Only these are eligible for the null-cell policy.
    pub fn is_cell_error(&self) -> bool {
        match self {
            Error::TypeMismatch { .. }
            | Error::InvalidDecimal { .. }
            | Error::InvalidTimestamp { .. }
            | Error::InvalidBinary { .. } => true,
            Error::ConvertField { source, .. } => source.is_cell_error(),
            _ => false,
        }
    }

    pub(crate) fn is_child_overflow(&self) -> bool {
        match self {
            Error::ChildOverflow { .. } => true,
            Error::ConvertField { source, .. } => source.is_child_overflow(),
            _ => false,
        }
    }
}
