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

//! Upstream record sources for the ingestion loop

use std::io::BufRead;

use serde_json::Value;
use snafu::ResultExt;

use crate::{error, Result};

/// Pull-based supplier of parsed records
pub trait RecordSource {
    /// The next record, `None` once the input is exhausted.
    ///
    /// A `Parse` kind error affects only that record and the source can be
    /// polled again. Any other error ends the input.
    fn next_record(&mut self) -> Option<Result<Value>>;

    /// 1-based position of the record most recently returned
    fn line(&self) -> u64;
}

/// Reads one JSON document per line. Blank lines are not records, and a line
/// that is not valid UTF-8 is a parse error for that line only.
#[derive(Debug)]
pub struct JsonLinesSource<R> {
    reader: R,
    buf: Vec<u8>,
    line: u64,
    finished: bool,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line: 0,
            finished: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: BufRead> RecordSource for JsonLinesSource<R> {
    fn next_record(&mut self) -> Option<Result<Value>> {
        while !self.finished {
            self.buf.clear();
            match self
                .reader
                .read_until(b'\n', &mut self.buf)
                .context(error::ReadInputSnafu)
            {
                Ok(0) => self.finished = true,
                Ok(_) => {
                    self.line += 1;
                    let text = self.buf.trim_ascii();
                    if text.is_empty() {
                        continue;
                    }
                    let line = self.line;
                    return Some(
                        serde_json::from_slice(text).context(error::ParseRecordSnafu { line }),
                    );
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }

    fn line(&self) -> u64 {
        self.line
    }
}

/// Adapts an iterator of already parsed values
#[derive(Debug, Clone)]
pub struct ValueSource<I> {
    values: I,
    line: u64,
}

impl<I: Iterator<Item = Value>> ValueSource<I> {
    pub fn new<T>(values: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            values: values.into_iter(),
            line: 0,
        }
    }
}

impl<I: Iterator<Item = Value>> RecordSource for ValueSource<I> {
    fn next_record(&mut self) -> Option<Result<Value>> {
        let value = self.values.next()?;
        self.line += 1;
        Some(Ok(value))
    }

    fn line(&self) -> u64 {
        self.line
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, BufReader, Cursor, Read};

    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_lines_with_blank_and_malformed() {
        let input = "{\"a\":1}\n\n   \n{not json}\n{\"a\":2}";
        let mut source = JsonLinesSource::new(Cursor::new(input));

        assert_eq!(source.next_record().unwrap().unwrap(), json!({"a": 1}));
        assert_eq!(source.line(), 1);

        let err = source.next_record().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(matches!(err, crate::Error::ParseRecord { line: 4, .. }));

        assert_eq!(source.next_record().unwrap().unwrap(), json!({"a": 2}));
        assert_eq!(source.line(), 5);
        assert!(source.next_record().is_none());
        assert!(source.next_record().is_none());
    }

    #[test]
    fn test_invalid_utf8_line_is_parse_error() {
        let mut input = b"{\"id\":\"a\"}\n{\"id\":\"".to_vec();
        input.extend_from_slice(&[0xff, 0xfe]);
        input.extend_from_slice(b"\"}\n{\"id\":\"b\"}\n");
        let mut source = JsonLinesSource::new(Cursor::new(input));

        assert_eq!(source.next_record().unwrap().unwrap(), json!({"id": "a"}));
        let err = source.next_record().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(matches!(err, crate::Error::ParseRecord { line: 2, .. }));
        assert_eq!(source.next_record().unwrap().unwrap(), json!({"id": "b"}));
        assert!(source.next_record().is_none());
    }

    #[test]
    fn test_crlf_lines() {
        let mut source = JsonLinesSource::new(Cursor::new("{\"a\":1}\r\n{\"a\":2}\r\n"));
        assert_eq!(source.next_record().unwrap().unwrap(), json!({"a": 1}));
        assert_eq!(source.next_record().unwrap().unwrap(), json!({"a": 2}));
        assert!(source.next_record().is_none());
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk gone"))
        }
    }

    #[test]
    fn test_io_error_ends_input() {
        let mut source = JsonLinesSource::new(BufReader::new(BrokenReader));
        let err = source.next_record().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(source.next_record().is_none());
    }

    #[test]
    fn test_value_source_counts() {
        let mut source = ValueSource::new(vec![json!({"a": 1}), json!(null)]);
        assert_eq!(source.next_record().unwrap().unwrap(), json!({"a": 1}));
        assert_eq!(source.next_record().unwrap().unwrap(), Value::Null);
        assert_eq!(source.line(), 2);
        assert!(source.next_record().is_none());
    }
}
