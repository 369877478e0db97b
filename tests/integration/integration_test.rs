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

// End-to-end tests driving JSON-lines text through the ingestion loop

use std::io::Cursor;
use std::sync::Arc;

use derive_new::new;
use json_columnar_ingester::error::{InvalidCapacitySnafu, WriteOutputSnafu};
use json_columnar_ingester::{
    ingest_json_lines, BatchSink, ChildOverflowPolicy, ColumnVector, ColumnVectorOps,
    ConversionErrorPolicy, Error, ErrorKind, IngestOptions, Ingester, JsonLinesSink, Result,
    RowBatch, TypeDescription, ValueSource,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use snafu::ResultExt;

/// Keeps a copy of every accepted batch
#[derive(new)]
struct CollectingSink {
    #[new(default)]
    batches: Vec<RowBatch>,
}

impl CollectingSink {
    fn sizes(&self) -> Vec<usize> {
        self.batches.iter().map(RowBatch::size).collect()
    }

    fn rows(&self) -> Vec<Value> {
        self.batches.iter().flat_map(RowBatch::rows).collect()
    }
}

impl BatchSink for CollectingSink {
    fn accept(&mut self, batch: &RowBatch) -> Result<()> {
        assert!(batch.size() > 0 && batch.size() <= batch.capacity());
        self.batches.push(batch.clone());
        Ok(())
    }
}

/// Fails on the `fail_on`-th call (1-based)
#[derive(new)]
struct FailingSink {
    fail_on: usize,
    #[new(default)]
    calls: usize,
    #[new(default)]
    accepted_rows: usize,
}

impl BatchSink for FailingSink {
    fn accept(&mut self, batch: &RowBatch) -> Result<()> {
        self.calls += 1;
        if self.calls == self.fail_on {
            return Err(std::io::Error::other("disk full")).context(WriteOutputSnafu);
        }
        self.accepted_rows += batch.size();
        Ok(())
    }
}

fn id_schema() -> Arc<TypeDescription> {
    Arc::new(TypeDescription::create_struct().add_field("id", TypeDescription::create_string()))
}

fn lines(records: &[Value]) -> String {
    records
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn options(capacity: usize) -> IngestOptions {
    IngestOptions::default().with_batch_capacity(capacity)
}

#[test]
fn test_single_string_record() -> Result<()> {
    let mut sink = CollectingSink::new();
    let summary = ingest_json_lines(
        id_schema(),
        IngestOptions::default(),
        Cursor::new(r#"{"id":"hello"}"#),
        &mut sink,
    )?;

    assert_eq!(summary.record_count, 1);
    assert_eq!(sink.batches.len(), 1);
    let batch = &sink.batches[0];
    assert_eq!(batch.size(), 1);
    let ids = batch.column(0).and_then(ColumnVector::as_bytes).unwrap();
    assert_eq!(ids.bytes(0), Some(&b"hello"[..]));
    Ok(())
}

#[test]
fn test_nested_struct_record() -> Result<()> {
    let schema = TypeDescription::create_struct()
        .add_field(
            "entry",
            TypeDescription::create_struct()
                .add_field("id", TypeDescription::create_int())
                .add_field("val", TypeDescription::create_string()),
        )
        .add_field("str", TypeDescription::create_string());
    assert_eq!(
        schema.to_string(),
        "struct<entry:struct<id:int,val:string>,str:string>"
    );

    let mut sink = CollectingSink::new();
    ingest_json_lines(
        Arc::new(schema),
        IngestOptions::default(),
        Cursor::new(r#"{"entry":{"id":10,"val":"world"},"str":"value"}"#),
        &mut sink,
    )?;

    let batch = &sink.batches[0];
    let entry = batch
        .column_by_name("entry")
        .and_then(ColumnVector::as_struct)
        .unwrap();
    let id = entry.field("id").and_then(ColumnVector::as_long).unwrap();
    let val = entry.field("val").and_then(ColumnVector::as_bytes).unwrap();
    let s = batch
        .column_by_name("str")
        .and_then(ColumnVector::as_bytes)
        .unwrap();
    assert_eq!(id.value(0), Some(10));
    assert_eq!(val.str(0), Some("world"));
    assert_eq!(s.str(0), Some("value"));
    Ok(())
}

#[test]
fn test_batch_splitting() -> Result<()> {
    for (n, capacity, expected) in [
        (10, 3, vec![3, 3, 3, 1]),
        (9, 3, vec![3, 3, 3]),
        (2, 5, vec![2]),
        (0, 4, vec![]),
    ] {
        let records: Vec<Value> = (0..n).map(|i| json!({ "id": i.to_string() })).collect();
        let mut sink = CollectingSink::new();
        let summary = ingest_json_lines(
            id_schema(),
            options(capacity),
            Cursor::new(lines(&records)),
            &mut sink,
        )?;

        assert_eq!(sink.sizes(), expected, "n={n} capacity={capacity}");
        assert_eq!(summary.batch_count, expected.len() as u64);
        assert_eq!(summary.record_count, n as u64);
        // rows arrive in input order
        assert_eq!(sink.rows(), records);
    }
    Ok(())
}

#[test]
fn test_malformed_line_is_skipped() -> Result<()> {
    let input = "{\"id\":\"a\"}\n{\"id\": oops\n{\"id\":\"b\"}\n";
    let mut sink = CollectingSink::new();
    let summary = ingest_json_lines(
        id_schema(),
        IngestOptions::default(),
        Cursor::new(input),
        &mut sink,
    )?;

    assert_eq!(summary.record_count, 2);
    assert_eq!(summary.skipped_records, 1);
    assert_eq!(sink.rows(), vec![json!({"id": "a"}), json!({"id": "b"})]);
    Ok(())
}

#[test]
fn test_invalid_utf8_line_is_skipped() -> Result<()> {
    let mut input = b"{\"id\":\"a\"}\n{\"id\":\"".to_vec();
    input.extend_from_slice(&[0xff, 0xfe]);
    input.extend_from_slice(b"\"}\n{\"id\":\"b\"}\n");

    let mut sink = CollectingSink::new();
    let summary = ingest_json_lines(
        id_schema(),
        IngestOptions::default(),
        Cursor::new(input),
        &mut sink,
    )?;

    assert_eq!(summary.record_count, 2);
    assert_eq!(summary.skipped_records, 1);
    assert_eq!(sink.rows(), vec![json!({"id": "a"}), json!({"id": "b"})]);
    Ok(())
}

#[test]
fn test_converted_rows_match_accepted_rows() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut input = Vec::new();
    let mut valid = 0u64;
    for i in 0..500 {
        match rng.random_range(0..10) {
            0 => input.push("not json".to_string()),
            1 => input.push("[1,2,3]".to_string()),
            2 => input.push(String::new()),
            _ => {
                valid += 1;
                input.push(json!({ "id": format!("r{i}") }).to_string());
            }
        }
    }

    let mut sink = CollectingSink::new();
    let summary = ingest_json_lines(
        id_schema(),
        options(7),
        Cursor::new(input.join("\n")),
        &mut sink,
    )?;

    let accepted: usize = sink.sizes().iter().sum();
    assert_eq!(accepted as u64, summary.record_count);
    assert_eq!(summary.record_count, valid);
    Ok(())
}

fn assert_child_index(
    batch: &RowBatch,
    offset: impl Fn(usize) -> usize,
    length: impl Fn(usize) -> usize,
    child_count: usize,
) {
    let mut total = 0;
    for row in 0..batch.size() {
        assert_eq!(offset(row), total, "row {row}");
        total += length(row);
    }
    assert_eq!(child_count, total);
}

#[test]
fn test_list_and_map_offsets() -> Result<()> {
    let schema = Arc::new(
        TypeDescription::create_struct()
            .add_field(
                "tags",
                TypeDescription::create_list(TypeDescription::create_long()),
            )
            .add_field(
                "meta",
                TypeDescription::create_map(
                    TypeDescription::create_string(),
                    TypeDescription::create_string(),
                ),
            ),
    );
    let mut rng = StdRng::seed_from_u64(7);
    let records: Vec<Value> = (0..200)
        .map(|_| {
            let tags: Vec<i64> = (0..rng.random_range(0..6))
                .map(|_| rng.random_range(0..100))
                .collect();
            let meta: serde_json::Map<String, Value> = (0..rng.random_range(0..4))
                .map(|k| (format!("k{k}"), json!(format!("v{k}"))))
                .collect();
            json!({ "tags": tags, "meta": meta })
        })
        .collect();

    let mut checked = 0;
    let mut sink = |batch: &RowBatch| -> Result<()> {
        let tags = batch.column(0).and_then(ColumnVector::as_list).unwrap();
        assert_child_index(batch, |r| tags.offset(r), |r| tags.length(r), tags.child_count());
        let meta = batch.column(1).and_then(ColumnVector::as_map).unwrap();
        assert_child_index(batch, |r| meta.offset(r), |r| meta.length(r), meta.child_count());
        checked += batch.size();
        Ok(())
    };
    let mut ingester = Ingester::new(schema, options(16))?;
    let summary = ingester.run(&mut ValueSource::new(records), &mut sink)?;

    assert_eq!(checked, 200);
    assert_eq!(summary.batch_count, 13);
    Ok(())
}

#[test]
fn test_thousand_two_entry_maps() -> Result<()> {
    let schema = Arc::new(TypeDescription::create_struct().add_field(
        "meta",
        TypeDescription::create_map(
            TypeDescription::create_string(),
            TypeDescription::create_int(),
        ),
    ));
    let input: Vec<Value> = (0..1000)
        .map(|i| json!({ "meta": { "a": i, "b": i * 2 } }))
        .collect();

    let mut sink = CollectingSink::new();
    ingest_json_lines(schema, options(1024), Cursor::new(lines(&input)), &mut sink)?;

    assert_eq!(sink.batches.len(), 1);
    let map = sink.batches[0]
        .column(0)
        .and_then(ColumnVector::as_map)
        .unwrap();
    assert_eq!(map.child_count(), 2000);
    let values = map.values().as_long().unwrap();
    for row in [0, 1, 500, 999] {
        let offset = map.offset(row);
        assert_eq!(map.length(row), 2);
        assert_eq!(map.keys().str(offset), Some("a"));
        assert_eq!(map.keys().str(offset + 1), Some("b"));
        assert_eq!(values.value(offset), Some(row as i64));
        assert_eq!(values.value(offset + 1), Some(row as i64 * 2));
    }
    Ok(())
}

#[test]
fn test_list_longer_than_batch() -> Result<()> {
    let schema = Arc::new(TypeDescription::create_struct().add_field(
        "items",
        TypeDescription::create_list(TypeDescription::create_string()),
    ));
    let big: Vec<String> = (0..50).map(|i| format!("item{i}")).collect();
    let records = vec![
        json!({ "items": ["x"] }),
        json!({ "items": big }),
        json!({ "items": ["y", "z"] }),
    ];

    for policy in [ChildOverflowPolicy::Grow, ChildOverflowPolicy::Defer] {
        let mut sink = CollectingSink::new();
        let summary = ingest_json_lines(
            schema.clone(),
            options(4).with_child_overflow_policy(policy),
            Cursor::new(lines(&records)),
            &mut sink,
        )?;

        assert_eq!(summary.record_count, 3, "{policy:?}");
        // nothing dropped or duplicated
        assert_eq!(sink.rows(), records, "{policy:?}");
        match policy {
            ChildOverflowPolicy::Grow => assert_eq!(sink.sizes(), vec![3]),
            // the oversized row moves to a batch of its own, then grows it
            ChildOverflowPolicy::Defer => assert_eq!(sink.sizes(), vec![1, 1, 1]),
        }
    }
    Ok(())
}

#[test]
fn test_sink_failure_stops_session() {
    let records: Vec<Value> = (0..10).map(|i| json!({ "id": i.to_string() })).collect();
    let mut sink = FailingSink::new(2);
    let err = ingest_json_lines(id_schema(), options(3), Cursor::new(lines(&records)), &mut sink)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Sink);
    assert!(matches!(err, Error::WriteOutput { .. }));
    assert_eq!(sink.calls, 2);
    assert_eq!(sink.accepted_rows, 3);
}

#[test]
fn test_non_sink_error_from_sink_is_wrapped() {
    let mut sink = |_: &RowBatch| -> Result<()> { InvalidCapacitySnafu.fail() };
    let err = ingest_json_lines(
        id_schema(),
        IngestOptions::default(),
        Cursor::new(r#"{"id":"a"}"#),
        &mut sink,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Sink);
    assert!(err.to_string().starts_with("Batch sink failed"));
}

#[test]
fn test_conversion_error_policies() -> Result<()> {
    let schema = Arc::new(
        TypeDescription::create_struct()
            .add_field("n", TypeDescription::create_int())
            .add_field("at", TypeDescription::create_timestamp()),
    );
    let input = concat!(
        "{\"n\": 1, \"at\": \"2020-01-01T00:00:00Z\"}\n",
        "{\"n\": \"2\", \"at\": \"not a time\"}\n",
    );

    let err = ingest_json_lines(
        schema.clone(),
        IngestOptions::default(),
        Cursor::new(input),
        &mut CollectingSink::new(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
    assert_eq!(err.to_string(), "Field n: Expected int, but got string");

    let mut sink = CollectingSink::new();
    ingest_json_lines(
        schema,
        IngestOptions::default().with_conversion_error_policy(ConversionErrorPolicy::NullCell),
        Cursor::new(input),
        &mut sink,
    )?;
    assert_eq!(
        sink.rows(),
        vec![
            json!({"n": 1, "at": "2020-01-01 00:00:00"}),
            json!({"n": null, "at": null}),
        ]
    );
    Ok(())
}

#[test]
fn test_widening_through_text() -> Result<()> {
    let schema = Arc::new(
        TypeDescription::create_struct()
            .add_field("small", TypeDescription::create_byte())
            .add_field("whole", TypeDescription::create_long())
            .add_field("ratio", TypeDescription::create_float())
            .add_field("flag", TypeDescription::create_boolean())
            .add_field(
                "amount",
                TypeDescription::create_decimal()
                    .with_precision(10)
                    .with_scale(3),
            )
            .add_field("blob", TypeDescription::create_binary()),
    );
    let input = r#"{"small": 130, "whole": 9.99, "ratio": 2, "flag": false, "amount": "-1.2345", "blob": "00FF"}"#;

    let mut sink = CollectingSink::new();
    ingest_json_lines(schema, IngestOptions::default(), Cursor::new(input), &mut sink)?;

    let batch = &sink.batches[0];
    assert_eq!(batch.column(0).and_then(ColumnVector::as_long).unwrap().value(0), Some(-126));
    assert_eq!(batch.column(1).and_then(ColumnVector::as_long).unwrap().value(0), Some(9));
    assert_eq!(batch.column(2).and_then(ColumnVector::as_double).unwrap().value(0), Some(2.0));
    assert_eq!(batch.column(3).and_then(ColumnVector::as_long).unwrap().value(0), Some(0));
    assert_eq!(batch.column(4).and_then(ColumnVector::as_decimal).unwrap().value(0), Some(-1235));
    let blob = batch.column(5).and_then(ColumnVector::as_bytes).unwrap();
    assert!(blob.is_binary());
    assert_eq!(blob.bytes(0), Some(&[0x00, 0xff][..]));
    Ok(())
}

#[test]
fn test_missing_and_null_fields() -> Result<()> {
    let schema = Arc::new(
        TypeDescription::create_struct()
            .add_field("id", TypeDescription::create_string())
            .add_field(
                "tags",
                TypeDescription::create_list(TypeDescription::create_string()),
            ),
    );
    let input = "{\"id\":\"a\"}\n{\"tags\":null}\n{\"id\":\"c\",\"tags\":[\"t\"]}";

    let mut sink = CollectingSink::new();
    ingest_json_lines(schema, IngestOptions::default(), Cursor::new(input), &mut sink)?;

    let batch = &sink.batches[0];
    let tags = batch.column(1).unwrap();
    assert!(!tags.no_nulls());
    assert!(tags.is_null(0) && tags.is_null(1) && !tags.is_null(2));
    assert!(batch.column(0).unwrap().is_null(1));
    assert_eq!(tags.as_list().unwrap().child_count(), 1);
    Ok(())
}

#[test]
fn test_json_lines_sink_output() -> Result<()> {
    let input = "{\"id\":\"a\",\"extra\":1}\n{\"id\":\"b\"}\n";
    let mut sink = JsonLinesSink::new(Vec::new());
    let summary = ingest_json_lines(id_schema(), options(1), Cursor::new(input), &mut sink)?;

    assert_eq!(summary.batch_count, 2);
    assert_eq!(sink.rows_written(), 2);
    let text = String::from_utf8(sink.into_inner()).unwrap();
    assert_eq!(text, "{\"id\":\"a\"}\n{\"id\":\"b\"}\n");
    Ok(())
}
