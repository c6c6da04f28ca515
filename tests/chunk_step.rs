use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use rust_batch_pipeline::mapper::{DeserializeMapper, RecordMapper, SchemaMapper};
use rust_batch_pipeline::reader::{DialectConfig, RecordReader, RecordReaderBuilder, Resource};
use rust_batch_pipeline::step::{
    ChunkStepBuilder, InMemoryWriter, ItemWriter, StepContext, StepEvent, StepObserver, StepOptions,
    TransformFailurePolicy,
};
use rust_batch_pipeline::types::{DataType, Field, Record, Schema, Value};
use rust_batch_pipeline::{BoxError, PipelineError, Severity};

fn tmp_file(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("rust-batch-pipeline-{name}-{nanos}.csv"))
}

fn people_reader(input: &str) -> RecordReader {
    RecordReaderBuilder::new()
        .resource(Resource::from_bytes(input))
        .header(["person_id", "lastname", "firstname"])
        .build()
        .unwrap()
}

fn numbered_rows(n: usize) -> String {
    (1..=n).map(|i| format!("{i},Last{i},First{i}\r\n")).collect()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct Person {
    person_id: i32,
    lastname: String,
    firstname: String,
}

#[test]
fn two_rows_flush_once_with_default_chunk_size() {
    let sink = InMemoryWriter::<Person>::new();
    let mut step = ChunkStepBuilder::new("people")
        .reader(people_reader("1,Doe,John\r\n2,Smith,Jane\r\n"))
        .mapper(DeserializeMapper::<Person>::new())
        .writer(sink.clone())
        .options(StepOptions::default())
        .build()
        .unwrap();

    let report = step.run().unwrap();
    assert_eq!(report.rows_read, 2);
    assert_eq!(report.items_written, 2);
    assert_eq!(report.chunks_flushed, 1);
    assert_eq!(report.lines_read, 2);

    assert_eq!(sink.flush_count(), 1);
    assert_eq!(
        sink.items()[0],
        Person {
            person_id: 1,
            lastname: "Doe".to_string(),
            firstname: "John".to_string(),
        }
    );
}

#[test]
fn two_rows_map_to_string_records() {
    let sink = InMemoryWriter::<Record>::new();
    let mut step = ChunkStepBuilder::new("people")
        .reader(people_reader("1,Doe,John\r\n2,Smith,Jane\r\n"))
        .mapper(RecordMapper)
        .writer(sink.clone())
        .build()
        .unwrap();

    let report = step.run().unwrap();
    assert_eq!(report.rows_read, 2);
    assert_eq!(report.items_written, 2);
    assert_eq!(sink.flush_count(), 1);

    let utf8 = |s: &str| Value::Utf8(s.to_string());
    let chunks = sink.chunks();
    assert_eq!(chunks[0].len(), 2);
    let (first, second) = (&chunks[0][0], &chunks[0][1]);
    assert_eq!(first.get("person_id"), Some(&utf8("1")));
    assert_eq!(first.get("lastname"), Some(&utf8("Doe")));
    assert_eq!(first.get("firstname"), Some(&utf8("John")));
    assert_eq!(second.get("person_id"), Some(&utf8("2")));
    assert_eq!(second.get("lastname"), Some(&utf8("Smith")));
    assert_eq!(second.get("firstname"), Some(&utf8("Jane")));
}

#[test]
fn flush_count_is_ceiling_of_rows_over_chunk_size() {
    for (rows, chunk_size) in [(0usize, 3usize), (1, 3), (3, 3), (7, 3), (10, 1), (5, 10)] {
        let sink = InMemoryWriter::<Record>::new();
        let mut step = ChunkStepBuilder::new("count")
            .reader(people_reader(&numbered_rows(rows)))
            .mapper(RecordMapper)
            .writer(sink.clone())
            .chunk_size(chunk_size)
            .build()
            .unwrap();

        let report = step.run().unwrap();
        let expected_flushes = rows.div_ceil(chunk_size);
        assert_eq!(sink.flush_count(), expected_flushes, "rows={rows} chunk={chunk_size}");
        assert_eq!(report.chunks_flushed, expected_flushes);
        assert_eq!(report.items_written, rows);

        // Every chunk is full except possibly the last, which is non-empty.
        let chunks = sink.chunks();
        for (i, chunk) in chunks.iter().enumerate() {
            if i + 1 < chunks.len() {
                assert_eq!(chunk.len(), chunk_size);
            } else {
                assert!(!chunk.is_empty() && chunk.len() <= chunk_size);
            }
        }
    }
}

#[test]
fn items_reach_the_sink_in_file_order() {
    let sink = InMemoryWriter::<Record>::new();
    let mut step = ChunkStepBuilder::new("order")
        .reader(people_reader(&numbered_rows(7)))
        .mapper(RecordMapper)
        .writer(sink.clone())
        .chunk_size(2)
        .build()
        .unwrap();
    step.run().unwrap();

    let ids: Vec<String> = sink
        .items()
        .iter()
        .map(|r| r.get("person_id").and_then(Value::as_str).unwrap().to_string())
        .collect();
    assert_eq!(ids, (1..=7).map(|i| i.to_string()).collect::<Vec<_>>());
}

#[test]
fn malformed_first_row_aborts_without_flushing() {
    let sink = InMemoryWriter::<Record>::new();
    let mut step = ChunkStepBuilder::new("malformed")
        .reader(people_reader("1,Doe\r\n"))
        .mapper(RecordMapper)
        .writer(sink.clone())
        .build()
        .unwrap();

    let failure = step.run().unwrap_err();
    match failure.error() {
        PipelineError::Schema {
            line,
            key_fragment,
            column_count,
            expected,
        } => {
            assert_eq!(*line, 1);
            assert_eq!(key_fragment, "1");
            assert_eq!(*column_count, 2);
            assert_eq!(*expected, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(sink.flush_count(), 0);
    assert_eq!(failure.report.items_written, 0);
}

#[test]
fn abort_discards_partial_chunk_but_keeps_flushed_ones() {
    let mut input = numbered_rows(5);
    input.push_str("6,Short\r\n");
    input.push_str(&numbered_rows(2));

    let sink = InMemoryWriter::<Record>::new();
    let mut step = ChunkStepBuilder::new("partial")
        .reader(people_reader(&input))
        .mapper(RecordMapper)
        .writer(sink.clone())
        .chunk_size(2)
        .build()
        .unwrap();

    let failure = step.run().unwrap_err();
    assert_eq!(failure.error().line(), Some(6));
    // Rows 1..=4 were committed in two chunks; row 5 sat in the unflushed chunk.
    assert_eq!(sink.flush_count(), 2);
    assert_eq!(sink.item_count(), 4);
    assert_eq!(failure.report.rows_read, 5);
    assert_eq!(failure.report.items_written, 4);
}

struct FailOnChunk {
    fail_at: usize,
    seen: usize,
    committed: Arc<Mutex<Vec<Record>>>,
}

impl ItemWriter<Record> for FailOnChunk {
    fn write(&mut self, items: &[Record]) -> Result<(), BoxError> {
        let idx = self.seen;
        self.seen += 1;
        if idx == self.fail_at {
            return Err("disk full".into());
        }
        self.committed.lock().unwrap().extend_from_slice(items);
        Ok(())
    }
}

#[test]
fn sink_failure_keeps_prior_chunks_and_reports_chunk_index() {
    let committed = Arc::new(Mutex::new(Vec::new()));
    let writer = FailOnChunk {
        fail_at: 1,
        seen: 0,
        committed: Arc::clone(&committed),
    };
    let mut step = ChunkStepBuilder::new("sink")
        .reader(people_reader(&numbered_rows(6)))
        .mapper(RecordMapper)
        .writer(writer)
        .chunk_size(2)
        .build()
        .unwrap();

    let failure = step.run().unwrap_err();
    match failure.error() {
        PipelineError::Sink { chunk, items, source } => {
            assert_eq!(*chunk, 1);
            assert_eq!(*items, 2);
            assert_eq!(source.to_string(), "disk full");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(committed.lock().unwrap().len(), 2);
    assert_eq!(failure.report.chunks_flushed, 1);
    assert!(failure.to_string().contains("step aborted"));
}

#[test]
fn missing_resource_non_strict_completes_with_no_flushes() {
    let reader = RecordReaderBuilder::new()
        .path(tmp_file("absent"))
        .header(["a", "b"])
        .dialect(DialectConfig::default().with_strict(false))
        .build()
        .unwrap();
    let sink = InMemoryWriter::<Record>::new();
    let mut step = ChunkStepBuilder::new("absent")
        .reader(reader)
        .mapper(RecordMapper)
        .writer(sink.clone())
        .build()
        .unwrap();

    let report = step.run().unwrap();
    assert_eq!(report.rows_read, 0);
    assert_eq!(sink.flush_count(), 0);
}

#[test]
fn transform_failure_aborts_by_default() {
    let sink = InMemoryWriter::<Person>::new();
    let reject_smith = |p: Person| -> Result<Person, BoxError> {
        if p.lastname == "Smith" {
            Err(format!("person {} is blocked", p.person_id).into())
        } else {
            Ok(p)
        }
    };
    let mut step = ChunkStepBuilder::new("transform")
        .reader(people_reader("1,Doe,John\r\n2,Smith,Jane\r\n3,Roe,Rick\r\n"))
        .mapper(DeserializeMapper::<Person>::new())
        .processor(reject_smith)
        .writer(sink.clone())
        .build()
        .unwrap();

    let failure = step.run().unwrap_err();
    assert!(matches!(failure.error(), PipelineError::Transform { line: 2, .. }));
    assert!(failure.to_string().contains("person 2 is blocked"));
    assert_eq!(sink.flush_count(), 0);
}

#[test]
fn processor_can_change_item_type() {
    let sink = InMemoryWriter::<String>::new();
    let full_name =
        |p: Person| -> Result<String, BoxError> { Ok(format!("{} {}", p.firstname, p.lastname)) };
    let mut step = ChunkStepBuilder::new("names")
        .reader(people_reader("1,Doe,John\r\n2,Smith,Jane\r\n"))
        .mapper(DeserializeMapper::<Person>::new())
        .processor(full_name)
        .writer(sink.clone())
        .transform_failure(TransformFailurePolicy::Skip { limit: None })
        .build()
        .unwrap();

    step.run().unwrap();
    assert_eq!(sink.items(), vec!["John Doe".to_string(), "Jane Smith".to_string()]);
}

#[test]
fn schema_mapper_typed_records_from_fixture() {
    let reader = RecordReaderBuilder::new()
        .path("tests/fixtures/people.csv")
        .header(["person_id", "lastname", "firstname"])
        .dialect(DialectConfig::default().with_lines_to_skip(1))
        .build()
        .unwrap();
    let schema = Schema::new(vec![
        Field::new("person_id", DataType::Int64),
        Field::new("lastname", DataType::Utf8),
    ]);
    let sink = InMemoryWriter::<Record>::new();
    let mut step = ChunkStepBuilder::new("typed")
        .reader(reader)
        .mapper(SchemaMapper::new(schema))
        .writer(sink.clone())
        .chunk_size(2)
        .build()
        .unwrap();

    let report = step.run().unwrap();
    assert_eq!(report.rows_read, 3);
    assert_eq!(report.lines_read, 4);
    assert_eq!(sink.flush_count(), 2);
    let last = &sink.items()[2];
    assert_eq!(last.values(), &[Value::Int64(3), Value::Utf8("Lovelace".to_string())]);
}

#[test]
fn parse_error_in_mapper_aborts_run() {
    let sink = InMemoryWriter::<Person>::new();
    let mut step = ChunkStepBuilder::new("parse")
        .reader(people_reader("1,Doe,John\r\nx,Smith,Jane\r\n"))
        .mapper(DeserializeMapper::<Person>::new())
        .writer(sink.clone())
        .build()
        .unwrap();

    let failure = step.run().unwrap_err();
    match failure.error() {
        PipelineError::ParseError { row, column, raw, .. } => {
            assert_eq!(*row, 2);
            assert_eq!(column, "person_id");
            assert_eq!(raw, "x");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(sink.flush_count(), 0);
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    failures: Mutex<Vec<Severity>>,
    alerts: Mutex<Vec<Severity>>,
}

impl StepObserver for Recorder {
    fn on_event(&self, _ctx: &StepContext, event: &StepEvent) {
        let label = match event {
            StepEvent::RunStarted => "started".to_string(),
            StepEvent::ChunkFlushed { index, items } => format!("chunk{index}:{items}"),
            StepEvent::ItemSkipped { line, .. } => format!("skip@{line}"),
            StepEvent::RunFinished { report } => format!("finished:{}", report.items_written),
        };
        self.events.lock().unwrap().push(label);
    }

    fn on_failure(&self, _ctx: &StepContext, severity: Severity, _error: &PipelineError) {
        self.failures.lock().unwrap().push(severity);
    }

    fn on_alert(&self, _ctx: &StepContext, severity: Severity, _error: &PipelineError) {
        self.alerts.lock().unwrap().push(severity);
    }
}

#[test]
fn observer_sees_events_in_run_order() {
    let recorder = Arc::new(Recorder::default());
    let skip_even = |r: Record| -> Result<Record, BoxError> {
        match r.get("person_id").and_then(Value::as_str) {
            Some("2") => Err("even".into()),
            _ => Ok(r),
        }
    };
    let mut step = ChunkStepBuilder::new("observed")
        .reader(people_reader(&numbered_rows(3)))
        .mapper(RecordMapper)
        .processor(skip_even)
        .writer(InMemoryWriter::<Record>::new())
        .transform_failure(TransformFailurePolicy::Skip { limit: None })
        .chunk_size(1)
        .observer(recorder.clone())
        .build()
        .unwrap();

    step.run().unwrap();
    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec!["started", "chunk0:1", "skip@2", "chunk1:1", "finished:2"]
    );
    assert!(recorder.failures.lock().unwrap().is_empty());
}

#[test]
fn alert_fires_only_at_or_above_threshold() {
    // Schema errors are `Severity::Error`.
    let below = Arc::new(Recorder::default());
    let mut step = ChunkStepBuilder::new("below")
        .reader(people_reader("1,Doe\r\n"))
        .mapper(RecordMapper)
        .writer(InMemoryWriter::<Record>::new())
        .observer(below.clone())
        .build()
        .unwrap();
    assert!(step.run().is_err());
    assert_eq!(*below.failures.lock().unwrap(), vec![Severity::Error]);
    assert!(below.alerts.lock().unwrap().is_empty());

    let at = Arc::new(Recorder::default());
    let mut step = ChunkStepBuilder::new("at")
        .reader(people_reader("1,Doe\r\n"))
        .mapper(RecordMapper)
        .writer(InMemoryWriter::<Record>::new())
        .observer(at.clone())
        .alert_at_or_above(Severity::Error)
        .build()
        .unwrap();
    assert!(step.run().is_err());
    assert_eq!(*at.alerts.lock().unwrap(), vec![Severity::Error]);
}

#[test]
fn step_can_be_rerun_over_a_file_resource() {
    let path = tmp_file("rerun");
    fs::write(&path, numbered_rows(3)).unwrap();

    let reader = RecordReaderBuilder::new()
        .path(&path)
        .header(["person_id", "lastname", "firstname"])
        .build()
        .unwrap();
    let sink = InMemoryWriter::<Record>::new();
    let mut step = ChunkStepBuilder::new("rerun")
        .reader(reader)
        .mapper(RecordMapper)
        .writer(sink.clone())
        .build()
        .unwrap();

    let first = step.run().unwrap();
    let second = step.run().unwrap();
    assert_eq!(first.rows_read, second.rows_read);
    assert_eq!(sink.item_count(), 6);
    assert_eq!(step.metrics().snapshot().run_id, 2);

    let _ = fs::remove_file(&path);
}
