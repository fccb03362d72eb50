//! Integration tests for multi-file range queries through the façade.

use std::sync::Arc;

use common::clock::MockClock;
use tsdb::{Config, EventPoint, Tsdb, TsdbRead, TsdbReader, Value};

// 2026-02-14T00:00:00.000Z
const MIDNIGHT: i64 = 1_771_027_200_000;

fn open_db(dir: &std::path::Path, now_ms: i64) -> Tsdb {
    Tsdb::with_clock(Config::new(dir), Arc::new(MockClock::at_ms(now_ms))).unwrap()
}

#[tokio::test]
async fn test_events_span_two_day_files_in_order() {
    // Samples one second before and one second after UTC midnight land in
    // different day files; a window covering both returns both in order
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(dir.path(), MIDNIGHT + 10_000);
    let before = MIDNIGHT - 1_000;
    let after = MIDNIGHT + 1_000;
    db.append("temp", 0x22, before, &Value::Double(20.0)).unwrap();
    db.append("temp", 0x22, after, &Value::Double(21.0)).unwrap();

    let events = db
        .get_events("temp", before - 60_000, after + 60_000, 100)
        .await
        .unwrap();

    assert_eq!(
        events.points,
        vec![
            EventPoint::Raw {
                timestamp_ms: before,
                value: Value::Double(20.0),
            },
            EventPoint::Raw {
                timestamp_ms: after,
                value: Value::Double(21.0),
            },
        ]
    );
    assert_eq!(
        events.files,
        vec![
            "data_2026-02-13.tsdb".to_string(),
            "data_2026-02-14.tsdb".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_list_series_unions_across_files() {
    // A channel only present yesterday and one only present today both
    // show up; ids are per-file, names are the cross-file key
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(dir.path(), MIDNIGHT + 10_000);
    db.append("old", 0x01, MIDNIGHT - 5_000, &Value::Double(1.0))
        .unwrap();
    db.append("new", 0x01, MIDNIGHT + 5_000, &Value::Double(2.0))
        .unwrap();
    db.append("both", 0x01, MIDNIGHT - 5_000, &Value::Double(3.0))
        .unwrap();
    db.append("both", 0x01, MIDNIGHT + 5_000, &Value::Double(4.0))
        .unwrap();

    let list = db
        .list_series(MIDNIGHT - 60_000, MIDNIGHT + 60_000)
        .await
        .unwrap();

    assert_eq!(
        list.series,
        vec!["both".to_string(), "new".to_string(), "old".to_string()]
    );
    assert_eq!(list.files.len(), 2);

    // A window before midnight only sees yesterday's names
    let list = db
        .list_series(MIDNIGHT - 60_000, MIDNIGHT - 1)
        .await
        .unwrap();
    assert_eq!(list.series, vec!["both".to_string(), "old".to_string()]);
}

#[tokio::test]
async fn test_same_series_carries_different_ids_per_file() {
    // "b" is the second channel yesterday but the first today; the query
    // layer still joins by name
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(dir.path(), MIDNIGHT + 10_000);
    db.append("a", 0x10, MIDNIGHT - 5_000, &Value::Integer(1))
        .unwrap();
    db.append("b", 0x10, MIDNIGHT - 4_000, &Value::Integer(2))
        .unwrap();
    db.append("b", 0x10, MIDNIGHT + 4_000, &Value::Integer(3))
        .unwrap();

    let events = db
        .get_events("b", MIDNIGHT - 60_000, MIDNIGHT + 60_000, 100)
        .await
        .unwrap();

    let timestamps: Vec<i64> = events
        .points
        .iter()
        .map(|p| match p {
            EventPoint::Raw { timestamp_ms, .. } => *timestamp_ms,
            EventPoint::Bucket { timestamp_ms, .. } => *timestamp_ms,
        })
        .collect();
    assert_eq!(timestamps, vec![MIDNIGHT - 4_000, MIDNIGHT + 4_000]);
}

#[tokio::test]
async fn test_stats_across_files_with_current_value() {
    // given: samples on both sides of midnight, "now" 30 s after the last
    let dir = tempfile::tempdir().unwrap();
    let last = MIDNIGHT + 1_000;
    let db = open_db(dir.path(), last + 30_000);
    db.append("p", 0x01, MIDNIGHT - 1_000, &Value::Double(5.0))
        .unwrap();
    db.append("p", 0x01, last, &Value::Double(2.0)).unwrap();

    let stats = db
        .get_stats("p", MIDNIGHT - 60_000, last + 60_000)
        .await
        .unwrap();

    assert_eq!(stats.count, 2);
    assert_eq!(stats.max_value, Some(5.0));
    assert_eq!(stats.current_value, Some(Value::Double(2.0)));
    assert_eq!(stats.files.len(), 2);
}

#[tokio::test]
async fn test_reader_sees_writer_output_live() {
    // The unfinalized "today" file is readable while the writer holds it
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(dir.path(), MIDNIGHT + 10_000);
    db.append("temp", 0x22, MIDNIGHT + 1_000, &Value::Double(20.0))
        .unwrap();

    let reader = TsdbReader::with_clock(
        Config::new(dir.path()),
        Arc::new(MockClock::at_ms(MIDNIGHT + 10_000)),
    );
    let events = reader
        .get_events("temp", MIDNIGHT, MIDNIGHT + 60_000, 10)
        .await
        .unwrap();
    assert_eq!(events.points.len(), 1);

    // More appends are visible to the next query without reopening
    db.append("temp", 0x22, MIDNIGHT + 2_000, &Value::Double(21.0))
        .unwrap();
    let events = reader
        .get_events("temp", MIDNIGHT, MIDNIGHT + 60_000, 10)
        .await
        .unwrap();
    assert_eq!(events.points.len(), 2);
}

#[tokio::test]
async fn test_empty_directory_yields_empty_results() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(dir.path(), MIDNIGHT);

    let list = db.list_series(0, MIDNIGHT).await.unwrap();
    assert!(list.series.is_empty());
    assert!(list.files.is_empty());

    let events = db.get_events("x", MIDNIGHT - 10, MIDNIGHT, 10).await.unwrap();
    assert!(events.points.is_empty());
}
