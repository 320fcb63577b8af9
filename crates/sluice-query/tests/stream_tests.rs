use sluice_query::{
    next_many, next_single, next_yield, DataError, Envelope, Meta, ResultStream,
    ResultStreamBuilder, SchemaType, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = count.clone();
    (count, move || {
        handle.fetch_add(1, Ordering::SeqCst);
    })
}

fn reply_row(n: i64) -> Vec<Value> {
    vec![Value::from(Envelope::new(serde_json::json!({ "n": n })))]
}

fn reply_header() -> Vec<String> {
    vec!["Reply".to_string()]
}

#[test]
fn test_single_value_stream() {
    let (cleanups, cleanup) = counter();
    let mut stream = ResultStreamBuilder::new()
        .with_sequence(next_single(reply_row(1)))
        .with_header(reply_header())
        .with_meta(Meta::schema_less())
        .with_cleanup(cleanup)
        .build();

    assert_eq!(stream.header(), &reply_header());
    assert_eq!(stream.meta().schema_type, SchemaType::SchemaLess);

    assert!(stream.has_next());
    let row = stream.next().unwrap();
    assert_eq!(row[0].to_string(), "{\n  \"n\": 1\n}");

    assert!(!stream.has_next());
    for _ in 0..3 {
        assert!(matches!(stream.next(), Err(DataError::Exhausted)));
    }
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_emitting_stream_counts_every_item() {
    let batches: Vec<Vec<i64>> = vec![vec![1, 2, 3], vec![], vec![4, 5]];
    let mut stream = ResultStreamBuilder::new()
        .with_sequence(next_yield(move |emitter| {
            for batch in batches {
                for n in batch {
                    emitter.emit(reply_row(n));
                }
            }
            Ok(())
        }))
        .with_header(reply_header())
        .build();

    let rows: Vec<_> = stream.rows().collect::<Result<_, _>>().unwrap();
    let seen: Vec<i64> = rows
        .iter()
        .map(|row| {
            let doc = row[0].as_envelope().unwrap().to_json().unwrap();
            doc["n"].as_i64().unwrap()
        })
        .collect();
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_has_next_is_idempotent() {
    let mut stream = ResultStreamBuilder::new()
        .with_sequence(next_many(vec![reply_row(1), reply_row(2)]))
        .with_header(reply_header())
        .build();

    for _ in 0..5 {
        assert!(stream.has_next());
    }
    stream.next().unwrap();
    for _ in 0..5 {
        assert!(stream.has_next());
    }
    stream.next().unwrap();
    for _ in 0..5 {
        assert!(!stream.has_next());
    }
}

#[test]
fn test_three_items_then_error() {
    let (cleanups, cleanup) = counter();
    let mut stream = ResultStreamBuilder::new()
        .with_sequence(next_yield(|emitter| {
            for n in 1..=3 {
                emitter.emit(reply_row(n));
            }
            Err(DataError::malformed_reply("type assertion for cursor object failed"))
        }))
        .with_header(reply_header())
        .with_cleanup(cleanup)
        .build();

    for _ in 0..3 {
        assert!(stream.next().is_ok());
    }
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);

    assert!(matches!(stream.next(), Err(DataError::MalformedReply(_))));
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    // a failed stream never yields again
    assert!(!stream.has_next());
    assert!(matches!(stream.next(), Err(DataError::Exhausted)));
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_close_twice_is_noop() {
    let (cleanups, cleanup) = counter();
    let mut stream = ResultStreamBuilder::new()
        .with_sequence(next_many(vec![reply_row(1), reply_row(2)]))
        .with_header(reply_header())
        .with_cleanup(cleanup)
        .build();

    stream.next().unwrap();
    assert!(!stream.is_closed());
    stream.close();
    stream.close();
    assert!(stream.is_closed());
    drop(stream);

    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_close_after_exhaustion_does_not_release_twice() {
    let (cleanups, cleanup) = counter();
    let mut stream = ResultStreamBuilder::new()
        .with_sequence(next_single(reply_row(1)))
        .with_header(reply_header())
        .with_cleanup(cleanup)
        .build();

    while stream.has_next() {
        stream.next().unwrap();
    }
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    stream.close();
    drop(stream);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_abandoned_stream_releases_on_drop() {
    let (cleanups, cleanup) = counter();
    let mut stream = ResultStreamBuilder::new()
        .with_sequence(next_many((1..=10).map(reply_row)))
        .with_header(reply_header())
        .with_cleanup(cleanup)
        .build();

    stream.next().unwrap();
    stream.next().unwrap();
    drop(stream);

    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_row_arity_mismatch_fails_stream() {
    let (cleanups, cleanup) = counter();
    let mut stream = ResultStreamBuilder::new()
        .with_sequence(next_many(vec![
            vec![Value::Int(1), Value::from("a")],
            vec![Value::Int(2)],
            vec![Value::Int(3), Value::from("c")],
        ]))
        .with_header(vec!["id".to_string(), "name".to_string()])
        .with_cleanup(cleanup)
        .build();

    assert_eq!(stream.next().unwrap().len(), 2);
    assert!(matches!(stream.next(), Err(DataError::MalformedReply(_))));
    assert!(!stream.has_next());
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_default_builder_is_empty_typed_stream() {
    let mut stream: ResultStream = ResultStreamBuilder::default().build();
    assert!(stream.header().is_empty());
    assert_eq!(stream.meta().schema_type, SchemaType::Typed);
    assert!(!stream.has_next());
    assert!(stream.next().unwrap_err().is_exhausted());
}

#[test]
fn test_stream_is_send() {
    fn assert_send<T: Send>(_: &T) {}
    let stream = ResultStreamBuilder::new().build();
    assert_send(&stream);
}
