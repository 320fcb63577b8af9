//! Lazy sequence adapters
//!
//! Backends produce replies in very different shapes: one composite value, a
//! flat list, or a map of named batches each holding documents. The adapters
//! here turn each of those into the same pull protocol, [`Sequence`], which
//! [`ResultStream`](crate::ResultStream) is built on.

use crate::error::{DataError, Result};
use std::collections::VecDeque;
use std::fmt;

/// Pull protocol shared by every producer shape
///
/// `has_next` never changes which item `next` returns.
pub trait Sequence<T>: Send {
    fn next(&mut self) -> Result<T>;

    fn has_next(&mut self) -> bool;
}

impl<T, S> Sequence<T> for Box<S>
where
    S: Sequence<T> + ?Sized,
{
    fn next(&mut self) -> Result<T> {
        (**self).next()
    }

    fn has_next(&mut self) -> bool {
        (**self).has_next()
    }
}

/// Yields exactly one precomputed value
pub struct Single<T> {
    value: Option<T>,
}

pub fn next_single<T: Send>(value: T) -> Single<T> {
    Single { value: Some(value) }
}

impl<T: Send> Sequence<T> for Single<T> {
    fn next(&mut self) -> Result<T> {
        self.value.take().ok_or(DataError::Exhausted)
    }

    fn has_next(&mut self) -> bool {
        self.value.is_some()
    }
}

/// Receiving end handed to a producer by [`next_yield`]
pub struct Emitter<T> {
    items: VecDeque<T>,
}

impl<T> Emitter<T> {
    pub fn emit(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Number of items emitted so far
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

type Producer<T> = Box<dyn FnOnce(&mut Emitter<T>) -> Result<()> + Send>;

/// Sequence over everything a producer emits
///
/// The producer runs to completion on first use and its output is buffered.
/// If it fails, the error is handed out by `next` after the items emitted
/// before the failure.
pub struct Yielded<T> {
    producer: Option<Producer<T>>,
    items: VecDeque<T>,
    error: Option<DataError>,
}

/// Wrap a producer that pushes items through an [`Emitter`]
pub fn next_yield<T, F>(producer: F) -> Yielded<T>
where
    F: FnOnce(&mut Emitter<T>) -> Result<()> + Send + 'static,
{
    Yielded {
        producer: Some(Box::new(producer)),
        items: VecDeque::new(),
        error: None,
    }
}

/// Sequence over an already materialized, ordered set of items
pub fn next_many<T>(items: impl IntoIterator<Item = T>) -> Yielded<T> {
    Yielded {
        producer: None,
        items: items.into_iter().collect(),
        error: None,
    }
}

impl<T> Yielded<T> {
    fn drain(&mut self) {
        if let Some(producer) = self.producer.take() {
            let mut emitter = Emitter {
                items: VecDeque::new(),
            };
            self.error = producer(&mut emitter).err();
            self.items = emitter.items;
        }
    }
}

impl<T: Send> Sequence<T> for Yielded<T> {
    fn next(&mut self) -> Result<T> {
        self.drain();
        if let Some(item) = self.items.pop_front() {
            return Ok(item);
        }
        Err(self.error.take().unwrap_or(DataError::Exhausted))
    }

    fn has_next(&mut self) -> bool {
        self.drain();
        !self.items.is_empty() || self.error.is_some()
    }
}

impl<T> fmt::Debug for Yielded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Yielded")
            .field("pending", &self.producer.is_some())
            .field("buffered", &self.items.len())
            .field("error", &self.error)
            .finish()
    }
}

/// Sequence with no items
pub struct Empty;

impl<T> Sequence<T> for Empty {
    fn next(&mut self) -> Result<T> {
        Err(DataError::Exhausted)
    }

    fn has_next(&mut self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_single_yields_once() {
        let mut seq = next_single("reply");

        assert!(seq.has_next());
        assert!(seq.has_next());
        assert_eq!(seq.next().unwrap(), "reply");
        assert!(!seq.has_next());

        for _ in 0..3 {
            assert!(matches!(seq.next(), Err(DataError::Exhausted)));
        }
    }

    #[test]
    fn test_yield_is_lazy_and_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let mut seq = next_yield(move |emitter| {
            counter.fetch_add(1, Ordering::SeqCst);
            emitter.emit(1);
            emitter.emit(2);
            Ok(())
        });
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert!(seq.has_next());
        assert!(seq.has_next());
        assert_eq!(seq.next().unwrap(), 1);
        assert_eq!(seq.next().unwrap(), 2);
        assert!(!seq.has_next());
        assert!(matches!(seq.next(), Err(DataError::Exhausted)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_yield_flattens_named_batches_in_order() {
        let mut batches = BTreeMap::new();
        batches.insert("firstBatch", vec!["a1", "a2", "a3"]);
        batches.insert("nextBatch", vec!["b1", "b2"]);
        batches.insert("empty", vec![]);

        let mut seq = next_yield(move |emitter| {
            for batch in batches.into_values() {
                for item in batch {
                    emitter.emit(item);
                }
            }
            Ok(())
        });

        let mut seen = Vec::new();
        while seq.has_next() {
            seen.push(seq.next().unwrap());
        }

        assert_eq!(seen.len(), 5);
        let pos = |x: &str| seen.iter().position(|s| *s == x).unwrap();
        assert!(pos("a1") < pos("a2") && pos("a2") < pos("a3"));
        assert!(pos("b1") < pos("b2"));
    }

    #[test]
    fn test_emitter_counts_items() {
        let mut seq = next_yield(|emitter| {
            assert!(emitter.is_empty());
            emitter.emit("a");
            emitter.emit("b");
            assert_eq!(emitter.len(), 2);
            assert!(!emitter.is_empty());
            Ok(())
        });

        assert_eq!(seq.next().unwrap(), "a");
        assert_eq!(seq.next().unwrap(), "b");
    }

    #[test]
    fn test_yield_error_after_items() {
        let mut seq = next_yield(|emitter| {
            emitter.emit(1);
            emitter.emit(2);
            emitter.emit(3);
            Err(DataError::malformed_reply("batch is not an array"))
        });

        for expected in 1..=3 {
            assert!(seq.has_next());
            assert_eq!(seq.next().unwrap(), expected);
        }
        assert!(seq.has_next());
        assert!(matches!(seq.next(), Err(DataError::MalformedReply(_))));
        assert!(!seq.has_next());
        assert!(matches!(seq.next(), Err(DataError::Exhausted)));
    }

    #[test]
    fn test_yield_error_without_items() {
        let mut seq: Yielded<i32> =
            next_yield(|_| Err(DataError::QueryFailed("boom".to_string())));

        assert!(seq.has_next());
        assert!(matches!(seq.next(), Err(DataError::QueryFailed(_))));
        assert!(!seq.has_next());
    }

    #[test]
    fn test_many_and_empty() {
        let mut seq = next_many(vec![10, 20]);
        assert_eq!(seq.next().unwrap(), 10);
        assert_eq!(seq.next().unwrap(), 20);
        assert!(!seq.has_next());

        let mut empty = Empty;
        assert!(!Sequence::<i32>::has_next(&mut empty));
        assert!(matches!(Sequence::<i32>::next(&mut empty), Err(DataError::Exhausted)));
    }
}
