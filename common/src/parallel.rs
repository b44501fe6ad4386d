//! Concurrency-limited parallel iteration utilities.
//!
//! Wraps rayon to process items in parallel while limiting the number of
//! items in flight at once (e.g. to cap memory held by decoded images).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;

/// Maps `f` over `items` in parallel, with at most `max_concurrent` items in flight.
///
/// Semantically equivalent to `items.par_iter().map(f).collect()`, but processes
/// items in chunks of `max_concurrent` to limit resource usage.
///
/// # Panics
///
/// Panics if `max_concurrent` is 0.
pub fn par_map_limited<T, R, F>(items: &[T], max_concurrent: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut results = Vec::with_capacity(items.len());
    for chunk in items.chunks(max_concurrent) {
        let chunk_results: Vec<R> = chunk.par_iter().map(&f).collect();
        results.extend(chunk_results);
    }
    results
}

/// Runs `f` for every item with at most `max_concurrent` invocations in flight.
///
/// Unlike [`par_map_limited`] there is no chunk barrier: `max_concurrent` lanes
/// pull the next unclaimed index as soon as they finish, in item order.
/// A lane count of 1 runs serially on the calling thread.
///
/// The first error stops every lane from claiming new items and is returned.
/// Items already claimed run to completion.
///
/// # Panics
///
/// Panics if `max_concurrent` is 0.
pub fn try_par_for_each_limited<T, E, F>(items: &[T], max_concurrent: usize, f: F) -> Result<(), E>
where
    T: Sync,
    E: Send,
    F: Fn(usize, &T) -> Result<(), E> + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    if max_concurrent == 1 || items.len() <= 1 {
        for (idx, item) in items.iter().enumerate() {
            f(idx, item)?;
        }
        return Ok(());
    }

    let lanes = max_concurrent.min(items.len());
    let next = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let first_error = FirstError::default();

    rayon::scope(|scope| {
        for _ in 0..lanes {
            scope.spawn(|_| loop {
                if failed.load(Ordering::Acquire) {
                    break;
                }
                let idx = next.fetch_add(1, Ordering::AcqRel);
                if idx >= items.len() {
                    break;
                }
                if let Err(err) = f(idx, &items[idx]) {
                    failed.store(true, Ordering::Release);
                    first_error.set(err);
                    break;
                }
            });
        }
    });

    match first_error.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Keeps the first error reported by any lane.
struct FirstError<E>(Mutex<Option<E>>);

impl<E> Default for FirstError<E> {
    fn default() -> Self {
        Self(Mutex::new(None))
    }
}

impl<E> FirstError<E> {
    fn set(&self, err: E) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take(self) -> Option<E> {
        self.0.into_inner()
    }
}
