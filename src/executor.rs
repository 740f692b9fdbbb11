//! Concurrency-bounded executor.
//!
//! Every stage of an album sync (downloads, deletes, transforms, the startup
//! sweep) runs its jobs through [`run_bounded`]:
//!
//! - at most `limit` operations are in flight at any instant;
//! - items start in input order as slots free up;
//! - after the first error no new item is started, the ones already running
//!   are awaited (not cancelled), and the first error is returned. Later
//!   errors are dropped;
//! - an empty input completes immediately.
//!
//! Completion bookkeeping is checked: an item finishing twice is reported as
//! [`ExecutorError::DoubleCompletion`] and aborts the run at once.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::HashSet;
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("concurrency limit must be at least 1")]
    ZeroLimit,
    #[error("item {index} completed more than once")]
    DoubleCompletion { index: usize },
}

/// Tracks which items are in flight.
#[derive(Debug, Default)]
pub struct Completions {
    pending: HashSet<usize>,
}

impl Completions {
    pub fn started(&mut self, index: usize) {
        self.pending.insert(index);
    }

    /// Mark `index` as finished. Fails unless it was in flight.
    pub fn finished(&mut self, index: usize) -> Result<(), ExecutorError> {
        if self.pending.remove(&index) {
            Ok(())
        } else {
            Err(ExecutorError::DoubleCompletion { index })
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

/// Run `operation` over `items` with at most `limit` in flight.
///
/// On success the outputs are returned in input order.
pub async fn run_bounded<I, T, F, Fut, R, E>(
    items: I,
    limit: usize,
    mut operation: F,
) -> Result<Vec<R>, E>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: From<ExecutorError>,
{
    if limit == 0 {
        return Err(ExecutorError::ZeroLimit.into());
    }

    let mut queue = items.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();
    let mut completions = Completions::default();
    let mut outputs: Vec<(usize, R)> = Vec::new();
    let mut first_error: Option<E> = None;

    loop {
        while first_error.is_none() && in_flight.len() < limit {
            let Some((index, item)) = queue.next() else {
                break;
            };
            completions.started(index);
            let fut = operation(item);
            in_flight.push(async move { (index, fut.await) });
        }

        let Some((index, result)) = in_flight.next().await else {
            break;
        };
        completions.finished(index).map_err(E::from)?;
        match result {
            Ok(output) => outputs.push((index, output)),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    outputs.sort_by_key(|(index, _)| *index);
    Ok(outputs.into_iter().map(|(_, output)| output).collect())
}
