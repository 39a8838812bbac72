//! Running one request per child store.

use std::future::Future;

use blockstore_core::{Error, Result, SharedStore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Run `op` against every child concurrently and wait for all of them.
///
/// Results come back in child order. A child task that panics reports
/// [`Error::Task`].
pub(crate) async fn join_all<T, F, Fut>(children: &[SharedStore], op: F) -> Vec<Result<T>>
where
    T: Send + 'static,
    F: Fn(SharedStore) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for (index, child) in children.iter().enumerate() {
        let request = op(child.clone());
        set.spawn(async move { (index, request.await) });
    }

    let mut results: Vec<Result<T>> = children
        .iter()
        .map(|child| Err(Error::Task(format!("request to {} did not complete", child.name()))))
        .collect();
    while let Some(joined) = set.join_next().await {
        if let Ok((index, result)) = joined {
            results[index] = result;
        }
    }
    results
}

/// Outcome of [`race`].
pub(crate) struct Race<T> {
    /// Index of the first child to succeed, with its answer.
    pub winner: Option<(usize, T)>,
    /// Failures reported before a winner emerged (all of them if none did).
    pub errors: Vec<Error>,
}

/// Run `op` against every child concurrently; the first success wins and
/// the remaining requests are cancelled.
pub(crate) async fn race<T, F, Fut>(children: &[SharedStore], op: F) -> Race<T>
where
    T: Send + 'static,
    F: Fn(SharedStore) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let token = CancellationToken::new();
    let mut set = JoinSet::new();
    for (index, child) in children.iter().enumerate() {
        let request = op(child.clone());
        let token = token.clone();
        set.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => (index, None),
                result = request => (index, Some(result)),
            }
        });
    }

    let mut outcome = Race {
        winner: None,
        errors: Vec::new(),
    };
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Some(Ok(value)))) => {
                token.cancel();
                set.abort_all();
                outcome.winner = Some((index, value));
                break;
            }
            Ok((_, Some(Err(e)))) => outcome.errors.push(e),
            Ok((_, None)) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => outcome.errors.push(Error::Task(e.to_string())),
        }
    }
    outcome
}

/// Pick the error to surface when no child could answer: anything more
/// specific than `NotFound` wins, otherwise `NotFound` itself.
pub(crate) fn escalate(errors: Vec<Error>, what: impl std::fmt::Display) -> Error {
    let mut not_found = None;
    for e in errors {
        if e.is_not_found() {
            not_found.get_or_insert(e);
        } else {
            return e;
        }
    }
    not_found.unwrap_or_else(|| Error::NotFound(what.to_string()))
}
