use std::{future::Future, num::NonZeroUsize};

use tokio::task::{JoinError, JoinSet};

/// Runs every future on its own task, at most `capacity` at a time, and folds
/// each outcome into `accumulator` in completion order.
///
/// Unlike `try_join_all`, nothing short-circuits: a panicking or failing task
/// is handed to `fold_with` as an `Err` and the remaining tasks keep running.
pub async fn join_all_bounded<Iterable, Output, Accumulator, FoldWith>(
    iterable: Iterable,
    capacity: Option<NonZeroUsize>,
    mut accumulator: Accumulator,
    mut fold_with: FoldWith,
) -> Accumulator
where
    Iterable: IntoIterator,
    Iterable::Item: Future<Output = Output> + Send + 'static,
    Output: Send + 'static,
    FoldWith: FnMut(Accumulator, Result<Output, JoinError>) -> Accumulator,
{
    let mut iter = iterable.into_iter().fuse();
    let mut set = JoinSet::new();

    match capacity {
        Some(capacity) => {
            for future in (&mut iter).take(capacity.get()) {
                set.spawn(future);
            }
        },
        None => {
            for future in &mut iter {
                set.spawn(future);
            }
        },
    }

    while let Some(result) = set.join_next().await {
        accumulator = fold_with(accumulator, result);

        if let Some(future) = iter.next() {
            set.spawn(future);
        }
    }

    accumulator
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn test_join_set_folding() {
        async fn delayed_result(delay: Duration, value: u8) -> u8 {
            tokio::time::sleep(delay).await;

            value
        }

        let result = join_all_bounded(
            [
                delayed_result(Duration::from_millis(350), 1),
                delayed_result(Duration::from_millis(150), 2),
                delayed_result(Duration::from_millis(50), 4),
                delayed_result(Duration::from_millis(250), 8),
                delayed_result(Duration::from_millis(450), 16),
            ],
            NonZeroUsize::new(3),
            0,
            |acc, result| acc ^ result.unwrap(),
        )
        .await;

        assert_eq!(result, 31);
    }

    #[tokio::test]
    async fn test_capacity_is_respected() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let futures = (0..10).map(|_| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }
        });

        let count =
            join_all_bounded(futures, NonZeroUsize::new(2), 0, |acc, _| acc + 1)
                .await;

        assert_eq!(count, 10);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_others() {
        let futures = (0..4u8).map(|value| async move {
            if value == 1 {
                panic!("boom");
            }
            value
        });

        let (ok, failed) =
            join_all_bounded(futures, None, (0, 0), |(ok, failed), result| {
                match result {
                    Ok(_) => (ok + 1, failed),
                    Err(_) => (ok, failed + 1),
                }
            })
            .await;

        assert_eq!((ok, failed), (3, 1));
    }
}
