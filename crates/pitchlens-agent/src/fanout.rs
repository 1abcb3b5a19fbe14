use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::error::Elapsed;
use tracing::{debug, warn};

use pitchlens_core::config::WorkflowConfig;
use pitchlens_core::error::{PitchlensError, Result};

type Outcome<R> = std::result::Result<std::result::Result<Result<R>, Elapsed>, Box<dyn Any + Send>>;

/// Bounded-concurrency fan-out over a fixed batch of independent tasks.
///
/// Results land in the slot of their task's original index regardless of
/// completion order. The batch is all-or-nothing: the first failed, timed out
/// or panicked task aborts the rest and becomes the batch error.
#[derive(Debug, Clone)]
pub struct FanOut {
    max_workers: usize,
    task_timeout: Duration,
}

impl FanOut {
    pub fn new(max_workers: usize, task_timeout: Duration) -> Self {
        Self {
            max_workers: max_workers.max(1),
            task_timeout,
        }
    }

    /// Worker bound of `available_parallelism * fan_out_multiplier`.
    pub fn from_config(config: &WorkflowConfig) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(
            cores * config.fan_out_multiplier.max(1),
            Duration::from_secs(config.task_timeout_secs),
        )
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Workers used for a batch of `n` tasks.
    pub fn workers_for(&self, n: usize) -> usize {
        self.max_workers.min(n).max(1)
    }

    /// Run `f(index, item)` for every item and collect results by index.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let workers = self.workers_for(total);
        debug!(tasks = total, workers, "Dispatching fan-out batch");

        let semaphore = Arc::new(Semaphore::new(workers));
        let f = Arc::new(f);
        let timeout = self.task_timeout;
        let mut set: JoinSet<(usize, Outcome<R>)> = JoinSet::new();
        let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();

        for (index, item) in items.into_iter().enumerate() {
            // Dispatch in insertion order; settle finished tasks while waiting
            // for a free worker so a failure surfaces early.
            let permit = loop {
                tokio::select! {
                    biased;
                    Some(joined) = set.join_next(), if !set.is_empty() => {
                        let (i, value) = settle(joined, timeout)?;
                        slots[i] = Some(value);
                    }
                    permit = semaphore.clone().acquire_owned() => {
                        break permit.map_err(|_| PitchlensError::FanOutCancelled)?;
                    }
                }
            };

            let f = f.clone();
            set.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(tokio::time::timeout(timeout, f(index, item)))
                    .catch_unwind()
                    .await;
                (index, outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (i, value) = settle(joined, timeout)?;
            slots[i] = Some(value);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| PitchlensError::TaskFailed {
                    index,
                    message: "no result recorded".into(),
                })
            })
            .collect()
    }
}

fn settle<R>(
    joined: std::result::Result<(usize, Outcome<R>), JoinError>,
    timeout: Duration,
) -> Result<(usize, R)> {
    let (index, outcome) = joined.map_err(|e| {
        warn!(error = %e, "Fan-out worker did not finish");
        PitchlensError::FanOutCancelled
    })?;

    let err = match outcome {
        Ok(Ok(Ok(value))) => return Ok((index, value)),
        Ok(Ok(Err(e))) => PitchlensError::TaskFailed {
            index,
            message: e.to_string(),
        },
        Ok(Err(_)) => PitchlensError::TaskTimedOut {
            index,
            timeout_secs: timeout.as_secs(),
        },
        Err(_) => PitchlensError::TaskPanicked { index },
    };
    warn!(index, error = %err, "Fan-out task failed, abandoning batch");
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fan_out(workers: usize) -> FanOut {
        FanOut::new(workers, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_input_order() {
        // Later tasks finish first
        let out = fan_out(8)
            .run((0..6u64).collect(), |i, item| async move {
                tokio::time::sleep(Duration::from_millis(600 - 100 * i as u64)).await;
                Ok(format!("slide-{}", item))
            })
            .await
            .unwrap();
        let expected: Vec<String> = (0..6).map(|i| format!("slide-{}", i)).collect();
        assert_eq!(out, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn single_worker_still_preserves_order() {
        let out = fan_out(1)
            .run(vec![3u64, 1, 2], |_, ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ms)
            })
            .await
            .unwrap();
        assert_eq!(out, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn failure_names_the_task() {
        let err = fan_out(4)
            .run(vec!["a", "b", "c"], |i, _| async move {
                if i == 1 {
                    Err(PitchlensError::Extraction("unreadable slide".into()))
                } else {
                    Ok(i)
                }
            })
            .await
            .unwrap_err();
        match err {
            PitchlensError::TaskFailed { index, message } => {
                assert_eq!(index, 1);
                assert!(message.contains("unreadable slide"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_task_times_out() {
        let err = FanOut::new(2, Duration::from_secs(1))
            .run(vec![0u64, 5], |_, secs| async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                Ok(secs)
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PitchlensError::TaskTimedOut {
                index: 1,
                timeout_secs: 1
            }
        ));
    }

    #[tokio::test]
    async fn panic_becomes_task_error() {
        let err = fan_out(2)
            .run(vec![0, 1], |i, _: i32| async move {
                if i == 0 {
                    panic!("bad slide");
                }
                Ok(i)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PitchlensError::TaskPanicked { index: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_stays_within_bound() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (active.clone(), peak.clone());

        let out = fan_out(3)
            .run((0..10).collect::<Vec<usize>>(), move |i, _| {
                let (active, peak) = (a.clone(), p.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                }
            })
            .await
            .unwrap();

        assert_eq!(out.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_batch() {
        let out: Vec<u8> = fan_out(4)
            .run(Vec::<u8>::new(), |_, x| async move { Ok(x) })
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn worker_count_is_capped_by_batch() {
        let f = fan_out(16);
        assert_eq!(f.workers_for(4), 4);
        assert_eq!(f.workers_for(40), 16);
        assert_eq!(f.workers_for(0), 1);
        assert!(FanOut::from_config(&WorkflowConfig::default()).max_workers() >= 4);
    }
}
