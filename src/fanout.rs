//! Fan-out executor: pushes independent timeline writes to the backend.
//!
//! Every write targets a different timeline, so writes need no
//! coordination and can run on several worker threads at once. There is no
//! atomicity across them: a failure leaves earlier writes in place.

use crate::backend::{Backend, WriteOp};
use crate::config::FanoutErrorPolicy;
use crate::error::{FeedError, Result};
use crossbeam_channel::{bounded, unbounded};
use std::thread;
use tracing::warn;

/// Runs batches of per-timeline writes.
#[derive(Clone, Copy, Debug)]
pub struct FanoutExecutor {
    workers: usize,
    policy: FanoutErrorPolicy,
}

impl FanoutExecutor {
    pub fn new(workers: usize, policy: FanoutErrorPolicy) -> Self {
        Self {
            workers: workers.max(1),
            policy,
        }
    }

    /// Apply each op as its own backend request, attempting all of them.
    pub fn run(&self, backend: &dyn Backend, ops: Vec<WriteOp>) -> Result<()> {
        let attempted = ops.len();
        if attempted == 0 {
            return Ok(());
        }

        let failures = if self.workers == 1 || attempted == 1 {
            Self::run_sequential(backend, ops)
        } else {
            self.run_parallel(backend, ops)
        };

        self.settle(attempted, failures)
    }

    fn run_sequential(backend: &dyn Backend, ops: Vec<WriteOp>) -> Vec<(String, FeedError)> {
        let mut failures = Vec::new();
        for op in ops {
            let target = op.partition().to_string();
            if let Err(e) = backend.apply(vec![op]) {
                failures.push((target, e));
            }
        }
        failures
    }

    fn run_parallel(&self, backend: &dyn Backend, ops: Vec<WriteOp>) -> Vec<(String, FeedError)> {
        let workers = self.workers.min(ops.len());
        let (job_tx, job_rx) = bounded::<WriteOp>(workers * 2);
        let (result_tx, result_rx) = unbounded::<(String, Result<()>)>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                scope.spawn(move || {
                    for op in jobs.iter() {
                        let target = op.partition().to_string();
                        let outcome = backend.apply(vec![op]);
                        if results.send((target, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for op in ops {
                if job_tx.send(op).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        result_rx
            .iter()
            .filter_map(|(target, outcome)| outcome.err().map(|e| (target, e)))
            .collect()
    }

    fn settle(&self, attempted: usize, failures: Vec<(String, FeedError)>) -> Result<()> {
        for (target, error) in &failures {
            warn!(timeline = %target, error = %error, "fan-out write failed");
        }

        let failed = failures.len();
        match (self.policy, failures.into_iter().next()) {
            (_, None) => Ok(()),
            (FanoutErrorPolicy::LogAndContinue, Some(_)) => Ok(()),
            (FanoutErrorPolicy::Fail, Some((_, first))) => Err(FeedError::FanoutFailed {
                failed,
                attempted,
                first: Box::new(first),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Columns, MemoryBackend, Order, Table};
    use std::collections::HashMap;

    /// Fails every write to partitions starting with "bad".
    struct Flaky(MemoryBackend);

    impl Backend for Flaky {
        fn get(&self, t: Table, p: &str, c: &str) -> Result<Option<Vec<u8>>> {
            self.0.get(t, p, c)
        }
        fn multi_get(&self, t: Table, p: &[String], c: &str) -> Result<HashMap<String, Vec<u8>>> {
            self.0.multi_get(t, p, c)
        }
        fn row(&self, t: Table, p: &str) -> Result<Columns> {
            self.0.row(t, p)
        }
        fn slice(&self, t: Table, p: &str, f: Option<&str>, l: usize, o: Order) -> Result<Columns> {
            self.0.slice(t, p, f, l, o)
        }
        fn multi_slice(&self, t: Table, p: &[String], l: usize, o: Order) -> Result<HashMap<String, Columns>> {
            self.0.multi_slice(t, p, l, o)
        }
        fn count(&self, t: Table, p: &str) -> Result<usize> {
            self.0.count(t, p)
        }
        fn apply(&self, batch: Vec<WriteOp>) -> Result<()> {
            if batch.iter().any(|op| op.partition().starts_with("bad")) {
                return Err(FeedError::Backend("unavailable".into()));
            }
            self.0.apply(batch)
        }
    }

    fn ops(targets: &[&str]) -> Vec<WriteOp> {
        targets
            .iter()
            .map(|t| WriteOp::put(Table::Timeline, *t, "100_e1", b"e1".to_vec()))
            .collect()
    }

    #[test]
    fn test_parallel_writes_all_targets() {
        let backend = MemoryBackend::new();
        let targets: Vec<String> = (0..20).map(|i| format!("home_{i}")).collect();
        let refs: Vec<&str> = targets.iter().map(String::as_str).collect();

        FanoutExecutor::new(4, FanoutErrorPolicy::Fail)
            .run(&backend, ops(&refs))
            .unwrap();

        for target in &targets {
            assert_eq!(backend.count(Table::Timeline, target).unwrap(), 1);
        }
    }

    #[test]
    fn test_fail_policy_attempts_everything() {
        let backend = Flaky(MemoryBackend::new());
        let result = FanoutExecutor::new(1, FanoutErrorPolicy::Fail)
            .run(&backend, ops(&["a", "bad_1", "b", "bad_2"]));

        match result {
            Err(FeedError::FanoutFailed { failed, attempted, .. }) => {
                assert_eq!(failed, 2);
                assert_eq!(attempted, 4);
            }
            other => panic!("expected FanoutFailed, got {other:?}"),
        }
        assert_eq!(backend.count(Table::Timeline, "a").unwrap(), 1);
        assert_eq!(backend.count(Table::Timeline, "b").unwrap(), 1);
    }

    #[test]
    fn test_log_and_continue_policy() {
        let backend = Flaky(MemoryBackend::new());
        FanoutExecutor::new(3, FanoutErrorPolicy::LogAndContinue)
            .run(&backend, ops(&["a", "bad", "b"]))
            .unwrap();
        assert_eq!(backend.count(Table::Timeline, "b").unwrap(), 1);
    }
}
