//! Runs worklet invocations on their own threads under a wall-clock timeout.

use crate::errors::{WorkletError, WorkletResult};
use crate::reporting::{Phase, ReportEffects, WorkletScope};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of one invocation; effects are empty when it timed out
#[derive(Debug)]
pub struct Invocation<T> {
    pub result: WorkletResult<T>,
    pub effects: ReportEffects,
    pub elapsed: Duration,
}

impl<T> Invocation<T> {
    fn failed(error: WorkletError, elapsed: Duration) -> Self {
        Self { result: Err(error), effects: ReportEffects::default(), elapsed }
    }
}

/// Counters over everything the host ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub invocations: u64,
    pub timeouts: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Default)]
pub struct WorkletHost {
    stats: Arc<Mutex<HostStats>>,
}

struct Completed<T> {
    result: WorkletResult<T>,
    effects: ReportEffects,
    started: Instant,
    finished: Instant,
}

/// Invocations running in the background; collect them with `wait`
pub struct PendingBatch<T> {
    phase: Phase,
    timeout: Duration,
    count: usize,
    spawned: Instant,
    cancelled: Arc<AtomicBool>,
    rx: Receiver<Completed<T>>,
    stats: Arc<Mutex<HostStats>>,
}

impl WorkletHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> HostStats {
        *self.stats.lock()
    }

    /// Run `items` one after another on a single thread sharing `state`.
    ///
    /// Each call gets its own scope and its own `timeout`; once one call times
    /// out, the remaining ones are not run.
    pub fn spawn_batch<S, I, T, F>(&self, phase: Phase, timeout: Duration, mut state: S, items: Vec<I>, call: F) -> PendingBatch<T>
    where
        S: Send + 'static,
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(&mut S, I, &mut WorkletScope) -> WorkletResult<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let count = items.len();
        let flag = cancelled.clone();
        let spawned = Instant::now();
        let spawn_result = thread::Builder::new().name(format!("worklet-{}", phase.name())).spawn(move || {
            for item in items {
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                let mut scope = WorkletScope::new(phase, flag.clone());
                let started = Instant::now();
                let result = call(&mut state, item, &mut scope);
                let done = Completed { result, effects: scope.into_effects(), started, finished: Instant::now() };
                if tx.send(done).is_err() {
                    break;
                }
            }
        });
        if let Err(err) = spawn_result {
            tracing::error!(phase = phase.name(), error = %err, "failed to spawn worklet thread");
        }
        PendingBatch { phase, timeout, count, spawned, cancelled, rx, stats: self.stats.clone() }
    }

    /// Run a single invocation and wait for it
    pub fn run<S, T, F>(&self, phase: Phase, timeout: Duration, state: S, call: F) -> Invocation<T>
    where
        S: Send + 'static,
        T: Send + 'static,
        F: FnOnce(&mut S, &mut WorkletScope) -> WorkletResult<T> + Send + 'static,
    {
        let call = Mutex::new(Some(call));
        let batch = self.spawn_batch(phase, timeout, state, vec![()], move |state, (), scope| match call.lock().take() {
            Some(call) => call(state, scope),
            None => Err(WorkletError::thrown("invocation already ran")),
        });
        batch.wait(None).pop().unwrap_or_else(|| Invocation::failed(WorkletError::thrown("no result"), Duration::ZERO))
    }
}

impl<T> PendingBatch<T> {
    /// Collect every invocation of the batch in order.
    ///
    /// `deadline` additionally bounds the whole batch, for cumulative timeouts.
    pub fn wait(self, deadline: Option<Instant>) -> Vec<Invocation<T>> {
        let mut out = Vec::with_capacity(self.count);
        let mut call_started = self.spawned;
        while out.len() < self.count {
            let mut call_deadline = call_started + self.timeout;
            let mut cumulative = false;
            if let Some(deadline) = deadline {
                if deadline < call_deadline {
                    call_deadline = deadline;
                    cumulative = true;
                }
            }
            let wait_for = call_deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(wait_for) {
                Ok(done) => {
                    let elapsed = done.finished.duration_since(done.started);
                    if let Err(err) = &done.result {
                        tracing::debug!(phase = self.phase.name(), error = %err, "worklet invocation failed");
                    }
                    call_started = done.finished;
                    out.push(Invocation { result: done.result, effects: done.effects, elapsed });
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.cancelled.store(true, Ordering::Relaxed);
                    let timeout_ms = if cumulative {
                        deadline.map(|d| d.saturating_duration_since(self.spawned).as_millis() as u64).unwrap_or(0)
                    } else {
                        self.timeout.as_millis() as u64
                    };
                    tracing::warn!(phase = self.phase.name(), timeout_ms, cumulative, "worklet invocation timed out");
                    while out.len() < self.count {
                        out.push(Invocation::failed(
                            WorkletError::Timeout { phase: self.phase.name(), timeout_ms },
                            Instant::now().duration_since(call_started),
                        ));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::error!(phase = self.phase.name(), "worklet thread ended without a result");
                    while out.len() < self.count {
                        out.push(Invocation::failed(WorkletError::thrown("worklet thread ended without a result"), Duration::ZERO));
                    }
                }
            }
        }
        let mut stats = self.stats.lock();
        for invocation in &out {
            stats.invocations += 1;
            match invocation.result {
                Err(WorkletError::Timeout { .. }) => stats.timeouts += 1,
                Err(_) => stats.failures += 1,
                Ok(_) => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ContractError;

    #[test]
    fn test_run_returns_result_and_effects() {
        let host = WorkletHost::new();
        let invocation = host.run(Phase::ReportWin, Duration::from_millis(500), 21, |state: &mut i32, scope| {
            scope.send_report_to("https://report.test/win")?;
            Ok(*state * 2)
        });
        assert_eq!(invocation.result, Ok(42));
        assert_eq!(invocation.effects.report_url.unwrap().as_str(), "https://report.test/win");
    }

    #[test]
    fn test_timeout_cancels_and_discards_effects() {
        let host = WorkletHost::new();
        let invocation = host.run(Phase::ReportWin, Duration::from_millis(20), (), |_: &mut (), scope| {
            scope.send_report_to("https://report.test/win")?;
            while !scope.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        });
        assert_eq!(invocation.result, Err(WorkletError::Timeout { phase: "reportWin", timeout_ms: 20 }));
        assert_eq!(invocation.effects, ReportEffects::default());
        assert_eq!(host.stats().timeouts, 1);
    }

    #[test]
    fn test_batch_shares_state_and_stops_after_timeout() {
        let host = WorkletHost::new();
        let batch = host.spawn_batch(Phase::GenerateBid, Duration::from_millis(50), 0u32, vec![1u64, 200, 1], |count, sleep_ms, scope| {
            *count += 1;
            let until = Instant::now() + Duration::from_millis(sleep_ms);
            while Instant::now() < until && !scope.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(*count)
        });
        let results: Vec<_> = batch.wait(None).into_iter().map(|i| i.result).collect();
        assert_eq!(results[0], Ok(1));
        assert!(matches!(results[1], Err(WorkletError::Timeout { .. })));
        assert!(matches!(results[2], Err(WorkletError::Timeout { .. })));
    }

    #[test]
    fn test_cumulative_deadline() {
        let host = WorkletHost::new();
        let batch = host.spawn_batch(Phase::GenerateBid, Duration::from_millis(500), (), vec![(), ()], |_, (), scope| {
            while !scope.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        });
        let start = Instant::now();
        let results = batch.wait(Some(Instant::now() + Duration::from_millis(30)));
        assert!(start.elapsed() < Duration::from_millis(400));
        assert!(results.iter().all(|i| matches!(i.result, Err(WorkletError::Timeout { .. }))));
    }

    #[test]
    fn test_thrown_errors_keep_effects() {
        let host = WorkletHost::new();
        let invocation = host.run(Phase::GenerateBid, Duration::from_millis(500), (), |_: &mut (), scope| -> WorkletResult<()> {
            scope.console_log("about to throw");
            Err(ContractError::malformed("bid", "nope").into())
        });
        assert!(matches!(invocation.result, Err(WorkletError::Contract(_))));
        assert_eq!(invocation.effects.console, vec!["about to throw".to_string()]);
        assert_eq!(host.stats().failures, 1);
    }
}
