//! Cancellable periodic tasks
//!
//! Control loops (gate ticks, measurement ticks) run on a fixed period on
//! the tokio runtime. Each loop is owned by a [`PeriodicTask`] handle:
//! - `cancel` guarantees no tick body starts or is still running once it
//!   returns
//! - dropping the handle cancels the task, so timers never outlive their owner
//! - a failing tick is logged and skipped; the loop keeps running

use crate::domain::audio::{AudioError, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

/// Handle to a running periodic task
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    period: Duration,
    // Held for the whole duration of a tick body; `false` once cancelled.
    active: Arc<Mutex<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn `tick` on the current tokio runtime, firing every `period`
    ///
    /// The first tick fires immediately.
    pub fn spawn<F>(name: &'static str, period: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(AudioError::InvalidConfiguration(format!(
                "task '{name}' needs a non-zero period"
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AudioError::Runtime(format!("cannot start '{name}': {e}")))?;

        let active = Arc::new(Mutex::new(true));
        let flag = Arc::clone(&active);

        let handle = runtime.spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let keep_going = {
                    let running = flag.lock().unwrap_or_else(PoisonError::into_inner);
                    if *running {
                        if let Err(e) = tick() {
                            warn!(task = name, error = %e, "Tick failed, skipping");
                        }
                    }
                    *running
                };
                if !keep_going {
                    break;
                }
            }
        });

        debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");

        Ok(Self {
            name,
            period,
            active,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_active(&self) -> bool {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop the task; no tick runs after this returns
    ///
    /// Waits for an in-flight tick to finish. Must not be called from
    /// inside the task's own tick closure.
    pub fn cancel(&mut self) {
        {
            let mut running = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if !*running {
                return;
            }
            *running = false;
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        debug!(task = self.name, "Periodic task cancelled");
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_task_ticks_periodically() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        let task = PeriodicTask::spawn("counter", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        time::sleep(Duration::from_millis(55)).await;

        assert!(task.is_active());
        assert!(count.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tick_after_cancel() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        let mut task = PeriodicTask::spawn("counter", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        time::sleep(Duration::from_millis(25)).await;
        task.cancel();
        let after_cancel = count.load(Ordering::SeqCst);

        time::sleep(Duration::from_millis(100)).await;

        assert!(!task.is_active());
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_tick_keeps_loop_alive() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        let _task = PeriodicTask::spawn("flaky", Duration::from_millis(10), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Err(AudioError::NotReady("meter".to_string()))
            } else {
                Ok(())
            }
        })
        .unwrap();

        time::sleep(Duration::from_millis(55)).await;
        assert!(count.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        let task = PeriodicTask::spawn("dropped", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        time::sleep(Duration::from_millis(15)).await;
        drop(task);
        let after_drop = count.load(Ordering::SeqCst);

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }

    #[test]
    fn test_spawn_without_runtime_fails() {
        let result = PeriodicTask::spawn("orphan", Duration::from_millis(10), || Ok(()));
        assert!(matches!(result, Err(AudioError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let result = PeriodicTask::spawn("busy", Duration::ZERO, || Ok(()));
        assert!(matches!(result, Err(AudioError::InvalidConfiguration(_))));
    }
}
