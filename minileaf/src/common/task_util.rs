use crate::SCHEDULER;
use parking_lot::Mutex;
use std::time::Duration;
use timer::{Guard, Timer};

/// Spawn a one-shot task on a fresh thread.
///
/// Used for background index builds; the caller keeps a cancel flag and the
/// task checks it cooperatively.
pub fn async_task<OP>(op: OP)
where
    OP: FnOnce() + Send + 'static,
{
    std::thread::spawn(op);
}

#[inline]
pub fn schedule_task<F>(duration: Duration, f: F)
where
    F: 'static + FnMut() + Send,
{
    SCHEDULER.schedule(duration, f);
}

#[inline]
pub fn stop_scheduled_tasks() {
    SCHEDULER.stop();
}

/// Process-wide repeating-task scheduler.
///
/// Snapshotters and TTL sweepers register here; `stop` drops every guard,
/// which cancels all pending repetitions. Task bodies must catch their own
/// errors; a failing background task is logged, never fatal.
pub(crate) struct Scheduler {
    timer: Timer,
    guards: Mutex<Vec<Guard>>,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            timer: Timer::new(),
            guards: Mutex::from(Vec::with_capacity(8)),
        }
    }

    #[inline]
    pub fn schedule<F>(&self, duration: Duration, f: F)
    where
        F: 'static + FnMut() + Send,
    {
        match chrono::Duration::from_std(duration) {
            Ok(chrono_duration) => {
                let guard = self.timer.schedule_repeating(chrono_duration, f);
                self.guards.lock().push(guard);
            }
            Err(e) => {
                log::error!(
                    "Failed to convert duration to chrono::Duration: {}, skipping task scheduling",
                    e
                );
            }
        }
    }

    #[inline]
    pub fn stop(&self) {
        self.guards.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_async_task() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = Arc::clone(&flag);
        async_task(move || {
            flag_clone.store(true, Ordering::Relaxed);
        });

        thread::sleep(Duration::from_millis(200));
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_scheduler_fires_repeatedly() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        scheduler.schedule(Duration::from_millis(30), move || {
            counter_clone.fetch_add(1, Ordering::Relaxed);
        });

        thread::sleep(Duration::from_millis(200));
        assert!(counter.load(Ordering::Relaxed) >= 2);
    }

    #[test]
    fn test_scheduler_stop_cancels_tasks() {
        let scheduler = Scheduler::new();
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = Arc::clone(&flag);

        scheduler.schedule(Duration::from_millis(100), move || {
            flag_clone.store(true, Ordering::Relaxed);
        });

        scheduler.stop();
        thread::sleep(Duration::from_millis(200));
        assert!(!flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_scheduler_rejects_out_of_range_duration() {
        let scheduler = Scheduler::new();
        let out_of_range = Duration::from_secs(u64::MAX);

        scheduler.schedule(out_of_range, move || {});
        assert_eq!(scheduler.guards.lock().len(), 0);
    }
}
