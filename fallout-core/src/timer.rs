//! Shared Timer Wheel
//!
//! One background thread services delayed callbacks for every module in a
//! workload, so modules can schedule work without spawning threads of their
//! own. Callbacks run on the timer thread and should be short; long work
//! belongs in the module's own `run`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type TimerTask = Box<dyn FnOnce() + Send + 'static>;

struct Scheduled {
    deadline: Instant,
    seq: u64,
    task: TimerTask,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

#[derive(Default)]
struct TimerState {
    queue: Mutex<BinaryHeap<Reverse<Scheduled>>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    next_seq: AtomicU64,
}

/// Shared timer for delayed callbacks.
pub struct TimerWheel {
    state: Arc<TimerState>,
    thread: Option<JoinHandle<()>>,
}

impl TimerWheel {
    /// Start the timer thread.
    pub fn new() -> Self {
        let state = Arc::new(TimerState::default());
        let thread_state = state.clone();
        let thread = std::thread::Builder::new()
            .name("fallout-timer".to_string())
            .spawn(move || Self::service(thread_state))
            .ok();
        Self {
            state,
            thread,
        }
    }

    /// Schedule `task` to run after `delay` on the timer thread.
    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        let seq = self.state.next_seq.fetch_add(1, Ordering::Relaxed);
        let scheduled = Scheduled {
            deadline: Instant::now() + delay,
            seq,
            task: Box::new(task),
        };
        let mut queue = self.state.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push(Reverse(scheduled));
        self.state.wakeup.notify_one();
    }

    fn service(state: Arc<TimerState>) {
        let mut queue = state.queue.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if state.shutdown.load(Ordering::Acquire) {
                return;
            }

            let now = Instant::now();
            let mut due: Vec<TimerTask> = Vec::new();
            while queue
                .peek()
                .map(|Reverse(s)| s.deadline <= now)
                .unwrap_or(false)
            {
                if let Some(Reverse(scheduled)) = queue.pop() {
                    due.push(scheduled.task);
                }
            }

            if !due.is_empty() {
                drop(queue);
                for task in due {
                    task();
                }
                queue = state.queue.lock().unwrap_or_else(|e| e.into_inner());
                continue;
            }

            let wait = queue
                .peek()
                .map(|Reverse(s)| s.deadline.saturating_duration_since(now))
                .unwrap_or(Duration::from_millis(100));
            let (guard, _) = state
                .wakeup
                .wait_timeout(queue, wait)
                .unwrap_or_else(|e| e.into_inner());
            queue = guard;
        }
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::Release);
        self.state.wakeup.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_tasks_fire_after_their_delay() {
        let wheel = TimerWheel::new();
        let (tx, rx) = mpsc::channel();

        let start = Instant::now();
        wheel.schedule(Duration::from_millis(20), move || {
            tx.send(start.elapsed()).unwrap();
        });

        let elapsed = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(elapsed >= Duration::from_millis(20));
    }

    #[test]
    fn test_tasks_fire_in_deadline_order() {
        let wheel = TimerWheel::new();
        let (tx, rx) = mpsc::channel();

        for (delay_ms, label) in [(60u64, "late"), (10, "early"), (35, "middle")] {
            let tx = tx.clone();
            wheel.schedule(Duration::from_millis(delay_ms), move || {
                tx.send(label).unwrap();
            });
        }

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        }
        assert_eq!(order, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_drop_stops_the_timer_thread() {
        let wheel = TimerWheel::new();
        wheel.schedule(Duration::from_secs(3600), || {});
        drop(wheel);
    }
}
