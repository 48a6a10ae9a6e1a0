//! Host event-loop queues: timeouts, animation frames and deferred tasks.
//!
//! Nothing here runs on its own. The embedding host pumps the queues through
//! [`crate::Page`], which keeps all work on the host's single thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::{BridgeError, Result};

/// Work run once by a timer or the task queue.
pub type Callback = Box<dyn FnOnce() + Send>;
/// Work run once on the next frame, given the frame time.
pub type FrameCallback = Box<dyn FnOnce(Duration) + Send>;

/// Monotonic page time, advanced explicitly by the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostClock {
    now: Duration,
}

impl HostClock {
    /// Time elapsed since the page started.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&mut self, delta: Duration) {
        self.now += delta;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

struct ScheduledTimer {
    id: TimerId,
    due: Duration,
    callback: Callback,
}

#[derive(Default)]
struct TimerState {
    next_id: u64,
    timers: Vec<ScheduledTimer>,
}

/// One-shot timers ordered by due time, ties broken by scheduling order.
#[derive(Clone, Default)]
pub struct TimerQueue {
    state: Arc<Mutex<TimerState>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `callback` to run at page time `due`.
    pub fn schedule(&self, due: Duration, callback: Callback) -> Result<TimerId> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = TimerId(state.next_id);
        let index = state.timers.partition_point(|timer| timer.due <= due);
        state.timers.insert(index, ScheduledTimer { id, due, callback });
        Ok(id)
    }

    /// Cancels a pending timer. Returns `false` if it already fired or was
    /// cancelled.
    pub fn cancel(&self, id: TimerId) -> Result<bool> {
        let mut state = self.lock()?;
        let before = state.timers.len();
        state.timers.retain(|timer| timer.id != id);
        Ok(state.timers.len() != before)
    }

    /// Removes and returns the earliest timer due at or before `now`.
    pub fn pop_due(&self, now: Duration) -> Result<Option<Callback>> {
        let mut state = self.lock()?;
        match state.timers.first() {
            Some(timer) if timer.due <= now => Ok(Some(state.timers.remove(0).callback)),
            _ => Ok(None),
        }
    }

    pub fn pending(&self) -> usize {
        self.lock().map(|s| s.timers.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, TimerState>> {
        self.state
            .lock()
            .map_err(|_| BridgeError::Poisoned("timer queue"))
    }
}

#[derive(Default)]
struct FrameState {
    next_id: u64,
    pending: Vec<(FrameId, FrameCallback)>,
}

/// Callbacks waiting for the next display frame.
#[derive(Clone, Default)]
pub struct FrameScheduler {
    state: Arc<Mutex<FrameState>>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `callback` for the next frame.
    pub fn request(&self, callback: FrameCallback) -> Result<FrameId> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = FrameId(state.next_id);
        state.pending.push((id, callback));
        Ok(id)
    }

    /// Drops a frame request. Returns `false` if it already ran.
    pub fn cancel(&self, id: FrameId) -> Result<bool> {
        let mut state = self.lock()?;
        let before = state.pending.len();
        state.pending.retain(|(pending, _)| *pending != id);
        Ok(state.pending.len() != before)
    }

    /// Takes every callback queued so far. Callbacks requested while these
    /// run land in the next frame.
    pub fn take(&self) -> Result<Vec<FrameCallback>> {
        let mut state = self.lock()?;
        Ok(state.pending.drain(..).map(|(_, cb)| cb).collect())
    }

    pub fn pending(&self) -> usize {
        self.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, FrameState>> {
        self.state
            .lock()
            .map_err(|_| BridgeError::Poisoned("frame scheduler"))
    }
}

/// FIFO of deferred completions, such as renderer load callbacks.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Arc<Mutex<VecDeque<Callback>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task.
    pub fn post(&self, task: Callback) -> Result<()> {
        self.lock()?.push_back(task);
        Ok(())
    }

    /// Takes the oldest task, if any.
    pub fn pop(&self) -> Result<Option<Callback>> {
        Ok(self.lock()?.pop_front())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<Callback>>> {
        self.tasks
            .lock()
            .map_err(|_| BridgeError::Poisoned("task queue"))
    }
}

macro_rules! opaque_debug {
    ($($ty:ty => $count:ident),* $(,)?) => {
        $(impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("pending", &self.$count())
                    .finish()
            }
        })*
    };
}

opaque_debug!(TimerQueue => pending, FrameScheduler => pending, TaskQueue => len);

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn clock_accumulates_deltas() {
        let mut clock = HostClock::default();
        clock.advance(Duration::from_millis(250));
        clock.advance(Duration::from_millis(750));
        assert_eq!(clock.now(), Duration::from_secs(1));
    }

    #[test]
    fn timers_pop_in_due_order() {
        let queue = TimerQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, due) in [("late", 30), ("early", 10), ("tie", 10)] {
            let order = order.clone();
            queue
                .schedule(
                    Duration::from_millis(due),
                    Box::new(move || order.lock().unwrap().push(label)),
                )
                .unwrap();
        }

        assert!(queue.pop_due(Duration::from_millis(5)).unwrap().is_none());
        while let Some(callback) = queue.pop_due(Duration::from_millis(30)).unwrap() {
            callback();
        }
        assert_eq!(*order.lock().unwrap(), vec!["early", "tie", "late"]);
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let queue = TimerQueue::new();
        let id = queue.schedule(Duration::ZERO, Box::new(|| {})).unwrap();
        assert!(queue.cancel(id).unwrap());
        assert!(!queue.cancel(id).unwrap());
        assert!(queue.pop_due(Duration::from_secs(60)).unwrap().is_none());
    }

    #[test]
    fn frame_requests_can_be_cancelled() {
        let frames = FrameScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let keep = frames
            .request(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        let drop_me = frames.request(Box::new(|_| panic!("cancelled"))).unwrap();
        assert_ne!(keep, drop_me);
        assert!(frames.cancel(drop_me).unwrap());

        for callback in frames.take().unwrap() {
            callback(Duration::ZERO);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(frames.pending(), 0);
    }
}
