//! The page an instance lives in: its document, listener registries and
//! event-loop queues.

mod broadcast;
mod document;
mod events;

use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use broadcast::{SubscriptionId, ThinkingChannel, ThinkingSignal};
pub use document::{Document, MemoryDocument, Point, Rect, Size};
pub use events::{EventBus, EventKind, EventTarget, HostEvent, ListenerId};

use crate::timeline::{
    FrameCallback, FrameId, FrameScheduler, HostClock, TaskQueue, TimerId, TimerQueue,
};
use crate::{BridgeError, Result};

/// Shared handle to everything page-global. Cloning is cheap and every clone
/// refers to the same page.
#[derive(Clone)]
pub struct Page {
    document: Arc<dyn Document>,
    events: EventBus,
    thinking: ThinkingChannel,
    timers: TimerQueue,
    frames: FrameScheduler,
    tasks: TaskQueue,
    clock: Arc<Mutex<HostClock>>,
}

impl Page {
    /// A fresh page over `document` with empty registries and the clock at zero.
    pub fn new(document: Arc<dyn Document>) -> Self {
        Self {
            document,
            events: EventBus::new(),
            thinking: ThinkingChannel::new(),
            timers: TimerQueue::new(),
            frames: FrameScheduler::new(),
            tasks: TaskQueue::new(),
            clock: Arc::new(Mutex::new(HostClock::default())),
        }
    }

    /// The host document.
    pub fn document(&self) -> &dyn Document {
        self.document.as_ref()
    }

    /// Listener registry for DOM-style events.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Channel carrying per-instance thinking signals.
    pub fn thinking(&self) -> &ThinkingChannel {
        &self.thinking
    }

    /// Queue for deferred completions.
    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    /// Current page time.
    pub fn now(&self) -> Duration {
        self.clock.lock().map(|c| c.now()).unwrap_or_default()
    }

    /// Convenience for hosts: delivers a DOM-style event.
    pub fn dispatch(&self, target: &EventTarget, kind: EventKind, event: &HostEvent) -> Result<usize> {
        self.events.dispatch(target, kind, event)
    }

    /// Runs `callback` once page time has moved `delay` past now.
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> Result<TimerId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.timers.schedule(self.now() + delay, Box::new(callback))
    }

    /// Cancels a pending timeout. Returns `false` if it already ran.
    pub fn clear_timeout(&self, id: TimerId) -> Result<bool> {
        self.timers.cancel(id)
    }

    /// Runs `callback` on the next [`Page::run_frame`].
    pub fn request_frame<F>(&self, callback: F) -> Result<FrameId>
    where
        F: FnOnce(Duration) + Send + 'static,
    {
        self.frames.request(Box::new(callback))
    }

    /// Cancels a frame request that has not run yet.
    pub fn cancel_frame(&self, id: FrameId) -> Result<bool> {
        self.frames.cancel(id)
    }

    /// Queues `task` for the next drain of the task queue.
    pub fn post_task<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tasks.post(Box::new(task))
    }

    /// Runs queued tasks until the queue is empty, including tasks posted by
    /// the ones being run. Returns how many ran.
    pub fn run_until_idle(&self) -> Result<usize> {
        let mut ran = 0;
        while let Some(task) = self.tasks.pop()? {
            task();
            ran += 1;
        }
        Ok(ran)
    }

    /// Moves page time forward, firing every timer that comes due. Pending
    /// tasks are drained before the clock moves and after each timer.
    pub fn advance(&self, delta: Duration) -> Result<usize> {
        self.run_until_idle()?;
        let now = {
            let mut clock = self
                .clock
                .lock()
                .map_err(|_| BridgeError::Poisoned("host clock"))?;
            clock.advance(delta);
            clock.now()
        };

        let mut fired = 0;
        while let Some(callback) = self.timers.pop_due(now)? {
            callback();
            fired += 1;
            self.run_until_idle()?;
        }
        Ok(fired)
    }

    /// Runs one display frame: every frame callback requested before this
    /// call receives the current page time.
    pub fn run_frame(&self) -> Result<usize> {
        let now = self.now();
        let callbacks: Vec<FrameCallback> = self.frames.take()?;
        let count = callbacks.len();
        for callback in callbacks {
            callback(now);
        }
        self.run_until_idle()?;
        Ok(count)
    }

    /// Timeouts scheduled and not yet fired.
    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.pending()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("events", &self.events)
            .field("thinking", &self.thinking)
            .field("timers", &self.timers)
            .field("frames", &self.frames)
            .field("tasks", &self.tasks)
            .finish()
    }
}
