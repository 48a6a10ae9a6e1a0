use std::sync::{Arc, Mutex, MutexGuard};

use crate::{host::Point, BridgeError, Result};

/// Where a listener is attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Window,
    Element(String),
}

impl EventTarget {
    /// Targets the element with the given id.
    pub fn element(id: impl Into<String>) -> Self {
        Self::Element(id.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PointerMove,
    PointerDown,
    TouchMove,
    TouchEnd,
    Click,
    Focus,
    Blur,
    Resize,
}

/// Payload of a host event. Pointer events carry client coordinates, touch
/// events carry their touch points; the rest carry nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostEvent {
    pub client: Option<Point>,
    pub touches: Vec<Point>,
}

impl HostEvent {
    /// A mouse or pen event at client coordinates.
    pub fn pointer(x: f64, y: f64) -> Self {
        Self {
            client: Some(Point::new(x, y)),
            touches: Vec::new(),
        }
    }

    /// A touch event carrying the given touch points.
    pub fn touch(points: impl IntoIterator<Item = Point>) -> Self {
        Self {
            client: None,
            touches: points.into_iter().collect(),
        }
    }

    /// Client coordinates, falling back to the first touch point.
    pub fn position(&self) -> Option<Point> {
        self.client.or_else(|| self.touches.first().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&HostEvent) + Send + Sync>;

struct Listener {
    id: ListenerId,
    target: EventTarget,
    kind: EventKind,
    once: bool,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<Listener>,
}

/// Page-scoped listener registry.
///
/// Handlers run after the registry lock is released, so a handler may add or
/// remove listeners (including itself).
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener that stays until [`EventBus::remove`].
    pub fn listen<F>(&self, target: EventTarget, kind: EventKind, handler: F) -> Result<ListenerId>
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        self.register(target, kind, false, Arc::new(handler))
    }

    /// Registers a listener that is removed right before its first call.
    pub fn listen_once<F>(
        &self,
        target: EventTarget,
        kind: EventKind,
        handler: F,
    ) -> Result<ListenerId>
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        self.register(target, kind, true, Arc::new(handler))
    }

    /// Removes a listener. Returns `false` when it was already gone.
    pub fn remove(&self, id: ListenerId) -> Result<bool> {
        let mut registry = self.lock()?;
        let before = registry.listeners.len();
        registry.listeners.retain(|listener| listener.id != id);
        Ok(registry.listeners.len() != before)
    }

    /// Delivers `event` to every listener on `target` for `kind`, in
    /// registration order. A listener removed by an earlier handler in the
    /// same dispatch is skipped, and listeners added during dispatch wait for
    /// the next one. Returns the number of handlers invoked.
    pub fn dispatch(&self, target: &EventTarget, kind: EventKind, event: &HostEvent) -> Result<usize> {
        let candidates: Vec<ListenerId> = self
            .lock()?
            .listeners
            .iter()
            .filter(|l| l.kind == kind && &l.target == target)
            .map(|l| l.id)
            .collect();

        let mut invoked = 0;
        for id in candidates {
            let handler = {
                let mut registry = self.lock()?;
                let Some(index) = registry.listeners.iter().position(|l| l.id == id) else {
                    continue;
                };
                if registry.listeners[index].once {
                    registry.listeners.remove(index).handler
                } else {
                    registry.listeners[index].handler.clone()
                }
            };
            handler(event);
            invoked += 1;
        }
        Ok(invoked)
    }

    /// Number of registered listeners across all targets.
    pub fn listener_count(&self) -> usize {
        self.lock().map(|r| r.listeners.len()).unwrap_or(0)
    }

    fn register(
        &self,
        target: EventTarget,
        kind: EventKind,
        once: bool,
        handler: Handler,
    ) -> Result<ListenerId> {
        let mut registry = self.lock()?;
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry.listeners.push(Listener {
            id,
            target,
            kind,
            once,
            handler,
        });
        Ok(id)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| BridgeError::Poisoned("event registry"))
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
