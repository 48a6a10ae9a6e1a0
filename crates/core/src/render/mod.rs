//! Contract with the animation renderer, plus a headless implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::config::{Alignment, Fit, InstanceConfig};
use crate::timeline::TaskQueue;
use crate::{BridgeError, Result};

/// Declared type of a state machine input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputKind {
    Numeric,
    Boolean,
    Trigger,
}

/// A renderer-owned input slot. The bridge only ever holds references.
pub trait InputSlot: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> InputKind;

    fn number(&self) -> f32;

    fn set_number(&self, value: f32);

    fn boolean(&self) -> bool;

    fn set_boolean(&self, value: bool);

    fn fire(&self);
}

/// Shared handle to a renderer-owned slot.
pub type SlotRef = Arc<dyn InputSlot>;

/// Everything the renderer needs to start loading one animation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub src: String,
    pub canvas_id: String,
    pub autoplay: bool,
    pub artboard: Option<String>,
    pub state_machines: Vec<String>,
    pub animations: Vec<String>,
    pub fit: Fit,
    pub alignment: Alignment,
}

impl LoadRequest {
    /// A configured state machine takes precedence over the animation list.
    pub fn from_config(config: &InstanceConfig) -> Self {
        let (state_machines, animations) = match &config.state_machine {
            Some(name) => (vec![name.clone()], Vec::new()),
            None => (Vec::new(), config.animations.clone()),
        };
        Self {
            src: config.src.clone(),
            canvas_id: config.canvas_id.clone(),
            autoplay: config.autoplay,
            artboard: config.artboard.clone(),
            state_machines,
            animations,
            fit: config.fit,
            alignment: config.alignment,
        }
    }
}

type ReadyHook = Arc<dyn Fn() + Send + Sync>;
type FailedHook = Arc<dyn Fn(String) + Send + Sync>;

/// Handed to [`Renderer::load`] to report completion. Only the first report
/// counts, and it is delivered through the page task queue rather than
/// synchronously.
#[derive(Clone)]
pub struct LoadNotifier {
    tasks: TaskQueue,
    settled: Arc<AtomicBool>,
    on_ready: ReadyHook,
    on_failed: FailedHook,
}

impl LoadNotifier {
    /// Wraps the completion hooks. Neither runs until the task queue drains.
    pub fn new<R, F>(tasks: TaskQueue, on_ready: R, on_failed: F) -> Self
    where
        R: Fn() + Send + Sync + 'static,
        F: Fn(String) + Send + Sync + 'static,
    {
        Self {
            tasks,
            settled: Arc::new(AtomicBool::new(false)),
            on_ready: Arc::new(on_ready),
            on_failed: Arc::new(on_failed),
        }
    }

    /// Reports a successful load.
    pub fn ready(&self) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let hook = self.on_ready.clone();
        self.tasks.post(Box::new(move || hook()))
    }

    /// Reports a failed load with a human-readable reason.
    pub fn failed(&self, reason: impl Into<String>) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let hook = self.on_failed.clone();
        let reason = reason.into();
        self.tasks.post(Box::new(move || hook(reason)))
    }

    /// Whether a completion has already been reported.
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LoadNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadNotifier")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Capability set the bridge needs from an animation renderer.
pub trait Renderer: Send {
    /// Starts loading. Completion is reported once through `notifier`; an
    /// `Err` here means loading could not even begin.
    fn load(&mut self, request: &LoadRequest, notifier: LoadNotifier) -> Result<()>;

    /// Re-fits rendering output to the current canvas dimensions.
    fn resize_to_surface(&mut self);

    fn list_inputs(&self, state_machine: &str) -> Vec<SlotRef>;
}

/// Concrete value written to a headless input, kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub target: String,
    pub value: InputWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputWrite {
    Number(f32),
    Boolean(bool),
    Fire,
}

#[derive(Debug, Default)]
struct SlotState {
    number: f32,
    boolean: bool,
    fired: usize,
}

/// Input slot backed by memory, recording every write into its renderer's
/// update log.
pub struct MemorySlot {
    name: String,
    kind: InputKind,
    state: Mutex<SlotState>,
    log: Arc<Mutex<Vec<ParameterUpdate>>>,
}

impl MemorySlot {
    fn record(&self, value: InputWrite) {
        tracing::trace!(input = %self.name, ?value, "headless input written");
        if let Ok(mut log) = self.log.lock() {
            log.push(ParameterUpdate {
                target: self.name.clone(),
                value,
            });
        }
    }

    fn state(&self) -> Option<MutexGuard<'_, SlotState>> {
        self.state.lock().ok()
    }

    /// How many times the trigger has fired.
    pub fn fired(&self) -> usize {
        self.state().map(|s| s.fired).unwrap_or(0)
    }
}

impl InputSlot for MemorySlot {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> InputKind {
        self.kind
    }

    fn number(&self) -> f32 {
        self.state().map(|s| s.number).unwrap_or_default()
    }

    fn set_number(&self, value: f32) {
        if let Some(mut state) = self.state() {
            state.number = value;
        }
        self.record(InputWrite::Number(value));
    }

    fn boolean(&self) -> bool {
        self.state().map(|s| s.boolean).unwrap_or_default()
    }

    fn set_boolean(&self, value: bool) {
        if let Some(mut state) = self.state() {
            state.boolean = value;
        }
        self.record(InputWrite::Boolean(value));
    }

    fn fire(&self) {
        if let Some(mut state) = self.state() {
            state.fired += 1;
        }
        self.record(InputWrite::Fire);
    }
}

impl fmt::Debug for MemorySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySlot")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// How a [`HeadlessRenderer`] answers load requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadBehaviour {
    /// Reports ready as soon as loading starts.
    #[default]
    Immediate,
    /// Waits for [`HeadlessRenderer::complete_load`] or
    /// [`HeadlessRenderer::fail_load`].
    Manual,
    /// Refuses to start loading at all.
    Refuse,
}

#[derive(Debug, Default)]
struct HeadlessState {
    behaviour: LoadBehaviour,
    slots: Vec<Arc<MemorySlot>>,
    requests: Vec<LoadRequest>,
    pending: Option<LoadNotifier>,
    resizes: usize,
}

/// Renderer without any output. It declares a fixed set of inputs for every
/// state machine and records what the bridge writes into them.
///
/// Clones share state, so a host can keep one to drive and inspect the
/// renderer after handing another to an instance.
#[derive(Debug, Clone)]
pub struct HeadlessRenderer {
    state: Arc<Mutex<HeadlessState>>,
    log: Arc<Mutex<Vec<ParameterUpdate>>>,
}

impl HeadlessRenderer {
    /// A renderer declaring `inputs` for every state machine. Loads
    /// complete immediately unless told otherwise.
    pub fn new<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = (S, InputKind)>,
        S: Into<String>,
    {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slots = inputs
            .into_iter()
            .map(|(name, kind)| {
                Arc::new(MemorySlot {
                    name: name.into(),
                    kind,
                    state: Mutex::new(SlotState::default()),
                    log: log.clone(),
                })
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(HeadlessState {
                slots,
                ..Default::default()
            })),
            log,
        }
    }

    /// Changes how subsequent loads are answered.
    pub fn with_behaviour(self, behaviour: LoadBehaviour) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.behaviour = behaviour;
        }
        self
    }

    /// Reports success for the load waiting under [`LoadBehaviour::Manual`].
    pub fn complete_load(&self) -> Result<()> {
        match self.lock()?.pending.take() {
            Some(notifier) => notifier.ready(),
            None => Err(BridgeError::msg("no load in progress")),
        }
    }

    /// Reports failure for the load waiting under [`LoadBehaviour::Manual`].
    pub fn fail_load(&self, reason: &str) -> Result<()> {
        match self.lock()?.pending.take() {
            Some(notifier) => notifier.failed(reason),
            None => Err(BridgeError::msg("no load in progress")),
        }
    }

    /// Every load request received, oldest first.
    pub fn requests(&self) -> Vec<LoadRequest> {
        self.lock().map(|s| s.requests.clone()).unwrap_or_default()
    }

    /// How often the output was re-fitted to its canvas.
    pub fn resize_count(&self) -> usize {
        self.lock().map(|s| s.resizes).unwrap_or(0)
    }

    /// Current value of a numeric slot.
    pub fn number(&self, name: &str) -> Option<f32> {
        self.slot(name).map(|slot| slot.number())
    }

    /// Current value of a boolean slot.
    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.slot(name).map(|slot| slot.boolean())
    }

    /// Fire count of a trigger slot, zero when it does not exist.
    pub fn fired(&self, name: &str) -> usize {
        self.slot(name).map(|slot| slot.fired()).unwrap_or(0)
    }

    /// Every write made so far, oldest first.
    pub fn updates(&self) -> Vec<ParameterUpdate> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Final value per written input, in first-write order.
    pub fn latest_updates(&self) -> Vec<ParameterUpdate> {
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, InputWrite> = HashMap::new();
        for update in self.updates() {
            if !latest.contains_key(&update.target) {
                order.push(update.target.clone());
            }
            latest.insert(update.target, update.value);
        }
        order
            .into_iter()
            .filter_map(|target| {
                latest
                    .remove(&target)
                    .map(|value| ParameterUpdate { target, value })
            })
            .collect()
    }

    fn slot(&self, name: &str) -> Option<Arc<MemorySlot>> {
        self.lock()
            .ok()
            .and_then(|s| s.slots.iter().find(|slot| slot.name == name).cloned())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HeadlessState>> {
        self.state
            .lock()
            .map_err(|_| BridgeError::Poisoned("headless renderer"))
    }
}

impl Renderer for HeadlessRenderer {
    fn load(&mut self, request: &LoadRequest, notifier: LoadNotifier) -> Result<()> {
        let behaviour = {
            let mut state = self.lock()?;
            state.requests.push(request.clone());
            state.behaviour
        };
        match behaviour {
            LoadBehaviour::Immediate => notifier.ready(),
            LoadBehaviour::Manual => {
                self.lock()?.pending = Some(notifier);
                Ok(())
            }
            LoadBehaviour::Refuse => Err(BridgeError::Load(format!(
                "cannot open `{}`",
                request.src
            ))),
        }
    }

    fn resize_to_surface(&mut self) {
        if let Ok(mut state) = self.lock() {
            state.resizes += 1;
        }
    }

    fn list_inputs(&self, _state_machine: &str) -> Vec<SlotRef> {
        self.lock()
            .map(|s| {
                s.slots
                    .iter()
                    .map(|slot| slot.clone() as SlotRef)
                    .collect()
            })
            .unwrap_or_default()
    }
}
