//! Lifecycle of one animation surface: load, resize tracking, signal wiring,
//! fallback on timeout and teardown.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::{AudioBackend, AudioBridge, AudioSettings};
use crate::config::InstanceConfig;
use crate::host::{EventKind, EventTarget, HostEvent, ListenerId, Page, Size, SubscriptionId};
use crate::pointer::PointerNormalizer;
use crate::render::{LoadNotifier, LoadRequest, Renderer};
use crate::router::{InputRouter, InputValue};
use crate::timeline::TimerId;
use crate::{BridgeError, Result};

/// How long the renderer gets to report a successful load.
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(8);

/// Class added to the container when an animation cannot be shown.
pub const FALLBACK_CLASS: &str = "rive-bridge-error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstanceState {
    Idle,
    Loading,
    /// Terminal: the animation is running and inputs are wired.
    Ready,
    /// Terminal: the fallback is showing.
    Failed,
}

struct Controller {
    state: InstanceState,
    renderer: Box<dyn Renderer>,
    router: InputRouter,
    listeners: Vec<ListenerId>,
    thinking: Option<SubscriptionId>,
    load_timer: Option<TimerId>,
    observing_resize: bool,
    fallback_applied: bool,
    disposed: bool,
}

struct InstanceInner {
    config: InstanceConfig,
    page: Page,
    pointer: PointerNormalizer,
    audio: AudioBridge,
    controller: Mutex<Controller>,
}

/// Drives one animation surface from construction to disposal.
#[derive(Clone)]
pub struct AnimationInstance {
    inner: Arc<InstanceInner>,
}

impl AnimationInstance {
    /// Creates an idle instance. Nothing touches the page until
    /// [`AnimationInstance::start`].
    pub fn new(
        config: InstanceConfig,
        page: Page,
        renderer: Box<dyn Renderer>,
        audio_backend: Box<dyn AudioBackend>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<InstanceInner>| {
            let settings = AudioSettings::from_config(&config);
            let (level_weak, level_input) = (weak.clone(), settings.level_input.clone());
            let (talking_weak, talking_input) = (weak.clone(), settings.talking_input.clone());
            let audio = AudioBridge::new(
                page.clone(),
                settings,
                audio_backend,
                config.debug,
                move |level| {
                    with_inner(&level_weak, |inner| {
                        inner.with_router(|router| router.set_number(&level_input, level))
                    })
                },
                move |talking| {
                    with_inner(&talking_weak, |inner| {
                        inner.with_router(|router| router.set_boolean(&talking_input, talking))
                    })
                },
            );

            InstanceInner {
                pointer: PointerNormalizer::from_config(&config),
                controller: Mutex::new(Controller {
                    state: InstanceState::Idle,
                    renderer,
                    router: InputRouter::new(config.debug),
                    listeners: Vec::new(),
                    thinking: None,
                    load_timer: None,
                    observing_resize: false,
                    fallback_applied: false,
                    disposed: false,
                }),
                config,
                page,
                audio,
            }
        });
        Self { inner }
    }

    /// Identifier used to address thinking signals.
    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    /// The record this instance was built from.
    pub fn config(&self) -> &InstanceConfig {
        &self.inner.config
    }

    /// The instance's audio bridge.
    pub fn audio(&self) -> &AudioBridge {
        &self.inner.audio
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InstanceState {
        self.inner
            .lock()
            .map(|ctl| ctl.state)
            .unwrap_or(InstanceState::Failed)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().map(|ctl| ctl.disposed).unwrap_or(true)
    }

    /// Names of the inputs captured from the loaded state machine, sorted.
    pub fn input_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|ctl| ctl.router.names())
            .unwrap_or_default()
    }

    /// Last value the router wrote (or read) for an input.
    pub fn input_value(&self, name: &str) -> Option<InputValue> {
        self.inner.lock().ok().and_then(|ctl| ctl.router.value(name))
    }

    /// Begins loading. Stays idle when the container or canvas is missing,
    /// and moves straight to `Failed` when the renderer refuses to start.
    /// Errors only surface for broken page plumbing.
    pub fn start(&self) -> Result<()> {
        self.inner.start()
    }

    /// Removes every listener, cancels pending work and releases the audio
    /// source. Safe to call more than once.
    pub fn dispose(&self) -> Result<()> {
        self.inner.dispose()
    }
}

impl std::fmt::Debug for AnimationInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationInstance")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

fn with_inner(weak: &Weak<InstanceInner>, f: impl FnOnce(&Arc<InstanceInner>)) {
    if let Some(inner) = weak.upgrade() {
        f(&inner);
    }
}

impl InstanceInner {
    fn lock(&self) -> Result<MutexGuard<'_, Controller>> {
        self.controller
            .lock()
            .map_err(|_| BridgeError::Poisoned("instance controller"))
    }

    /// Runs `f` against the router while the instance is live.
    fn with_router(&self, f: impl FnOnce(&mut InputRouter)) {
        if let Ok(mut ctl) = self.lock() {
            if ctl.state == InstanceState::Ready && !ctl.disposed {
                f(&mut ctl.router);
            }
        }
    }

    fn canvas(&self) -> EventTarget {
        EventTarget::element(self.config.canvas_id.clone())
    }

    fn start(self: &Arc<Self>) -> Result<()> {
        let config = &self.config;
        let document = self.page.document();
        if !document.contains(&config.container_id) || !document.contains(&config.canvas_id) {
            diag!(config.debug, instance = %config.id, "container or canvas missing");
            return Ok(());
        }

        let mut ctl = self.lock()?;
        if ctl.state != InstanceState::Idle || ctl.disposed {
            return Ok(());
        }
        ctl.state = InstanceState::Loading;

        let ready = Arc::downgrade(self);
        let failed = Arc::downgrade(self);
        let notifier = LoadNotifier::new(
            self.page.tasks().clone(),
            move || with_inner(&ready, |inner| inner.on_ready()),
            move |reason| with_inner(&failed, |inner| inner.on_failed(&reason)),
        );

        if let Err(err) = ctl.renderer.load(&LoadRequest::from_config(config), notifier) {
            diag!(config.debug, instance = %config.id, error = %err, "failed to start renderer");
            self.fail(&mut ctl, &err.to_string());
            return Ok(());
        }

        let timeout = Arc::downgrade(self);
        ctl.load_timer = Some(self.page.set_timeout(LOAD_TIMEOUT, move || {
            with_inner(&timeout, |inner| {
                diag!(inner.config.debug, instance = %inner.config.id, "timed out waiting for renderer");
                inner.on_failed("load timed out");
            })
        })?);
        Ok(())
    }

    fn on_failed(&self, reason: &str) {
        if let Ok(mut ctl) = self.lock() {
            self.fail(&mut ctl, reason);
        }
    }

    fn fail(&self, ctl: &mut Controller, reason: &str) {
        if ctl.state != InstanceState::Loading || ctl.disposed {
            return;
        }
        ctl.state = InstanceState::Failed;
        if let Some(timer) = ctl.load_timer.take() {
            let _ = self.page.clear_timeout(timer);
        }
        self.show_fallback(ctl, reason);
    }

    fn show_fallback(&self, ctl: &mut Controller, reason: &str) {
        if ctl.fallback_applied {
            return;
        }
        ctl.fallback_applied = true;
        tracing::warn!(instance = %self.config.id, reason, "animation unavailable, showing fallback");
        if let Err(err) = self
            .page
            .document()
            .add_class(&self.config.container_id, FALLBACK_CLASS)
        {
            diag!(self.config.debug, instance = %self.config.id, error = %err, "fallback not applied");
        }
    }

    fn on_ready(self: &Arc<Self>) {
        if let Err(err) = self.try_ready() {
            tracing::warn!(instance = %self.config.id, error = %err, "failed to wire animation");
        }
    }

    fn try_ready(self: &Arc<Self>) -> Result<()> {
        let config = &self.config;
        let mut ctl = self.lock()?;
        if ctl.state != InstanceState::Loading || ctl.disposed {
            diag!(config.debug, instance = %config.id, state = ?ctl.state, "late load ignored");
            return Ok(());
        }
        if let Some(timer) = ctl.load_timer.take() {
            self.page.clear_timeout(timer)?;
        }
        ctl.state = InstanceState::Ready;

        self.sync_canvas_size(&mut ctl);
        self.observe_resize(&mut ctl)?;
        if let Some(state_machine) = &config.state_machine {
            let slots = ctl.renderer.list_inputs(state_machine);
            ctl.router.capture(slots);
        }
        self.attach_pointer(&mut ctl)?;
        self.attach_focus(&mut ctl)?;
        self.attach_thinking(&mut ctl)?;
        self.attach_click_trigger(&mut ctl)?;

        diag!(
            config.debug,
            instance = %config.id,
            artboard = ?config.artboard,
            state_machine = ?config.state_machine,
            animations = ?config.animations,
            inputs = ?ctl.router.names(),
            "animation loaded"
        );
        drop(ctl);

        self.audio.arm_on_gesture(self.canvas())
    }

    /// Matches the canvas backing store to the container's on-screen size.
    fn sync_canvas_size(&self, ctl: &mut Controller) {
        let document = self.page.document();
        let Some(rect) = document.bounding_rect(&self.config.container_id) else {
            return;
        };
        let ratio = match document.device_pixel_ratio() {
            ratio if ratio.is_finite() && ratio > 0.0 => ratio,
            _ => 1.0,
        };
        let pixels = Size::new(rect.width * ratio, rect.height * ratio);
        if let Err(err) = document.set_canvas_size(&self.config.canvas_id, pixels, rect.size()) {
            diag!(self.config.debug, instance = %self.config.id, error = %err, "canvas not resized");
            return;
        }
        ctl.renderer.resize_to_surface();
    }

    fn observe_resize(self: &Arc<Self>, ctl: &mut Controller) -> Result<()> {
        let container = &self.config.container_id;
        if let Err(err) = self.page.document().observe_resize(container) {
            diag!(self.config.debug, instance = %self.config.id, error = %err, "resize tracking disabled");
            return Ok(());
        }
        ctl.observing_resize = true;

        let weak = Arc::downgrade(self);
        let id = self.page.events().listen(
            EventTarget::element(container.clone()),
            EventKind::Resize,
            move |_| {
                with_inner(&weak, |inner| {
                    if let Ok(mut ctl) = inner.lock() {
                        if ctl.state == InstanceState::Ready && !ctl.disposed {
                            inner.sync_canvas_size(&mut ctl);
                        }
                    }
                })
            },
        )?;
        ctl.listeners.push(id);
        Ok(())
    }

    fn attach_pointer(self: &Arc<Self>, ctl: &mut Controller) -> Result<()> {
        if !self.config.pointer {
            return Ok(());
        }

        let target = self.pointer.target();
        for kind in [EventKind::PointerMove, EventKind::TouchMove] {
            let weak = Arc::downgrade(self);
            let id = self.page.events().listen(target.clone(), kind, move |event| {
                with_inner(&weak, |inner| inner.handle_pointer(event))
            })?;
            ctl.listeners.push(id);
        }
        Ok(())
    }

    fn handle_pointer(&self, event: &HostEvent) {
        let Some(point) = self.pointer.process(event, self.page.document()) else {
            return;
        };
        let mapping = self.pointer.mapping();
        self.with_router(|router| {
            if let Some(x) = &mapping.x {
                router.set_number(x, point.x as f32);
            }
            if let Some(y) = &mapping.y {
                router.set_number(y, point.y as f32);
            }
        });
    }

    /// Focus raises its input, blur clears its own (or the focus input).
    fn attach_focus(self: &Arc<Self>, ctl: &mut Controller) -> Result<()> {
        let flags = &self.config.inputs.flags;
        let bindings = [
            (EventKind::Focus, flags.focus.as_deref(), true),
            (EventKind::Blur, flags.blur_input(), false),
        ];

        for (kind, input, value) in bindings {
            let Some(input) = input.map(str::to_string) else {
                continue;
            };
            let weak = Arc::downgrade(self);
            let id = self.page.events().listen(EventTarget::Window, kind, move |_| {
                with_inner(&weak, |inner| {
                    inner.with_router(|router| router.set_boolean(&input, value))
                })
            })?;
            ctl.listeners.push(id);
        }
        Ok(())
    }

    fn attach_thinking(self: &Arc<Self>, ctl: &mut Controller) -> Result<()> {
        let Some(input) = self.config.inputs.flags.thinking.clone() else {
            return Ok(());
        };

        let weak = Arc::downgrade(self);
        let id = self
            .page
            .thinking()
            .subscribe(self.config.id.clone(), move |value| {
                with_inner(&weak, |inner| {
                    inner.with_router(|router| router.set_boolean(&input, value))
                })
            })?;
        ctl.thinking = Some(id);
        Ok(())
    }

    fn attach_click_trigger(self: &Arc<Self>, ctl: &mut Controller) -> Result<()> {
        let Some(trigger) = self.config.inputs.triggers.click.clone() else {
            return Ok(());
        };

        for kind in [EventKind::Click, EventKind::TouchEnd] {
            let weak = Arc::downgrade(self);
            let trigger = trigger.clone();
            let id = self.page.events().listen(self.canvas(), kind, move |_| {
                with_inner(&weak, |inner| {
                    inner.with_router(|router| router.fire_trigger(&trigger))
                })
            })?;
            ctl.listeners.push(id);
        }
        Ok(())
    }

    fn dispose(&self) -> Result<()> {
        let mut ctl = self.lock()?;
        if ctl.disposed {
            return Ok(());
        }
        ctl.disposed = true;

        if let Some(timer) = ctl.load_timer.take() {
            self.page.clear_timeout(timer)?;
        }
        for id in std::mem::take(&mut ctl.listeners) {
            self.page.events().remove(id)?;
        }
        if let Some(subscription) = ctl.thinking.take() {
            self.page.thinking().unsubscribe(subscription)?;
        }
        if ctl.observing_resize {
            self.page.document().unobserve_resize(&self.config.container_id);
            ctl.observing_resize = false;
        }
        ctl.router.clear();
        drop(ctl);

        self.audio.stop();
        diag!(self.config.debug, instance = %self.config.id, "instance disposed");
        Ok(())
    }
}

/// Creates and starts one instance per configuration record. A record that
/// fails to start is logged and kept, so siblings are unaffected.
pub fn bootstrap<I, F>(page: &Page, configs: I, mut factory: F) -> Vec<AnimationInstance>
where
    I: IntoIterator<Item = InstanceConfig>,
    F: FnMut(&InstanceConfig) -> (Box<dyn Renderer>, Box<dyn AudioBackend>),
{
    configs
        .into_iter()
        .map(|config| {
            let (renderer, backend) = factory(&config);
            let instance = AnimationInstance::new(config, page.clone(), renderer, backend);
            if let Err(err) = instance.start() {
                tracing::warn!(instance = %instance.id(), error = %err, "instance failed to start");
            }
            instance
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NoAudio;
    use crate::host::{MemoryDocument, Rect};
    use crate::render::{HeadlessRenderer, InputKind, LoadBehaviour};

    fn page() -> (Arc<MemoryDocument>, Page) {
        let doc = Arc::new(MemoryDocument::new(Size::new(1000.0, 800.0)).with_device_pixel_ratio(2.0));
        doc.insert_element("a-container", Rect::new(10.0, 10.0, 300.0, 150.0))
            .unwrap();
        doc.insert_element("a-canvas", Rect::new(10.0, 10.0, 300.0, 150.0))
            .unwrap();
        (doc.clone(), Page::new(doc))
    }

    fn config() -> InstanceConfig {
        let mut config = InstanceConfig::new("a", "a-container", "a-canvas", "bear.riv");
        config.state_machine = Some("Main".into());
        config
    }

    fn renderer(behaviour: LoadBehaviour) -> HeadlessRenderer {
        HeadlessRenderer::new([("mx", InputKind::Numeric), ("my", InputKind::Numeric)])
            .with_behaviour(behaviour)
    }

    #[test]
    fn missing_elements_keep_the_instance_idle() {
        let (_, page) = page();
        let mut config = config();
        config.canvas_id = "ghost".into();
        let renderer = renderer(LoadBehaviour::Immediate);
        let instance =
            AnimationInstance::new(config, page.clone(), Box::new(renderer.clone()), Box::new(NoAudio));

        instance.start().unwrap();
        assert_eq!(instance.state(), InstanceState::Idle);
        assert!(renderer.requests().is_empty());
        assert_eq!(page.pending_timers(), 0);
    }

    #[test]
    fn ready_sizes_canvas_and_cancels_timeout() {
        let (doc, page) = page();
        let renderer = renderer(LoadBehaviour::Immediate);
        let instance =
            AnimationInstance::new(config(), page.clone(), Box::new(renderer.clone()), Box::new(NoAudio));

        instance.start().unwrap();
        assert_eq!(instance.state(), InstanceState::Loading);
        page.run_until_idle().unwrap();

        assert_eq!(instance.state(), InstanceState::Ready);
        assert_eq!(page.pending_timers(), 0);
        assert_eq!(
            doc.canvas_size("a-canvas"),
            Some((Size::new(600.0, 300.0), Size::new(300.0, 150.0)))
        );
        assert_eq!(renderer.resize_count(), 1);
        assert_eq!(instance.input_names(), vec!["mx", "my"]);
        assert!(doc.is_observed("a-container"));
    }

    #[test]
    fn refused_load_fails_immediately() {
        let (doc, page) = page();
        let instance = AnimationInstance::new(
            config(),
            page.clone(),
            Box::new(renderer(LoadBehaviour::Refuse)),
            Box::new(NoAudio),
        );

        instance.start().unwrap();
        assert_eq!(instance.state(), InstanceState::Failed);
        assert_eq!(doc.classes("a-container"), vec![FALLBACK_CLASS.to_string()]);
        assert_eq!(page.pending_timers(), 0);
    }

    #[test]
    fn renderer_reported_failure_shows_fallback() {
        let (doc, page) = page();
        let renderer = renderer(LoadBehaviour::Manual);
        let instance =
            AnimationInstance::new(config(), page.clone(), Box::new(renderer.clone()), Box::new(NoAudio));

        instance.start().unwrap();
        renderer.fail_load("corrupt file").unwrap();
        page.run_until_idle().unwrap();

        assert_eq!(instance.state(), InstanceState::Failed);
        assert_eq!(doc.classes("a-container"), vec![FALLBACK_CLASS.to_string()]);
        assert_eq!(page.pending_timers(), 0);
    }

    #[test]
    fn late_ready_after_timeout_is_ignored() {
        let (_, page) = page();
        let renderer = renderer(LoadBehaviour::Manual);
        let instance =
            AnimationInstance::new(config(), page.clone(), Box::new(renderer.clone()), Box::new(NoAudio));

        instance.start().unwrap();
        page.advance(LOAD_TIMEOUT).unwrap();
        assert_eq!(instance.state(), InstanceState::Failed);

        renderer.complete_load().unwrap();
        page.run_until_idle().unwrap();
        assert_eq!(instance.state(), InstanceState::Failed);
        assert!(instance.input_names().is_empty());
        assert_eq!(renderer.resize_count(), 0);
    }

    #[test]
    fn animations_without_state_machine_capture_nothing() {
        let (_, page) = page();
        let mut config = config();
        config.state_machine = None;
        config.animations = vec!["idle".into()];
        let instance = AnimationInstance::new(
            config,
            page.clone(),
            Box::new(renderer(LoadBehaviour::Immediate)),
            Box::new(NoAudio),
        );

        instance.start().unwrap();
        page.run_until_idle().unwrap();
        assert_eq!(instance.state(), InstanceState::Ready);
        assert!(instance.input_names().is_empty());
    }

    #[test]
    fn disabled_pointer_attaches_no_listeners() {
        let (_, page) = page();
        let mut config = config();
        config.pointer = false;
        let instance = AnimationInstance::new(
            config,
            page.clone(),
            Box::new(renderer(LoadBehaviour::Immediate)),
            Box::new(NoAudio),
        );

        instance.start().unwrap();
        page.run_until_idle().unwrap();
        // Only the resize listener remains.
        assert_eq!(page.events().listener_count(), 1);
    }
}
