use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::analysis::{measure_loudness, Analyser};
use crate::config::{resolve_threshold, AudioMode, InstanceConfig};
use crate::host::{EventKind, EventTarget, ListenerId, Page};
use crate::timeline::FrameId;
use crate::{BridgeError, Result};

/// A connected stream of samples in `[-1, 1]`.
pub trait AudioSource: Send {
    /// Appends the samples produced since the previous read.
    fn read(&mut self, out: &mut Vec<f32>);

    /// Releases the underlying capture or media connection.
    fn close(&mut self) {}
}

/// Host audio capabilities.
pub trait AudioBackend: Send {
    /// Acquires an audio processing context.
    fn create_context(&mut self) -> Result<()>;

    fn open_microphone(&mut self) -> Result<Box<dyn AudioSource>>;

    /// Wraps the media element with the given id.
    fn open_element(&mut self, element_id: &str) -> Result<Box<dyn AudioSource>>;
}

/// What the bridge listens to and how loud counts as talking.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub mode: AudioMode,
    pub element_id: Option<String>,
    pub level_input: String,
    pub talking_input: String,
    pub threshold: f32,
}

impl AudioSettings {
    /// Builds settings from explicit values. A zero threshold is replaced by
    /// the default.
    pub fn configure(
        mode: AudioMode,
        element_id: Option<String>,
        level_input: impl Into<String>,
        talking_input: impl Into<String>,
        threshold: f32,
    ) -> Self {
        Self {
            mode,
            element_id,
            level_input: level_input.into(),
            talking_input: talking_input.into(),
            threshold: resolve_threshold(threshold),
        }
    }

    /// Resolves input names and threshold from an instance record.
    pub fn from_config(config: &InstanceConfig) -> Self {
        let audio = &config.inputs.audio;
        Self::configure(
            config.audio_mode,
            config.audio_element_id.clone(),
            audio.level_name(),
            audio.talking_name(),
            audio.talking_threshold(),
        )
    }
}

/// Snapshot of a bridge's runtime state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioState {
    pub active: bool,
    pub connected: bool,
    pub level: f32,
    pub talking: bool,
}

type LevelHook = Arc<dyn Fn(f32) + Send + Sync>;
type TalkingHook = Arc<dyn Fn(bool) + Send + Sync>;

struct BridgeCore {
    backend: Box<dyn AudioBackend>,
    source: Option<Box<dyn AudioSource>>,
    analyser: Option<Analyser>,
    state: AudioState,
    frame: Option<FrameId>,
    gesture: Vec<ListenerId>,
    scratch: Vec<f32>,
}

struct BridgeInner {
    page: Page,
    settings: AudioSettings,
    debug: bool,
    on_level: LevelHook,
    on_talking: TalkingHook,
    core: Mutex<BridgeCore>,
}

impl BridgeInner {
    fn lock(&self) -> Result<MutexGuard<'_, BridgeCore>> {
        self.core
            .lock()
            .map_err(|_| BridgeError::Poisoned("audio bridge"))
    }
}

/// Turns an audio source into a per-frame loudness level and talking flag.
///
/// The bridge starts inactive. It connects on [`AudioBridge::activate`],
/// normally triggered by the first user gesture, and from then on samples
/// once per display frame until [`AudioBridge::stop`].
#[derive(Clone)]
pub struct AudioBridge {
    inner: Arc<BridgeInner>,
}

impl AudioBridge {
    /// Creates an inactive bridge. `on_level` and `on_talking` are called once
    /// per sampled frame, outside the bridge's lock.
    pub fn new<L, T>(
        page: Page,
        settings: AudioSettings,
        backend: Box<dyn AudioBackend>,
        debug: bool,
        on_level: L,
        on_talking: T,
    ) -> Self
    where
        L: Fn(f32) + Send + Sync + 'static,
        T: Fn(bool) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(BridgeInner {
                page,
                settings,
                debug,
                on_level: Arc::new(on_level),
                on_talking: Arc::new(on_talking),
                core: Mutex::new(BridgeCore {
                    backend,
                    source: None,
                    analyser: None,
                    state: AudioState::default(),
                    frame: None,
                    gesture: Vec::new(),
                    scratch: Vec::new(),
                }),
            }),
        }
    }

    /// Settings the bridge was configured with.
    pub fn settings(&self) -> &AudioSettings {
        &self.inner.settings
    }

    /// Snapshot of activation and the last sampled values.
    pub fn state(&self) -> AudioState {
        self.inner
            .lock()
            .map(|core| core.state)
            .unwrap_or_default()
    }

    /// Activates on the first `click` or `pointerdown` on `target`, whichever
    /// comes first. Does nothing when audio is off, already connected or
    /// already armed.
    pub fn arm_on_gesture(&self, target: EventTarget) -> Result<()> {
        if self.inner.settings.mode == AudioMode::Off {
            return Ok(());
        }
        let mut core = self.inner.lock()?;
        if core.state.connected || !core.gesture.is_empty() {
            return Ok(());
        }

        for kind in [EventKind::Click, EventKind::PointerDown] {
            let weak = Arc::downgrade(&self.inner);
            let id = self
                .inner
                .page
                .events()
                .listen_once(target.clone(), kind, move |_| on_gesture(&weak))?;
            core.gesture.push(id);
        }
        Ok(())
    }

    /// Connects the configured source and starts sampling. Idempotent, and
    /// never fails loudly: a missing capability leaves the bridge inactive.
    pub fn activate(&self) {
        if let Err(err) = self.try_activate() {
            diag!(self.inner.debug, error = %err, "audio bridge left inactive");
        }
    }

    /// Byte spectrum of the current analysis window, or empty while inactive.
    /// Each call folds into the analyser's smoothing, as a diagnostics tap.
    pub fn frequency_bytes(&self) -> Result<Vec<u8>> {
        let mut core = self.inner.lock()?;
        if !core.state.active {
            return Ok(Vec::new());
        }
        match core.analyser.as_mut() {
            Some(analyser) => analyser.frequency_bytes(),
            None => Ok(Vec::new()),
        }
    }

    /// Stops sampling, releases the source and removes gesture listeners.
    /// The analyser is kept, cleared, for a later activation.
    pub fn stop(&self) {
        self.disarm();
        let Ok(mut core) = self.inner.lock() else {
            return;
        };
        if let Some(frame) = core.frame.take() {
            let _ = self.inner.page.cancel_frame(frame);
        }
        if let Some(mut source) = core.source.take() {
            source.close();
        }
        if let Some(analyser) = core.analyser.as_mut() {
            analyser.reset();
        }
        core.state = AudioState::default();
    }

    fn try_activate(&self) -> Result<()> {
        let settings = &self.inner.settings;
        let mut core = self.inner.lock()?;
        if core.state.connected || settings.mode == AudioMode::Off {
            return Ok(());
        }

        core.backend.create_context()?;
        let source = match settings.mode {
            AudioMode::Mic => core.backend.open_microphone()?,
            AudioMode::Element => match settings.element_id.as_deref() {
                Some(id) => core.backend.open_element(id)?,
                None => return Ok(()),
            },
            AudioMode::Off => return Ok(()),
        };

        core.source = Some(source);
        core.analyser.get_or_insert_with(Analyser::new);
        core.state.active = true;
        core.state.connected = true;
        core.frame = Some(schedule_frame(&self.inner)?);
        diag!(self.inner.debug, mode = ?settings.mode, "audio source connected");
        Ok(())
    }

    fn disarm(&self) {
        let ids = match self.inner.lock() {
            Ok(mut core) => std::mem::take(&mut core.gesture),
            Err(_) => return,
        };
        for id in ids {
            let _ = self.inner.page.events().remove(id);
        }
    }

    fn sample(&self) {
        let threshold = self.inner.settings.threshold;
        let loudness = {
            let Ok(mut core) = self.inner.lock() else {
                return;
            };
            core.frame = None;
            if !core.state.active {
                return;
            }

            let BridgeCore {
                source,
                analyser,
                scratch,
                ..
            } = &mut *core;
            let (Some(source), Some(analyser)) = (source.as_mut(), analyser.as_mut()) else {
                return;
            };
            scratch.clear();
            source.read(scratch);
            analyser.push_samples(scratch);
            let loudness = measure_loudness(analyser.time_domain_bytes(), threshold);

            core.state.level = loudness.level;
            core.state.talking = loudness.talking;
            match schedule_frame(&self.inner) {
                Ok(frame) => core.frame = Some(frame),
                Err(err) => diag!(self.inner.debug, error = %err, "audio loop halted"),
            }
            loudness
        };

        (self.inner.on_level)(loudness.level);
        (self.inner.on_talking)(loudness.talking);
    }
}

impl std::fmt::Debug for AudioBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBridge")
            .field("settings", &self.inner.settings)
            .field("state", &self.state())
            .finish()
    }
}

fn on_gesture(weak: &Weak<BridgeInner>) {
    if let Some(inner) = weak.upgrade() {
        let bridge = AudioBridge { inner };
        bridge.disarm();
        bridge.activate();
    }
}

fn schedule_frame(inner: &Arc<BridgeInner>) -> Result<FrameId> {
    let weak = Arc::downgrade(inner);
    inner.page.request_frame(move |_| {
        if let Some(inner) = weak.upgrade() {
            AudioBridge { inner }.sample();
        }
    })
}

/// Backend for hosts without any audio capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAudio;

impl AudioBackend for NoAudio {
    fn create_context(&mut self) -> Result<()> {
        Err(BridgeError::Unavailable("audio context"))
    }

    fn open_microphone(&mut self) -> Result<Box<dyn AudioSource>> {
        Err(BridgeError::Unavailable("microphone"))
    }

    fn open_element(&mut self, element_id: &str) -> Result<Box<dyn AudioSource>> {
        Err(BridgeError::ElementNotFound(element_id.to_string()))
    }
}

#[derive(Debug, Default)]
struct SignalState {
    block: Vec<f32>,
    open: bool,
}

/// A block of samples replayed on every read, replaceable while connected.
#[derive(Debug, Clone, Default)]
pub struct SharedSignal {
    state: Arc<Mutex<SignalState>>,
}

impl SharedSignal {
    /// Replays `block` on every read.
    pub fn new(block: Vec<f32>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SignalState { block, open: false })),
        }
    }

    /// A sine wave of the given peak amplitude, one analysis window long.
    pub fn tone(amplitude: f32, cycles: usize) -> Self {
        let len = crate::analysis::ANALYSER_WINDOW;
        let block = (0..len)
            .map(|i| amplitude * (2.0 * PI * cycles as f32 * i as f32 / len as f32).sin())
            .collect();
        Self::new(block)
    }

    /// Replaces the block returned by subsequent reads.
    pub fn set(&self, block: Vec<f32>) {
        if let Ok(mut state) = self.state.lock() {
            state.block = block;
        }
    }

    /// Whether a source reading this signal is currently connected.
    pub fn is_open(&self) -> bool {
        self.state.lock().map(|s| s.open).unwrap_or(false)
    }

    fn open(&self) -> Box<dyn AudioSource> {
        if let Ok(mut state) = self.state.lock() {
            state.open = true;
        }
        Box::new(SignalSource {
            signal: self.clone(),
        })
    }
}

struct SignalSource {
    signal: SharedSignal,
}

impl AudioSource for SignalSource {
    fn read(&mut self, out: &mut Vec<f32>) {
        if let Ok(state) = self.signal.state.lock() {
            out.extend_from_slice(&state.block);
        }
    }

    fn close(&mut self) {
        if let Ok(mut state) = self.signal.state.lock() {
            state.open = false;
        }
    }
}

/// In-process backend serving [`SharedSignal`]s as microphone and media
/// elements.
#[derive(Debug, Clone, Default)]
pub struct SyntheticBackend {
    microphone: Option<SharedSignal>,
    elements: HashMap<String, SharedSignal>,
}

impl SyntheticBackend {
    /// A backend with no microphone and no media elements.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `signal` as the microphone.
    pub fn with_microphone(mut self, signal: SharedSignal) -> Self {
        self.microphone = Some(signal);
        self
    }

    /// Serves `signal` as the media element `id`.
    pub fn with_element(mut self, id: impl Into<String>, signal: SharedSignal) -> Self {
        self.elements.insert(id.into(), signal);
        self
    }
}

impl AudioBackend for SyntheticBackend {
    fn create_context(&mut self) -> Result<()> {
        Ok(())
    }

    fn open_microphone(&mut self) -> Result<Box<dyn AudioSource>> {
        self.microphone
            .as_ref()
            .map(SharedSignal::open)
            .ok_or(BridgeError::Unavailable("microphone"))
    }

    fn open_element(&mut self, element_id: &str) -> Result<Box<dyn AudioSource>> {
        self.elements
            .get(element_id)
            .map(SharedSignal::open)
            .ok_or_else(|| BridgeError::ElementNotFound(element_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostEvent, MemoryDocument, Size};

    struct Probe {
        levels: Arc<Mutex<Vec<f32>>>,
        talking: Arc<Mutex<Vec<bool>>>,
    }

    fn harness(mode: AudioMode, backend: impl AudioBackend + 'static) -> (Page, AudioBridge, Probe) {
        let page = Page::new(Arc::new(MemoryDocument::new(Size::new(640.0, 480.0))));
        let levels = Arc::new(Mutex::new(Vec::new()));
        let talking = Arc::new(Mutex::new(Vec::new()));
        let (l, t) = (levels.clone(), talking.clone());
        let settings = AudioSettings::configure(
            mode,
            Some("player".into()),
            "audio_level",
            "is_talking",
            0.08,
        );
        let bridge = AudioBridge::new(
            page.clone(),
            settings,
            Box::new(backend),
            false,
            move |level| l.lock().unwrap().push(level),
            move |flag| t.lock().unwrap().push(flag),
        );
        (page, bridge, Probe { levels, talking })
    }

    #[test]
    fn reports_level_and_talking_every_frame() {
        let signal = SharedSignal::tone(0.5, 8);
        let (page, bridge, probe) = harness(
            AudioMode::Mic,
            SyntheticBackend::new().with_microphone(signal.clone()),
        );

        bridge.activate();
        assert!(bridge.state().active);
        assert!(signal.is_open());

        page.run_frame().unwrap();
        page.run_frame().unwrap();
        signal.set(vec![0.0; 2048]);
        page.run_frame().unwrap();

        let levels = probe.levels.lock().unwrap().clone();
        assert_eq!(levels.len(), 3);
        assert!(levels[0] > 0.6 && levels[0] <= 1.0);
        assert_eq!(levels[2], 0.0);
        assert_eq!(*probe.talking.lock().unwrap(), vec![true, true, false]);
    }

    #[test]
    fn activation_is_idempotent() {
        let (page, bridge, probe) = harness(
            AudioMode::Mic,
            SyntheticBackend::new().with_microphone(SharedSignal::tone(0.2, 4)),
        );

        bridge.activate();
        bridge.activate();
        assert_eq!(page.pending_frames(), 1);
        page.run_frame().unwrap();
        assert_eq!(probe.levels.lock().unwrap().len(), 1);
    }

    #[test]
    fn missing_capabilities_leave_bridge_inactive() {
        let (page, bridge, probe) = harness(AudioMode::Mic, NoAudio);
        bridge.activate();
        assert_eq!(bridge.state(), AudioState::default());
        assert_eq!(page.pending_frames(), 0);

        let (page, bridge, _) = harness(AudioMode::Element, SyntheticBackend::new());
        bridge.activate();
        assert!(!bridge.state().connected);
        assert_eq!(page.pending_frames(), 0);
        assert!(probe.levels.lock().unwrap().is_empty());
    }

    #[test]
    fn element_mode_wraps_the_named_element() {
        let signal = SharedSignal::tone(1.0, 2);
        let (page, bridge, probe) = harness(
            AudioMode::Element,
            SyntheticBackend::new().with_element("player", signal.clone()),
        );

        bridge.activate();
        page.run_frame().unwrap();
        assert!(signal.is_open());
        assert_eq!(*probe.talking.lock().unwrap(), vec![true]);
    }

    #[test]
    fn first_gesture_activates_and_disarms() {
        let (page, bridge, _) = harness(
            AudioMode::Mic,
            SyntheticBackend::new().with_microphone(SharedSignal::tone(0.3, 4)),
        );
        let canvas = EventTarget::element("canvas");

        bridge.arm_on_gesture(canvas.clone()).unwrap();
        bridge.arm_on_gesture(canvas.clone()).unwrap();
        assert_eq!(page.events().listener_count(), 2);

        page.dispatch(&canvas, EventKind::PointerDown, &HostEvent::default())
            .unwrap();
        assert!(bridge.state().connected);
        assert_eq!(page.events().listener_count(), 0);

        bridge.arm_on_gesture(canvas).unwrap();
        assert_eq!(page.events().listener_count(), 0);
    }

    #[test]
    fn off_mode_never_arms() {
        let (page, bridge, _) = harness(AudioMode::Off, SyntheticBackend::new());
        bridge.arm_on_gesture(EventTarget::Window).unwrap();
        bridge.activate();
        assert_eq!(page.events().listener_count(), 0);
        assert!(!bridge.state().active);
    }

    #[test]
    fn stop_halts_the_loop_and_releases_the_source() {
        let signal = SharedSignal::tone(0.5, 8);
        let (page, bridge, probe) = harness(
            AudioMode::Mic,
            SyntheticBackend::new().with_microphone(signal.clone()),
        );
        bridge.activate();
        page.run_frame().unwrap();

        bridge.stop();
        assert!(!signal.is_open());
        assert_eq!(page.pending_frames(), 0);
        assert_eq!(page.run_frame().unwrap(), 0);
        assert_eq!(probe.levels.lock().unwrap().len(), 1);
        assert_eq!(bridge.state(), AudioState::default());
    }

    #[test]
    fn spectrum_is_available_while_active() {
        let (page, bridge, _) = harness(
            AudioMode::Mic,
            SyntheticBackend::new().with_microphone(SharedSignal::tone(0.5, 32)),
        );
        assert!(bridge.frequency_bytes().unwrap().is_empty());

        bridge.activate();
        page.run_frame().unwrap();
        let spectrum = bridge.frequency_bytes().unwrap();
        assert_eq!(spectrum.len(), crate::analysis::ANALYSER_WINDOW / 2);
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by_key(|&(_, value)| *value)
            .map(|(index, _)| index)
            .unwrap();
        assert!((peak as i32 - 32).abs() <= 1);

        bridge.stop();
        assert!(bridge.frequency_bytes().unwrap().is_empty());
    }

    #[test]
    fn restart_after_stop_samples_fresh_audio() {
        let signal = SharedSignal::tone(0.5, 8);
        let (page, bridge, probe) = harness(
            AudioMode::Mic,
            SyntheticBackend::new().with_microphone(signal.clone()),
        );
        bridge.activate();
        page.run_frame().unwrap();
        bridge.stop();

        signal.set(vec![0.0; 16]);
        bridge.activate();
        assert!(signal.is_open());
        page.run_frame().unwrap();

        let levels = probe.levels.lock().unwrap().clone();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[1], 0.0);
    }

    #[test]
    fn zero_threshold_falls_back_to_default() {
        let page = Page::new(Arc::new(MemoryDocument::new(Size::new(640.0, 480.0))));
        let talking = Arc::new(Mutex::new(Vec::new()));
        let flags = talking.clone();
        let quiet: Vec<f32> = (0..2048)
            .map(|i| if i % 2 == 0 { 3.0 / 128.0 } else { -3.0 / 128.0 })
            .collect();
        let bridge = AudioBridge::new(
            page.clone(),
            AudioSettings::configure(AudioMode::Mic, None, "audio_level", "is_talking", 0.0),
            Box::new(SyntheticBackend::new().with_microphone(SharedSignal::new(quiet))),
            false,
            |_| {},
            move |flag| flags.lock().unwrap().push(flag),
        );
        assert_eq!(bridge.settings().threshold, crate::config::DEFAULT_TALKING_THRESHOLD);

        bridge.activate();
        page.run_frame().unwrap();
        assert_eq!(*talking.lock().unwrap(), vec![false]);
    }
}
