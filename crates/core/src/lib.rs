//! Core library for binding Rive animations to a host page.
//!
//! Each instance loads one animation through an abstract [`Renderer`] and
//! keeps its state machine inputs fed from page signals: pointer position,
//! window focus, a per-instance "thinking" broadcast, canvas taps and audio
//! loudness. The host owns the real event loop and drives it through
//! [`Page`]; nothing in this crate spawns threads or blocks.

/// Emits an info-level event only when the owning instance has diagnostics
/// enabled.
macro_rules! diag {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            ::tracing::info!($($arg)+);
        }
    };
}

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod host;
pub mod instance;
pub mod pointer;
pub mod render;
pub mod router;
pub mod timeline;

pub use analysis::{measure_loudness, Analyser, Loudness, ANALYSER_WINDOW};
pub use audio::{
    AudioBackend, AudioBridge, AudioSettings, AudioSource, AudioState, NoAudio, SharedSignal,
    SyntheticBackend,
};
pub use config::{
    Alignment, AudioMapping, AudioMode, FlagMapping, Fit, InputMapping, InstanceConfig,
    NormalizeMode, PointerMapping, PointerScope, TriggerMapping, DEFAULT_LEVEL_INPUT,
    DEFAULT_TALKING_INPUT, DEFAULT_TALKING_THRESHOLD,
};
pub use error::{BridgeError, Result};
pub use host::{
    Document, EventBus, EventKind, EventTarget, HostEvent, ListenerId, MemoryDocument, Page,
    Point, Rect, Size, SubscriptionId, ThinkingChannel, ThinkingSignal,
};
pub use instance::{bootstrap, AnimationInstance, InstanceState, FALLBACK_CLASS, LOAD_TIMEOUT};
pub use pointer::{normalize, PointerNormalizer, PointerSample, ScopeBounds};
pub use render::{
    HeadlessRenderer, InputKind, InputSlot, InputWrite, LoadBehaviour, LoadNotifier, LoadRequest,
    ParameterUpdate, Renderer, SlotRef,
};
pub use router::{InputRouter, InputValue, NamedInput};
pub use timeline::{FrameId, FrameScheduler, HostClock, TaskQueue, TimerId, TimerQueue};
