use serde::{Deserialize, Serialize};

/// Default loudness above which the talking flag is raised.
pub const DEFAULT_TALKING_THRESHOLD: f32 = 0.08;

/// Numeric input fed with the loudness level when none is configured.
pub const DEFAULT_LEVEL_INPUT: &str = "audio_level";
/// Boolean input fed with the talking flag when none is configured.
pub const DEFAULT_TALKING_INPUT: &str = "is_talking";

/// Immutable settings for a single animation surface.
///
/// Records arrive already validated by the embedding layer, so every field is
/// typed and defaulted here rather than checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    pub id: String,
    pub container_id: String,
    pub canvas_id: String,
    pub src: String,
    #[serde(default = "default_extent")]
    pub width: String,
    #[serde(default = "default_extent")]
    pub height: String,
    #[serde(default)]
    pub fit: Fit,
    #[serde(default)]
    pub alignment: Alignment,
    #[serde(default = "default_true")]
    pub autoplay: bool,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub artboard: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub state_machine: Option<String>,
    #[serde(default)]
    pub animations: Vec<String>,
    #[serde(default)]
    pub inputs: InputMapping,
    #[serde(default = "default_true")]
    pub pointer: bool,
    #[serde(default)]
    pub pointer_scope: PointerScope,
    #[serde(default)]
    pub audio_mode: AudioMode,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub audio_element_id: Option<String>,
    #[serde(default)]
    pub debug: bool,
}

impl InstanceConfig {
    /// Builds a record with every optional field at its default.
    pub fn new(
        id: impl Into<String>,
        container_id: impl Into<String>,
        canvas_id: impl Into<String>,
        src: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            container_id: container_id.into(),
            canvas_id: canvas_id.into(),
            src: src.into(),
            width: default_extent(),
            height: default_extent(),
            fit: Fit::default(),
            alignment: Alignment::default(),
            autoplay: true,
            artboard: None,
            state_machine: None,
            animations: Vec::new(),
            inputs: InputMapping::default(),
            pointer: true,
            pointer_scope: PointerScope::default(),
            audio_mode: AudioMode::default(),
            audio_element_id: None,
            debug: false,
        }
    }
}

/// How configured input names map onto external signals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputMapping {
    #[serde(default)]
    pub pointer: Option<PointerMapping>,
    #[serde(default)]
    pub flags: FlagMapping,
    #[serde(default)]
    pub triggers: TriggerMapping,
    #[serde(default)]
    pub audio: AudioMapping,
}

impl InputMapping {
    /// Pointer mapping in effect. The `mx`/`my` defaults apply only when the
    /// whole pointer section is absent.
    pub fn pointer_mapping(&self) -> PointerMapping {
        self.pointer.clone().unwrap_or_else(PointerMapping::with_default_axes)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointerMapping {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub x: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub y: Option<String>,
    #[serde(default)]
    pub normalize: NormalizeMode,
}

impl PointerMapping {
    /// The mapping used when a record has no pointer section: `mx`/`my` in
    /// artboard space.
    pub fn with_default_axes() -> Self {
        Self {
            x: Some("mx".to_string()),
            y: Some("my".to_string()),
            normalize: NormalizeMode::Artboard,
        }
    }
}

/// Boolean inputs driven by window focus and the thinking broadcast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagMapping {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub focus: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub blur: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub thinking: Option<String>,
}

impl FlagMapping {
    /// Input cleared on window blur. Falls back to the focus input, so a
    /// single boolean can follow focus with opposite polarity.
    pub fn blur_input(&self) -> Option<&str> {
        self.blur.as_deref().or(self.focus.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerMapping {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub click: Option<String>,
}

/// Inputs fed by the audio bridge. Unset names and a zero threshold resolve
/// to their defaults through the accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioMapping {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub level: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub talking: Option<String>,
    /// Older key for the talking input, consulted when `talking` is unset.
    #[serde(default, rename = "talkingInput", deserialize_with = "empty_as_none")]
    pub talking_input: Option<String>,
    #[serde(default)]
    pub threshold: Option<f32>,
}

impl AudioMapping {
    /// Numeric input receiving the loudness level.
    pub fn level_name(&self) -> &str {
        self.level.as_deref().unwrap_or(DEFAULT_LEVEL_INPUT)
    }

    /// Boolean input receiving the talking flag: `talking`, then
    /// `talkingInput`, then `is_talking`.
    pub fn talking_name(&self) -> &str {
        self.talking
            .as_deref()
            .or(self.talking_input.as_deref())
            .unwrap_or(DEFAULT_TALKING_INPUT)
    }

    /// Loudness above which the talking flag is raised.
    pub fn talking_threshold(&self) -> f32 {
        resolve_threshold(self.threshold.unwrap_or(DEFAULT_TALKING_THRESHOLD))
    }
}

/// A zero (or NaN) threshold means "unset" and falls back to
/// [`DEFAULT_TALKING_THRESHOLD`]; other values are kept as given.
pub fn resolve_threshold(threshold: f32) -> f32 {
    if threshold == 0.0 || threshold.is_nan() {
        DEFAULT_TALKING_THRESHOLD
    } else {
        threshold
    }
}

/// Pointer coordinate convention written into the animation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizeMode {
    /// Centered coordinates, `[-1, 1]` across the scope.
    #[default]
    #[serde(rename = "artboard")]
    Artboard,
    /// Unit coordinates, `[0, 1]` across the scope.
    #[serde(rename = "0to1")]
    Unit,
    /// Offsets in CSS pixels from the scope's top-left corner.
    #[serde(rename = "pixels")]
    Pixels,
}

/// Element whose bounds pointer samples are measured against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PointerScope {
    #[default]
    Window,
    Canvas,
    Container,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioMode {
    #[default]
    Off,
    Mic,
    Element,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Fit {
    #[default]
    Contain,
    Cover,
    Fill,
    FitWidth,
    FitHeight,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Alignment {
    #[default]
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

fn default_true() -> bool {
    true
}

fn default_extent() -> String {
    "100%".to_string()
}

/// The embedding layer emits empty strings for unset names.
fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|value| !value.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_record_takes_documented_defaults() {
        let config: InstanceConfig = serde_json::from_str(
            r#"{"id":"a","containerId":"a-container","canvasId":"a-canvas","src":"x.riv"}"#,
        )
        .unwrap();

        assert_eq!(config.fit, Fit::Contain);
        assert_eq!(config.alignment, Alignment::Center);
        assert_eq!(config.pointer_scope, PointerScope::Window);
        assert_eq!(config.audio_mode, AudioMode::Off);
        assert!(config.autoplay);
        assert!(config.pointer);

        let pointer = config.inputs.pointer_mapping();
        assert_eq!(pointer.x.as_deref(), Some("mx"));
        assert_eq!(pointer.y.as_deref(), Some("my"));
        assert_eq!(pointer.normalize, NormalizeMode::Artboard);
        assert_eq!(config.inputs.audio.talking_threshold(), 0.08);
        assert_eq!(config.inputs.audio.level_name(), "audio_level");
        assert_eq!(config.inputs.audio.talking_name(), "is_talking");
    }

    #[test]
    fn partial_pointer_section_drives_only_named_axes() {
        let mapping: InputMapping =
            serde_json::from_str(r#"{"pointer":{"y":"look","normalize":"0to1"}}"#).unwrap();
        let pointer = mapping.pointer_mapping();

        assert_eq!(pointer.x, None);
        assert_eq!(pointer.y.as_deref(), Some("look"));
        assert_eq!(pointer.normalize, NormalizeMode::Unit);
    }

    #[test]
    fn blur_reuses_focus_input_when_unset() {
        let flags = FlagMapping {
            focus: Some("focused".into()),
            ..Default::default()
        };
        assert_eq!(flags.blur_input(), Some("focused"));

        let flags = FlagMapping {
            focus: Some("focused".into()),
            blur: Some("away".into()),
            ..Default::default()
        };
        assert_eq!(flags.blur_input(), Some("away"));
    }

    #[test]
    fn talking_input_accepts_legacy_key() {
        let audio: AudioMapping =
            serde_json::from_str(r#"{"talkingInput":"mouth","threshold":0.2}"#).unwrap();
        assert_eq!(audio.talking_name(), "mouth");
        assert_eq!(audio.level_name(), "audio_level");
        assert!((audio.talking_threshold() - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn talking_key_wins_over_legacy_key() {
        let audio: AudioMapping =
            serde_json::from_str(r#"{"talking":"mouth","talkingInput":"legacy"}"#).unwrap();
        assert_eq!(audio.talking_name(), "mouth");

        let audio: AudioMapping =
            serde_json::from_str(r#"{"talking":"","talkingInput":"legacy"}"#).unwrap();
        assert_eq!(audio.talking_name(), "legacy");

        let config: InstanceConfig = serde_json::from_str(
            r#"{"id":"a","containerId":"c","canvasId":"v","src":"x.riv",
                "inputs":{"audio":{"talking":"mouth","talkingInput":"legacy","level":""}}}"#,
        )
        .unwrap();
        assert_eq!(config.inputs.audio.talking_name(), "mouth");
        assert_eq!(config.inputs.audio.level_name(), "audio_level");
    }

    #[test]
    fn zero_threshold_means_default() {
        let audio: AudioMapping = serde_json::from_str(r#"{"threshold":0}"#).unwrap();
        assert_eq!(audio.talking_threshold(), DEFAULT_TALKING_THRESHOLD);

        let audio: AudioMapping = serde_json::from_str(r#"{"threshold":0.3}"#).unwrap();
        assert!((audio.talking_threshold() - 0.3).abs() < f32::EPSILON);
        assert!(resolve_threshold(f32::NAN) == DEFAULT_TALKING_THRESHOLD);
    }

    #[test]
    fn empty_names_are_treated_as_unset() {
        let config: InstanceConfig = serde_json::from_str(
            r#"{"id":"a","containerId":"c","canvasId":"v","src":"x.riv","stateMachine":"","artboard":""}"#,
        )
        .unwrap();
        assert!(config.state_machine.is_none());
        assert!(config.artboard.is_none());
    }
}
