/// Result alias that carries the custom [`BridgeError`] type.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Free-form failure surfaced to the host with a readable message.
    #[error("{0}")]
    Message(String),
    /// A host capability (audio capture, resize observation, ...) is missing.
    #[error("{0} unavailable")]
    Unavailable(&'static str),
    /// A DOM element referenced by configuration does not exist.
    #[error("element `{0}` not found")]
    ElementNotFound(String),
    /// The renderer refused to start loading an animation.
    #[error("renderer failed to load: {0}")]
    Load(String),
    /// Shared state was poisoned by a panicking handler.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration records could not be decoded.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Spectrum analysis failed.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl BridgeError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for BridgeError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BridgeError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
