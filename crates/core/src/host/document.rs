use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::{BridgeError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// On-screen bounding box of an element, in CSS pixels relative to the
/// viewport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Width and height, dropping the position.
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// The slice of the host document the bridge reads from and writes to.
pub trait Document: Send + Sync {
    fn contains(&self, id: &str) -> bool;

    fn bounding_rect(&self, id: &str) -> Option<Rect>;

    fn viewport(&self) -> Size;

    fn device_pixel_ratio(&self) -> f64;

    /// Sets a canvas backing store to `pixels` while displaying it at `css`.
    fn set_canvas_size(&self, id: &str, pixels: Size, css: Size) -> Result<()>;

    fn add_class(&self, id: &str, class: &str) -> Result<()>;

    /// Starts delivering `Resize` events for `id`. Fails with
    /// [`BridgeError::Unavailable`] when the host cannot observe resizes.
    fn observe_resize(&self, id: &str) -> Result<()>;

    fn unobserve_resize(&self, id: &str);
}

#[derive(Debug, Clone, Default)]
struct ElementState {
    rect: Rect,
    classes: Vec<String>,
    canvas: Option<(Size, Size)>,
    observed: bool,
}

#[derive(Debug)]
struct DocumentState {
    elements: HashMap<String, ElementState>,
    viewport: Size,
    device_pixel_ratio: f64,
}

/// In-process [`Document`] used by headless hosts and tests.
#[derive(Debug)]
pub struct MemoryDocument {
    state: Mutex<DocumentState>,
    resize_observer: bool,
}

impl MemoryDocument {
    /// An empty document with the given viewport and a device pixel ratio of 1.
    pub fn new(viewport: Size) -> Self {
        Self {
            state: Mutex::new(DocumentState {
                elements: HashMap::new(),
                viewport,
                device_pixel_ratio: 1.0,
            }),
            resize_observer: true,
        }
    }

    /// Overrides the device pixel ratio reported to instances.
    pub fn with_device_pixel_ratio(self, ratio: f64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.device_pixel_ratio = ratio;
        }
        self
    }

    /// Simulates a host lacking resize observation.
    pub fn without_resize_observer(mut self) -> Self {
        self.resize_observer = false;
        self
    }

    /// Adds or replaces an element with the given on-screen box.
    pub fn insert_element(&self, id: impl Into<String>, rect: Rect) -> Result<()> {
        let mut state = self.lock()?;
        state.elements.insert(
            id.into(),
            ElementState {
                rect,
                ..Default::default()
            },
        );
        Ok(())
    }

    /// Moves or resizes an existing element. Hosts follow this with a
    /// `Resize` dispatch when the element is observed.
    pub fn set_rect(&self, id: &str, rect: Rect) -> Result<()> {
        let mut state = self.lock()?;
        let element = state
            .elements
            .get_mut(id)
            .ok_or_else(|| BridgeError::ElementNotFound(id.to_string()))?;
        element.rect = rect;
        Ok(())
    }

    /// Classes applied to an element, in application order.
    pub fn classes(&self, id: &str) -> Vec<String> {
        self.lock()
            .ok()
            .and_then(|state| state.elements.get(id).map(|e| e.classes.clone()))
            .unwrap_or_default()
    }

    /// Returns the `(pixels, css)` sizes last applied to a canvas.
    pub fn canvas_size(&self, id: &str) -> Option<(Size, Size)> {
        self.lock()
            .ok()
            .and_then(|state| state.elements.get(id).and_then(|e| e.canvas))
    }

    /// Whether resize observation is active for an element.
    pub fn is_observed(&self, id: &str) -> bool {
        self.lock()
            .ok()
            .and_then(|state| state.elements.get(id).map(|e| e.observed))
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, DocumentState>> {
        self.state
            .lock()
            .map_err(|_| BridgeError::Poisoned("document"))
    }

    fn with_element<T>(&self, id: &str, f: impl FnOnce(&mut ElementState) -> T) -> Result<T> {
        let mut state = self.lock()?;
        let element = state
            .elements
            .get_mut(id)
            .ok_or_else(|| BridgeError::ElementNotFound(id.to_string()))?;
        Ok(f(element))
    }
}

impl Document for MemoryDocument {
    fn contains(&self, id: &str) -> bool {
        self.lock()
            .map(|state| state.elements.contains_key(id))
            .unwrap_or(false)
    }

    fn bounding_rect(&self, id: &str) -> Option<Rect> {
        self.lock()
            .ok()
            .and_then(|state| state.elements.get(id).map(|e| e.rect))
    }

    fn viewport(&self) -> Size {
        self.lock().map(|state| state.viewport).unwrap_or_default()
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.lock()
            .map(|state| state.device_pixel_ratio)
            .unwrap_or(1.0)
    }

    fn set_canvas_size(&self, id: &str, pixels: Size, css: Size) -> Result<()> {
        self.with_element(id, |element| element.canvas = Some((pixels, css)))
    }

    fn add_class(&self, id: &str, class: &str) -> Result<()> {
        self.with_element(id, |element| {
            if !element.classes.iter().any(|c| c == class) {
                element.classes.push(class.to_string());
            }
        })
    }

    fn observe_resize(&self, id: &str) -> Result<()> {
        if !self.resize_observer {
            return Err(BridgeError::Unavailable("resize observation"));
        }
        self.with_element(id, |element| element.observed = true)
    }

    fn unobserve_resize(&self, id: &str) {
        let _ = self.with_element(id, |element| element.observed = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_list_ignores_duplicates() {
        let doc = MemoryDocument::new(Size::new(800.0, 600.0));
        doc.insert_element("box", Rect::new(0.0, 0.0, 10.0, 10.0))
            .unwrap();

        doc.add_class("box", "error").unwrap();
        doc.add_class("box", "error").unwrap();

        assert_eq!(doc.classes("box"), vec!["error".to_string()]);
    }

    #[test]
    fn missing_elements_are_reported() {
        let doc = MemoryDocument::new(Size::new(800.0, 600.0));
        let err = doc.add_class("ghost", "error").unwrap_err();
        assert!(matches!(err, BridgeError::ElementNotFound(id) if id == "ghost"));
        assert!(doc.bounding_rect("ghost").is_none());
    }

    #[test]
    fn resize_observation_can_be_unavailable() {
        let doc = MemoryDocument::new(Size::new(800.0, 600.0)).without_resize_observer();
        doc.insert_element("box", Rect::default()).unwrap();
        assert!(matches!(
            doc.observe_resize("box"),
            Err(BridgeError::Unavailable(_))
        ));
        assert!(!doc.is_observed("box"));
    }
}
