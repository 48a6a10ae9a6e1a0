//! Pointer and touch coordinates, measured against a scope and normalized
//! into the convention an animation expects.

use serde::{Deserialize, Serialize};

use crate::config::{InstanceConfig, NormalizeMode, PointerMapping, PointerScope};
use crate::host::{Document, EventTarget, HostEvent, Point, Rect, Size};

/// Raw pointer offset plus the extent of the scope it was measured in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerSample {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Area a sample is measured against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScopeBounds {
    /// The whole window; client coordinates are used as-is.
    Viewport(Size),
    /// An element; coordinates become offsets from its top-left corner.
    Element(Rect),
}

impl PointerSample {
    /// Returns `None` when the event carries neither pointer nor touch
    /// coordinates.
    pub fn from_event(event: &HostEvent, bounds: ScopeBounds) -> Option<Self> {
        let position = event.position()?;
        Some(match bounds {
            ScopeBounds::Viewport(size) => Self {
                x: position.x,
                y: position.y,
                width: size.width,
                height: size.height,
            },
            ScopeBounds::Element(rect) => Self {
                x: position.x - rect.left,
                y: position.y - rect.top,
                width: rect.width,
                height: rect.height,
            },
        })
    }
}

/// Maps a sample into `mode`. Samples outside the scope are not clamped, and
/// a zero-sized scope yields non-finite values.
pub fn normalize(sample: &PointerSample, mode: NormalizeMode) -> Point {
    match mode {
        NormalizeMode::Unit => Point::new(sample.x / sample.width, sample.y / sample.height),
        NormalizeMode::Pixels => Point::new(sample.x, sample.y),
        NormalizeMode::Artboard => Point::new(
            sample.x / sample.width * 2.0 - 1.0,
            sample.y / sample.height * 2.0 - 1.0,
        ),
    }
}

/// Pointer settings for one instance, resolved against its element ids.
#[derive(Debug, Clone, PartialEq)]
pub struct PointerNormalizer {
    scope: PointerScope,
    scope_element: Option<String>,
    mapping: PointerMapping,
}

impl PointerNormalizer {
    /// Resolves the scope element and axis mapping of a record.
    pub fn from_config(config: &InstanceConfig) -> Self {
        let scope_element = match config.pointer_scope {
            PointerScope::Window => None,
            PointerScope::Canvas => Some(config.canvas_id.clone()),
            PointerScope::Container => Some(config.container_id.clone()),
        };
        Self {
            scope: config.pointer_scope,
            scope_element,
            mapping: config.inputs.pointer_mapping(),
        }
    }

    pub fn scope(&self) -> PointerScope {
        self.scope
    }

    /// Axis names and coordinate convention.
    pub fn mapping(&self) -> &PointerMapping {
        &self.mapping
    }

    /// Where pointer listeners attach.
    pub fn target(&self) -> EventTarget {
        match &self.scope_element {
            Some(id) => EventTarget::element(id.clone()),
            None => EventTarget::Window,
        }
    }

    /// Current bounds of the scope, or `None` if its element is gone.
    pub fn bounds(&self, document: &dyn Document) -> Option<ScopeBounds> {
        match &self.scope_element {
            Some(id) => document.bounding_rect(id).map(ScopeBounds::Element),
            None => Some(ScopeBounds::Viewport(document.viewport())),
        }
    }

    /// Samples and normalizes `event` in one step.
    pub fn process(&self, event: &HostEvent, document: &dyn Document) -> Option<Point> {
        let bounds = self.bounds(document)?;
        let sample = PointerSample::from_event(event, bounds)?;
        Some(normalize(&sample, self.mapping.normalize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryDocument;

    fn sample(x: f64, y: f64, width: f64, height: f64) -> PointerSample {
        PointerSample {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn unit_mode_is_scale_invariant() {
        for scale in [0.5, 1.0, 3.0, 1920.0] {
            let point = normalize(
                &sample(25.0 * scale, 75.0 * scale, 100.0 * scale, 100.0 * scale),
                NormalizeMode::Unit,
            );
            assert!((point.x - 0.25).abs() < 1e-12);
            assert!((point.y - 0.75).abs() < 1e-12);
        }
    }

    #[test]
    fn artboard_mode_centers_and_spans_unit_range() {
        for (width, height) in [(100.0, 100.0), (640.0, 360.0), (3.0, 7.0)] {
            let center = normalize(
                &sample(width / 2.0, height / 2.0, width, height),
                NormalizeMode::Artboard,
            );
            assert_eq!(center, Point::new(0.0, 0.0));

            let corner = normalize(&sample(width, height, width, height), NormalizeMode::Artboard);
            assert_eq!(corner, Point::new(1.0, 1.0));

            let origin = normalize(&sample(0.0, 0.0, width, height), NormalizeMode::Artboard);
            assert_eq!(origin, Point::new(-1.0, -1.0));
        }
    }

    #[test]
    fn samples_outside_scope_overshoot() {
        let point = normalize(&sample(150.0, -50.0, 100.0, 100.0), NormalizeMode::Artboard);
        assert_eq!(point, Point::new(2.0, -2.0));
    }

    #[test]
    fn pixels_mode_passes_offsets_through() {
        let point = normalize(&sample(40.0, 20.0, 300.0, 150.0), NormalizeMode::Pixels);
        assert_eq!(point, Point::new(40.0, 20.0));
    }

    #[test]
    fn element_scope_uses_offsets_from_bounding_box() {
        let bounds = ScopeBounds::Element(Rect::new(10.0, 10.0, 300.0, 150.0));
        let sample = PointerSample::from_event(&HostEvent::pointer(50.0, 30.0), bounds).unwrap();
        assert_eq!(sample, PointerSample { x: 40.0, y: 20.0, width: 300.0, height: 150.0 });
    }

    #[test]
    fn viewport_scope_uses_client_coordinates() {
        let bounds = ScopeBounds::Viewport(Size::new(800.0, 600.0));
        let touch = HostEvent::touch([Point::new(400.0, 150.0)]);
        let sample = PointerSample::from_event(&touch, bounds).unwrap();
        assert_eq!(sample, PointerSample { x: 400.0, y: 150.0, width: 800.0, height: 600.0 });
    }

    #[test]
    fn events_without_coordinates_yield_nothing() {
        let bounds = ScopeBounds::Element(Rect::new(0.0, 0.0, 10.0, 10.0));
        assert!(PointerSample::from_event(&HostEvent::default(), bounds).is_none());
        assert!(PointerSample::from_event(
            &HostEvent::default(),
            ScopeBounds::Viewport(Size::new(1.0, 1.0))
        )
        .is_none());
    }

    #[test]
    fn normalizer_resolves_scope_element() {
        let doc = MemoryDocument::new(Size::new(800.0, 600.0));
        doc.insert_element("a-container", Rect::new(100.0, 100.0, 200.0, 200.0))
            .unwrap();

        let mut config = InstanceConfig::new("a", "a-container", "a-canvas", "x.riv");
        config.pointer_scope = PointerScope::Container;
        let normalizer = PointerNormalizer::from_config(&config);

        assert_eq!(normalizer.target(), EventTarget::element("a-container"));
        let point = normalizer
            .process(&HostEvent::pointer(200.0, 200.0), &doc)
            .unwrap();
        assert_eq!(point, Point::new(0.0, 0.0));

        config.pointer_scope = PointerScope::Canvas;
        let normalizer = PointerNormalizer::from_config(&config);
        assert!(normalizer.process(&HostEvent::pointer(1.0, 1.0), &doc).is_none());
    }

    #[test]
    fn zero_sized_scope_is_not_guarded() {
        let point = normalize(&sample(5.0, 0.0, 0.0, 0.0), NormalizeMode::Unit);
        assert!(point.x.is_infinite());
        assert!(point.y.is_nan());
    }
}
