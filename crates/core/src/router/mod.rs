use std::collections::HashMap;
use std::fmt;

use crate::render::{InputKind, SlotRef};

/// Last known value of an input, tagged by its declared kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputValue {
    Numeric(f32),
    Boolean(bool),
    Trigger,
}

impl InputValue {
    /// Kind this value belongs to.
    pub fn kind(&self) -> InputKind {
        match self {
            Self::Numeric(_) => InputKind::Numeric,
            Self::Boolean(_) => InputKind::Boolean,
            Self::Trigger => InputKind::Trigger,
        }
    }
}

/// Reference to a renderer-owned input slot together with its value.
#[derive(Clone)]
pub struct NamedInput {
    slot: SlotRef,
    value: InputValue,
}

impl NamedInput {
    /// Captures `slot` along with its current value.
    pub fn new(slot: SlotRef) -> Self {
        let value = match slot.kind() {
            InputKind::Numeric => InputValue::Numeric(slot.number()),
            InputKind::Boolean => InputValue::Boolean(slot.boolean()),
            InputKind::Trigger => InputValue::Trigger,
        };
        Self { slot, value }
    }

    /// Declared input name.
    pub fn name(&self) -> &str {
        self.slot.name()
    }

    pub fn value(&self) -> InputValue {
        self.value
    }
}

impl fmt::Debug for NamedInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedInput")
            .field("name", &self.name())
            .field("value", &self.value)
            .finish()
    }
}

/// Name-keyed view over the inputs a loaded animation declares.
///
/// Every setter is a silent no-op when the name is unknown or declared with a
/// different kind: configuration may reference inputs a given asset lacks.
#[derive(Debug, Default)]
pub struct InputRouter {
    inputs: HashMap<String, NamedInput>,
    debug: bool,
}

impl InputRouter {
    /// An empty router. `debug` enables a diagnostic line per write.
    pub fn new(debug: bool) -> Self {
        Self {
            inputs: HashMap::new(),
            debug,
        }
    }

    /// Replaces the current set of inputs. Later duplicates win.
    pub fn capture<I>(&mut self, slots: I)
    where
        I: IntoIterator<Item = SlotRef>,
    {
        self.inputs.clear();
        for slot in slots {
            self.inputs.insert(slot.name().to_string(), NamedInput::new(slot));
        }
    }

    /// Forgets every captured input.
    pub fn clear(&mut self) {
        self.inputs.clear();
    }

    /// Writes a numeric input.
    pub fn set_number(&mut self, name: &str, value: f32) {
        if let Some(NamedInput {
            slot,
            value: InputValue::Numeric(current),
        }) = self.inputs.get_mut(name)
        {
            *current = value;
            slot.set_number(value);
            diag!(self.debug, input = name, value, "number input");
        }
    }

    /// Writes a boolean input.
    pub fn set_boolean(&mut self, name: &str, value: bool) {
        if let Some(NamedInput {
            slot,
            value: InputValue::Boolean(current),
        }) = self.inputs.get_mut(name)
        {
            *current = value;
            slot.set_boolean(value);
            diag!(self.debug, input = name, value, "boolean input");
        }
    }

    /// Fires a trigger input.
    pub fn fire_trigger(&mut self, name: &str) {
        if let Some(NamedInput {
            slot,
            value: InputValue::Trigger,
        }) = self.inputs.get(name)
        {
            slot.fire();
            diag!(self.debug, input = name, "trigger fired");
        }
    }

    pub fn get(&self, name: &str) -> Option<&NamedInput> {
        self.inputs.get(name)
    }

    /// Last known value of an input.
    pub fn value(&self, name: &str) -> Option<InputValue> {
        self.get(name).map(NamedInput::value)
    }

    /// Captured input names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inputs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}
