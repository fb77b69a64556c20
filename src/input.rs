//! Keyboard events as seen by components.

use std::fmt;

use winit::event::{ElementState, KeyEvent as WinitKeyEvent};
use winit::keyboard::{KeyCode, ModifiersState, PhysicalKey};

/// A key together with the modifiers held when it was pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeySpec {
    pub key: KeyCode,
    pub modifiers: ModifiersState,
}

impl KeySpec {
    pub fn new(key: KeyCode, modifiers: ModifiersState) -> Self {
        Self { key, modifiers }
    }

    /// The key with no modifiers.
    pub fn plain(key: KeyCode) -> Self {
        Self::new(key, ModifiersState::empty())
    }

    pub fn alt(self) -> bool {
        self.modifiers.alt_key()
    }

    pub fn control(self) -> bool {
        self.modifiers.control_key()
    }

    pub fn shift(self) -> bool {
        self.modifiers.shift_key()
    }
}

impl From<KeyCode> for KeySpec {
    fn from(key: KeyCode) -> Self {
        Self::plain(key)
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.alt() {
            f.write_str("Alt-")?;
        }
        if self.control() {
            f.write_str("Ctrl-")?;
        }
        if self.shift() {
            f.write_str("Shift-")?;
        }
        write!(f, "{:?}", self.key)
    }
}

/// A key press or release delivered through the component tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub spec: KeySpec,
    /// True for auto-repeat presses.
    pub repeat: bool,
}

impl KeyEvent {
    pub fn new(spec: impl Into<KeySpec>) -> Self {
        Self {
            spec: spec.into(),
            repeat: false,
        }
    }

    pub fn key(&self) -> KeyCode {
        self.spec.key
    }

    /// True if this is `spec` exactly (same key, same modifiers).
    pub fn is(&self, spec: impl Into<KeySpec>) -> bool {
        self.spec == spec.into()
    }

    /// Converts a winit keyboard event. Keys without a physical key code are dropped.
    pub fn from_winit(event: &WinitKeyEvent, modifiers: ModifiersState) -> Option<(Self, ElementState)> {
        let PhysicalKey::Code(key) = event.physical_key else {
            return None;
        };
        let ev = Self {
            spec: KeySpec::new(key, modifiers),
            repeat: event.repeat,
        };
        Some((ev, event.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_modifiers_in_fixed_order() {
        let spec = KeySpec::new(
            KeyCode::KeyR,
            ModifiersState::SHIFT | ModifiersState::CONTROL | ModifiersState::ALT,
        );
        assert_eq!(spec.to_string(), "Alt-Ctrl-Shift-KeyR");
        assert_eq!(KeySpec::plain(KeyCode::F5).to_string(), "F5");
    }

    #[test]
    fn matching_is_exact() {
        let ev = KeyEvent::new(KeySpec::new(KeyCode::KeyA, ModifiersState::CONTROL));
        assert!(ev.is(KeySpec::new(KeyCode::KeyA, ModifiersState::CONTROL)));
        assert!(!ev.is(KeyCode::KeyA));
    }
}
