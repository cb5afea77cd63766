//! Input vocabulary: device capabilities, mouse buttons and scroll axes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::InterfaceKind;

/// A class of input a device can emulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Absolute pointer motion plus buttons (and scrolling if available).
    Pointer,
    Keyboard,
    Touch,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::Pointer, Capability::Keyboard, Capability::Touch];

    /// Device interfaces that must all be present for the capability.
    pub fn required_interfaces(self) -> &'static [InterfaceKind] {
        match self {
            Capability::Pointer => &[InterfaceKind::PointerAbsolute, InterfaceKind::Button],
            Capability::Keyboard => &[InterfaceKind::Keyboard],
            Capability::Touch => &[InterfaceKind::Touchscreen],
        }
    }

    /// Seat capability interfaces bound when the capability is requested.
    pub fn seat_interfaces(self) -> &'static [InterfaceKind] {
        match self {
            Capability::Pointer => &[
                InterfaceKind::PointerAbsolute,
                InterfaceKind::Button,
                InterfaceKind::Scroll,
            ],
            Capability::Keyboard => &[InterfaceKind::Keyboard],
            Capability::Touch => &[InterfaceKind::Touchscreen],
        }
    }

    fn bit(self) -> u8 {
        match self {
            Capability::Pointer => 1 << 0,
            Capability::Keyboard => 1 << 1,
            Capability::Touch => 1 << 2,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Pointer => "pointer",
            Capability::Keyboard => "keyboard",
            Capability::Touch => "touch",
        };
        f.write_str(name)
    }
}

/// A small set of [`Capability`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Capabilities in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> {
        let set = *self;
        Capability::ALL.into_iter().filter(move |c| set.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        let mut set = CapabilitySet::empty();
        for c in iter {
            set.insert(c);
        }
        set
    }
}

/// A mouse button, identified on the wire by its evdev `BTN_*` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
    Side,
    Extra,
}

impl MouseButton {
    /// `BTN_LEFT` (0x110) and following codes.
    pub fn evdev_code(self) -> u32 {
        match self {
            MouseButton::Left => 0x110,
            MouseButton::Right => 0x111,
            MouseButton::Middle => 0x112,
            MouseButton::Side => 0x113,
            MouseButton::Extra => 0x114,
        }
    }

    /// Parses a button name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "left" => Some(MouseButton::Left),
            "right" => Some(MouseButton::Right),
            "middle" => Some(MouseButton::Middle),
            "side" | "back" => Some(MouseButton::Side),
            "extra" | "forward" => Some(MouseButton::Extra),
            _ => None,
        }
    }
}

/// Direction of a scroll gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollAxis {
    #[default]
    Vertical,
    Horizontal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mouse_button_evdev_codes() {
        assert_eq!(MouseButton::Left.evdev_code(), 0x110);
        assert_eq!(MouseButton::Right.evdev_code(), 0x111);
        assert_eq!(MouseButton::Middle.evdev_code(), 0x112);
    }

    #[test]
    fn test_mouse_button_from_name() {
        assert_eq!(MouseButton::from_name("Right"), Some(MouseButton::Right));
        assert_eq!(MouseButton::from_name("back"), Some(MouseButton::Side));
        assert_eq!(MouseButton::from_name("wheel"), None);
    }

    #[test]
    fn test_capability_set_membership() {
        // Arrange
        let set: CapabilitySet = [Capability::Touch, Capability::Pointer].into_iter().collect();

        // Assert
        assert!(set.contains(Capability::Pointer));
        assert!(!set.contains(Capability::Keyboard));
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![Capability::Pointer, Capability::Touch]
        );
    }

    #[test]
    fn test_pointer_requires_absolute_motion_and_buttons() {
        assert_eq!(
            Capability::Pointer.required_interfaces(),
            &[InterfaceKind::PointerAbsolute, InterfaceKind::Button]
        );
    }

    #[test]
    fn test_capability_display_is_lowercase() {
        assert_eq!(Capability::Keyboard.to_string(), "keyboard");
    }
}
