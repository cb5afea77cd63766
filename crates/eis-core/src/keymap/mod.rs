//! Keycode mapping: characters, key names and key combos → evdev key codes.
//!
//! Exactly one layout is supported (US QWERTY).  Three kinds of input are
//! resolved here:
//!
//! - single characters for text typing ([`KeyMapper::resolve_char`]),
//! - key names such as `"Return"`, `"F5"` or `"page_down"`
//!   ([`KeyMapper::key_by_name`]),
//! - combos such as `"ctrl+shift+t"` ([`KeyMapper::parse_combo`]).

pub mod evdev;
pub mod us_qwerty;

use thiserror::Error;

pub use evdev::KeyCode;

/// Errors raised while mapping caller input to key codes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeymapError {
    /// The character has no key on the supported layout.
    #[error("character {0:?} is not on the US QWERTY layout")]
    UnmappedCharacter(char),

    /// The key name is not known.
    #[error("unknown key name: {0:?}")]
    UnknownKey(String),

    /// The combo string is empty, has an empty part, or names two base keys.
    #[error("invalid key combo {combo:?}: {reason}")]
    InvalidCombo { combo: String, reason: &'static str },
}

/// A modifier key, ordered canonically: Ctrl, Alt, Shift, Super.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Super,
}

impl Modifier {
    /// The key pressed to hold this modifier (always the left-hand key).
    pub fn key(self) -> KeyCode {
        match self {
            Modifier::Ctrl => KeyCode::LeftCtrl,
            Modifier::Alt => KeyCode::LeftAlt,
            Modifier::Shift => KeyCode::LeftShift,
            Modifier::Super => KeyCode::LeftMeta,
        }
    }

    /// Parses a modifier name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => Some(Modifier::Ctrl),
            "alt" => Some(Modifier::Alt),
            "shift" => Some(Modifier::Shift),
            "super" | "meta" => Some(Modifier::Super),
            _ => None,
        }
    }

    /// Maps either-side modifier keys back to their modifier.
    pub fn from_key(key: KeyCode) -> Option<Self> {
        match key {
            KeyCode::LeftCtrl | KeyCode::RightCtrl => Some(Modifier::Ctrl),
            KeyCode::LeftAlt | KeyCode::RightAlt => Some(Modifier::Alt),
            KeyCode::LeftShift | KeyCode::RightShift => Some(Modifier::Shift),
            KeyCode::LeftMeta | KeyCode::RightMeta => Some(Modifier::Super),
            _ => None,
        }
    }
}

/// A parsed key combo: modifiers in canonical order plus an optional base key.
///
/// A combo with no base key (e.g. `"ctrl"`) is valid for hold/release
/// operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombo {
    pub modifiers: Vec<Modifier>,
    pub key: Option<KeyCode>,
}

impl KeyCombo {
    /// Keys in press order: modifiers first, then the base key.
    pub fn press_order(&self) -> Vec<KeyCode> {
        self.modifiers
            .iter()
            .map(|m| m.key())
            .chain(self.key)
            .collect()
    }
}

/// Static lookup of characters, key names and combos.
pub struct KeyMapper;

impl KeyMapper {
    /// Resolves a character to `(key, shift_required)`.
    ///
    /// # Errors
    ///
    /// Returns [`KeymapError::UnmappedCharacter`] if the layout cannot
    /// produce `c`.
    pub fn resolve_char(c: char) -> Result<(KeyCode, bool), KeymapError> {
        us_qwerty::char_to_key(c).ok_or(KeymapError::UnmappedCharacter(c))
    }

    /// Resolves a key name (case-insensitive) or a single layout character.
    ///
    /// Returns the key and whether Shift is needed to produce it; only
    /// single shifted characters such as `"A"` or `"!"` need Shift.
    ///
    /// # Errors
    ///
    /// Returns [`KeymapError::UnknownKey`] for names not in the table.
    pub fn key_by_name(name: &str) -> Result<(KeyCode, bool), KeymapError> {
        let mut chars = name.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if let Some(found) = us_qwerty::char_to_key(c) {
                return Ok(found);
            }
        }

        named_key(&name.to_ascii_lowercase())
            .map(|k| (k, false))
            .ok_or_else(|| KeymapError::UnknownKey(name.to_string()))
    }

    /// Parses a `+`-separated combo such as `"ctrl+alt+Delete"`.
    ///
    /// Modifiers are deduplicated and sorted canonically.  A shifted base
    /// character (`"ctrl+A"`) adds Shift to the modifier list.
    ///
    /// # Errors
    ///
    /// Returns [`KeymapError::InvalidCombo`] for empty parts or more than one
    /// base key, and [`KeymapError::UnknownKey`] for unknown names.
    pub fn parse_combo(combo: &str) -> Result<KeyCombo, KeymapError> {
        let invalid = |reason| KeymapError::InvalidCombo {
            combo: combo.to_string(),
            reason,
        };

        let mut modifiers = Vec::new();
        let mut key = None;

        for part in combo.split('+') {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid("empty key name"));
            }
            if let Some(m) = Modifier::from_name(part) {
                modifiers.push(m);
                continue;
            }
            if key.is_some() {
                return Err(invalid("more than one base key"));
            }
            let (code, shift) = Self::key_by_name(part)?;
            if shift {
                modifiers.push(Modifier::Shift);
            }
            key = Some(code);
        }

        modifiers.sort();
        modifiers.dedup();
        Ok(KeyCombo { modifiers, key })
    }
}

/// Named keys.  Names are matched lowercase.
fn named_key(name: &str) -> Option<KeyCode> {
    let key = match name {
        "return" | "enter" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "escape" | "esc" => KeyCode::Escape,
        "backspace" => KeyCode::Backspace,
        "delete" | "del" => KeyCode::Delete,
        "space" => KeyCode::Space,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "page_up" | "pageup" => KeyCode::PageUp,
        "page_down" | "pagedown" => KeyCode::PageDown,
        "insert" => KeyCode::Insert,
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f3" => KeyCode::F3,
        "f4" => KeyCode::F4,
        "f5" => KeyCode::F5,
        "f6" => KeyCode::F6,
        "f7" => KeyCode::F7,
        "f8" => KeyCode::F8,
        "f9" => KeyCode::F9,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,
        "print" => KeyCode::SysRq,
        "scroll_lock" => KeyCode::ScrollLock,
        "pause" => KeyCode::Pause,
        "caps_lock" => KeyCode::CapsLock,
        "num_lock" => KeyCode::NumLock,
        "menu" => KeyCode::Compose,
        "shift" => KeyCode::LeftShift,
        "ctrl" | "control" => KeyCode::LeftCtrl,
        "alt" => KeyCode::LeftAlt,
        "super" | "meta" => KeyCode::LeftMeta,
        _ => return None,
    };
    Some(key)
}
