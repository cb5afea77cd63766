//! Linux evdev key codes (`linux/input-event-codes.h`).
//!
//! EI keyboard requests carry evdev codes: the numbers the kernel assigns to
//! *physical key positions*.  Which character a position produces depends on
//! the compositor's keymap; this crate assumes a US QWERTY keymap (see
//! [`super::us_qwerty`]).
//!
//! Reference: <https://github.com/torvalds/linux/blob/master/include/uapi/linux/input-event-codes.h>

use serde::{Deserialize, Serialize};

/// An evdev key code.  The numeric value of each variant is its kernel code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum KeyCode {
    Escape = 1,
    Digit1 = 2,
    Digit2 = 3,
    Digit3 = 4,
    Digit4 = 5,
    Digit5 = 6,
    Digit6 = 7,
    Digit7 = 8,
    Digit8 = 9,
    Digit9 = 10,
    Digit0 = 11,
    Minus = 12,
    Equal = 13,
    Backspace = 14,
    Tab = 15,
    Q = 16,
    W = 17,
    E = 18,
    R = 19,
    T = 20,
    Y = 21,
    U = 22,
    I = 23,
    O = 24,
    P = 25,
    LeftBrace = 26,
    RightBrace = 27,
    Enter = 28,
    LeftCtrl = 29,
    A = 30,
    S = 31,
    D = 32,
    F = 33,
    G = 34,
    H = 35,
    J = 36,
    K = 37,
    L = 38,
    Semicolon = 39,
    Apostrophe = 40,
    Grave = 41,
    LeftShift = 42,
    Backslash = 43,
    Z = 44,
    X = 45,
    C = 46,
    V = 47,
    B = 48,
    N = 49,
    M = 50,
    Comma = 51,
    Dot = 52,
    Slash = 53,
    RightShift = 54,
    LeftAlt = 56,
    Space = 57,
    CapsLock = 58,
    F1 = 59,
    F2 = 60,
    F3 = 61,
    F4 = 62,
    F5 = 63,
    F6 = 64,
    F7 = 65,
    F8 = 66,
    F9 = 67,
    F10 = 68,
    NumLock = 69,
    ScrollLock = 70,
    F11 = 87,
    F12 = 88,
    RightCtrl = 97,
    SysRq = 99,
    RightAlt = 100,
    Home = 102,
    Up = 103,
    PageUp = 104,
    Left = 105,
    Right = 106,
    End = 107,
    Down = 108,
    PageDown = 109,
    Insert = 110,
    Delete = 111,
    Pause = 119,
    LeftMeta = 125,
    RightMeta = 126,
    Compose = 127,
}

impl KeyCode {
    /// Returns the raw evdev code sent in `ei_keyboard.key`.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns `true` for Ctrl, Shift, Alt and Meta on either side.
    pub fn is_modifier(self) -> bool {
        matches!(
            self,
            KeyCode::LeftCtrl
                | KeyCode::RightCtrl
                | KeyCode::LeftShift
                | KeyCode::RightShift
                | KeyCode::LeftAlt
                | KeyCode::RightAlt
                | KeyCode::LeftMeta
                | KeyCode::RightMeta
        )
    }
}
