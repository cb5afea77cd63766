//! Character → physical key table for the US QWERTY layout.
//!
//! Each printable ASCII character maps to one key position plus a flag
//! saying whether Shift must be held.  Anything outside this table cannot
//! be typed by key emulation and has to go through an external text
//! injection path instead.

use super::evdev::KeyCode;

/// Unshifted and shifted characters of each keyboard row, paired with the
/// key positions that produce them.
const ROWS: [(&str, &str, &[KeyCode]); 4] = [
    (
        "`1234567890-=",
        "~!@#$%^&*()_+",
        &[
            KeyCode::Grave,
            KeyCode::Digit1,
            KeyCode::Digit2,
            KeyCode::Digit3,
            KeyCode::Digit4,
            KeyCode::Digit5,
            KeyCode::Digit6,
            KeyCode::Digit7,
            KeyCode::Digit8,
            KeyCode::Digit9,
            KeyCode::Digit0,
            KeyCode::Minus,
            KeyCode::Equal,
        ],
    ),
    (
        "qwertyuiop[]\\",
        "QWERTYUIOP{}|",
        &[
            KeyCode::Q,
            KeyCode::W,
            KeyCode::E,
            KeyCode::R,
            KeyCode::T,
            KeyCode::Y,
            KeyCode::U,
            KeyCode::I,
            KeyCode::O,
            KeyCode::P,
            KeyCode::LeftBrace,
            KeyCode::RightBrace,
            KeyCode::Backslash,
        ],
    ),
    (
        "asdfghjkl;'",
        "ASDFGHJKL:\"",
        &[
            KeyCode::A,
            KeyCode::S,
            KeyCode::D,
            KeyCode::F,
            KeyCode::G,
            KeyCode::H,
            KeyCode::J,
            KeyCode::K,
            KeyCode::L,
            KeyCode::Semicolon,
            KeyCode::Apostrophe,
        ],
    ),
    (
        "zxcvbnm,./",
        "ZXCVBNM<>?",
        &[
            KeyCode::Z,
            KeyCode::X,
            KeyCode::C,
            KeyCode::V,
            KeyCode::B,
            KeyCode::N,
            KeyCode::M,
            KeyCode::Comma,
            KeyCode::Dot,
            KeyCode::Slash,
        ],
    ),
];

/// Resolves `c` to `(key, shift_required)`.
///
/// Returns `None` for characters the layout cannot produce.
pub fn char_to_key(c: char) -> Option<(KeyCode, bool)> {
    match c {
        ' ' => return Some((KeyCode::Space, false)),
        '\t' => return Some((KeyCode::Tab, false)),
        '\n' => return Some((KeyCode::Enter, false)),
        _ => {}
    }

    for (plain, shifted, keys) in ROWS {
        if let Some(i) = plain.chars().position(|p| p == c) {
            return keys.get(i).map(|k| (*k, false));
        }
        if let Some(i) = shifted.chars().position(|s| s == c) {
            return keys.get(i).map(|k| (*k, true));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_pair_every_character_with_a_key() {
        for (plain, shifted, keys) in ROWS {
            assert_eq!(plain.chars().count(), keys.len(), "row {plain}");
            assert_eq!(shifted.chars().count(), keys.len(), "row {shifted}");
        }
    }

    #[test]
    fn test_lowercase_letter_needs_no_shift() {
        assert_eq!(char_to_key('a'), Some((KeyCode::A, false)));
        assert_eq!(char_to_key('m'), Some((KeyCode::M, false)));
    }

    #[test]
    fn test_uppercase_letter_needs_shift() {
        assert_eq!(char_to_key('Q'), Some((KeyCode::Q, true)));
    }

    #[test]
    fn test_shifted_symbols_share_key_with_base_symbol() {
        assert_eq!(char_to_key('!'), Some((KeyCode::Digit1, true)));
        assert_eq!(char_to_key('|'), Some((KeyCode::Backslash, true)));
        assert_eq!(char_to_key('"'), Some((KeyCode::Apostrophe, true)));
        assert_eq!(char_to_key('?'), Some((KeyCode::Slash, true)));
    }

    #[test]
    fn test_whitespace_characters_map_to_keys() {
        assert_eq!(char_to_key(' '), Some((KeyCode::Space, false)));
        assert_eq!(char_to_key('\t'), Some((KeyCode::Tab, false)));
        assert_eq!(char_to_key('\n'), Some((KeyCode::Enter, false)));
    }

    #[test]
    fn test_non_layout_characters_are_unmapped() {
        assert_eq!(char_to_key('é'), None);
        assert_eq!(char_to_key('€'), None);
        assert_eq!(char_to_key('\u{7f}'), None);
    }
}
