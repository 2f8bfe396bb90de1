//! Keypad vocabulary: which scan codes matter and how sequences are spelled
//!
//! Only a small subset of a numeric keypad takes part in matching: the ten
//! digits, Enter (confirm) and Backspace (abort). Everything else, including
//! NumLock, `+`, `-` and modifiers, is filtered out before it reaches the
//! matcher.
//!
//! # Requirements
//! - User must be able to open the device node (`input` group or a udev rule)

pub mod matcher;
pub mod reader;

pub use matcher::{Cursor, SequenceMatcher};
pub use reader::{DeviceError, DeviceReader, RawRead, ReadClassifier, ReadOutcome};

use evdev::Key;

/// Keypad digits in numeric order, so `DIGIT_KEYS[n]` is the key for `n`.
const DIGIT_KEYS: [Key; 10] = [
    Key::KEY_KP0,
    Key::KEY_KP1,
    Key::KEY_KP2,
    Key::KEY_KP3,
    Key::KEY_KP4,
    Key::KEY_KP5,
    Key::KEY_KP6,
    Key::KEY_KP7,
    Key::KEY_KP8,
    Key::KEY_KP9,
];

/// Key that submits the collected sequence
pub const CONFIRM_KEY: Key = Key::KEY_KPENTER;

/// Key that throws the collected sequence away
pub const ABORT_KEY: Key = Key::KEY_BACKSPACE;

/// Returns true for the codes that take part in matching
pub fn is_relevant(key: Key) -> bool {
    PadKey::from_key(key).is_some()
}

/// A relevant key, classified by its role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadKey {
    Digit(u8),
    Confirm,
    Abort,
}

impl PadKey {
    /// Classify a raw scan code; `None` means the code is irrelevant
    pub fn from_key(key: Key) -> Option<Self> {
        if key == CONFIRM_KEY {
            return Some(PadKey::Confirm);
        }
        if key == ABORT_KEY {
            return Some(PadKey::Abort);
        }
        DIGIT_KEYS
            .iter()
            .position(|k| *k == key)
            .map(|n| PadKey::Digit(n as u8))
    }

    pub fn from_digit(c: char) -> Option<Self> {
        c.to_digit(10).map(|n| PadKey::Digit(n as u8))
    }

    pub fn key(self) -> Key {
        match self {
            PadKey::Digit(n) => DIGIT_KEYS[usize::from(n % 10)],
            PadKey::Confirm => CONFIRM_KEY,
            PadKey::Abort => ABORT_KEY,
        }
    }
}

impl std::fmt::Display for PadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PadKey::Digit(n) => write!(f, "KP{}", n),
            PadKey::Confirm => write!(f, "Enter"),
            PadKey::Abort => write!(f, "Backspace"),
        }
    }
}

/// Human readable name of a scan code for log output
pub fn key_name(key: Key) -> String {
    match PadKey::from_key(key) {
        Some(pad) => pad.to_string(),
        None => format!("code {}", key.code()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceParseError {
    #[error("key sequence is empty")]
    Empty,
    #[error("invalid key {found:?} at position {position} (only digits 0-9 are allowed)")]
    InvalidKey { position: usize, found: char },
}

/// An ordered, non-empty list of keypad digits.
///
/// The length is explicit, so there is no terminator value that could
/// collide with a real scan code. Sequences are written as digit strings,
/// e.g. `"004"` for KP0 KP0 KP4.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySequence {
    keys: Vec<Key>,
}

impl KeySequence {
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key expected at `position`, or `None` once the sequence is complete
    pub fn expected(&self, position: usize) -> Option<Key> {
        self.keys.get(position).copied()
    }
}

impl std::str::FromStr for KeySequence {
    type Err = SequenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SequenceParseError::Empty);
        }
        let keys = s
            .chars()
            .enumerate()
            .map(|(position, c)| {
                PadKey::from_digit(c)
                    .map(PadKey::key)
                    .ok_or(SequenceParseError::InvalidKey { position, found: c })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { keys })
    }
}

impl std::fmt::Display for KeySequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for key in &self.keys {
            match PadKey::from_key(*key) {
                Some(PadKey::Digit(n)) => write!(f, "{}", n)?,
                _ => write!(f, "?")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevant_set_is_closed() {
        for key in DIGIT_KEYS {
            assert!(is_relevant(key));
        }
        assert!(is_relevant(Key::KEY_KPENTER));
        assert!(is_relevant(Key::KEY_BACKSPACE));

        // NumLock, keypad operators, modifiers and the main-row digits are out
        for key in [
            Key::KEY_NUMLOCK,
            Key::KEY_KPPLUS,
            Key::KEY_KPMINUS,
            Key::KEY_KPASTERISK,
            Key::KEY_KPDOT,
            Key::KEY_LEFTCTRL,
            Key::KEY_ENTER,
            Key::KEY_0,
            Key::KEY_1,
        ] {
            assert!(!is_relevant(key), "{:?} should be irrelevant", key);
        }
    }

    #[test]
    fn test_pad_key_round_trips_through_scan_code() {
        assert_eq!(PadKey::from_key(Key::KEY_KP7), Some(PadKey::Digit(7)));
        assert_eq!(PadKey::Digit(7).key(), Key::KEY_KP7);
        assert_eq!(PadKey::from_key(Key::KEY_KPENTER), Some(PadKey::Confirm));
        assert_eq!(PadKey::from_key(Key::KEY_BACKSPACE), Some(PadKey::Abort));
    }

    #[test]
    fn test_sequence_parse_and_display() {
        let seq: KeySequence = "004".parse().unwrap();
        assert_eq!(seq.keys(), &[Key::KEY_KP0, Key::KEY_KP0, Key::KEY_KP4]);
        assert_eq!(seq.to_string(), "004");
        assert_eq!(seq.expected(2), Some(Key::KEY_KP4));
        assert_eq!(seq.expected(3), None);
    }

    #[test]
    fn test_sequence_rejects_empty_and_non_digits() {
        assert_eq!("".parse::<KeySequence>(), Err(SequenceParseError::Empty));
        assert_eq!("   ".parse::<KeySequence>(), Err(SequenceParseError::Empty));
        assert_eq!(
            "01+".parse::<KeySequence>(),
            Err(SequenceParseError::InvalidKey {
                position: 2,
                found: '+'
            })
        );
    }

    #[test]
    fn test_key_names() {
        assert_eq!(key_name(Key::KEY_KP3), "KP3");
        assert_eq!(key_name(Key::KEY_KPENTER), "Enter");
        assert_eq!(key_name(Key::KEY_NUMLOCK), format!("code {}", Key::KEY_NUMLOCK.code()));
    }

    #[test]
    fn test_sequence_length() {
        let seq: KeySequence = "0040".parse().unwrap();
        assert_eq!(seq.len(), 4);
        assert!(!seq.is_empty());
        assert_eq!(seq.expected(3), Some(Key::KEY_KP0));
        assert_eq!(seq.expected(4), None);
    }
}
