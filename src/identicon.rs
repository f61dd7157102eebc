//! Visual identity fingerprint.
//!
//! A small glyph figure derived from the full name and master password. It
//! lets a user notice a mistyped password before any site is derived, and
//! reveals nothing useful about the password itself.

use std::fmt;
use std::str::FromStr;

use ring::hmac;

use crate::error::MpwError;

const LEFT_ARMS: [&str; 4] = ["╔", "╚", "╰", "═"];
const BODIES: [&str; 6] = ["█", "░", "▒", "▓", "☺", "☻"];
const RIGHT_ARMS: [&str; 4] = ["╗", "╝", "╯", "═"];
const ACCESSORIES: [&str; 57] = [
    "◈", "◎", "◐", "◑", "◒", "◓", "☀", "☁", "☂", "☃", "☄", "★", "☆", "☎", "☏", "⎈", "⌂", "☘", "☢",
    "☣", "☕", "⌚", "⌛", "⏰", "⚡", "⛄", "⛅", "☔", "♔", "♕", "♖", "♗", "♘", "♙", "♚", "♛", "♜",
    "♝", "♞", "♟", "♨", "♩", "♪", "♫", "⚐", "⚑", "⚔", "⚖", "⚙", "⚠", "⌘", "⏎", "✄", "✆", "✈",
    "✉", "✌",
];

/// Terminal-style color of an identicon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdenticonColor {
    Red = 1,
    Green = 2,
    Yellow = 3,
    Blue = 4,
    Magenta = 5,
    Cyan = 6,
    Mono = 7,
}

impl IdenticonColor {
    const ALL: [IdenticonColor; 7] = [
        IdenticonColor::Red,
        IdenticonColor::Green,
        IdenticonColor::Yellow,
        IdenticonColor::Blue,
        IdenticonColor::Magenta,
        IdenticonColor::Cyan,
        IdenticonColor::Mono,
    ];

    fn from_number(number: u8) -> Option<Self> {
        Self::ALL.get((number as usize).checked_sub(1)?).copied()
    }
}

/// A four-glyph figure plus a color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identicon {
    pub left_arm: &'static str,
    pub body: &'static str,
    pub right_arm: &'static str,
    pub accessory: &'static str,
    pub color: IdenticonColor,
}

impl Identicon {
    /// Compute the identicon for an identity.
    pub fn new(full_name: &str, master_password: &str) -> Self {
        let key = hmac::Key::new(hmac::HMAC_SHA256, master_password.as_bytes());
        let tag = hmac::sign(&key, full_name.as_bytes());
        let seed = tag.as_ref();

        Self {
            left_arm: LEFT_ARMS[seed[0] as usize % LEFT_ARMS.len()],
            body: BODIES[seed[1] as usize % BODIES.len()],
            right_arm: RIGHT_ARMS[seed[2] as usize % RIGHT_ARMS.len()],
            accessory: ACCESSORIES[seed[3] as usize % ACCESSORIES.len()],
            color: IdenticonColor::ALL[seed[4] as usize % IdenticonColor::ALL.len()],
        }
    }

    /// The figure without its color.
    pub fn glyphs(&self) -> String {
        [self.left_arm, self.body, self.right_arm, self.accessory].concat()
    }
}

/// `"<color>:<left arm><body><right arm><accessory>"`, as stored in vault headers.
impl fmt::Display for Identicon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.color as u8, self.glyphs())
    }
}

impl FromStr for Identicon {
    type Err = MpwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MpwError::InvalidParameter("malformed identicon".into());

        let (color, glyphs) = s.trim().split_once(':').ok_or_else(invalid)?;
        let color = color
            .parse::<u8>()
            .ok()
            .and_then(IdenticonColor::from_number)
            .ok_or_else(invalid)?;

        let mut chars = glyphs.chars().map(|c| {
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf).to_owned()
        });
        let mut pick = |table: &[&'static str]| -> Result<&'static str, MpwError> {
            let glyph = chars.next().ok_or_else(invalid)?;
            table
                .iter()
                .find(|candidate| **candidate == glyph)
                .copied()
                .ok_or_else(invalid)
        };

        let identicon = Self {
            left_arm: pick(&LEFT_ARMS)?,
            body: pick(&BODIES)?,
            right_arm: pick(&RIGHT_ARMS)?,
            accessory: pick(&ACCESSORIES)?,
            color,
        };
        if chars.next().is_some() {
            return Err(invalid());
        }
        Ok(identicon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identicon_is_deterministic() {
        let a = Identicon::new("Robert Lee Mitchell", "banana colored duckling");
        let b = Identicon::new("Robert Lee Mitchell", "banana colored duckling");
        assert_eq!(a, b);
        assert_eq!(a.glyphs().chars().count(), 4);
    }

    #[test]
    fn test_identicon_encoding_roundtrip() {
        let identicon = Identicon::new("Robert Lee Mitchell", "banana colored duckling");
        let encoded = identicon.to_string();
        assert_eq!(encoded.parse::<Identicon>().unwrap(), identicon);
    }

    #[test]
    fn test_identicon_rejects_garbage() {
        assert!("".parse::<Identicon>().is_err());
        assert!("9:╔█╗◈".parse::<Identicon>().is_err());
        assert!("1:╔█╗".parse::<Identicon>().is_err());
        assert!("1:╔█╗◈◈".parse::<Identicon>().is_err());
        assert!("1:xxxx".parse::<Identicon>().is_err());
    }

    #[test]
    fn test_identicon_tracks_password() {
        // Collisions are possible in principle; these two inputs differ.
        let a = Identicon::new("Robert Lee Mitchell", "banana colored duckling");
        let b = Identicon::new("Robert Lee Mitchell", "banana colored ducklinh");
        let c = Identicon::new("Robert Lee Mitchell", "apple");
        assert!(a != b || a != c);
    }
}
