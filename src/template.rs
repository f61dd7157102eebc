//! Password templates and rendering.
//!
//! A template is a string of character-class codes. The first site key byte
//! picks a template from the result type's list, every following byte picks a
//! character from the alphabet named by the code at that position.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::algorithm::Algorithm;
use crate::error::MpwError;
use crate::keys::SiteKey;

const CLASS_TEMPLATE: u32 = 1 << 4;
const CLASS_STATEFUL: u32 = 1 << 5;
const FEATURE_EXPORT_CONTENT: u32 = 1 << 10;
const FEATURE_DEVICE_PRIVATE: u32 = 1 << 11;

/// How a result type produces its secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    /// Rendered from the site key through a template; never stored.
    Template,
    /// User-supplied content, stored encrypted under the site key.
    Stateful,
}

/// What kind of secret a site produces.
///
/// The numeric values are part of the vault formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ResultType {
    Maximum = 0x0 | CLASS_TEMPLATE as isize,
    Long = 0x1 | CLASS_TEMPLATE as isize,
    Medium = 0x2 | CLASS_TEMPLATE as isize,
    Basic = 0x3 | CLASS_TEMPLATE as isize,
    Short = 0x4 | CLASS_TEMPLATE as isize,
    Pin = 0x5 | CLASS_TEMPLATE as isize,
    Name = 0xE | CLASS_TEMPLATE as isize,
    Phrase = 0xF | CLASS_TEMPLATE as isize,
    /// Stored content that travels with exports.
    Personal = 0x0 | CLASS_STATEFUL as isize | FEATURE_EXPORT_CONTENT as isize,
    /// Stored content that never leaves the device.
    Device = 0x1 | CLASS_STATEFUL as isize | FEATURE_DEVICE_PRIVATE as isize,
}

impl ResultType {
    /// Every result type.
    pub const ALL: [ResultType; 10] = [
        ResultType::Maximum,
        ResultType::Long,
        ResultType::Medium,
        ResultType::Basic,
        ResultType::Short,
        ResultType::Pin,
        ResultType::Name,
        ResultType::Phrase,
        ResultType::Personal,
        ResultType::Device,
    ];

    /// The default type for new password sites.
    pub const DEFAULT_PASSWORD: ResultType = ResultType::Long;

    /// The default type for generated login names.
    pub const DEFAULT_LOGIN: ResultType = ResultType::Name;

    /// The default type for security answers.
    pub const DEFAULT_ANSWER: ResultType = ResultType::Phrase;

    pub fn class(self) -> ResultClass {
        if self.number() & CLASS_STATEFUL != 0 {
            ResultClass::Stateful
        } else {
            ResultClass::Template
        }
    }

    /// Whether stored content may be written to an export.
    pub fn exports_content(self) -> bool {
        self.number() & FEATURE_EXPORT_CONTENT != 0
    }

    pub fn number(self) -> u32 {
        self as u32
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Self::Maximum => "maximum",
            Self::Long => "long",
            Self::Medium => "medium",
            Self::Basic => "basic",
            Self::Short => "short",
            Self::Pin => "pin",
            Self::Name => "name",
            Self::Phrase => "phrase",
            Self::Personal => "personal",
            Self::Device => "device",
        }
    }
}

impl TryFrom<u32> for ResultType {
    type Error = MpwError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|t| t.number() == value)
            .ok_or(MpwError::UnsupportedResultType(value))
    }
}

impl From<ResultType> for u32 {
    fn from(result_type: ResultType) -> Self {
        result_type.number()
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// The template lists of one algorithm version, by result type.
#[derive(Debug)]
pub struct TemplateTable {
    pub maximum: &'static [&'static str],
    pub long: &'static [&'static str],
    pub medium: &'static [&'static str],
    pub basic: &'static [&'static str],
    pub short: &'static [&'static str],
    pub pin: &'static [&'static str],
    pub name: &'static [&'static str],
    pub phrase: &'static [&'static str],
}

impl TemplateTable {
    /// Templates for `result_type`, or `None` for stateful types.
    pub fn for_type(&self, result_type: ResultType) -> Option<&'static [&'static str]> {
        match result_type {
            ResultType::Maximum => Some(self.maximum),
            ResultType::Long => Some(self.long),
            ResultType::Medium => Some(self.medium),
            ResultType::Basic => Some(self.basic),
            ResultType::Short => Some(self.short),
            ResultType::Pin => Some(self.pin),
            ResultType::Name => Some(self.name),
            ResultType::Phrase => Some(self.phrase),
            ResultType::Personal | ResultType::Device => None,
        }
    }
}

pub(crate) static TEMPLATES_V0: TemplateTable = TemplateTable {
    maximum: &["anoxxxxxxxxxxxxxxxxx", "axxxxxxxxxxxxxxxxxno"],
    long: &[
        "CvcvnoCvcvCvcv",
        "CvcvCvcvnoCvcv",
        "CvcvCvcvCvcvno",
        "CvccnoCvcvCvcv",
        "CvccCvcvnoCvcv",
        "CvccCvcvCvcvno",
        "CvcvnoCvccCvcv",
        "CvcvCvccnoCvcv",
        "CvcvCvccCvcvno",
        "CvcvnoCvcvCvcc",
        "CvcvCvcvnoCvcc",
        "CvcvCvcvCvccno",
        "CvccnoCvccCvcv",
        "CvccCvccnoCvcv",
        "CvccCvccCvcvno",
        "CvcvnoCvccCvcc",
        "CvcvCvccnoCvcc",
        "CvcvCvccCvccno",
        "CvccnoCvcvCvcc",
        "CvccCvcvnoCvcc",
        "CvccCvcvCvccno",
    ],
    medium: &["CvcnoCvc", "CvcCvcno"],
    basic: &["aaanaaan", "aannaaan", "aaannaaa"],
    short: &["Cvcn"],
    pin: &["nnnn"],
    name: &["cvccvcvcv"],
    phrase: &[
        "cvcc cvc cvccvcv cvc",
        "cvc cvccvcvcv cvcv",
        "cv cvccv cvc cvcvccv",
    ],
};

/// The alphabet a template character-class code stands for.
pub fn alphabet(code: u8) -> Option<&'static [u8]> {
    let chars: &'static str = match code {
        b'V' => "AEIOU",
        b'C' => "BCDFGHJKLMNPQRSTVWXYZ",
        b'v' => "aeiou",
        b'c' => "bcdfghjklmnpqrstvwxyz",
        b'A' => "AEIOUBCDFGHJKLMNPQRSTVWXYZ",
        b'a' => "AEIOUaeiouBCDFGHJKLMNPQRSTVWXYZbcdfghjklmnpqrstvwxyz",
        b'n' => "0123456789",
        b'o' => "@&%?,=[]_:-+*$#!'^~;()/.",
        b'x' => "AEIOUaeiouBCDFGHJKLMNPQRSTVWXYZbcdfghjklmnpqrstvwxyz0123456789!@#$%^&*()",
        b' ' => " ",
        _ => return None,
    };
    Some(chars.as_bytes())
}

/// The template `site_key` selects for `result_type` under `algorithm`.
pub fn select_template(
    site_key: &SiteKey,
    result_type: ResultType,
    algorithm: Algorithm,
) -> Result<&'static str, MpwError> {
    let params = algorithm.params();
    let templates = params
        .templates
        .for_type(result_type)
        .filter(|templates| !templates.is_empty())
        .ok_or_else(|| {
            MpwError::InvalidParameter(format!("{} is not a template type", result_type))
        })?;

    let seed = params.seed.seed(site_key.as_bytes()[0]) as usize;
    Ok(templates[seed % templates.len()])
}

/// Render a site key into the secret for a template result type.
///
/// Fails closed with [`MpwError::TemplateOverflow`] rather than reusing key
/// bytes when a template is longer than the key allows.
pub fn render_password(
    site_key: &SiteKey,
    result_type: ResultType,
    algorithm: Algorithm,
) -> Result<Zeroizing<String>, MpwError> {
    let template = select_template(site_key, result_type, algorithm)?;
    let key = site_key.as_bytes();
    if template.len() >= key.len() {
        return Err(MpwError::TemplateOverflow);
    }

    let seed_rule = algorithm.params().seed;
    let mut password = Zeroizing::new(String::with_capacity(template.len()));
    for (position, code) in template.bytes().enumerate() {
        let chars = alphabet(code).ok_or_else(|| {
            MpwError::InvalidParameter(format!("unknown template class '{}'", code as char))
        })?;
        let seed = seed_rule.seed(key[position + 1]) as usize;
        password.push(chars[seed % chars.len()] as char);
    }

    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_type_numbers() {
        assert_eq!(ResultType::Maximum.number(), 16);
        assert_eq!(ResultType::Long.number(), 17);
        assert_eq!(ResultType::Pin.number(), 21);
        assert_eq!(ResultType::Name.number(), 30);
        assert_eq!(ResultType::Phrase.number(), 31);
        assert_eq!(ResultType::Personal.number(), 1056);
        assert_eq!(ResultType::Device.number(), 2081);
        assert_eq!(ResultType::try_from(2081).unwrap(), ResultType::Device);
        assert!(ResultType::try_from(99).is_err());
    }

    #[test]
    fn test_result_classes() {
        assert_eq!(ResultType::Long.class(), ResultClass::Template);
        assert_eq!(ResultType::Personal.class(), ResultClass::Stateful);
        assert!(ResultType::Personal.exports_content());
        assert!(!ResultType::Device.exports_content());
    }

    #[test]
    fn test_render_short_by_hand() {
        // "Cvcn" is the only Short template; every byte is 0x80 (128).
        // C: 128 % 21 = 2 -> 'D', v: 128 % 5 = 3 -> 'o', c: 2 -> 'd', n: 8.
        let key = SiteKey::from_bytes([0x80; 32]);
        let password = render_password(&key, ResultType::Short, Algorithm::V1).unwrap();
        assert_eq!(password.as_str(), "Dod8");
    }

    #[test]
    fn test_v0_seed_is_sign_extended_and_swapped() {
        // 0x80 becomes 0x80ff (33023). 33023 % 21 = 11 -> 'P', % 5 = 3 -> 'o'.
        let key = SiteKey::from_bytes([0x80; 32]);
        let password = render_password(&key, ResultType::Short, Algorithm::V0).unwrap();
        assert_eq!(password.as_str(), "Pop3");
    }

    #[test]
    fn test_v0_differs_below_sign_bit() {
        // 0x31 is 49 for V1 but 0x3100 (12544) for V0.
        let key = SiteKey::from_bytes([0x31; 32]);
        assert_eq!(render_password(&key, ResultType::Short, Algorithm::V1).unwrap().as_str(), "Kuk9");
        assert_eq!(render_password(&key, ResultType::Short, Algorithm::V0).unwrap().as_str(), "Kuk4");
    }

    #[test]
    fn test_stateful_types_do_not_render() {
        let key = SiteKey::from_bytes([7; 32]);
        assert!(matches!(
            render_password(&key, ResultType::Personal, Algorithm::V3),
            Err(MpwError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_every_template_fits_the_key() {
        for algorithm in Algorithm::ALL {
            for result_type in ResultType::ALL {
                if let Some(templates) = algorithm.params().templates.for_type(result_type) {
                    for template in templates {
                        assert!(template.len() < crate::keys::SITE_KEY_LEN);
                        assert!(template.bytes().all(|code| alphabet(code).is_some()));
                    }
                }
            }
        }
    }
}
