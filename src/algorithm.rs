//! The frozen algorithm version table.
//!
//! Sites keep the algorithm version they were created under and must keep
//! producing the same output forever, so every historical version stays
//! implementable side by side. Entries are never edited; a behavioral change
//! means appending a new version.
//!
//! | Version | user name length | site name length | seed byte                   |
//! |---------|------------------|------------------|-----------------------------|
//! | V0      | characters       | characters       | sign-extended, byte-swapped |
//! | V1      | characters       | characters       | unsigned                    |
//! | V2      | characters       | bytes            | unsigned                    |
//! | V3      | bytes            | bytes            | unsigned                    |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::LengthUnit;
use crate::error::MpwError;
use crate::template::{TemplateTable, TEMPLATES_V0};

/// An algorithm version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Algorithm {
    V0 = 0,
    V1 = 1,
    V2 = 2,
    V3 = 3,
}

impl Algorithm {
    /// The version new users and sites are created with.
    pub const CURRENT: Algorithm = Algorithm::V3;

    /// Every version, oldest first.
    pub const ALL: [Algorithm; 4] = [Algorithm::V0, Algorithm::V1, Algorithm::V2, Algorithm::V3];

    /// The frozen parameters of this version.
    pub fn params(self) -> &'static AlgorithmParams {
        &VERSIONS[self as usize]
    }

    pub fn number(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Algorithm {
    type Error = MpwError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(MpwError::UnsupportedAlgorithm(value))
    }
}

impl From<Algorithm> for u32 {
    fn from(algorithm: Algorithm) -> Self {
        algorithm.number()
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

/// scrypt cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptCost {
    /// log2 of the CPU/memory cost N.
    pub log_n: u8,
    /// Block size.
    pub r: u32,
    /// Parallelism.
    pub p: u32,
}

/// How a site key byte becomes a template or alphabet index seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedRule {
    /// V0 quirk: the byte is read as a signed char, widened to 16 bits,
    /// written big-endian and read back little-endian.
    SignExtended,
    /// The byte is used as is.
    Unsigned,
}

impl SeedRule {
    pub fn seed(self, byte: u8) -> u16 {
        match self {
            Self::SignExtended => (byte as i8 as i16 as u16).swap_bytes(),
            Self::Unsigned => byte as u16,
        }
    }
}

/// Everything that defines one algorithm version.
#[derive(Debug)]
pub struct AlgorithmParams {
    pub version: Algorithm,
    /// Key-stretching cost for the master key.
    pub cost: ScryptCost,
    /// Master key size in bytes.
    pub master_key_len: usize,
    /// Unit of the full name's length prefix in the master key salt.
    pub user_name_length: LengthUnit,
    /// Unit of the site name's (and context's) length prefix in the site key message.
    pub site_name_length: LengthUnit,
    /// Whether a key context is appended to the site key message.
    pub supports_context: bool,
    pub seed: SeedRule,
    pub templates: &'static TemplateTable,
}

const SCRYPT_COST: ScryptCost = ScryptCost {
    log_n: 15,
    r: 8,
    p: 2,
};

const MASTER_KEY_LEN: usize = 64;

static VERSIONS: [AlgorithmParams; 4] = [
    AlgorithmParams {
        version: Algorithm::V0,
        cost: SCRYPT_COST,
        master_key_len: MASTER_KEY_LEN,
        user_name_length: LengthUnit::Characters,
        site_name_length: LengthUnit::Characters,
        supports_context: true,
        seed: SeedRule::SignExtended,
        templates: &TEMPLATES_V0,
    },
    AlgorithmParams {
        version: Algorithm::V1,
        cost: SCRYPT_COST,
        master_key_len: MASTER_KEY_LEN,
        user_name_length: LengthUnit::Characters,
        site_name_length: LengthUnit::Characters,
        supports_context: true,
        seed: SeedRule::Unsigned,
        templates: &TEMPLATES_V0,
    },
    AlgorithmParams {
        version: Algorithm::V2,
        cost: SCRYPT_COST,
        master_key_len: MASTER_KEY_LEN,
        user_name_length: LengthUnit::Characters,
        site_name_length: LengthUnit::Bytes,
        supports_context: true,
        seed: SeedRule::Unsigned,
        templates: &TEMPLATES_V0,
    },
    AlgorithmParams {
        version: Algorithm::V3,
        cost: SCRYPT_COST,
        master_key_len: MASTER_KEY_LEN,
        user_name_length: LengthUnit::Bytes,
        site_name_length: LengthUnit::Bytes,
        supports_context: true,
        seed: SeedRule::Unsigned,
        templates: &TEMPLATES_V0,
    },
];
