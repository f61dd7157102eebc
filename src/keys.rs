//! Key derivation and ownership.
//!
//! This module owns two responsibilities:
//! 1. Deriving the session's master key from an identity with scrypt, and
//!    per-site keys from the master key with HMAC-SHA256.
//! 2. Holding key material in types that are opaque, non-cloneable, and
//!    zeroised on drop.
//!
//! ## Derivation structure
//!
//! ```text
//! master key = scrypt(
//!     password = master password,
//!     salt     = scope ‖ u32be(len(full name)) ‖ full name,
//! )
//!
//! site key = HMAC-SHA256(
//!     key = master key,
//!     msg = scope(purpose) ‖ u32be(len(site name)) ‖ site name ‖ u32be(counter)
//!           [‖ u32be(len(context)) ‖ context]
//! )
//! ```
//!
//! How lengths are counted depends on the algorithm version, see
//! [`crate::algorithm`].

use std::fmt;
use std::str::FromStr;

use ring::{digest, hmac};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::algorithm::Algorithm;
use crate::codec;
use crate::error::MpwError;

/// Size of a site key in bytes.
pub const SITE_KEY_LEN: usize = 32;

/// Size of a key ID in bytes.
pub const KEY_ID_LEN: usize = 32;

/// The counter new sites start at. Zero is reserved.
pub const COUNTER_INITIAL: u32 = 1;

/// What a site key is for. Each purpose has its own derivation scope, so a
/// login name never correlates with the password of the same site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPurpose {
    /// Site passwords and stored content.
    Authentication,
    /// Generated login names.
    Identification,
    /// Security question answers.
    Recovery,
}

impl KeyPurpose {
    pub fn scope(self) -> &'static str {
        match self {
            Self::Authentication => "com.lyndir.masterpassword",
            Self::Identification => "com.lyndir.masterpassword.login",
            Self::Recovery => "com.lyndir.masterpassword.answer",
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => f.write_str("authentication"),
            Self::Identification => f.write_str("identification"),
            Self::Recovery => f.write_str("recovery"),
        }
    }
}

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// The session's master key, bound to the algorithm version it was derived
/// under.
///
/// - Not `Clone`. Cannot be duplicated without explicit conversion.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    #[zeroize(skip)]
    algorithm: Algorithm,
    bytes: Vec<u8>,
}

impl MasterKey {
    /// Construct a `MasterKey` from raw bytes, e.g. restored from a platform
    /// keychain. The length must match the algorithm's master key size.
    pub fn from_bytes(algorithm: Algorithm, bytes: &[u8]) -> Result<Self, MpwError> {
        if bytes.len() != algorithm.params().master_key_len {
            return Err(MpwError::InvalidParameter(format!(
                "master key must be {} bytes",
                algorithm.params().master_key_len
            )));
        }
        Ok(Self {
            algorithm,
            bytes: bytes.to_vec(),
        })
    }

    /// The algorithm version this key was derived under.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The public fingerprint of this key.
    pub fn key_id(&self) -> KeyId {
        let digest = digest::digest(&digest::SHA256, &self.bytes);
        let mut id = [0u8; KEY_ID_LEN];
        id.copy_from_slice(digest.as_ref());
        KeyId(id)
    }

    /// `pub(crate)`: raw bytes never leave the crate.
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("algorithm", &self.algorithm)
            .field("key_id", &self.key_id())
            .finish()
    }
}

/// SHA-256 of a master key: identifies the key without revealing it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId([u8; KEY_ID_LEN]);

impl KeyId {
    pub fn as_bytes(&self) -> &[u8; KEY_ID_LEN] {
        &self.0
    }

    /// Constant-time equality.
    pub fn matches(&self, other: &KeyId) -> bool {
        codec::ct_eq(&self.0, &other.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self)
    }
}

impl FromStr for KeyId {
    type Err = MpwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|_| MpwError::InvalidParameter("key ID is not hexadecimal".into()))?;
        let id: [u8; KEY_ID_LEN] = bytes
            .try_into()
            .map_err(|_| MpwError::InvalidParameter("key ID must be 32 bytes".into()))?;
        Ok(KeyId(id))
    }
}

impl Serialize for KeyId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Site key
// ---------------------------------------------------------------------------

/// A key derived for one site name, counter, purpose and context.
///
/// - Not `Clone`. Recomputed on demand, never cached.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SiteKey {
    bytes: [u8; SITE_KEY_LEN],
}

impl SiteKey {
    /// Wrap raw site key bytes, for hosts that hold keys from elsewhere.
    pub fn from_bytes(bytes: [u8; SITE_KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// `pub(crate)`: raw bytes never leave the crate.
    pub(crate) fn as_bytes(&self) -> &[u8; SITE_KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SiteKey(..)")
    }
}

impl PartialEq for SiteKey {
    fn eq(&self, other: &Self) -> bool {
        codec::ct_eq(&self.bytes, &other.bytes)
    }
}

impl Eq for SiteKey {}

// ---------------------------------------------------------------------------
// Key providers
// ---------------------------------------------------------------------------

/// Supplies the master key for a given algorithm version.
///
/// Sites keep the version they were created under, so a catalog may need
/// keys for more than one version of the same identity.
pub trait KeyProvider {
    fn master_key(&self, algorithm: Algorithm) -> Result<&MasterKey, MpwError>;
}

impl KeyProvider for MasterKey {
    fn master_key(&self, algorithm: Algorithm) -> Result<&MasterKey, MpwError> {
        if algorithm == self.algorithm {
            Ok(self)
        } else {
            Err(MpwError::KeyUnavailable(algorithm))
        }
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Derive the master key for an identity.
///
/// This is the deliberately expensive step: call it once per session, not
/// once per site. An empty password is accepted. Fails only when scrypt
/// cannot run with the version's cost parameters.
pub fn derive_master_key(
    full_name: &str,
    master_password: &str,
    algorithm: Algorithm,
) -> Result<MasterKey, MpwError> {
    if full_name.is_empty() {
        return Err(MpwError::InvalidParameter("full name is empty".into()));
    }
    let params = algorithm.params();

    let mut salt = Zeroizing::new(Vec::with_capacity(
        KeyPurpose::Authentication.scope().len() + 4 + full_name.len(),
    ));
    salt.extend_from_slice(KeyPurpose::Authentication.scope().as_bytes());
    codec::push_length_prefixed(&mut salt, full_name, params.user_name_length)?;

    let cost = scrypt::Params::new(params.cost.log_n, params.cost.r, params.cost.p)
        .map_err(|_| MpwError::KeyDerivation)?;
    let mut bytes = vec![0u8; params.master_key_len];
    if scrypt::scrypt(master_password.as_bytes(), &salt, &cost, &mut bytes).is_err() {
        bytes.zeroize();
        return Err(MpwError::KeyDerivation);
    }

    debug!(%algorithm, "derived master key");
    Ok(MasterKey { algorithm, bytes })
}

/// Derive the key for one site.
///
/// Pure and deterministic; safe to call from any number of threads. The
/// `master_key` is used as is, `algorithm` selects the message layout.
pub fn derive_site_key(
    master_key: &MasterKey,
    site_name: &str,
    counter: u32,
    purpose: KeyPurpose,
    context: Option<&str>,
    algorithm: Algorithm,
) -> Result<SiteKey, MpwError> {
    if site_name.is_empty() {
        return Err(MpwError::InvalidParameter("site name is empty".into()));
    }
    if counter == 0 {
        return Err(MpwError::InvalidParameter("counter 0 is reserved".into()));
    }
    let params = algorithm.params();

    let mut message = Zeroizing::new(Vec::with_capacity(
        purpose.scope().len() + site_name.len() + 12 + context.map_or(0, str::len),
    ));
    message.extend_from_slice(purpose.scope().as_bytes());
    codec::push_length_prefixed(&mut message, site_name, params.site_name_length)?;
    codec::push_u32(&mut message, counter);
    if let Some(context) = context.filter(|c| !c.is_empty()) {
        if !params.supports_context {
            return Err(MpwError::InvalidParameter(format!(
                "algorithm {} does not support key contexts",
                algorithm
            )));
        }
        codec::push_length_prefixed(&mut message, context, params.site_name_length)?;
    }

    let key = hmac::Key::new(hmac::HMAC_SHA256, master_key.as_bytes());
    let tag = hmac::sign(&key, &message);

    let mut bytes = [0u8; SITE_KEY_LEN];
    bytes.copy_from_slice(tag.as_ref());

    trace!(%algorithm, %purpose, "derived site key");
    Ok(SiteKey { bytes })
}
