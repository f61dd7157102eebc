//! Content encryption for stored (stateful) sites.
//!
//! Together with `keys`, this is one of the two places in the crate that use
//! `ring` primitives directly. Stored content is sealed under a key expanded
//! from the site key, never under the site key itself.
//!
//! Primitive choices:
//! - **Content key**: HKDF-SHA256(ikm = site key, info = content scope)
//! - **Cipher**: AES-256-GCM (authenticated encryption)
//! - **Nonce**: 96-bit, fresh per operation from `SystemRandom`
//! - **Associated data**: the site name, so content cannot be moved between sites

use ring::aead::{self, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::MpwError;
use crate::keys::SiteKey;

/// The AEAD algorithm used for stored content.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of the content key in bytes (256 bits).
const CONTENT_KEY_LEN: usize = 32;

const CONTENT_SCOPE: &[u8] = b"com.lyndir.masterpassword.content";

/// `hkdf::KeyType` for a raw 256-bit output.
struct ContentKeyLen;

impl hkdf::KeyType for ContentKeyLen {
    fn len(&self) -> usize {
        CONTENT_KEY_LEN
    }
}

/// Expand the content key for a site.
fn content_key(site_key: &SiteKey) -> Result<LessSafeKey, MpwError> {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]);
    let prk = salt.extract(site_key.as_bytes());

    let info = [CONTENT_SCOPE];
    let okm = prk
        .expand(&info, ContentKeyLen)
        .map_err(|_| MpwError::Encryption)?;
    let mut bytes = Zeroizing::new([0u8; CONTENT_KEY_LEN]);
    okm.fill(&mut bytes[..]).map_err(|_| MpwError::Encryption)?;

    let unbound = UnboundKey::new(ALGORITHM, &bytes[..]).map_err(|_| MpwError::Encryption)?;
    Ok(LessSafeKey::new(unbound))
}

/// A fresh random nonce for a single seal operation.
fn generate_nonce() -> Result<[u8; NONCE_LEN], MpwError> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; NONCE_LEN];
    rng.fill(&mut buf).map_err(|_| MpwError::Randomness)?;
    Ok(buf)
}

/// Seal stored content for one site.
///
/// # Layout of returned bytes
/// ```text
/// [ nonce (12 bytes) ][ ciphertext + GCM tag ]
/// ```
pub fn seal(site_key: &SiteKey, site_name: &str, plaintext: &[u8]) -> Result<Vec<u8>, MpwError> {
    let key = content_key(site_key)?;
    let nonce_bytes = generate_nonce()?;

    // Encrypted in place; the buffer holds ciphertext + tag afterwards.
    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        aead::Aad::from(site_name.as_bytes()),
        &mut in_out,
    )
    .map_err(|_| MpwError::Encryption)?;

    let mut output = Vec::with_capacity(NONCE_LEN + in_out.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&in_out);
    Ok(output)
}

/// Open content produced by [`seal`] for the same site.
///
/// A wrong key, a different site name or tampered bytes all fail the same
/// way; no partial plaintext is returned.
pub fn open(
    site_key: &SiteKey,
    site_name: &str,
    sealed: &[u8],
) -> Result<Zeroizing<Vec<u8>>, MpwError> {
    if sealed.len() < NONCE_LEN + ALGORITHM.tag_len() {
        return Err(MpwError::Decryption);
    }

    let nonce_bytes: [u8; NONCE_LEN] = sealed[..NONCE_LEN]
        .try_into()
        .map_err(|_| MpwError::Decryption)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    let key = content_key(site_key).map_err(|_| MpwError::Decryption)?;

    let mut payload = Zeroizing::new(sealed[NONCE_LEN..].to_vec());
    let plaintext = key
        .open_in_place(nonce, aead::Aad::from(site_name.as_bytes()), payload.as_mut_slice())
        .map_err(|_| MpwError::Decryption)?;

    Ok(Zeroizing::new(plaintext.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = SiteKey::from_bytes([3; 32]);
        let sealed = seal(&key, "example.com", b"hunter2").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 7 + 16);
        assert_eq!(open(&key, "example.com", &sealed).unwrap().as_slice(), b"hunter2");
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = SiteKey::from_bytes([3; 32]);
        let a = seal(&key, "example.com", b"same").unwrap();
        let b = seal(&key, "example.com", b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_rejects_wrong_key_site_and_tampering() {
        let key = SiteKey::from_bytes([3; 32]);
        let other = SiteKey::from_bytes([4; 32]);
        let mut sealed = seal(&key, "example.com", b"hunter2").unwrap();

        assert_eq!(open(&other, "example.com", &sealed).unwrap_err(), MpwError::Decryption);
        assert_eq!(open(&key, "example.org", &sealed).unwrap_err(), MpwError::Decryption);

        let last = sealed.len() - 1;
        sealed[last] ^= 1;
        assert_eq!(open(&key, "example.com", &sealed).unwrap_err(), MpwError::Decryption);
        assert_eq!(open(&key, "example.com", &[0; 4]).unwrap_err(), MpwError::Decryption);
    }
}
