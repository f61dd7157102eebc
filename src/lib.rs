//! # mpw
//!
//! Deterministic, stateless site passwords.
//!
//! Nothing secret is ever stored: for every (identity, site) pair the same
//! password is re-derived from the master password, the site name and a few
//! per-site parameters.
//!
//! ```text
//! full name + master password ──scrypt──▶ MasterKey      (once per session)
//! MasterKey + site name + counter ─HMAC─▶ SiteKey        (per site, per use)
//! SiteKey + result type ──templates──▶ password          (or content key)
//! ```
//!
//! A user's catalog of sites can be exported to and imported from a
//! versioned, checksummed vault text (see [`marshal`]).
//!
//! ## Public API
//!
//! Hosts normally go through [`Session`]. The free functions below are the
//! building blocks it uses, for hosts that keep keys themselves.

pub mod algorithm;
pub mod catalog;
pub(crate) mod codec;
pub(crate) mod crypto;
pub mod error;
pub mod identicon;
pub mod keys;
pub mod marshal;
pub mod session;
pub mod site;
pub mod template;

use zeroize::Zeroizing;

pub use algorithm::Algorithm;
pub use catalog::{Catalog, ConflictPolicy};
pub use error::{MalformedRecord, MpwError};
pub use identicon::Identicon;
pub use keys::{derive_master_key, derive_site_key, KeyId, KeyProvider, KeyPurpose, MasterKey, SiteKey};
pub use marshal::{
    export, import, import_with_alternate, read_header, unmarshal, ExportOptions, ImportOutcome,
    ImportReport, ImportStats, Snapshot, VaultFormat, VaultHeader,
};
pub use session::{Session, UserProfile};
pub use site::{Question, SiteRecord};
pub use template::{render_password, ResultClass, ResultType};

/// Derive and render a site result in one step.
///
/// `purpose` picks the scope: passwords use
/// [`KeyPurpose::Authentication`], generated login names
/// [`KeyPurpose::Identification`] and security answers
/// [`KeyPurpose::Recovery`] with the question keyword as `context`.
/// Only template result types can be rendered.
pub fn site_result(
    master_key: &MasterKey,
    site_name: &str,
    result_type: ResultType,
    counter: u32,
    purpose: KeyPurpose,
    context: Option<&str>,
    algorithm: Algorithm,
) -> Result<Zeroizing<String>, MpwError> {
    let site_key = keys::derive_site_key(master_key, site_name, counter, purpose, context, algorithm)?;
    template::render_password(&site_key, result_type, algorithm)
}
