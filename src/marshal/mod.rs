//! Vault export and import.
//!
//! A vault is a text snapshot of a user's catalog: a header with the
//! identity's public metadata and a checksum, followed by one entry per
//! site. Two formats are understood:
//!
//! - **flat** (format 1): `#`-commented header, one tab-separated line per site
//! - **JSON** (format 2): the same data as a JSON document, plus questions and URLs
//!
//! The checksum is an HMAC under the master key over every record's
//! derivation inputs. It is checked before any stored content is opened, so
//! a vault of another identity is rejected as a whole.

mod flat;
mod json;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use ring::hmac;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::algorithm::Algorithm;
use crate::catalog::{Applied, Catalog, ConflictPolicy};
use crate::codec::{self, LengthUnit};
use crate::crypto;
use crate::error::{MalformedRecord, MpwError};
use crate::keys::{KeyProvider, MasterKey};
use crate::session::UserProfile;
use crate::site::{FixableIssue, SiteRecord};
use crate::template::{self, ResultClass, ResultType};

const CHECKSUM_SCOPE: &[u8] = b"com.lyndir.masterpassword.checksum";

/// Bytes of the HMAC kept in the checksum.
const CHECKSUM_LEN: usize = 16;

/// Text layout of a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VaultFormat {
    #[default]
    Flat,
    Json,
}

impl VaultFormat {
    /// The number written in the vault header.
    pub fn number(self) -> u32 {
        match self {
            Self::Flat => 1,
            Self::Json => 2,
        }
    }

    /// Conventional file extension.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Flat => "mpsites",
            Self::Json => "mpjson",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "mpsites" => Some(Self::Flat),
            "mpjson" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for VaultFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => f.write_str("flat"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// How to export. The default writes the flat format with stored content
/// kept encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportOptions {
    pub format: VaultFormat,
    /// Write rendered passwords and plaintext stored content. The output is
    /// then as sensitive as the master password.
    pub reveal: bool,
}

/// Everything a vault says about itself, readable without any key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultHeader {
    pub format: VaultFormat,
    /// When the vault was exported.
    pub date: DateTime<Utc>,
    /// Stored content is encrypted, template passwords are absent.
    pub redacted: bool,
    pub profile: UserProfile,
    pub checksum: Option<String>,
}

/// Counts of one import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportStats {
    /// Records appended, replaced or merged into the catalog.
    pub imported: usize,
    /// Records left out: malformed, undecryptable or kept by the policy.
    pub skipped: usize,
    /// Records whose name already existed in the catalog.
    pub conflicting: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub stats: ImportStats,
    /// Records that could not be read, in file order.
    pub malformed: Vec<MalformedRecord>,
    /// `false` when malformed records kept the checksum from being checked
    /// and only the key ID vouched for the identity.
    pub checksum_verified: bool,
    pub header: VaultHeader,
}

/// Result of [`import`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported(ImportReport),
    /// The vault belongs to another identity or master password. Nothing was
    /// touched; resubmit with [`import_with_alternate`].
    NeedsAlternateIdentity(VaultHeader),
}

impl ImportOutcome {
    /// The report, or [`MpwError::ChecksumMismatch`] for a vault of another
    /// identity.
    pub fn into_report(self) -> Result<ImportReport, MpwError> {
        match self {
            Self::Imported(report) => Ok(report),
            Self::NeedsAlternateIdentity(_) => Err(MpwError::ChecksumMismatch),
        }
    }
}

/// A verified vault read without a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub header: VaultHeader,
    pub records: Vec<SiteRecord>,
    pub malformed: Vec<MalformedRecord>,
    pub checksum_verified: bool,
}

impl Snapshot {
    /// The records, or the first malformed record as an error. For hosts that
    /// take a vault all-or-nothing.
    pub fn into_complete(self) -> Result<Vec<SiteRecord>, MpwError> {
        if let Some(first) = self.malformed.into_iter().next() {
            return Err(first.into());
        }
        Ok(self.records)
    }
}

// ---------------------------------------------------------------------------
// Shared document model
// ---------------------------------------------------------------------------

/// The content field of one entry as it appears in the text.
enum Content {
    Empty,
    /// Ciphertext under the exporting identity.
    Sealed(Vec<u8>),
    /// Plaintext of a revealed export.
    Plain(Zeroizing<String>),
}

impl Content {
    /// Parse a content field. Template passwords of revealed exports are
    /// informational and always re-derived, so they are dropped here. A
    /// present but empty field of a revealed export is empty stored content.
    fn decode(result_type: ResultType, redacted: bool, text: Option<&str>) -> Result<Self, &'static str> {
        let Some(text) = text else {
            return Ok(Self::Empty);
        };
        if result_type.class() == ResultClass::Template || !result_type.exports_content() {
            return Ok(Self::Empty);
        }
        if !redacted {
            return Ok(Self::Plain(Zeroizing::new(text.to_owned())));
        }
        if text.is_empty() {
            return Ok(Self::Empty);
        }
        codec::base64_decode(text)
            .map(Self::Sealed)
            .map_err(|_| "stored content is not base-64")
    }

    fn encode(&self) -> Option<Zeroizing<String>> {
        match self {
            Self::Empty => None,
            Self::Sealed(bytes) => Some(Zeroizing::new(codec::base64_encode(bytes))),
            Self::Plain(text) => Some(text.clone()),
        }
    }
}

/// One site of a vault. `record.encrypted_content` is not used; the
/// content travels separately until it is bound to a destination key.
struct Entry {
    /// Flat line number or JSON site index, 1-based.
    line: usize,
    record: SiteRecord,
    content: Content,
}

impl Entry {
    /// Accept a parsed record only if it is structurally sound.
    fn checked(line: usize, record: SiteRecord, content: Content) -> Result<Self, MalformedRecord> {
        record
            .validate()
            .map_err(|issue| MalformedRecord::new(line, issue.to_string()))?;
        Ok(Self {
            line,
            record,
            content,
        })
    }
}

struct Document {
    header: VaultHeader,
    entries: Vec<Entry>,
    malformed: Vec<MalformedRecord>,
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// Keyed checksum over the identity and every record's derivation inputs.
/// Stored content and usage statistics are not covered.
fn checksum<'a>(
    master_key: &MasterKey,
    full_name: &str,
    algorithm: Algorithm,
    records: impl ExactSizeIterator<Item = &'a SiteRecord>,
) -> Result<String, MpwError> {
    let mut message = Vec::with_capacity(CHECKSUM_SCOPE.len() + 64 * (records.len() + 1));
    message.extend_from_slice(CHECKSUM_SCOPE);
    codec::push_length_prefixed(&mut message, full_name, LengthUnit::Bytes)?;
    codec::push_u32(&mut message, algorithm.number());
    codec::push_u32(
        &mut message,
        u32::try_from(records.len()).map_err(|_| MpwError::InvalidParameter("too many sites".into()))?,
    );
    for record in records {
        codec::push_length_prefixed(&mut message, &record.name, LengthUnit::Bytes)?;
        codec::push_u32(&mut message, record.result_type.number());
        codec::push_u32(&mut message, record.algorithm.number());
        codec::push_u32(&mut message, record.counter);
        match record.login_name.as_deref().filter(|login| !login.is_empty()) {
            Some(login) => {
                codec::push_u32(&mut message, 1);
                codec::push_length_prefixed(&mut message, login, LengthUnit::Bytes)?;
            }
            None => codec::push_u32(&mut message, 0),
        }
    }

    let key = hmac::Key::new(hmac::HMAC_SHA256, master_key.as_bytes());
    let tag = hmac::sign(&key, &message);
    Ok(codec::base64_encode(&tag.as_ref()[..CHECKSUM_LEN]))
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Serialize `records` as a vault of `profile`'s identity.
///
/// All-or-nothing: an invalid or duplicate record, a missing key or a
/// failed decryption (when revealing) aborts the export.
pub fn export(
    profile: &UserProfile,
    records: &[SiteRecord],
    keys: &dyn KeyProvider,
    options: &ExportOptions,
) -> Result<String, MpwError> {
    let master_key = keys.master_key(profile.algorithm)?;

    let mut seen = BTreeSet::new();
    for record in records {
        record
            .validate()
            .map_err(|issue| MpwError::InvalidParameter(issue.to_string()))?;
        if !seen.insert(codec::normalize(&record.name)) {
            return Err(MpwError::InvalidParameter(FixableIssue::DuplicateName.to_string()));
        }
        if options.format == VaultFormat::Flat {
            flat::check(record)?;
        }
    }

    let entries = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            Ok(Entry {
                line: index + 1,
                record: record.clone(),
                content: export_content(record, keys, options.reveal)?,
            })
        })
        .collect::<Result<Vec<_>, MpwError>>()?;

    let mut exported = profile.clone();
    exported.key_id = Some(master_key.key_id());
    let header = VaultHeader {
        format: options.format,
        date: Utc::now(),
        redacted: !options.reveal,
        profile: exported,
        checksum: Some(checksum(
            master_key,
            &profile.full_name,
            profile.algorithm,
            records.iter(),
        )?),
    };

    let text = match options.format {
        VaultFormat::Flat => flat::write(&header, &entries),
        VaultFormat::Json => json::write(&header, &entries)?,
    };
    info!(
        format = %options.format,
        sites = entries.len(),
        redacted = header.redacted,
        "exported vault"
    );
    Ok(text)
}

fn export_content(record: &SiteRecord, keys: &dyn KeyProvider, reveal: bool) -> Result<Content, MpwError> {
    match record.result_type.class() {
        ResultClass::Template if reveal => {
            let key = record.site_key(keys)?;
            let password = template::render_password(&key, record.result_type, record.algorithm)?;
            Ok(Content::Plain(password))
        }
        ResultClass::Template => Ok(Content::Empty),
        ResultClass::Stateful if !record.result_type.exports_content() => Ok(Content::Empty),
        ResultClass::Stateful if reveal => {
            Ok(record.content(keys)?.map_or(Content::Empty, Content::Plain))
        }
        ResultClass::Stateful => Ok(record
            .encrypted_content
            .clone()
            .map_or(Content::Empty, Content::Sealed)),
    }
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

fn parse(text: &str) -> Result<Document, MpwError> {
    let document = match text.trim_start().chars().next() {
        Some('{') => json::parse(text)?,
        Some('#') => flat::parse(text)?,
        Some(_) => return Err(MpwError::UnsupportedFormat("unrecognized vault layout".into())),
        None => return Err(MpwError::MalformedHeader("vault is empty".into())),
    };
    for record in &document.malformed {
        warn!(line = record.line, reason = %record.reason, "skipping malformed record");
    }
    debug!(
        format = %document.header.format,
        sites = document.entries.len(),
        malformed = document.malformed.len(),
        "parsed vault"
    );
    Ok(document)
}

/// Read a vault's header without any key, e.g. to show whose vault it is.
pub fn read_header(text: &str) -> Result<VaultHeader, MpwError> {
    parse(text).map(|document| document.header)
}

/// Check that the vault was written under `keys`' identity. Returns whether
/// the full checksum was verified.
fn authenticate(document: &Document, keys: &dyn KeyProvider) -> Result<bool, MpwError> {
    let profile = &document.header.profile;
    let master_key = keys.master_key(profile.algorithm)?;

    if let Some(recorded) = &profile.key_id {
        if !recorded.matches(&master_key.key_id()) {
            warn!("vault key ID does not match the master key");
            return Err(MpwError::ChecksumMismatch);
        }
    }

    if !document.malformed.is_empty() {
        // The checksum also covers the unreadable records.
        return match profile.key_id {
            Some(_) => Ok(false),
            None => Err(MpwError::ChecksumMismatch),
        };
    }

    let expected = document
        .header
        .checksum
        .as_deref()
        .ok_or(MpwError::ChecksumMismatch)?;
    let actual = checksum(
        master_key,
        &profile.full_name,
        profile.algorithm,
        document.entries.iter().map(|entry| &entry.record),
    )?;
    if codec::ct_eq(actual.as_bytes(), expected.trim().as_bytes()) {
        Ok(true)
    } else {
        warn!("vault checksum does not match the master key");
        Err(MpwError::ChecksumMismatch)
    }
}

/// Bind an entry's content to the destination identity: sealed content is
/// opened under `source` and re-sealed when the identities differ, revealed
/// content is sealed.
fn restore(
    entry: Entry,
    source: &dyn KeyProvider,
    destination: &dyn KeyProvider,
) -> Result<SiteRecord, MpwError> {
    let Entry {
        mut record, content, ..
    } = entry;
    record.encrypted_content = match content {
        Content::Empty => None,
        Content::Sealed(blob) => {
            let source_key = record.site_key(source)?;
            let plaintext = crypto::open(&source_key, &record.name, &blob)?;
            let destination_key = record.site_key(destination)?;
            if source_key == destination_key {
                Some(blob)
            } else {
                Some(crypto::seal(&destination_key, &record.name, &plaintext)?)
            }
        }
        Content::Plain(text) => {
            let key = record.site_key(destination)?;
            Some(crypto::seal(&key, &record.name, text.as_bytes())?)
        }
    };
    Ok(record)
}

/// Restore every entry. Undecryptable content is reported per record; any
/// other failure aborts before the caller touches its catalog.
fn restore_all(
    entries: Vec<Entry>,
    malformed: &mut Vec<MalformedRecord>,
    source: &dyn KeyProvider,
    destination: &dyn KeyProvider,
) -> Result<Vec<SiteRecord>, MpwError> {
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let line = entry.line;
        match restore(entry, source, destination) {
            Ok(record) => records.push(record),
            Err(MpwError::Decryption) => {
                warn!(line, "skipping record with undecryptable content");
                malformed.push(MalformedRecord::new(line, "stored content cannot be decrypted"));
            }
            Err(error) => return Err(error),
        }
    }
    malformed.sort_by_key(|record| record.line);
    Ok(records)
}

fn commit(
    catalog: &mut Catalog,
    document: Document,
    source: &dyn KeyProvider,
    destination: &dyn KeyProvider,
    checksum_verified: bool,
    policy: ConflictPolicy,
) -> Result<ImportReport, MpwError> {
    let Document {
        header,
        entries,
        mut malformed,
    } = document;
    let records = restore_all(entries, &mut malformed, source, destination)?;

    let mut stats = ImportStats {
        skipped: malformed.len(),
        ..ImportStats::default()
    };
    for record in records {
        match catalog.apply(record, policy) {
            Applied::Appended => stats.imported += 1,
            Applied::Replaced | Applied::Merged => {
                stats.imported += 1;
                stats.conflicting += 1;
            }
            Applied::Kept => {
                stats.skipped += 1;
                stats.conflicting += 1;
            }
        }
    }

    info!(
        imported = stats.imported,
        skipped = stats.skipped,
        conflicting = stats.conflicting,
        checksum_verified,
        "imported vault"
    );
    Ok(ImportReport {
        stats,
        malformed,
        checksum_verified,
        header,
    })
}

/// Import a vault into `catalog` under `keys`' identity.
///
/// Header problems fail the whole call. Malformed records are collected in
/// the report. A vault of another identity yields
/// [`ImportOutcome::NeedsAlternateIdentity`] without touching the catalog.
pub fn import(
    catalog: &mut Catalog,
    text: &str,
    keys: &dyn KeyProvider,
    policy: ConflictPolicy,
) -> Result<ImportOutcome, MpwError> {
    let document = parse(text)?;
    let checksum_verified = match authenticate(&document, keys) {
        Ok(verified) => verified,
        Err(MpwError::ChecksumMismatch) => {
            return Ok(ImportOutcome::NeedsAlternateIdentity(document.header));
        }
        Err(error) => return Err(error),
    };
    commit(catalog, document, keys, keys, checksum_verified, policy).map(ImportOutcome::Imported)
}

/// Import a vault written under `alternate`'s identity. Stored content is
/// re-sealed under `keys`. Fails with [`MpwError::ChecksumMismatch`] if the
/// alternate identity does not match either.
pub fn import_with_alternate(
    catalog: &mut Catalog,
    text: &str,
    keys: &dyn KeyProvider,
    alternate: &dyn KeyProvider,
    policy: ConflictPolicy,
) -> Result<ImportReport, MpwError> {
    let document = parse(text)?;
    let checksum_verified = authenticate(&document, alternate)?;
    commit(catalog, document, alternate, keys, checksum_verified, policy)
}

/// Read and verify a vault without merging it anywhere.
pub fn unmarshal(text: &str, keys: &dyn KeyProvider) -> Result<Snapshot, MpwError> {
    let document = parse(text)?;
    let checksum_verified = authenticate(&document, keys)?;
    let Document {
        header,
        entries,
        mut malformed,
    } = document;
    let records = restore_all(entries, &mut malformed, keys, keys)?;
    Ok(Snapshot {
        header,
        records,
        malformed,
        checksum_verified,
    })
}
