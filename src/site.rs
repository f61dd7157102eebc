//! Site records.
//!
//! A site record is a plain value owned by the host's store. It holds what is
//! needed to re-derive the site's secret (name, type, counter, algorithm) and,
//! for stateful types, the sealed content. Nothing in a record is secret by
//! itself.

use std::fmt;

use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

use crate::algorithm::Algorithm;
use crate::crypto;
use crate::error::MpwError;
use crate::keys::{self, KeyProvider, KeyPurpose, SiteKey, COUNTER_INITIAL};
use crate::template::{ResultClass, ResultType};

/// A security question attached to a site. Its answer is derived with
/// [`KeyPurpose::Recovery`] and the keyword as key context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Usually the most significant word of the question; empty for the
    /// site's generic answer.
    pub keyword: String,
    pub result_type: ResultType,
}

impl Question {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            result_type: ResultType::DEFAULT_ANSWER,
        }
    }
}

/// One site in a user's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRecord {
    /// Unique key within the catalog.
    pub name: String,
    pub result_type: ResultType,
    /// Bumped to force a new password for the same site. Template types only.
    pub counter: u32,
    /// Captured at creation; changes only through an explicit migration.
    pub algorithm: Algorithm,
    /// Stored login name. When unset the host may generate one.
    pub login_name: Option<String>,
    /// Result type of the generated login name.
    pub login_type: ResultType,
    pub uses: u32,
    pub last_used: DateTime<Utc>,
    /// Sealed content of stateful types.
    pub encrypted_content: Option<Vec<u8>>,
    pub questions: Vec<Question>,
    pub url: Option<String>,
}

impl SiteRecord {
    /// A new, never used site.
    pub fn new(
        name: impl Into<String>,
        result_type: ResultType,
        algorithm: Algorithm,
    ) -> Result<Self, MpwError> {
        let name = name.into();
        if name.is_empty() {
            return Err(MpwError::InvalidParameter("site name is empty".into()));
        }
        Ok(Self {
            name,
            result_type,
            counter: COUNTER_INITIAL,
            algorithm,
            login_name: None,
            login_type: ResultType::DEFAULT_LOGIN,
            uses: 0,
            last_used: Utc::now(),
            encrypted_content: None,
            questions: Vec::new(),
            url: None,
        })
    }

    /// Force a new password for this site.
    pub fn bump_counter(&mut self) -> Result<(), MpwError> {
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| MpwError::InvalidParameter("counter exhausted".into()))?;
        Ok(())
    }

    /// Record a use of the site's secret.
    pub fn record_use(&mut self, at: DateTime<Utc>) {
        self.uses = self.uses.saturating_add(1);
        if at > self.last_used {
            self.last_used = at;
        }
    }

    /// Move the site to another algorithm version. The derived secret
    /// changes; only call this after the user approved the migration.
    pub fn migrate(&mut self, algorithm: Algorithm) {
        self.algorithm = algorithm;
    }

    /// The counter that feeds the site key: stateful types do not derive
    /// their secret and always use the initial counter.
    pub fn key_counter(&self) -> u32 {
        match self.result_type.class() {
            ResultClass::Template => self.counter,
            ResultClass::Stateful => COUNTER_INITIAL,
        }
    }

    /// The authentication key of this site.
    pub fn site_key(&self, keys: &dyn KeyProvider) -> Result<SiteKey, MpwError> {
        keys::derive_site_key(
            keys.master_key(self.algorithm)?,
            &self.name,
            self.key_counter(),
            KeyPurpose::Authentication,
            None,
            self.algorithm,
        )
    }

    /// Seal `plaintext` as this site's stored content.
    pub fn set_content(&mut self, keys: &dyn KeyProvider, plaintext: &str) -> Result<(), MpwError> {
        if self.result_type.class() != ResultClass::Stateful {
            return Err(MpwError::InvalidParameter(format!(
                "{} sites do not store content",
                self.result_type
            )));
        }
        let key = self.site_key(keys)?;
        self.encrypted_content = Some(crypto::seal(&key, &self.name, plaintext.as_bytes())?);
        Ok(())
    }

    /// Open this site's stored content, `None` when nothing is stored.
    pub fn content(&self, keys: &dyn KeyProvider) -> Result<Option<Zeroizing<String>>, MpwError> {
        let Some(sealed) = &self.encrypted_content else {
            return Ok(None);
        };
        let key = self.site_key(keys)?;
        let bytes = crypto::open(&key, &self.name, sealed)?;
        let text = std::str::from_utf8(&bytes).map_err(|_| MpwError::Decryption)?;
        Ok(Some(Zeroizing::new(text.to_owned())))
    }

    /// Check the record for structural problems. The host decides how to fix
    /// them; this never mutates the record.
    pub fn validate(&self) -> Result<(), FixableIssue> {
        if self.name.trim().is_empty() {
            return Err(FixableIssue::EmptyName);
        }
        match self.result_type.class() {
            ResultClass::Template if self.counter == 0 => Err(FixableIssue::ZeroCounter),
            ResultClass::Template if self.encrypted_content.is_some() => {
                Err(FixableIssue::StrayContent)
            }
            _ => Ok(()),
        }
    }
}

/// A structural problem found by [`SiteRecord::validate`] or
/// [`crate::catalog::Catalog::sweep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixableIssue {
    /// The name is empty or blank. Fix: rename or delete the record.
    EmptyName,
    /// A template site has the reserved counter 0. Fix: reset it to 1.
    ZeroCounter,
    /// A template site carries sealed content it can never use. Fix: drop the content.
    StrayContent,
    /// Another record already uses this name. Fix: merge or delete one of them.
    DuplicateName,
}

impl fmt::Display for FixableIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "site name is empty"),
            Self::ZeroCounter => write!(f, "counter is zero"),
            Self::StrayContent => write!(f, "template site carries stored content"),
            Self::DuplicateName => write!(f, "duplicate site name"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::MasterKey;

    fn master() -> MasterKey {
        MasterKey::from_bytes(Algorithm::V3, &[9; 64]).unwrap()
    }

    #[test]
    fn test_new_site_defaults() {
        let site = SiteRecord::new("example.com", ResultType::Long, Algorithm::V3).unwrap();
        assert_eq!(site.counter, COUNTER_INITIAL);
        assert_eq!(site.uses, 0);
        assert!(site.validate().is_ok());
        assert!(SiteRecord::new("", ResultType::Long, Algorithm::V3).is_err());
    }

    #[test]
    fn test_content_roundtrip() {
        let master = master();
        let mut site = SiteRecord::new("bank", ResultType::Personal, Algorithm::V3).unwrap();
        assert!(site.content(&master).unwrap().is_none());

        site.set_content(&master, "correct horse").unwrap();
        assert_eq!(site.content(&master).unwrap().unwrap().as_str(), "correct horse");

        // Counter bumps do not affect stored content.
        site.bump_counter().unwrap();
        assert_eq!(site.content(&master).unwrap().unwrap().as_str(), "correct horse");
    }

    #[test]
    fn test_template_sites_refuse_content() {
        let master = master();
        let mut site = SiteRecord::new("example.com", ResultType::Long, Algorithm::V3).unwrap();
        assert!(site.set_content(&master, "nope").is_err());
    }

    #[test]
    fn test_content_bound_to_site_name() {
        let master = master();
        let mut site = SiteRecord::new("bank", ResultType::Personal, Algorithm::V3).unwrap();
        site.set_content(&master, "secret").unwrap();

        let mut renamed = site.clone();
        renamed.name = "other".into();
        assert_eq!(renamed.content(&master).unwrap_err(), MpwError::Decryption);
    }

    #[test]
    fn test_validate_flags_issues() {
        let mut site = SiteRecord::new("example.com", ResultType::Long, Algorithm::V3).unwrap();
        site.counter = 0;
        assert_eq!(site.validate(), Err(FixableIssue::ZeroCounter));

        site.counter = 1;
        site.encrypted_content = Some(vec![1, 2, 3]);
        assert_eq!(site.validate(), Err(FixableIssue::StrayContent));

        site.encrypted_content = None;
        site.name = "  ".into();
        assert_eq!(site.validate(), Err(FixableIssue::EmptyName));
    }

    #[test]
    fn test_record_use_is_monotonic() {
        let mut site = SiteRecord::new("example.com", ResultType::Long, Algorithm::V3).unwrap();
        let before = site.last_used;
        site.record_use(before - chrono::Duration::days(1));
        assert_eq!(site.uses, 1);
        assert_eq!(site.last_used, before);
    }
}
