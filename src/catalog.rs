//! A user's ordered site catalog.
//!
//! Names are unique under Unicode NFC equivalence. Order is insertion order
//! and is preserved by export. Only one writer can hold `&mut Catalog`, which
//! is what serializes import commits.

use std::collections::BTreeSet;

use crate::algorithm::Algorithm;
use crate::codec;
use crate::error::MpwError;
use crate::site::{FixableIssue, SiteRecord};

/// What to do when an imported site's name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Leave the existing record untouched.
    KeepExisting,
    /// Replace the existing record with the imported one.
    Overwrite,
    /// Keep the existing record but raise its counter, use count and last
    /// use to the larger of both.
    MergeCounters,
    /// Replace only when the imported record was used more recently.
    #[default]
    PreferRecent,
}

/// How a single record was applied to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Appended,
    Replaced,
    Merged,
    Kept,
}

/// A structural issue of one record, found by [`Catalog::sweep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteIssue {
    pub index: usize,
    pub name: String,
    pub issue: FixableIssue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    sites: Vec<SiteRecord>,
}

impl Catalog {
    pub fn new() -> Self {
        Self { sites: Vec::new() }
    }

    /// Build a catalog, rejecting duplicate names.
    pub fn from_records(records: impl IntoIterator<Item = SiteRecord>) -> Result<Self, MpwError> {
        let mut catalog = Self::new();
        for record in records {
            catalog.insert(record)?;
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SiteRecord> {
        self.sites.iter()
    }

    pub fn records(&self) -> &[SiteRecord] {
        &self.sites
    }

    pub fn into_records(self) -> Vec<SiteRecord> {
        self.sites
    }

    fn position(&self, name: &str) -> Option<usize> {
        let wanted = codec::normalize(name);
        self.sites
            .iter()
            .position(|site| codec::normalize(&site.name) == wanted)
    }

    pub fn get(&self, name: &str) -> Option<&SiteRecord> {
        self.position(name).map(|index| &self.sites[index])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SiteRecord> {
        self.position(name).map(move |index| &mut self.sites[index])
    }

    /// Append a new site. Fails if the name is taken.
    pub fn insert(&mut self, record: SiteRecord) -> Result<(), MpwError> {
        if record.name.is_empty() {
            return Err(MpwError::InvalidParameter("site name is empty".into()));
        }
        if self.position(&record.name).is_some() {
            return Err(MpwError::InvalidParameter("site name already exists".into()));
        }
        self.sites.push(record);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<SiteRecord> {
        self.position(name).map(|index| self.sites.remove(index))
    }

    /// Every algorithm version used by a site in the catalog.
    pub fn algorithms(&self) -> BTreeSet<Algorithm> {
        self.sites.iter().map(|site| site.algorithm).collect()
    }

    /// Apply an imported record under `policy`. New names are appended.
    pub fn apply(&mut self, record: SiteRecord, policy: ConflictPolicy) -> Applied {
        let Some(index) = self.position(&record.name) else {
            self.sites.push(record);
            return Applied::Appended;
        };

        let existing = &mut self.sites[index];
        match policy {
            ConflictPolicy::KeepExisting => Applied::Kept,
            ConflictPolicy::Overwrite => {
                *existing = record;
                Applied::Replaced
            }
            ConflictPolicy::PreferRecent if record.last_used > existing.last_used => {
                *existing = record;
                Applied::Replaced
            }
            ConflictPolicy::PreferRecent => Applied::Kept,
            ConflictPolicy::MergeCounters => {
                existing.counter = existing.counter.max(record.counter);
                existing.uses = existing.uses.max(record.uses);
                existing.last_used = existing.last_used.max(record.last_used);
                if existing.login_name.is_none() {
                    existing.login_name = record.login_name;
                }
                Applied::Merged
            }
        }
    }

    /// Validate every record, plus name uniqueness across records.
    ///
    /// Idempotent and read-only: the host applies the fixes.
    pub fn sweep(&self) -> Vec<SiteIssue> {
        let mut seen = BTreeSet::new();
        let mut issues = Vec::new();
        for (index, site) in self.sites.iter().enumerate() {
            let issue = match site.validate() {
                Err(issue) => Some(issue),
                Ok(()) if !seen.insert(codec::normalize(&site.name).into_owned()) => {
                    Some(FixableIssue::DuplicateName)
                }
                Ok(()) => None,
            };
            if let Some(issue) = issue {
                issues.push(SiteIssue {
                    index,
                    name: site.name.clone(),
                    issue,
                });
            }
        }
        issues
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a SiteRecord;
    type IntoIter = std::slice::Iter<'a, SiteRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.sites.iter()
    }
}
