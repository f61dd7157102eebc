//! A signed-in user.
//!
//! The session owns the only long-lived secrets: one master key per
//! algorithm version its sites use. They are derived once at sign-in and
//! zeroised when the session is dropped or signed out.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::algorithm::Algorithm;
use crate::catalog::{Catalog, ConflictPolicy};
use crate::error::MpwError;
use crate::identicon::Identicon;
use crate::keys::{self, KeyId, KeyProvider, KeyPurpose, MasterKey, COUNTER_INITIAL};
use crate::marshal::{self, ExportOptions, ImportOutcome};
use crate::site::SiteRecord;
use crate::template::{self, ResultClass, ResultType};

/// User-wide metadata carried alongside the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub full_name: String,
    pub avatar: u32,
    pub identicon: Option<Identicon>,
    /// Fingerprint of the master key; set at first sign-in.
    pub key_id: Option<KeyId>,
    /// Version of the user's master key and of new sites.
    pub algorithm: Algorithm,
    pub default_type: ResultType,
    pub login_type: ResultType,
    pub last_used: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            avatar: 0,
            identicon: None,
            key_id: None,
            algorithm: Algorithm::CURRENT,
            default_type: ResultType::DEFAULT_PASSWORD,
            login_type: ResultType::DEFAULT_LOGIN,
            last_used: Utc::now(),
        }
    }
}

pub struct Session {
    profile: UserProfile,
    keys: Vec<MasterKey>,
}

impl Session {
    /// Derive the master keys for the profile's algorithm and any extra
    /// versions the user's sites were created under.
    ///
    /// Fails with [`MpwError::KeyIdMismatch`] when the profile already
    /// records a key ID and the password does not reproduce it.
    pub fn sign_in(
        mut profile: UserProfile,
        master_password: &str,
        extra: impl IntoIterator<Item = Algorithm>,
    ) -> Result<Self, MpwError> {
        let mut algorithms: BTreeSet<Algorithm> = extra.into_iter().collect();
        algorithms.insert(profile.algorithm);

        let keys = algorithms
            .into_iter()
            .map(|algorithm| keys::derive_master_key(&profile.full_name, master_password, algorithm))
            .collect::<Result<Vec<_>, _>>()?;

        let session_key_id = keys
            .iter()
            .find(|key| key.algorithm() == profile.algorithm)
            .map(MasterKey::key_id)
            .ok_or(MpwError::KeyUnavailable(profile.algorithm))?;
        match profile.key_id {
            Some(recorded) if !recorded.matches(&session_key_id) => {
                return Err(MpwError::KeyIdMismatch);
            }
            Some(_) => {}
            None => profile.key_id = Some(session_key_id),
        }
        if profile.identicon.is_none() {
            profile.identicon = Some(Identicon::new(&profile.full_name, master_password));
        }
        profile.last_used = Utc::now();

        info!(keys = keys.len(), algorithm = %profile.algorithm, "signed in");
        Ok(Self { profile, keys })
    }

    /// Sign in with the keys every site in `catalog` needs.
    pub fn sign_in_for(
        profile: UserProfile,
        master_password: &str,
        catalog: &Catalog,
    ) -> Result<Self, MpwError> {
        Self::sign_in(profile, master_password, catalog.algorithms())
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn profile_mut(&mut self) -> &mut UserProfile {
        &mut self.profile
    }

    /// Fingerprint of the user's master key.
    pub fn key_id(&self) -> Result<KeyId, MpwError> {
        Ok(self.master_key(self.profile.algorithm)?.key_id())
    }

    /// The site's secret: the rendered password of template sites, the
    /// stored content (empty when unset) of stateful sites.
    pub fn password(&self, site: &SiteRecord) -> Result<Zeroizing<String>, MpwError> {
        match site.result_type.class() {
            ResultClass::Template => {
                let key = site.site_key(self)?;
                template::render_password(&key, site.result_type, site.algorithm)
            }
            ResultClass::Stateful => Ok(site.content(self)?.unwrap_or_default()),
        }
    }

    /// A new site with the user's default password type, login type and
    /// algorithm.
    pub fn new_site(&self, name: impl Into<String>) -> Result<SiteRecord, MpwError> {
        let mut site = SiteRecord::new(name, self.profile.default_type, self.profile.algorithm)?;
        site.login_type = self.profile.login_type;
        Ok(site)
    }

    /// The site's login name: the stored one, or one generated with the
    /// site's login type.
    pub fn login(&self, site: &SiteRecord) -> Result<Zeroizing<String>, MpwError> {
        if let Some(login) = site.login_name.as_ref().filter(|login| !login.is_empty()) {
            return Ok(Zeroizing::new(login.clone()));
        }
        crate::site_result(
            self.master_key(site.algorithm)?,
            &site.name,
            site.login_type,
            COUNTER_INITIAL,
            KeyPurpose::Identification,
            None,
            site.algorithm,
        )
    }

    /// The answer to a security question of the site. An empty keyword
    /// yields the site's generic answer.
    pub fn answer(&self, site: &SiteRecord, keyword: &str) -> Result<Zeroizing<String>, MpwError> {
        let result_type = site
            .questions
            .iter()
            .find(|question| question.keyword == keyword)
            .map_or(ResultType::DEFAULT_ANSWER, |question| question.result_type);
        crate::site_result(
            self.master_key(site.algorithm)?,
            &site.name,
            result_type,
            COUNTER_INITIAL,
            KeyPurpose::Recovery,
            Some(keyword),
            site.algorithm,
        )
    }

    pub fn set_content(&self, site: &mut SiteRecord, plaintext: &str) -> Result<(), MpwError> {
        site.set_content(self, plaintext)
    }

    pub fn content(&self, site: &SiteRecord) -> Result<Option<Zeroizing<String>>, MpwError> {
        site.content(self)
    }

    /// Export the catalog under this session's identity.
    pub fn export(&self, catalog: &Catalog, options: &ExportOptions) -> Result<String, MpwError> {
        marshal::export(&self.profile, catalog.records(), self, options)
    }

    /// Import a vault into the catalog.
    pub fn import(
        &self,
        catalog: &mut Catalog,
        text: &str,
        policy: ConflictPolicy,
    ) -> Result<ImportOutcome, MpwError> {
        marshal::import(catalog, text, self, policy)
    }

    /// End the session. Key material is zeroised as the keys drop.
    pub fn sign_out(self) {
        debug!(keys = self.keys.len(), "signed out");
    }
}

impl KeyProvider for Session {
    fn master_key(&self, algorithm: Algorithm) -> Result<&MasterKey, MpwError> {
        self.keys
            .iter()
            .find(|key| key.algorithm() == algorithm)
            .ok_or(MpwError::KeyUnavailable(algorithm))
    }
}
