//! The partner directory as seen by the identity provider.
//!
//! [`Directory`] exposes the lookup and credential operations of one
//! deployment. Each call captures the deployment snapshot once at its start
//! and runs to completion against that snapshot's pool and templates, even
//! if the deployment is reconfigured meanwhile.
//!
//! Failures inside the query layer are typed ([`DirectoryError`]) but never
//! cross this boundary: a lookup that failed looks exactly like a lookup
//! that found nothing, and a credential check that could not run is a plain
//! `false`. Only write-back operations return an error, and they always do.

pub mod beneficiary;
pub mod factory;

pub use beneficiary::{BeneficiaryForm, BeneficiaryMatch};
pub use factory::DirectoryFactory;

use crate::db::{Pageable, QueryParam, statement_body};
use crate::error::{DirectoryError, DirectoryResult};
use crate::models::{DeploymentSnapshot, IdentityRecord, QueryTemplateSet, SnapshotRegistry};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Which stored hash a credential check reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKey<'a> {
    /// Looked up with the password-hash template.
    Username(&'a str),
    /// Looked up with the alternate password-hash template, keyed by the
    /// identity document value a beneficiary logged in with.
    UnifiedId(&'a str),
}

/// Read-only view of one deployment's partner store.
#[derive(Debug, Clone)]
pub struct Directory {
    deployment_id: Arc<str>,
    registry: Arc<SnapshotRegistry>,
}

impl Directory {
    pub fn new(deployment_id: impl Into<Arc<str>>, registry: Arc<SnapshotRegistry>) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            registry,
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Federated id of a record in this deployment.
    pub fn external_id(&self, record: &IdentityRecord) -> Option<String> {
        record.external_id(&self.deployment_id)
    }

    /// Capture the snapshot one operation runs against.
    fn context(&self) -> DirectoryResult<Arc<DeploymentSnapshot>> {
        self.registry
            .snapshot(&self.deployment_id)
            .ok_or_else(|| DirectoryError::not_configured(&*self.deployment_id))
    }

    /// Log a failure and substitute the empty result.
    fn settle<T: Default>(&self, operation: &str, result: DirectoryResult<T>) -> T {
        match result {
            Ok(value) => value,
            Err(e @ DirectoryError::NotConfigured { .. }) => {
                warn!(deployment = %self.deployment_id, operation, error = %e, "Directory not ready");
                T::default()
            }
            Err(e) => {
                error!(
                    deployment = %self.deployment_id,
                    operation,
                    error = %e,
                    suggestion = e.suggestion().unwrap_or_default(),
                    retryable = e.is_retryable(),
                    "Directory query failed"
                );
                T::default()
            }
        }
    }

    async fn rows(
        &self,
        pick: impl FnOnce(&QueryTemplateSet) -> &str,
        page: Option<&Pageable>,
        params: &[QueryParam],
    ) -> DirectoryResult<Vec<IdentityRecord>> {
        let snapshot = self.context()?;
        let rows = snapshot
            .executor()
            .fetch_rows(pick(&snapshot.templates), page, params)
            .await?;
        Ok(rows.into_iter().map(IdentityRecord::new).collect())
    }

    /// Look up a partner by row id or by federated id `f:<deployment>:<id>`.
    ///
    /// A non-numeric id finds nothing.
    pub async fn find_by_id(&self, id: &str) -> Option<IdentityRecord> {
        let local = local_id(id);
        let Ok(row_id) = local.parse::<i64>() else {
            debug!(deployment = %self.deployment_id, id, "Ignoring non-numeric partner id");
            return None;
        };
        let result = self
            .rows(|t| t.find_by_id.as_str(), None, &[QueryParam::Int(row_id)])
            .await;
        self.settle("find_by_id", result).into_iter().next()
    }

    pub async fn find_by_username(&self, username: &str) -> Option<IdentityRecord> {
        let result = self
            .rows(
                |t| t.find_by_username.as_str(),
                None,
                &[QueryParam::text(username)],
            )
            .await;
        self.settle("find_by_username", result).into_iter().next()
    }

    /// Email lookups go through the username template.
    pub async fn find_by_email(&self, email: &str) -> Option<IdentityRecord> {
        self.find_by_username(email).await
    }

    /// Search partners. A blank term or `*` lists everyone.
    ///
    /// With a single placeholder the term is bound as given; with several,
    /// every placeholder receives `%term%`.
    pub async fn find_by_search_term(&self, term: &str, page: &Pageable) -> Vec<IdentityRecord> {
        if is_wildcard(term) {
            return self.list_all(Some(page)).await;
        }
        let result = self
            .rows(
                |t| t.find_by_search_term.as_str(),
                Some(page),
                &[QueryParam::text(term)],
            )
            .await;
        self.settle("find_by_search_term", result)
    }

    pub async fn list_all(&self, page: Option<&Pageable>) -> Vec<IdentityRecord> {
        let result = self.rows(|t| t.list_all.as_str(), page, &[]).await;
        self.settle("list_all", result)
    }

    /// Raw rows of the beneficiary form query, household and member alike.
    pub async fn find_beneficiary_candidates(&self, form: &BeneficiaryForm) -> Vec<IdentityRecord> {
        let params = [
            QueryParam::text(form.household_number.as_str()),
            QueryParam::text(form.uid.as_str()),
            QueryParam::text(form.phone.as_str()),
        ];
        let result = self
            .rows(|t| t.find_by_beneficiary_form.as_str(), None, &params)
            .await;
        self.settle("find_by_beneficiary_form", result)
    }

    /// The member identity behind a beneficiary login, if the household
    /// cross-check passes.
    pub async fn find_by_beneficiary_form(&self, form: &BeneficiaryForm) -> Option<IdentityRecord> {
        if !form.is_complete() {
            debug!(deployment = %self.deployment_id, "Incomplete beneficiary form");
            return None;
        }
        let rows = self.find_beneficiary_candidates(form).await;
        beneficiary::resolve(rows, form)
    }

    /// Number of partners, 0 when the count could not be run.
    pub async fn count(&self) -> u64 {
        let result = async {
            let snapshot = self.context()?;
            snapshot.executor().fetch_integer(&snapshot.templates.count, &[]).await
        }
        .await;
        to_count(self.settle("count", result))
    }

    /// Number of partners a search would return. A blank term or `*` counts
    /// everyone.
    pub async fn count_matching(&self, term: &str) -> u64 {
        if is_wildcard(term) {
            return self.count().await;
        }
        let result = async {
            let snapshot = self.context()?;
            let sql = count_wrapper(&snapshot.templates.find_by_search_term);
            snapshot
                .executor()
                .fetch_integer(&sql, &[QueryParam::text(term)])
                .await
        }
        .await;
        to_count(self.settle("count_matching", result))
    }

    /// Check a password against the hash stored for `username`.
    pub async fn verify_credentials(&self, username: &str, password: &str) -> bool {
        self.verify_credentials_by(CredentialKey::Username(username), password)
            .await
    }

    /// Check a password against the hash selected by `key`.
    ///
    /// An unknown user, a missing or malformed hash, and a failed query all
    /// read as a wrong password.
    pub async fn verify_credentials_by(&self, key: CredentialKey<'_>, password: &str) -> bool {
        let result = async {
            let snapshot = self.context()?;
            let (template, value) = match key {
                CredentialKey::Username(username) => {
                    (&snapshot.templates.find_password_hash, username)
                }
                CredentialKey::UnifiedId(uid) => (&snapshot.templates.find_password_hash_alt, uid),
            };
            let stored = snapshot
                .executor()
                .fetch_text(template, &[QueryParam::text(value)])
                .await?;
            Ok::<_, DirectoryError>(stored.map(|hash| (hash, snapshot.credential_policy)))
        }
        .await;

        match self.settle("verify_credentials", result) {
            Some((stored, policy)) => {
                let verified = policy.verify(password, &stored);
                debug!(deployment = %self.deployment_id, verified, "Credential check");
                verified
            }
            None => {
                debug!(deployment = %self.deployment_id, "No stored hash for credential key");
                false
            }
        }
    }

    /// The partner store is maintained externally.
    pub async fn update_credentials(&self, _username: &str, _password: &str) -> DirectoryResult<()> {
        Err(DirectoryError::unsupported("update_credentials"))
    }

    pub async fn remove_user(&self, _username: &str) -> DirectoryResult<()> {
        Err(DirectoryError::unsupported("remove_user"))
    }

    pub async fn add_user(&self, _username: &str) -> DirectoryResult<IdentityRecord> {
        Err(DirectoryError::unsupported("add_user"))
    }
}

/// Strip a federated `f:<deployment>:` prefix.
fn local_id(id: &str) -> &str {
    let id = id.trim();
    match id.strip_prefix("f:") {
        Some(rest) => rest.rsplit_once(':').map(|(_, local)| local).unwrap_or(rest),
        None => id,
    }
}

fn is_wildcard(term: &str) -> bool {
    let term = term.trim();
    term.is_empty() || term == "*"
}

fn count_wrapper(search: &str) -> String {
    format!("SELECT COUNT(*) FROM ({}) AS matches", statement_body(search))
}

fn to_count(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}
