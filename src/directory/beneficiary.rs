//! Household/beneficiary resolution.
//!
//! The beneficiary form query returns household rows and member rows
//! together. A member is accepted only when a household row with the
//! submitted household number comes back in the same result set, so a
//! member row on its own never resolves.

use crate::models::IdentityRecord;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Identity-document type that carries the submitted uid.
pub const UNIFIED_ID_TYPE: &str = "Unified ID";

/// Household role the member must hold.
pub const HEAD_ROLE: &str = "head";

/// The three values a beneficiary submits at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeneficiaryForm {
    pub household_number: String,
    pub uid: String,
    pub phone: String,
}

impl BeneficiaryForm {
    pub fn new(
        household_number: impl Into<String>,
        uid: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            household_number: household_number.into().trim().to_string(),
            uid: uid.into().trim().to_string(),
            phone: phone.into().trim().to_string(),
        }
    }

    /// All three fields are present.
    pub fn is_complete(&self) -> bool {
        !self.household_number.is_empty() && !self.uid.is_empty() && !self.phone.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowRole {
    Household,
    Member,
    Unrelated,
}

fn role_of(record: &IdentityRecord, form: &BeneficiaryForm) -> RowRole {
    if record.is_group() {
        let name = record
            .full_name()
            .or_else(|| record.first_name().map(str::to_string))
            .or_else(|| record.username().map(str::to_string));
        if name.as_deref() == Some(form.household_number.as_str()) {
            return RowRole::Household;
        }
        warn!(
            username = record.username().unwrap_or_default(),
            "Group row does not match the household number"
        );
        return RowRole::Unrelated;
    }

    let is_member = record.id_type_name() == Some(UNIFIED_ID_TYPE)
        && record.id_type_value() == Some(form.uid.as_str())
        && record.phone() == Some(form.phone.as_str())
        && record
            .membership_kind()
            .is_some_and(|kind| kind.eq_ignore_ascii_case(HEAD_ROLE))
        && record.membership_ended() == Some(false);
    if is_member {
        RowRole::Member
    } else {
        warn!(
            username = record.username().unwrap_or_default(),
            "Individual row does not match the submitted identity"
        );
        RowRole::Unrelated
    }
}

/// What one beneficiary query produced, before deciding.
#[derive(Debug, Clone, Default)]
pub struct BeneficiaryMatch {
    household: Option<IdentityRecord>,
    member: Option<IdentityRecord>,
    duplicate_households: usize,
    duplicate_members: usize,
    unrelated: usize,
}

impl BeneficiaryMatch {
    /// Sort every row into household, member or unrelated.
    pub fn collect<I>(rows: I, form: &BeneficiaryForm) -> Self
    where
        I: IntoIterator<Item = IdentityRecord>,
    {
        let mut found = Self::default();
        for record in rows {
            match role_of(&record, form) {
                RowRole::Household => {
                    if found.household.is_some() {
                        found.duplicate_households += 1;
                    } else {
                        found.household = Some(record);
                    }
                }
                RowRole::Member => {
                    if found.member.is_some() {
                        found.duplicate_members += 1;
                    } else {
                        found.member = Some(record);
                    }
                }
                RowRole::Unrelated => found.unrelated += 1,
            }
        }
        found
    }

    pub fn household(&self) -> Option<&IdentityRecord> {
        self.household.as_ref()
    }

    pub fn member(&self) -> Option<&IdentityRecord> {
        self.member.as_ref()
    }

    /// More than one row matched the household or the member role.
    pub fn is_ambiguous(&self) -> bool {
        self.duplicate_households > 0 || self.duplicate_members > 0
    }

    pub fn unrelated(&self) -> usize {
        self.unrelated
    }

    /// The member identity, when exactly one household and one member matched.
    pub fn into_identity(self) -> Option<IdentityRecord> {
        if self.is_ambiguous() {
            warn!(
                households = self.duplicate_households + usize::from(self.household.is_some()),
                members = self.duplicate_members + usize::from(self.member.is_some()),
                "Beneficiary form matched more than one row per role"
            );
            return None;
        }
        match (self.household, self.member) {
            (Some(household), Some(member)) => {
                debug!(
                    household = household.username().unwrap_or_default(),
                    member = member.username().unwrap_or_default(),
                    "Resolved beneficiary"
                );
                Some(member)
            }
            (household, member) => {
                debug!(
                    household = household.is_some(),
                    member = member.is_some(),
                    "Beneficiary form did not resolve"
                );
                None
            }
        }
    }
}

/// Resolve a beneficiary form against the rows its query returned.
pub fn resolve<I>(rows: I, form: &BeneficiaryForm) -> Option<IdentityRecord>
where
    I: IntoIterator<Item = IdentityRecord>,
{
    if !form.is_complete() {
        return None;
    }
    BeneficiaryMatch::collect(rows, form).into_identity()
}
