//! Identity records built from directory rows.

use crate::db::types::AttributeMap;
use std::sync::OnceLock;

pub const ID: &str = "id";
pub const USERNAME: &str = "username";
pub const EMAIL: &str = "email";
pub const PARTNER_ID: &str = "partner_id";
pub const PHONE: &str = "phone";
pub const FIRST_NAME: &str = "first_name";
pub const LAST_NAME: &str = "last_name";
pub const FULL_NAME: &str = "full_name";
pub const IS_GROUP: &str = "is_group";
pub const ACTIVE_GROUP: &str = "active_group";
pub const KIND_NAME: &str = "kind_name";
pub const ID_TYPE_NAME: &str = "id_type_name";
pub const ID_TYPE_VALUE: &str = "id_type_value";
pub const MEMBERSHIP_KIND: &str = "group_membership_kind_name";
pub const MEMBERSHIP_ENDED: &str = "group_membership_is_ended";

/// One partner row, with every value trimmed and blank values dropped.
///
/// Column names are whatever the deployment's templates select; the getters
/// below read the conventional Odoo partner view columns.
#[derive(Debug, Clone)]
pub struct IdentityRecord {
    attributes: AttributeMap,
    name_parts: OnceLock<NameParts>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct NameParts {
    first: Option<String>,
    last: Option<String>,
}

impl IdentityRecord {
    pub fn new(row: AttributeMap) -> Self {
        let attributes = row
            .into_iter()
            .map(|(column, value)| {
                let value = value
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                (column, value)
            })
            .collect();
        Self {
            attributes,
            name_parts: OnceLock::new(),
        }
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Value of any selected column.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_deref())
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute(ID)
    }

    /// Federated id handed to the identity provider: `f:<provider>:<id>`.
    pub fn external_id(&self, provider_id: &str) -> Option<String> {
        self.id().map(|id| format!("f:{}:{}", provider_id, id))
    }

    pub fn username(&self) -> Option<&str> {
        self.attribute(USERNAME)
    }

    pub fn email(&self) -> Option<&str> {
        self.attribute(EMAIL)
    }

    pub fn partner_id(&self) -> Option<&str> {
        self.attribute(PARTNER_ID)
    }

    pub fn phone(&self) -> Option<&str> {
        self.attribute(PHONE)
    }

    /// Whether the row is a household rather than an individual.
    pub fn is_group(&self) -> bool {
        self.attribute(IS_GROUP).and_then(parse_marker).unwrap_or(false)
    }

    pub fn active_group(&self) -> Option<&str> {
        self.attribute(ACTIVE_GROUP)
    }

    pub fn kind_name(&self) -> Option<&str> {
        self.attribute(KIND_NAME)
    }

    pub fn id_type_name(&self) -> Option<&str> {
        self.attribute(ID_TYPE_NAME)
    }

    pub fn id_type_value(&self) -> Option<&str> {
        self.attribute(ID_TYPE_VALUE)
    }

    /// Role of the row within its household, e.g. "Head".
    pub fn membership_kind(&self) -> Option<&str> {
        self.attribute(MEMBERSHIP_KIND)
    }

    /// `None` when the row carries no membership marker at all.
    pub fn membership_ended(&self) -> Option<bool> {
        self.attribute(MEMBERSHIP_ENDED).and_then(parse_marker)
    }

    pub fn first_name(&self) -> Option<&str> {
        self.attribute(FIRST_NAME)
            .or_else(|| self.name_parts().first.as_deref())
    }

    pub fn last_name(&self) -> Option<&str> {
        self.attribute(LAST_NAME)
            .or_else(|| self.name_parts().last.as_deref())
    }

    pub fn full_name(&self) -> Option<String> {
        if let Some(full) = self.attribute(FULL_NAME) {
            return Some(full.to_string());
        }
        match (self.attribute(FIRST_NAME), self.attribute(LAST_NAME)) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(name), None) | (None, Some(name)) => Some(name.to_string()),
            (None, None) => None,
        }
    }

    fn name_parts(&self) -> &NameParts {
        self.name_parts
            .get_or_init(|| split_full_name(self.attribute(FULL_NAME)))
    }
}

impl From<AttributeMap> for IdentityRecord {
    fn from(row: AttributeMap) -> Self {
        Self::new(row)
    }
}

impl PartialEq for IdentityRecord {
    fn eq(&self, other: &Self) -> bool {
        self.attributes == other.attributes
    }
}

impl Eq for IdentityRecord {}

/// Split at the last comma, else the last space. The part before becomes the
/// first name, the part after the last name.
fn split_full_name(full_name: Option<&str>) -> NameParts {
    let Some(full) = full_name else {
        return NameParts::default();
    };
    let separator = if full.contains(',') {
        ','
    } else if full.contains(' ') {
        ' '
    } else {
        return NameParts {
            first: Some(full.to_string()),
            last: None,
        };
    };
    let (head, tail) = full.rsplit_once(separator).unwrap_or((full, ""));
    let non_blank = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
    NameParts {
        first: non_blank(head),
        last: non_blank(tail),
    }
}

/// Single-character truthy markers as rendered by the row mapper.
pub(crate) fn parse_marker(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "t" | "true" | "1" => Some(true),
        "f" | "false" | "0" => Some(false),
        _ => None,
    }
}
