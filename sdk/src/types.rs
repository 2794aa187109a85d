//! Domain types shared across the client surface.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NtkError, Result};

/// Role requested from the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Admin,
    Owner,
    User,
}

impl TokenType {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenType::Admin => "admin",
            TokenType::Owner => "owner",
            TokenType::User => "user",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered subject kind. Owners hold rows protected by row-level
/// security; users can be granted read access via group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    DataOwner,
    DataUser,
}

impl UserType {
    pub fn as_str(self) -> &'static str {
        match self {
            UserType::DataOwner => "data_owner",
            UserType::DataUser => "data_user",
        }
    }

    /// Parse the wire spelling, rejecting anything outside the two
    /// registered kinds.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "data_owner" => Ok(UserType::DataOwner),
            "data_user" => Ok(UserType::DataUser),
            other => Err(NtkError::Validation(format!(
                "user_type must be data_owner or data_user, got {other:?}"
            ))),
        }
    }
}

/// Who a dispatched call runs as. `Owner` and `User` carry the subject
/// id forwarded to the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Admin,
    Owner(String),
    User(String),
}

impl Identity {
    /// Token role for this identity, `None` for anonymous calls.
    pub fn token_type(&self) -> Option<TokenType> {
        match self {
            Identity::Anonymous => None,
            Identity::Admin => Some(TokenType::Admin),
            Identity::Owner(_) => Some(TokenType::Owner),
            Identity::User(_) => Some(TokenType::User),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::Owner(id) | Identity::User(id) => Some(id),
            Identity::Anonymous | Identity::Admin => None,
        }
    }
}

/// Which server-side variant a group membership change resolves to.
///
/// `group_add_members` and `group_remove_members` are polymorphic: the
/// payload names its variant by carrying exactly one selector key. Zero
/// or multiple selector keys cannot be matched to a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberSelector {
    /// Explicit member-id lists under `members.memberships`.
    Members,
    /// A metadata `{key, value}` filter choosing subjects.
    Metadata,
    /// All registered data owners and data users.
    AddAll,
    /// All registered data owners.
    AddAllOwners,
    /// All registered data users.
    AddAllUsers,
    /// Every current member of the group.
    RemoveAll,
}

impl MemberSelector {
    const ADD: [(&'static str, MemberSelector); 5] = [
        ("members", MemberSelector::Members),
        ("metadata", MemberSelector::Metadata),
        ("add_all", MemberSelector::AddAll),
        ("add_all_owners", MemberSelector::AddAllOwners),
        ("add_all_users", MemberSelector::AddAllUsers),
    ];

    const REMOVE: [(&'static str, MemberSelector); 3] = [
        ("members", MemberSelector::Members),
        ("metadata", MemberSelector::Metadata),
        ("remove_all", MemberSelector::RemoveAll),
    ];

    /// Resolve the variant for `group_add_members`.
    pub fn for_add(data: &Value) -> Result<Self> {
        Self::pick(data, &Self::ADD)
    }

    /// Resolve the variant for `group_remove_members`.
    pub fn for_remove(data: &Value) -> Result<Self> {
        Self::pick(data, &Self::REMOVE)
    }

    /// The selector key this variant was chosen by.
    pub fn key(self) -> &'static str {
        match self {
            MemberSelector::Members => "members",
            MemberSelector::Metadata => "metadata",
            MemberSelector::AddAll => "add_all",
            MemberSelector::AddAllOwners => "add_all_owners",
            MemberSelector::AddAllUsers => "add_all_users",
            MemberSelector::RemoveAll => "remove_all",
        }
    }

    fn pick(data: &Value, table: &[(&'static str, MemberSelector)]) -> Result<Self> {
        let mut found = None;
        for (key, selector) in table {
            if data.get(key).is_some() {
                if found.is_some() {
                    return Err(NtkError::NoMethodMatch);
                }
                found = Some(*selector);
            }
        }
        found.ok_or(NtkError::NoMethodMatch)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn token_type_wire_spelling() {
        assert_eq!(TokenType::Admin.as_str(), "admin");
        assert_eq!(serde_json::to_value(TokenType::Owner).unwrap(), json!("owner"));
    }

    #[test]
    fn user_type_parses_both_kinds() {
        assert_eq!(UserType::parse("data_owner").unwrap(), UserType::DataOwner);
        assert_eq!(UserType::parse("data_user").unwrap(), UserType::DataUser);
    }

    #[test]
    fn user_type_rejects_unknown_kind() {
        let err = UserType::parse("superuser").unwrap_err();
        assert!(matches!(err, NtkError::Validation(_)));
    }

    #[test]
    fn identity_carries_subject_for_owner_and_user() {
        assert_eq!(Identity::Owner("1".into()).user_id(), Some("1"));
        assert_eq!(Identity::User("2".into()).user_id(), Some("2"));
        assert_eq!(Identity::Admin.user_id(), None);
        assert_eq!(Identity::Anonymous.token_type(), None);
    }

    #[test]
    fn add_selector_matches_each_variant() {
        let cases = [
            (json!({"members": {}}), MemberSelector::Members),
            (json!({"metadata": {"key": "k", "value": "v"}}), MemberSelector::Metadata),
            (json!({"add_all": true}), MemberSelector::AddAll),
            (json!({"add_all_owners": true}), MemberSelector::AddAllOwners),
            (json!({"add_all_users": true}), MemberSelector::AddAllUsers),
        ];
        for (data, expected) in cases {
            assert_eq!(MemberSelector::for_add(&data).unwrap(), expected);
        }
    }

    #[test]
    fn remove_selector_matches_each_variant() {
        assert_eq!(
            MemberSelector::for_remove(&json!({"remove_all": true})).unwrap(),
            MemberSelector::RemoveAll
        );
        assert_eq!(
            MemberSelector::for_remove(&json!({"members": {}})).unwrap(),
            MemberSelector::Members
        );
    }

    #[test]
    fn selector_rejects_empty_payload() {
        let err = MemberSelector::for_add(&json!({"group_name": "g1"})).unwrap_err();
        assert!(matches!(err, NtkError::NoMethodMatch));
    }

    #[test]
    fn selector_rejects_ambiguous_payload() {
        let data = json!({"group_name": "g1", "add_all": true, "members": {}});
        let err = MemberSelector::for_add(&data).unwrap_err();
        assert!(matches!(err, NtkError::NoMethodMatch));

        let data = json!({"metadata": {}, "remove_all": true});
        let err = MemberSelector::for_remove(&data).unwrap_err();
        assert!(matches!(err, NtkError::NoMethodMatch));
    }

    #[test]
    fn remove_does_not_accept_add_only_selectors() {
        let err = MemberSelector::for_remove(&json!({"add_all": true})).unwrap_err();
        assert!(matches!(err, NtkError::NoMethodMatch));
    }
}
