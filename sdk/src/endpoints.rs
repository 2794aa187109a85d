//! Default mapping from operation names to URL paths.
//!
//! A proxy with custom routing can override any entry at construction
//! time; the names themselves are the dispatch vocabulary used by
//! [`call`](crate::NeedToKnowClient::call).

use std::collections::HashMap;

/// RPC operations exposed under `/rpc/`.
const RPC: [&str; 16] = [
    "table_create",
    "table_describe",
    "table_describe_columns",
    "table_metadata",
    "table_group_access_grant",
    "table_group_access_revoke",
    "group_create",
    "group_add_members",
    "group_list_members",
    "group_remove_members",
    "group_delete",
    "user_register",
    "user_group_remove",
    "user_groups",
    "user_delete_data",
    "user_delete",
];

/// Read-only views served as plain PostgREST relations.
const VIEWS: [&str; 8] = [
    "table_overview",
    "user_registrations",
    "groups",
    "event_log_user_group_removals",
    "event_log_user_data_deletions",
    "event_log_data_access",
    "event_log_access_control",
    "event_log_data_updates",
];

/// Path of the token-issuing RPC.
pub const TOKEN_PATH: &str = "/rpc/token";

/// Build the default endpoint map.
pub fn default_endpoints() -> HashMap<String, String> {
    let mut map = HashMap::new();
    for name in RPC {
        map.insert(name.to_string(), format!("/rpc/{name}"));
    }
    for name in VIEWS {
        map.insert(name.to_string(), format!("/{name}"));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_operations_live_under_rpc() {
        let map = default_endpoints();
        assert_eq!(map["table_create"], "/rpc/table_create");
        assert_eq!(map["group_add_members"], "/rpc/group_add_members");
        assert_eq!(map["user_register"], "/rpc/user_register");
    }

    #[test]
    fn views_are_top_level_relations() {
        let map = default_endpoints();
        assert_eq!(map["table_overview"], "/table_overview");
        assert_eq!(map["event_log_data_access"], "/event_log_data_access");
    }

    #[test]
    fn map_covers_every_operation() {
        assert_eq!(default_endpoints().len(), RPC.len() + VIEWS.len());
    }
}
