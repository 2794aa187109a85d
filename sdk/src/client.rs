//! Synchronous client for the pg-need-to-know HTTP API.
//!
//! Every operation is one request/response round-trip: validate that the
//! required payload keys are present, resolve the target path from the
//! endpoint map (or an explicit override), attach the bearer token where
//! the operation is authenticated, and hand back the transport response
//! unmodified. The client never interprets status codes or bodies; the
//! server owns all authorization and integrity decisions.

use std::collections::HashMap;

use reqwest::blocking::{Request, Response};
use serde_json::Value;
use tracing::debug;

use crate::endpoints::{default_endpoints, TOKEN_PATH};
use crate::error::{NtkError, Result};
use crate::types::{Identity, MemberSelector, TokenType, UserType};

/// Client for pg-need-to-know as exposed via PostgREST.
pub struct NeedToKnowClient {
    base_url: String,
    endpoints: HashMap<String, String>,
    http: reqwest::blocking::Client,
}

impl Default for NeedToKnowClient {
    fn default() -> Self {
        Self::new("http://localhost:3000")
    }
}

impl NeedToKnowClient {
    /// Client with the default endpoint map.
    pub fn new(base_url: &str) -> Self {
        Self::with_endpoints(base_url, HashMap::new())
    }

    /// Client with endpoint overrides, for proxies with custom routing.
    /// Entries in `overrides` replace the defaults per operation name.
    pub fn with_endpoints(base_url: &str, overrides: HashMap<String, String>) -> Self {
        let mut endpoints = default_endpoints();
        endpoints.extend(overrides);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            endpoints,
            http: reqwest::blocking::Client::new(),
        }
    }

    /// Path registered for an operation name.
    pub fn endpoint_for(&self, name: &str) -> Result<&str> {
        self.endpoints
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| NtkError::UnknownOperation(name.to_string()))
    }

    // ------------------------------------------------------------------
    // Token fetcher
    // ------------------------------------------------------------------

    /// Fetch a short-lived bearer token.
    ///
    /// `user_id` is forwarded as a query parameter only when present;
    /// admin tokens carry no subject. Tokens are fetched per call and
    /// never cached.
    pub fn token(&self, user_id: Option<&str>, token_type: TokenType) -> Result<String> {
        let request = self.build_token_request(user_id, token_type)?;
        debug!(url = %request.url(), "GET token");
        let body: Value = self.http.execute(request)?.json()?;
        body.get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| NtkError::MalformedToken(body.to_string()))
    }

    fn build_token_request(
        &self,
        user_id: Option<&str>,
        token_type: TokenType,
    ) -> Result<Request> {
        let mut builder = self.http.get(self.url(TOKEN_PATH));
        if let Some(id) = user_id {
            builder = builder.query(&[("user_id", id)]);
        }
        builder = builder.query(&[("token_type", token_type.as_str())]);
        Ok(builder.build()?)
    }

    // ------------------------------------------------------------------
    // Name-based dispatch
    // ------------------------------------------------------------------

    /// Invoke an operation by name, fetching a token for `identity`
    /// first (none for [`Identity::Anonymous`]).
    pub fn call(&self, method: &str, data: &Value, identity: &Identity) -> Result<Response> {
        let token = match identity.token_type() {
            Some(token_type) => Some(self.token(identity.user_id(), token_type)?),
            None => None,
        };
        self.dispatch(method, data, token.as_deref())
    }

    fn dispatch(&self, method: &str, data: &Value, token: Option<&str>) -> Result<Response> {
        let auth = || {
            token.ok_or_else(|| {
                NtkError::Validation(format!("operation {method} requires a token"))
            })
        };
        match method {
            "table_create" => self.table_create(data, auth()?, None),
            "table_describe" => self.table_describe(data, auth()?, None),
            "table_describe_columns" => self.table_describe_columns(data, auth()?, None),
            "table_metadata" => self.table_metadata(data, auth()?, None),
            "table_group_access_grant" => self.table_group_access_grant(data, auth()?, None),
            "table_group_access_revoke" => self.table_group_access_revoke(data, auth()?, None),
            "group_create" => self.group_create(data, auth()?, None),
            "group_add_members" => self.group_add_members(data, auth()?, None),
            "group_list_members" => self.group_list_members(data, auth()?, None),
            "group_remove_members" => self.group_remove_members(data, auth()?, None),
            "group_delete" => self.group_delete(data, auth()?, None),
            "user_register" => self.user_register(data, None),
            "user_group_remove" => self.user_group_remove(data, auth()?, None),
            "user_groups" => self.user_groups(data, auth()?, None),
            "user_delete_data" => self.user_delete_data(data, auth()?, None),
            "user_delete" => self.user_delete(data, auth()?, None),
            "table_overview" => self.get_table_overview(auth()?, None),
            "user_registrations" => self.get_user_registrations(auth()?, None),
            "groups" => self.get_groups(auth()?, None),
            "event_log_user_group_removals" => {
                self.get_event_log_user_group_removals(auth()?, None)
            }
            "event_log_user_data_deletions" => {
                self.get_event_log_user_data_deletions(auth()?, None)
            }
            "event_log_data_access" => self.get_event_log_data_access(auth()?, None),
            "event_log_access_control" => self.get_event_log_access_control(auth()?, None),
            "event_log_data_updates" => self.get_event_log_data_updates(auth()?, None),
            other => Err(NtkError::UnknownOperation(other.to_string())),
        }
    }

    // ------------------------------------------------------------------
    // Table administration
    // ------------------------------------------------------------------

    /// Create a table from a definition payload:
    /// `{"type": "mac", "definition": {"table_name": ..., "columns": [..]}}`.
    /// Requires an admin token.
    pub fn table_create(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        require_keys(data, &["definition", "type"])?;
        self.post(self.resolve("table_create", endpoint)?, data, Some(token))
    }

    /// Attach a description to an existing table.
    pub fn table_describe(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        require_keys(data, &["table_name", "table_description"])?;
        self.post(self.resolve("table_describe", endpoint)?, data, Some(token))
    }

    /// Attach per-column descriptions:
    /// `{"table_name": ..., "column_descriptions": [{"name", "description"}]}`.
    pub fn table_describe_columns(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        require_keys(data, &["table_name", "column_descriptions"])?;
        self.post(
            self.resolve("table_describe_columns", endpoint)?,
            data,
            Some(token),
        )
    }

    /// Read a table's metadata; the table name travels as a query
    /// parameter on a GET.
    pub fn table_metadata(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        let table_name = data
            .get("table_name")
            .and_then(Value::as_str)
            .ok_or(NtkError::MissingKey("table_name"))?;
        let endpoint = self.resolve("table_metadata", endpoint)?;
        debug!(endpoint, table_name, "GET table_metadata");
        let response = self
            .http
            .get(self.url(endpoint))
            .query(&[("table_name", table_name)])
            .bearer_auth(token)
            .send()?;
        Ok(response)
    }

    /// Grant a group access (e.g. select) to a table.
    pub fn table_group_access_grant(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        require_keys(data, &["table_name", "group_name", "grant_type"])?;
        self.post(
            self.resolve("table_group_access_grant", endpoint)?,
            data,
            Some(token),
        )
    }

    /// Revoke a previously granted (table, group) access.
    pub fn table_group_access_revoke(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        require_keys(data, &["table_name", "group_name", "grant_type"])?;
        self.post(
            self.resolve("table_group_access_revoke", endpoint)?,
            data,
            Some(token),
        )
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Register a data owner or data user. This is the one anonymous
    /// mutation: registration happens before any token can exist.
    pub fn user_register(&self, data: &Value, endpoint: Option<&str>) -> Result<Response> {
        require_keys(data, &["user_id", "user_type", "user_metadata"])?;
        match data.get("user_type").and_then(Value::as_str) {
            Some(kind) => {
                UserType::parse(kind)?;
            }
            None => {
                return Err(NtkError::Validation("user_type must be a string".to_string()))
            }
        }
        self.post(self.resolve("user_register", endpoint)?, data, None)
    }

    /// Remove the calling user from a group.
    pub fn user_group_remove(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        require_keys(data, &["group_name"])?;
        self.post(self.resolve("user_group_remove", endpoint)?, data, Some(token))
    }

    /// List group memberships for a user:
    /// `{"user_type": ..., "user_id": <optional>}`.
    pub fn user_groups(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        require_keys(data, &["user_type"])?;
        self.post(self.resolve("user_groups", endpoint)?, data, Some(token))
    }

    /// Delete all data belonging to the calling owner. No required keys;
    /// a null payload is accepted.
    pub fn user_delete_data(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        self.post(self.resolve("user_delete_data", endpoint)?, data, Some(token))
    }

    /// Delete a registered user.
    pub fn user_delete(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        require_keys(data, &["user_id", "user_type"])?;
        self.post(self.resolve("user_delete", endpoint)?, data, Some(token))
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Create a named group: `{"group_name": ..., "group_metadata": {..}}`.
    pub fn group_create(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        require_keys(data, &["group_name", "group_metadata"])?;
        self.post(self.resolve("group_create", endpoint)?, data, Some(token))
    }

    /// Add members to a group.
    ///
    /// Polymorphic over the payload: exactly one of `members`,
    /// `metadata`, `add_all`, `add_all_owners`, `add_all_users` selects
    /// the server-side variant. Zero or multiple selector keys fail with
    /// [`NtkError::NoMethodMatch`] before any request is sent.
    pub fn group_add_members(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        let selector = MemberSelector::for_add(data)?;
        require_keys(data, &["group_name"])?;
        debug!(selector = selector.key(), "group_add_members");
        self.post(self.resolve("group_add_members", endpoint)?, data, Some(token))
    }

    /// List the current members of a group.
    pub fn group_list_members(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        require_keys(data, &["group_name"])?;
        self.post(self.resolve("group_list_members", endpoint)?, data, Some(token))
    }

    /// Remove members from a group.
    ///
    /// Same selection rule as [`group_add_members`], over `members`,
    /// `metadata`, `remove_all`.
    ///
    /// [`group_add_members`]: Self::group_add_members
    pub fn group_remove_members(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        let selector = MemberSelector::for_remove(data)?;
        require_keys(data, &["group_name"])?;
        debug!(selector = selector.key(), "group_remove_members");
        self.post(
            self.resolve("group_remove_members", endpoint)?,
            data,
            Some(token),
        )
    }

    /// Delete a group.
    pub fn group_delete(
        &self,
        data: &Value,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        require_keys(data, &["group_name"])?;
        self.post(self.resolve("group_delete", endpoint)?, data, Some(token))
    }

    // ------------------------------------------------------------------
    // Read-only views and event logs
    // ------------------------------------------------------------------

    /// `[{table_name, table_description, groups_with_access}]`
    pub fn get_table_overview(&self, token: &str, endpoint: Option<&str>) -> Result<Response> {
        self.get(self.resolve("table_overview", endpoint)?, Some(token))
    }

    /// `[{registration_date, user_id, user_name, user_type, user_metadata}]`
    pub fn get_user_registrations(
        &self,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        self.get(self.resolve("user_registrations", endpoint)?, Some(token))
    }

    /// `[{group_name, group_metadata}]`
    pub fn get_groups(&self, token: &str, endpoint: Option<&str>) -> Result<Response> {
        self.get(self.resolve("groups", endpoint)?, Some(token))
    }

    /// `[{removal_date, user_name, group_name}]`
    pub fn get_event_log_user_group_removals(
        &self,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        self.get(
            self.resolve("event_log_user_group_removals", endpoint)?,
            Some(token),
        )
    }

    /// `[{user_name, request_date}]`
    pub fn get_event_log_user_data_deletions(
        &self,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        self.get(
            self.resolve("event_log_user_data_deletions", endpoint)?,
            Some(token),
        )
    }

    /// `[{request_time, row_id, data_user, data_owner}]`
    pub fn get_event_log_data_access(
        &self,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        self.get(self.resolve("event_log_data_access", endpoint)?, Some(token))
    }

    /// `[{id, event_time, event_type, group_name, target}]`
    pub fn get_event_log_access_control(
        &self,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        self.get(
            self.resolve("event_log_access_control", endpoint)?,
            Some(token),
        )
    }

    /// `[{updated_time, updated_by, table_name, row_id, column_name, old_data, new_data}]`
    pub fn get_event_log_data_updates(
        &self,
        token: &str,
        endpoint: Option<&str>,
    ) -> Result<Response> {
        self.get(self.resolve("event_log_data_updates", endpoint)?, Some(token))
    }

    // ------------------------------------------------------------------
    // Generic data plane
    // ------------------------------------------------------------------

    /// POST arbitrary rows to a table endpoint, e.g. `/t1`.
    pub fn post_data(&self, data: &Value, token: &str, endpoint: &str) -> Result<Response> {
        self.post(endpoint, data, Some(token))
    }

    /// PATCH rows at a table endpoint (partial update).
    pub fn patch_data(&self, data: &Value, token: &str, endpoint: &str) -> Result<Response> {
        debug!(endpoint, "PATCH");
        let response = self
            .http
            .patch(self.url(endpoint))
            .json(data)
            .bearer_auth(token)
            .send()?;
        Ok(response)
    }

    /// GET rows from a table endpoint under the caller's token.
    pub fn get_data(&self, token: &str, endpoint: &str) -> Result<Response> {
        self.get(endpoint, Some(token))
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    fn resolve<'a>(&'a self, name: &str, explicit: Option<&'a str>) -> Result<&'a str> {
        match explicit {
            Some(endpoint) => Ok(endpoint),
            None => self.endpoint_for(name),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn post(&self, endpoint: &str, payload: &Value, token: Option<&str>) -> Result<Response> {
        debug!(endpoint, authenticated = token.is_some(), "POST");
        // A null payload still travels as a JSON body (`null`), keeping
        // Content-Type uniform across operations.
        let mut builder = self.http.post(self.url(endpoint)).json(payload);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder.send()?)
    }

    fn get(&self, endpoint: &str, token: Option<&str>) -> Result<Response> {
        debug!(endpoint, authenticated = token.is_some(), "GET");
        let mut builder = self.http.get(self.url(endpoint));
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder.send()?)
    }
}

fn require_keys(data: &Value, keys: &[&'static str]) -> Result<()> {
    for &key in keys {
        if data.get(key).is_none() {
            return Err(NtkError::MissingKey(key));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    /// Points at a closed port: any test that reaches the network fails
    /// with `NtkError::Network`, so a local error proves no request was
    /// attempted.
    fn client() -> NeedToKnowClient {
        NeedToKnowClient::new("http://127.0.0.1:1")
    }

    #[test]
    fn missing_keys_fail_before_any_request() {
        let c = client();
        let cases: Vec<(Result<Response>, &str)> = vec![
            (c.table_create(&json!({"definition": {}}), "t", None), "type"),
            (c.table_describe(&json!({"table_name": "t1"}), "t", None), "table_description"),
            (
                c.table_describe_columns(&json!({"column_descriptions": []}), "t", None),
                "table_name",
            ),
            (c.table_metadata(&json!({}), "t", None), "table_name"),
            (
                c.table_group_access_grant(&json!({"table_name": "t1", "group_name": "g1"}), "t", None),
                "grant_type",
            ),
            (
                c.table_group_access_revoke(&json!({"group_name": "g1", "grant_type": "select"}), "t", None),
                "table_name",
            ),
            (c.group_create(&json!({"group_name": "g1"}), "t", None), "group_metadata"),
            (c.group_list_members(&json!({}), "t", None), "group_name"),
            (c.group_delete(&json!({}), "t", None), "group_name"),
            (c.user_register(&json!({"user_id": "1", "user_type": "data_owner"}), None), "user_metadata"),
            (c.user_group_remove(&json!({}), "t", None), "group_name"),
            (c.user_groups(&json!({}), "t", None), "user_type"),
            (c.user_delete(&json!({"user_id": "1"}), "t", None), "user_type"),
        ];
        for (result, expected_key) in cases {
            match result.unwrap_err() {
                NtkError::MissingKey(key) => assert_eq!(key, expected_key),
                other => panic!("expected MissingKey({expected_key}), got {other}"),
            }
        }
    }

    #[test]
    fn member_dispatch_requires_exactly_one_selector() {
        let c = client();
        let err = c
            .group_add_members(&json!({"group_name": "g1"}), "t", None)
            .unwrap_err();
        assert!(matches!(err, NtkError::NoMethodMatch));

        let err = c
            .group_add_members(
                &json!({"group_name": "g1", "add_all": true, "add_all_owners": true}),
                "t",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, NtkError::NoMethodMatch));

        let err = c
            .group_remove_members(&json!({"group_name": "g1"}), "t", None)
            .unwrap_err();
        assert!(matches!(err, NtkError::NoMethodMatch));
    }

    #[test]
    fn group_add_members_selector_without_group_name_is_missing_key() {
        let err = client()
            .group_add_members(&json!({"add_all": true}), "t", None)
            .unwrap_err();
        assert!(matches!(err, NtkError::MissingKey("group_name")));
    }

    #[test]
    fn user_register_rejects_unknown_user_type() {
        let data = json!({"user_id": "1", "user_type": "root", "user_metadata": {}});
        let err = client().user_register(&data, None).unwrap_err();
        assert!(matches!(err, NtkError::Validation(_)));
    }

    #[test]
    fn admin_token_request_omits_subject() {
        let req = client()
            .build_token_request(None, TokenType::Admin)
            .unwrap();
        assert_eq!(req.url().query(), Some("token_type=admin"));
    }

    #[test]
    fn owner_and_user_token_requests_carry_subject() {
        let req = client()
            .build_token_request(Some("42"), TokenType::Owner)
            .unwrap();
        assert_eq!(req.url().query(), Some("user_id=42&token_type=owner"));

        let req = client()
            .build_token_request(Some("7"), TokenType::User)
            .unwrap();
        assert_eq!(req.url().query(), Some("user_id=7&token_type=user"));
    }

    #[test]
    fn token_request_hits_token_path() {
        let req = client()
            .build_token_request(None, TokenType::Admin)
            .unwrap();
        assert_eq!(req.url().path(), "/rpc/token");
    }

    #[test]
    fn dispatch_rejects_unknown_operation() {
        let err = client()
            .call("table_drop", &json!({}), &Identity::Anonymous)
            .unwrap_err();
        match err {
            NtkError::UnknownOperation(name) => assert_eq!(name, "table_drop"),
            other => panic!("expected UnknownOperation, got {other}"),
        }
    }

    #[test]
    fn dispatch_rejects_anonymous_authenticated_operation() {
        let err = client()
            .call("group_delete", &json!({"group_name": "g1"}), &Identity::Anonymous)
            .unwrap_err();
        assert!(matches!(err, NtkError::Validation(_)));
    }

    #[test]
    fn endpoint_overrides_replace_defaults() {
        let overrides =
            HashMap::from([("table_create".to_string(), "/custom/create".to_string())]);
        let c = NeedToKnowClient::with_endpoints("http://127.0.0.1:1", overrides);
        assert_eq!(c.endpoint_for("table_create").unwrap(), "/custom/create");
        // Untouched entries keep their defaults.
        assert_eq!(c.endpoint_for("group_create").unwrap(), "/rpc/group_create");
    }

    #[test]
    fn unknown_endpoint_name_is_an_error() {
        let err = client().endpoint_for("nope").unwrap_err();
        assert!(matches!(err, NtkError::UnknownOperation(_)));
    }

    #[test]
    fn trailing_slash_is_stripped_from_base_url() {
        let c = NeedToKnowClient::new("http://127.0.0.1:1/");
        let req = c.build_token_request(None, TokenType::Admin).unwrap();
        assert_eq!(req.url().as_str(), "http://127.0.0.1:1/rpc/token?token_type=admin");
    }
}
