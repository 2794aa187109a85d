//! In-memory stand-in for the pg-need-to-know PostgREST API.
//!
//! Implements just enough of the server's semantics to exercise the SDK
//! over real HTTP: token issuance per role, user/group/table
//! administration, group-based select grants, and a data plane where
//! row-level security scopes reads to the row owner, to group members
//! with a grant, and to nobody else. Admin tokens see empty data sets;
//! event logs record accesses and membership changes.
//!
//! State lives in a single `Arc<RwLock<Db>>`; nothing is persisted.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::get,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Who a bearer token authenticates as. Owner/User carry the subject id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
    Owner(String),
    User(String),
}

impl Role {
    /// The `owner_<id>` / `user_<id>` name rows and memberships use.
    fn user_name(&self) -> Option<String> {
        match self {
            Role::Admin => None,
            Role::Owner(id) => Some(format!("owner_{id}")),
            Role::User(id) => Some(format!("user_{id}")),
        }
    }
}

#[derive(Clone, Debug)]
struct UserRecord {
    user_id: String,
    user_type: String,
    user_metadata: Value,
    registration_date: u64,
}

impl UserRecord {
    fn user_name(&self) -> String {
        match self.user_type.as_str() {
            "data_owner" => format!("owner_{}", self.user_id),
            _ => format!("user_{}", self.user_id),
        }
    }
}

#[derive(Clone, Debug)]
struct Table {
    definition: Value,
    description: Option<String>,
    column_descriptions: Value,
}

#[derive(Clone, Debug)]
struct Row {
    owner: String,
    data: Value,
}

#[derive(Clone, Debug, Default)]
struct Group {
    metadata: Value,
    members: BTreeSet<String>,
}

#[derive(Default)]
struct EventLogs {
    user_group_removals: Vec<Value>,
    user_data_deletions: Vec<Value>,
    data_access: Vec<Value>,
    access_control: Vec<Value>,
    data_updates: Vec<Value>,
}

#[derive(Default)]
pub struct Db {
    tokens: HashMap<String, Role>,
    users: HashMap<String, UserRecord>,
    tables: HashMap<String, Table>,
    rows: HashMap<String, Vec<Row>>,
    groups: HashMap<String, Group>,
    grants: HashSet<(String, String, String)>,
    logs: EventLogs,
}

impl Db {
    fn role(&self, headers: &HeaderMap) -> Option<Role> {
        let token = headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")?;
        self.tokens.get(token).cloned()
    }

    /// Resolve a membership-change payload to the affected user names.
    /// Exactly one selector key must be present.
    fn member_names(&self, data: &Value, removing: bool) -> Result<BTreeSet<String>, String> {
        let mut selectors = Vec::new();
        let keys: &[&str] = if removing {
            &["members", "metadata", "remove_all"]
        } else {
            &["members", "metadata", "add_all", "add_all_owners", "add_all_users"]
        };
        for key in keys {
            if data.get(key).is_some() {
                selectors.push(*key);
            }
        }
        let &[selector] = selectors.as_slice() else {
            return Err("could not match keys to a method".to_string());
        };

        let names = match selector {
            "members" => {
                let memberships = &data["members"]["memberships"];
                let mut names = BTreeSet::new();
                for id in string_items(&memberships["data_owners"]) {
                    names.insert(format!("owner_{id}"));
                }
                for id in string_items(&memberships["data_users"]) {
                    names.insert(format!("user_{id}"));
                }
                names
            }
            "metadata" => {
                let key = data["metadata"]["key"].as_str().unwrap_or_default();
                let value = &data["metadata"]["value"];
                self.users
                    .values()
                    .filter(|u| u.user_metadata.get(key) == Some(value))
                    .map(UserRecord::user_name)
                    .collect()
            }
            "add_all" | "remove_all" => self.users.values().map(UserRecord::user_name).collect(),
            "add_all_owners" => self.users_of_type("data_owner"),
            "add_all_users" => self.users_of_type("data_user"),
            _ => unreachable!(),
        };
        Ok(names)
    }

    fn users_of_type(&self, user_type: &str) -> BTreeSet<String> {
        self.users
            .values()
            .filter(|u| u.user_type == user_type)
            .map(UserRecord::user_name)
            .collect()
    }

    /// Groups granting `grant_type` on `table` that `user_name` belongs to.
    fn granting_groups(&self, table: &str, user_name: &str, grant_type: &str) -> Vec<&Group> {
        self.groups
            .iter()
            .filter(|(name, group)| {
                group.members.contains(user_name)
                    && self.grants.contains(&(
                        table.to_string(),
                        (*name).clone(),
                        grant_type.to_string(),
                    ))
            })
            .map(|(_, group)| group)
            .collect()
    }
}

fn string_items(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub type SharedDb = Arc<RwLock<Db>>;

type Reply = (StatusCode, Json<Value>);

fn ok(body: Value) -> Reply {
    (StatusCode::OK, Json(body))
}

fn fail(status: StatusCode, message: &str) -> Reply {
    (status, Json(json!({ "message": message })))
}

fn unauthorized() -> Reply {
    fail(StatusCode::UNAUTHORIZED, "token required")
}

pub fn app() -> Router {
    let db: SharedDb = Arc::new(RwLock::new(Db::default()));
    Router::new()
        .route("/rpc/token", get(issue_token))
        .route("/rpc/user_register", post(user_register))
        .route("/rpc/table_create", post(table_create))
        .route("/rpc/table_describe", post(table_describe))
        .route("/rpc/table_describe_columns", post(table_describe_columns))
        .route("/rpc/table_metadata", get(table_metadata))
        .route("/rpc/table_group_access_grant", post(access_grant))
        .route("/rpc/table_group_access_revoke", post(access_revoke))
        .route("/rpc/group_create", post(group_create))
        .route("/rpc/group_add_members", post(group_add_members))
        .route("/rpc/group_list_members", post(group_list_members))
        .route("/rpc/group_remove_members", post(group_remove_members))
        .route("/rpc/group_delete", post(group_delete))
        .route("/rpc/user_group_remove", post(user_group_remove))
        .route("/rpc/user_groups", post(user_groups))
        .route("/rpc/user_delete_data", post(user_delete_data))
        .route("/rpc/user_delete", post(user_delete))
        .route("/table_overview", get(view_table_overview))
        .route("/user_registrations", get(view_user_registrations))
        .route("/groups", get(view_groups))
        .route("/event_log_user_group_removals", get(view_log_group_removals))
        .route("/event_log_user_data_deletions", get(view_log_data_deletions))
        .route("/event_log_data_access", get(view_log_data_access))
        .route("/event_log_access_control", get(view_log_access_control))
        .route("/event_log_data_updates", get(view_log_data_updates))
        .route("/{table}", get(table_select).post(table_insert).patch(table_update))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// ----------------------------------------------------------------------
// Token issuance
// ----------------------------------------------------------------------

async fn issue_token(
    State(db): State<SharedDb>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    let role = match params.get("token_type").map(String::as_str) {
        Some("admin") => Role::Admin,
        Some(kind @ ("owner" | "user")) => match params.get("user_id") {
            Some(id) if kind == "owner" => Role::Owner(id.clone()),
            Some(id) => Role::User(id.clone()),
            None => return fail(StatusCode::BAD_REQUEST, "user_id required"),
        },
        _ => return fail(StatusCode::BAD_REQUEST, "unknown token_type"),
    };
    let token = Uuid::new_v4().to_string();
    db.write().await.tokens.insert(token.clone(), role);
    ok(json!({ "token": token }))
}

// ----------------------------------------------------------------------
// Users
// ----------------------------------------------------------------------

async fn user_register(State(db): State<SharedDb>, Json(data): Json<Value>) -> Reply {
    let (Some(user_id), Some(user_type)) = (
        data["user_id"].as_str(),
        data["user_type"].as_str(),
    ) else {
        return fail(StatusCode::BAD_REQUEST, "user_id and user_type required");
    };
    if user_type != "data_owner" && user_type != "data_user" {
        return fail(StatusCode::BAD_REQUEST, "unknown user_type");
    }
    let record = UserRecord {
        user_id: user_id.to_string(),
        user_type: user_type.to_string(),
        user_metadata: data.get("user_metadata").cloned().unwrap_or(Value::Null),
        registration_date: now_secs(),
    };
    let name = record.user_name();
    let mut db = db.write().await;
    if db.users.contains_key(&name) {
        return fail(StatusCode::CONFLICT, "user already registered");
    }
    db.users.insert(name, record);
    ok(Value::Null)
}

async fn user_group_remove(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    let mut db = db.write().await;
    let Some(name) = db.role(&headers).and_then(|r| r.user_name()) else {
        return unauthorized();
    };
    let Some(group_name) = data["group_name"].as_str().map(str::to_string) else {
        return fail(StatusCode::BAD_REQUEST, "group_name required");
    };
    let Some(group) = db.groups.get_mut(&group_name) else {
        return fail(StatusCode::NOT_FOUND, "no such group");
    };
    group.members.remove(&name);
    db.logs.user_group_removals.push(json!({
        "removal_date": now_secs(),
        "user_name": name,
        "group_name": group_name,
    }));
    ok(Value::Null)
}

async fn user_groups(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    let db = db.read().await;
    let Some(role) = db.role(&headers) else {
        return unauthorized();
    };
    // Explicit subject in the payload, falling back to the caller.
    let name = match (data["user_id"].as_str(), data["user_type"].as_str()) {
        (Some(id), Some("data_owner")) => format!("owner_{id}"),
        (Some(id), Some(_)) => format!("user_{id}"),
        _ => match role.user_name() {
            Some(name) => name,
            None => return fail(StatusCode::BAD_REQUEST, "user_id required for admin"),
        },
    };
    let memberships: Vec<Value> = db
        .groups
        .iter()
        .filter(|(_, group)| group.members.contains(&name))
        .map(|(group_name, group)| {
            json!({ "group_name": group_name, "group_metadata": group.metadata })
        })
        .collect();
    ok(Value::Array(memberships))
}

async fn user_delete_data(State(db): State<SharedDb>, headers: HeaderMap) -> Reply {
    let mut db = db.write().await;
    let Some(Role::Owner(id)) = db.role(&headers) else {
        return fail(StatusCode::FORBIDDEN, "owner token required");
    };
    let name = format!("owner_{id}");
    for rows in db.rows.values_mut() {
        rows.retain(|row| row.owner != name);
    }
    db.logs.user_data_deletions.push(json!({
        "user_name": name,
        "request_date": now_secs(),
    }));
    ok(Value::Null)
}

async fn user_delete(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    let mut db = db.write().await;
    if db.role(&headers) != Some(Role::Admin) {
        return unauthorized();
    }
    let (Some(user_id), Some(user_type)) =
        (data["user_id"].as_str(), data["user_type"].as_str())
    else {
        return fail(StatusCode::BAD_REQUEST, "user_id and user_type required");
    };
    let name = match user_type {
        "data_owner" => format!("owner_{user_id}"),
        _ => format!("user_{user_id}"),
    };
    if db.users.remove(&name).is_none() {
        return fail(StatusCode::NOT_FOUND, "no such user");
    }
    for group in db.groups.values_mut() {
        group.members.remove(&name);
    }
    ok(Value::Null)
}

// ----------------------------------------------------------------------
// Table administration
// ----------------------------------------------------------------------

async fn table_create(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    let mut db = db.write().await;
    if db.role(&headers) != Some(Role::Admin) {
        return unauthorized();
    }
    let Some(table_name) = data["definition"]["table_name"].as_str().map(str::to_string)
    else {
        return fail(StatusCode::BAD_REQUEST, "definition.table_name required");
    };
    if db.tables.contains_key(&table_name) {
        return fail(StatusCode::CONFLICT, "table exists");
    }
    db.tables.insert(
        table_name.clone(),
        Table {
            definition: data["definition"].clone(),
            description: None,
            column_descriptions: Value::Null,
        },
    );
    db.rows.insert(table_name.clone(), Vec::new());
    let log_id = db.logs.access_control.len();
    db.logs.access_control.push(json!({
        "id": log_id,
        "event_time": now_secs(),
        "event_type": "table_create",
        "group_name": Value::Null,
        "target": table_name,
    }));
    ok(Value::Null)
}

async fn table_describe(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    let mut db = db.write().await;
    if db.role(&headers) != Some(Role::Admin) {
        return unauthorized();
    }
    let (Some(table_name), Some(description)) = (
        data["table_name"].as_str(),
        data["table_description"].as_str(),
    ) else {
        return fail(StatusCode::BAD_REQUEST, "table_name and table_description required");
    };
    let description = description.to_string();
    match db.tables.get_mut(table_name) {
        Some(table) => {
            table.description = Some(description);
            ok(Value::Null)
        }
        None => fail(StatusCode::NOT_FOUND, "no such table"),
    }
}

async fn table_describe_columns(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    let mut db = db.write().await;
    if db.role(&headers) != Some(Role::Admin) {
        return unauthorized();
    }
    let Some(table_name) = data["table_name"].as_str() else {
        return fail(StatusCode::BAD_REQUEST, "table_name required");
    };
    let descriptions = data["column_descriptions"].clone();
    match db.tables.get_mut(table_name) {
        Some(table) => {
            table.column_descriptions = descriptions;
            ok(Value::Null)
        }
        None => fail(StatusCode::NOT_FOUND, "no such table"),
    }
}

async fn table_metadata(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    let db = db.read().await;
    if db.role(&headers).is_none() {
        return unauthorized();
    }
    let Some(table_name) = params.get("table_name") else {
        return fail(StatusCode::BAD_REQUEST, "table_name required");
    };
    match db.tables.get(table_name) {
        Some(table) => ok(json!({
            "definition": table.definition,
            "table_description": table.description,
            "column_descriptions": table.column_descriptions,
        })),
        None => fail(StatusCode::NOT_FOUND, "no such table"),
    }
}

async fn access_grant(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    change_grant(db, headers, data, true).await
}

async fn access_revoke(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    change_grant(db, headers, data, false).await
}

async fn change_grant(db: SharedDb, headers: HeaderMap, data: Value, granting: bool) -> Reply {
    let mut db = db.write().await;
    if db.role(&headers) != Some(Role::Admin) {
        return unauthorized();
    }
    let (Some(table_name), Some(group_name), Some(grant_type)) = (
        data["table_name"].as_str(),
        data["group_name"].as_str(),
        data["grant_type"].as_str(),
    ) else {
        return fail(
            StatusCode::BAD_REQUEST,
            "table_name, group_name and grant_type required",
        );
    };
    if !db.tables.contains_key(table_name) {
        return fail(StatusCode::NOT_FOUND, "no such table");
    }
    if !db.groups.contains_key(group_name) {
        return fail(StatusCode::NOT_FOUND, "no such group");
    }
    let grant = (
        table_name.to_string(),
        group_name.to_string(),
        grant_type.to_string(),
    );
    if granting {
        db.grants.insert(grant);
    } else {
        db.grants.remove(&grant);
    }
    let log_id = db.logs.access_control.len();
    db.logs.access_control.push(json!({
        "id": log_id,
        "event_time": now_secs(),
        "event_type": if granting { "table_group_access_grant" } else { "table_group_access_revoke" },
        "group_name": group_name,
        "target": table_name,
    }));
    ok(Value::Null)
}

// ----------------------------------------------------------------------
// Groups
// ----------------------------------------------------------------------

async fn group_create(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    let mut db = db.write().await;
    if db.role(&headers) != Some(Role::Admin) {
        return unauthorized();
    }
    let Some(group_name) = data["group_name"].as_str().map(str::to_string) else {
        return fail(StatusCode::BAD_REQUEST, "group_name required");
    };
    if db.groups.contains_key(&group_name) {
        return fail(StatusCode::CONFLICT, "group exists");
    }
    db.groups.insert(
        group_name.clone(),
        Group {
            metadata: data.get("group_metadata").cloned().unwrap_or(Value::Null),
            members: BTreeSet::new(),
        },
    );
    let log_id = db.logs.access_control.len();
    db.logs.access_control.push(json!({
        "id": log_id,
        "event_time": now_secs(),
        "event_type": "group_create",
        "group_name": group_name,
        "target": Value::Null,
    }));
    ok(Value::Null)
}

async fn group_add_members(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    change_members(db, headers, data, false).await
}

async fn group_remove_members(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    change_members(db, headers, data, true).await
}

async fn change_members(db: SharedDb, headers: HeaderMap, data: Value, removing: bool) -> Reply {
    let mut db = db.write().await;
    if db.role(&headers) != Some(Role::Admin) {
        return unauthorized();
    }
    let Some(group_name) = data["group_name"].as_str().map(str::to_string) else {
        return fail(StatusCode::BAD_REQUEST, "group_name required");
    };
    if !db.groups.contains_key(&group_name) {
        return fail(StatusCode::NOT_FOUND, "no such group");
    }
    let names = match db.member_names(&data, removing) {
        Ok(names) => names,
        Err(message) => return fail(StatusCode::BAD_REQUEST, &message),
    };
    // Only registered subjects can enter a group.
    let names: BTreeSet<String> = names
        .into_iter()
        .filter(|name| removing || db.users.contains_key(name))
        .collect();
    let Some(group) = db.groups.get_mut(&group_name) else {
        return fail(StatusCode::NOT_FOUND, "no such group");
    };
    for name in names {
        if removing {
            group.members.remove(&name);
        } else {
            group.members.insert(name);
        }
    }
    let log_id = db.logs.access_control.len();
    db.logs.access_control.push(json!({
        "id": log_id,
        "event_time": now_secs(),
        "event_type": if removing { "group_remove_members" } else { "group_add_members" },
        "group_name": group_name,
        "target": Value::Null,
    }));
    ok(Value::Null)
}

async fn group_list_members(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    let db = db.read().await;
    if db.role(&headers) != Some(Role::Admin) {
        return unauthorized();
    }
    let Some(group_name) = data["group_name"].as_str() else {
        return fail(StatusCode::BAD_REQUEST, "group_name required");
    };
    match db.groups.get(group_name) {
        Some(group) => ok(json!(group.members)),
        None => fail(StatusCode::NOT_FOUND, "no such group"),
    }
}

async fn group_delete(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Reply {
    let mut db = db.write().await;
    if db.role(&headers) != Some(Role::Admin) {
        return unauthorized();
    }
    let Some(group_name) = data["group_name"].as_str().map(str::to_string) else {
        return fail(StatusCode::BAD_REQUEST, "group_name required");
    };
    if db.groups.remove(&group_name).is_none() {
        return fail(StatusCode::NOT_FOUND, "no such group");
    }
    db.grants.retain(|(_, group, _)| *group != group_name);
    let log_id = db.logs.access_control.len();
    db.logs.access_control.push(json!({
        "id": log_id,
        "event_time": now_secs(),
        "event_type": "group_delete",
        "group_name": group_name,
        "target": Value::Null,
    }));
    ok(Value::Null)
}

// ----------------------------------------------------------------------
// Data plane: row-level security
// ----------------------------------------------------------------------

async fn table_insert(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Path(table): Path<String>,
    Json(data): Json<Value>,
) -> Reply {
    let mut db = db.write().await;
    let Some(Role::Owner(id)) = db.role(&headers) else {
        return fail(StatusCode::FORBIDDEN, "owner token required");
    };
    if !db.tables.contains_key(&table) {
        return fail(StatusCode::NOT_FOUND, "no such table");
    }
    let owner = format!("owner_{id}");
    let incoming = match data {
        Value::Array(items) => items,
        other => vec![other],
    };
    let rows = db.rows.entry(table).or_default();
    for data in incoming {
        rows.push(Row {
            owner: owner.clone(),
            data,
        });
    }
    (StatusCode::CREATED, Json(Value::Null))
}

async fn table_select(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Path(table): Path<String>,
) -> Reply {
    let mut db = db.write().await;
    let Some(role) = db.role(&headers) else {
        return unauthorized();
    };
    if !db.tables.contains_key(&table) {
        return fail(StatusCode::NOT_FOUND, "no such table");
    }

    match role {
        // RLS hides all row data from the admin: the request succeeds
        // with an empty set.
        Role::Admin => ok(json!([])),
        Role::Owner(id) => {
            let owner = format!("owner_{id}");
            let rows: Vec<Value> = db
                .rows
                .get(&table)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter(|row| row.owner == owner)
                .map(|row| with_owner(row))
                .collect();
            ok(Value::Array(rows))
        }
        Role::User(id) => {
            let reader = format!("user_{id}");
            let groups = db.granting_groups(&table, &reader, "select");
            if groups.is_empty() {
                return fail(StatusCode::FORBIDDEN, "permission denied");
            }
            let visible_owners: BTreeSet<String> = groups
                .iter()
                .flat_map(|group| group.members.iter().cloned())
                .filter(|name| name.starts_with("owner_"))
                .collect();
            let mut rows = Vec::new();
            let mut accesses = Vec::new();
            let stored = db.rows.get(&table).map(Vec::as_slice).unwrap_or_default();
            for (row_id, row) in stored.iter().enumerate() {
                if visible_owners.contains(&row.owner) {
                    rows.push(with_owner(row));
                    accesses.push(json!({
                        "request_time": now_secs(),
                        "row_id": row_id,
                        "data_user": reader,
                        "data_owner": row.owner,
                    }));
                }
            }
            db.logs.data_access.extend(accesses);
            ok(Value::Array(rows))
        }
    }
}

async fn table_update(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Path(table): Path<String>,
    Json(patch): Json<Value>,
) -> Reply {
    let mut db = db.write().await;
    let Some(Role::Owner(id)) = db.role(&headers) else {
        return fail(StatusCode::FORBIDDEN, "owner token required");
    };
    if !db.tables.contains_key(&table) {
        return fail(StatusCode::NOT_FOUND, "no such table");
    }
    let Some(patch) = patch.as_object().cloned() else {
        return fail(StatusCode::BAD_REQUEST, "object body required");
    };
    let owner = format!("owner_{id}");
    let mut updates = Vec::new();
    let Some(rows) = db.rows.get_mut(&table) else {
        return fail(StatusCode::NOT_FOUND, "no such table");
    };
    for (row_id, row) in rows.iter_mut().enumerate() {
        if row.owner != owner {
            continue;
        }
        for (column, new_value) in &patch {
            let old_value = row.data.get(column).cloned().unwrap_or(Value::Null);
            updates.push(json!({
                "updated_time": now_secs(),
                "updated_by": owner,
                "table_name": table,
                "row_id": row_id,
                "column_name": column,
                "old_data": old_value,
                "new_data": new_value,
            }));
            if let Some(object) = row.data.as_object_mut() {
                object.insert(column.clone(), new_value.clone());
            }
        }
    }
    db.logs.data_updates.extend(updates);
    ok(Value::Null)
}

fn with_owner(row: &Row) -> Value {
    let mut data = row.data.clone();
    if let Some(object) = data.as_object_mut() {
        object.insert("row_owner".to_string(), json!(row.owner));
    }
    data
}

// ----------------------------------------------------------------------
// Read-only views
// ----------------------------------------------------------------------

async fn view_table_overview(State(db): State<SharedDb>, headers: HeaderMap) -> Reply {
    let db = db.read().await;
    if db.role(&headers) != Some(Role::Admin) {
        return unauthorized();
    }
    let overview: Vec<Value> = db
        .tables
        .iter()
        .map(|(name, table)| {
            let groups_with_access: Vec<&String> = db
                .grants
                .iter()
                .filter(|(t, _, _)| t == name)
                .map(|(_, group, _)| group)
                .collect();
            json!({
                "table_name": name,
                "table_description": table.description,
                "groups_with_access": groups_with_access,
            })
        })
        .collect();
    ok(Value::Array(overview))
}

async fn view_user_registrations(State(db): State<SharedDb>, headers: HeaderMap) -> Reply {
    let db = db.read().await;
    if db.role(&headers) != Some(Role::Admin) {
        return unauthorized();
    }
    let registrations: Vec<Value> = db
        .users
        .values()
        .map(|user| {
            json!({
                "registration_date": user.registration_date,
                "user_id": user.user_id,
                "user_name": user.user_name(),
                "user_type": user.user_type,
                "user_metadata": user.user_metadata,
            })
        })
        .collect();
    ok(Value::Array(registrations))
}

async fn view_groups(State(db): State<SharedDb>, headers: HeaderMap) -> Reply {
    let db = db.read().await;
    if db.role(&headers) != Some(Role::Admin) {
        return unauthorized();
    }
    let groups: Vec<Value> = db
        .groups
        .iter()
        .map(|(name, group)| json!({ "group_name": name, "group_metadata": group.metadata }))
        .collect();
    ok(Value::Array(groups))
}

async fn view_log_group_removals(State(db): State<SharedDb>, headers: HeaderMap) -> Reply {
    admin_view(&db, &headers, |db| db.logs.user_group_removals.clone()).await
}

async fn view_log_data_deletions(State(db): State<SharedDb>, headers: HeaderMap) -> Reply {
    admin_view(&db, &headers, |db| db.logs.user_data_deletions.clone()).await
}

async fn view_log_data_access(State(db): State<SharedDb>, headers: HeaderMap) -> Reply {
    admin_view(&db, &headers, |db| db.logs.data_access.clone()).await
}

async fn view_log_access_control(State(db): State<SharedDb>, headers: HeaderMap) -> Reply {
    admin_view(&db, &headers, |db| db.logs.access_control.clone()).await
}

async fn view_log_data_updates(State(db): State<SharedDb>, headers: HeaderMap) -> Reply {
    admin_view(&db, &headers, |db| db.logs.data_updates.clone()).await
}

async fn admin_view(db: &SharedDb, headers: &HeaderMap, entries: fn(&Db) -> Vec<Value>) -> Reply {
    let db = db.read().await;
    if db.role(headers) != Some(Role::Admin) {
        return unauthorized();
    }
    ok(Value::Array(entries(&db)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(db: &mut Db, id: &str, user_type: &str, metadata: Value) {
        let record = UserRecord {
            user_id: id.to_string(),
            user_type: user_type.to_string(),
            user_metadata: metadata,
            registration_date: 0,
        };
        db.users.insert(record.user_name(), record);
    }

    #[test]
    fn member_names_from_explicit_lists() {
        let db = Db::default();
        let data = json!({
            "group_name": "g1",
            "members": {"memberships": {"data_owners": ["1", "2"], "data_users": ["3"]}},
        });
        let names = db.member_names(&data, false).unwrap();
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["owner_1", "owner_2", "user_3"]
        );
    }

    #[test]
    fn member_names_from_metadata_filter() {
        let mut db = Db::default();
        register(&mut db, "1", "data_owner", json!({"country": "NO"}));
        register(&mut db, "2", "data_owner", json!({"country": "SE"}));
        let data = json!({"metadata": {"key": "country", "value": "NO"}});
        let names = db.member_names(&data, false).unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["owner_1"]);
    }

    #[test]
    fn member_names_bulk_flags_respect_user_type() {
        let mut db = Db::default();
        register(&mut db, "1", "data_owner", json!({}));
        register(&mut db, "2", "data_user", json!({}));

        let owners = db.member_names(&json!({"add_all_owners": true}), false).unwrap();
        assert_eq!(owners.into_iter().collect::<Vec<_>>(), vec!["owner_1"]);

        let all = db.member_names(&json!({"add_all": true}), false).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn member_names_rejects_ambiguous_selectors() {
        let db = Db::default();
        let data = json!({"add_all": true, "members": {}});
        assert!(db.member_names(&data, false).is_err());
        assert!(db.member_names(&json!({}), true).is_err());
    }

    #[test]
    fn role_lookup_requires_known_bearer_token() {
        let mut db = Db::default();
        db.tokens.insert("tok".to_string(), Role::Admin);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer tok".parse().unwrap());
        assert_eq!(db.role(&headers), Some(Role::Admin));

        headers.insert(header::AUTHORIZATION, "Bearer other".parse().unwrap());
        assert_eq!(db.role(&headers), None);
    }

    #[test]
    fn granting_groups_needs_membership_and_grant() {
        let mut db = Db::default();
        let mut group = Group::default();
        group.members.insert("user_3".to_string());
        db.groups.insert("g1".to_string(), group);

        assert!(db.granting_groups("t1", "user_3", "select").is_empty());

        db.grants
            .insert(("t1".to_string(), "g1".to_string(), "select".to_string()));
        assert_eq!(db.granting_groups("t1", "user_3", "select").len(), 1);
        assert!(db.granting_groups("t1", "user_9", "select").is_empty());
    }
}
