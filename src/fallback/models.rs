// src/fallback/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{GuardError, Result};

/// Keys managed by the store itself; never taken from caller-supplied fields
pub const RESERVED_FIELDS: [&str; 5] = ["id", "syncStatus", "createdAt", "updatedAt", "syncedAt"];

pub const ENTITY_ID_PREFIX: &str = "CLI";

/// Report bucket for clients without a textual `status`
pub const UNSPECIFIED_STATUS: &str = "unspecified";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Synced,
    PendingSync,
}

/// Locally cached user, used for offline login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

/// Locally held client entity. Domain fields are free-form and kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: String,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::PendingSync
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn status(&self) -> &str {
        self.field("status")
            .and_then(Value::as_str)
            .unwrap_or(UNSPECIFIED_STATUS)
    }
}

/// Drop store-managed keys from caller input
pub fn strip_reserved(mut fields: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_FIELDS {
        fields.remove(key);
    }
    fields
}

/// Next sequential id: one past the highest numeric `CLI####` id in use
pub fn next_entity_id(entities: &[EntityRecord]) -> Result<String> {
    let highest = entities
        .iter()
        .filter_map(|e| e.id.strip_prefix(ENTITY_ID_PREFIX))
        .filter_map(|digits| digits.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    let next = highest.checked_add(1).ok_or_else(|| {
        GuardError::Internal(format!(
            "client id space exhausted after {}{}",
            ENTITY_ID_PREFIX, highest
        ))
    })?;
    Ok(format!("{}{:04}", ENTITY_ID_PREFIX, next))
}

/// The durable root document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackDataset {
    pub users: Vec<UserRecord>,
    pub clients: Vec<EntityRecord>,
    pub last_sync: DateTime<Utc>,
}

impl FallbackDataset {
    pub fn empty() -> Self {
        Self {
            users: Vec::new(),
            clients: Vec::new(),
            last_sync: Utc::now(),
        }
    }

    /// Built-in reference data
    pub fn seed() -> Self {
        let mut dataset = Self::empty();
        dataset.fill_missing_with_seed();
        dataset
    }

    /// Seed each collection that is empty. Returns true if anything was added.
    pub fn fill_missing_with_seed(&mut self) -> bool {
        let now = Utc::now();
        let mut changed = false;

        if self.users.is_empty() {
            self.users = vec![
                UserRecord {
                    id: "1".to_string(),
                    email: "admin@cartorio.com".to_string(),
                    name: "Administrador".to_string(),
                    role: "admin".to_string(),
                    last_login: Some(now),
                },
                UserRecord {
                    id: "2".to_string(),
                    email: "funcionario@cartorio.com".to_string(),
                    name: "Funcionário".to_string(),
                    role: "funcionario".to_string(),
                    last_login: Some(now),
                },
            ];
            changed = true;
        }

        if self.clients.is_empty() {
            let mut fields = Map::new();
            fields.insert("nome".to_string(), Value::from("Cliente Exemplo"));
            fields.insert("cpf".to_string(), Value::from("000.000.000-00"));
            fields.insert("email".to_string(), Value::from("cliente@exemplo.com"));
            fields.insert("telefone".to_string(), Value::from("(00) 0000-0000"));
            fields.insert("status".to_string(), Value::from("ativo"));
            self.clients = vec![EntityRecord {
                id: format!("{}0001", ENTITY_ID_PREFIX),
                sync_status: SyncStatus::Synced,
                created_at: now,
                updated_at: None,
                synced_at: None,
                fields,
            }];
            changed = true;
        }

        changed
    }

    /// Validate a persisted document field by field.
    ///
    /// Missing or malformed top-level fields take their defaults and malformed
    /// records are dropped, so one bad entry never discards the whole dataset.
    /// The flag reports whether anything had to be repaired.
    pub fn from_value_lenient(value: Value) -> (Self, bool) {
        let Value::Object(mut root) = value else {
            warn!("Fallback dataset is not a JSON object, starting from defaults");
            return (Self::empty(), true);
        };

        let mut repaired = false;

        let users = records::<UserRecord>(root.remove("users"), "users", &mut repaired);
        let clients_raw = root.remove("clients").or_else(|| root.remove("entities"));
        let clients = records::<EntityRecord>(clients_raw, "clients", &mut repaired);

        let last_sync = match root.remove("lastSync").map(serde_json::from_value) {
            Some(Ok(at)) => at,
            Some(Err(e)) => {
                warn!(error = %e, "Invalid lastSync in fallback dataset, using now");
                repaired = true;
                Utc::now()
            }
            None => {
                repaired = true;
                Utc::now()
            }
        };

        (
            Self {
                users,
                clients,
                last_sync,
            },
            repaired,
        )
    }
}

fn records<T: serde::de::DeserializeOwned>(
    raw: Option<Value>,
    collection: &str,
    repaired: &mut bool,
) -> Vec<T> {
    match raw {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<T>(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(collection, error = %e, "Dropping malformed fallback record");
                    *repaired = true;
                    None
                }
            })
            .collect(),
        Some(Value::Null) | None => {
            *repaired = true;
            Vec::new()
        }
        Some(_) => {
            warn!(collection, "Fallback collection is not an array, resetting it");
            *repaired = true;
            Vec::new()
        }
    }
}

/// Something the UI can still offer while backends are unavailable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfflineCapability {
    pub name: String,
    pub available: bool,
    pub description: String,
}

pub fn default_capabilities() -> Vec<OfflineCapability> {
    [
        ("Data viewing", "View data that was loaded earlier"),
        ("Navigation", "Move between the application's pages"),
        ("Settings", "Open and change local settings"),
        ("Local registration", "Register records locally for later synchronization"),
        ("Basic reports", "Build reports from the local dataset"),
    ]
    .into_iter()
    .map(|(name, description)| OfflineCapability {
        name: name.to_string(),
        available: true,
        description: description.to_string(),
    })
    .collect()
}

/// Records waiting to be reconciled with the remote system
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSync {
    pub entities: Vec<EntityRecord>,
    pub last_sync: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Clients,
    Users,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientsReport {
    pub total: usize,
    pub synced: usize,
    pub pending_sync: usize,
    /// Counts by the domain `status` field
    pub by_status: std::collections::BTreeMap<String, usize>,
    pub data: Vec<EntityRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersReport {
    pub total: usize,
    pub by_role: std::collections::BTreeMap<String, usize>,
    pub data: Vec<UserRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReport {
    pub total_clients: usize,
    pub pending_sync: usize,
    pub total_users: usize,
    pub last_sync: DateTime<Utc>,
    pub offline_capabilities: Vec<OfflineCapability>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OfflineReport {
    Clients(ClientsReport),
    Users(UsersReport),
    Summary(SummaryReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}
