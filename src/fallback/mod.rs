// src/fallback/mod.rs
//! Offline fallback data store.
//!
//! Holds a small durable dataset (reference users and client entities with a
//! pending-sync flag) that the application reads and writes while its backend
//! services are unavailable. The whole dataset is one JSON document under a
//! fixed storage key and is rewritten after every mutation.
//!
//! Offline authentication checks a locally cached credential set. It is a
//! convenience for degraded mode, not a trust boundary: the credentials are
//! stored without protection and must not guard sensitive operations.

pub mod models;

#[cfg(test)]
mod tests;

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::FallbackConfig;
use crate::error::{AuthFailureReason, GuardError, Result, StorageError};
use crate::storage::StorageBackend;

pub use models::{
    default_capabilities, ClientsReport, EntityRecord, FallbackDataset, ImportSummary,
    OfflineCapability, OfflineReport, PendingSync, ReportKind, SummaryReport, SyncStatus,
    UserRecord, UsersReport,
};

pub struct FallbackStore {
    storage: Arc<dyn StorageBackend>,
    dataset: Mutex<FallbackDataset>,
    capabilities: Vec<OfflineCapability>,
    config: FallbackConfig,
}

impl fmt::Debug for FallbackStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackStore")
            .field("storage", &self.storage)
            .field("storage_key", &self.config.storage_key)
            .finish_non_exhaustive()
    }
}

fn persistence_error(err: GuardError) -> GuardError {
    match err {
        GuardError::Storage(storage) => GuardError::PersistenceFailure(storage),
        GuardError::PersistenceFailure(storage) => GuardError::PersistenceFailure(storage),
        other => GuardError::PersistenceFailure(StorageError::Io(other.to_string())),
    }
}

impl FallbackStore {
    /// Load the dataset, repairing or seeding it as needed, and persist the result.
    ///
    /// A failed initial write is logged rather than returned: the store stays
    /// usable in memory and later mutations report their own write failures.
    pub async fn load(storage: Arc<dyn StorageBackend>, config: FallbackConfig) -> Result<Self> {
        let key = config.storage_key.as_str();

        let (mut dataset, repaired) = match storage.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => FallbackDataset::from_value_lenient(value),
                Err(e) => {
                    warn!(key, error = %e, "Fallback dataset is not valid JSON, reseeding");
                    (FallbackDataset::empty(), true)
                }
            },
            Ok(None) => {
                info!(key, "No fallback dataset found, seeding defaults");
                (FallbackDataset::empty(), true)
            }
            Err(e) => {
                warn!(key, error = %e, "Could not read fallback dataset, seeding defaults");
                (FallbackDataset::empty(), true)
            }
        };
        let seeded = dataset.fill_missing_with_seed();

        let store = Self {
            storage,
            dataset: Mutex::new(dataset),
            capabilities: default_capabilities(),
            config,
        };

        if repaired || seeded {
            let dataset = store.dataset.lock().await;
            if let Err(e) = store.persist(&dataset).await {
                error!(error = %e, "Could not persist initial fallback dataset");
            }
        }

        Ok(store)
    }

    async fn persist(&self, dataset: &FallbackDataset) -> Result<()> {
        let bytes = serde_json::to_vec(dataset).map_err(|e| {
            GuardError::PersistenceFailure(StorageError::Serialization(e.to_string()))
        })?;
        self.storage
            .set(&self.config.storage_key, &bytes)
            .await
            .map_err(persistence_error)?;
        debug!(bytes = bytes.len(), "Fallback dataset persisted");
        Ok(())
    }

    /// Apply `change` to a copy of the dataset, persist it, and only then commit.
    /// A failed write leaves the in-memory dataset untouched.
    async fn mutate<R>(
        &self,
        change: impl FnOnce(&mut FallbackDataset) -> Result<R>,
    ) -> Result<R> {
        let mut current = self.dataset.lock().await;
        let mut draft = current.clone();
        let output = change(&mut draft)?;
        self.persist(&draft).await?;
        *current = draft;
        Ok(output)
    }

    /// Check an identifier/secret pair against the local credential cache.
    /// Not a security boundary, see the module documentation.
    pub async fn authenticate_offline(&self, identifier: &str, secret: &str) -> Result<UserRecord> {
        let dataset = self.dataset.lock().await;
        let Some(user) = dataset.users.iter().find(|u| u.email == identifier) else {
            debug!(identifier, "Offline login for unknown user");
            return Err(GuardError::AuthFailure(AuthFailureReason::NotFound));
        };

        match self.config.offline_credentials.get(identifier) {
            Some(expected) if expected == secret => {
                info!(identifier, "Offline login accepted");
                Ok(user.clone())
            }
            _ => {
                debug!(identifier, "Offline login with wrong secret");
                Err(GuardError::AuthFailure(AuthFailureReason::InvalidSecret))
            }
        }
    }

    pub async fn list_entities_offline(&self) -> Vec<EntityRecord> {
        self.dataset.lock().await.clients.clone()
    }

    pub async fn get_entity_offline(&self, id: &str) -> Option<EntityRecord> {
        self.dataset
            .lock()
            .await
            .clients
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// Create a client locally, pending synchronization
    pub async fn add_entity_offline(&self, fields: Map<String, Value>) -> Result<EntityRecord> {
        let fields = models::strip_reserved(fields);
        let entity = self
            .mutate(|dataset| {
                let entity = EntityRecord {
                    id: models::next_entity_id(&dataset.clients)?,
                    sync_status: SyncStatus::PendingSync,
                    created_at: Utc::now(),
                    updated_at: None,
                    synced_at: None,
                    fields,
                };
                dataset.clients.push(entity.clone());
                Ok(entity)
            })
            .await?;

        info!(id = %entity.id, "Client stored offline");
        Ok(entity)
    }

    /// Merge `patch` into an existing client and mark it pending again
    pub async fn update_entity_offline(
        &self,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<EntityRecord> {
        let patch = models::strip_reserved(patch);
        let entity = self
            .mutate(|dataset| {
                let entity = dataset
                    .clients
                    .iter_mut()
                    .find(|e| e.id == id)
                    .ok_or_else(|| GuardError::NotFound(format!("client {}", id)))?;

                entity.fields.extend(patch);
                entity.updated_at = Some(Utc::now());
                entity.sync_status = SyncStatus::PendingSync;
                Ok(entity.clone())
            })
            .await?;

        info!(id, "Client updated offline");
        Ok(entity)
    }

    pub async fn get_pending_sync_data(&self) -> PendingSync {
        let dataset = self.dataset.lock().await;
        PendingSync {
            entities: dataset
                .clients
                .iter()
                .filter(|e| e.is_pending())
                .cloned()
                .collect(),
            last_sync: dataset.last_sync,
        }
    }

    /// Mark the listed clients synced and stamp `last_sync`. Returns how many
    /// records matched. Local state wins; no remote conflict check is made.
    pub async fn mark_as_synced<S: AsRef<str>>(&self, ids: &[S]) -> Result<usize> {
        let ids: HashSet<&str> = ids.iter().map(AsRef::as_ref).collect();
        let marked = self
            .mutate(|dataset| {
                let now = Utc::now();
                let mut marked = 0;
                for entity in dataset.clients.iter_mut().filter(|e| ids.contains(e.id.as_str())) {
                    entity.sync_status = SyncStatus::Synced;
                    entity.synced_at = Some(now);
                    marked += 1;
                }
                dataset.last_sync = now;
                Ok(marked)
            })
            .await?;

        info!(requested = ids.len(), marked, "Clients marked as synced");
        Ok(marked)
    }

    pub async fn generate_offline_report(&self, kind: ReportKind) -> OfflineReport {
        let dataset = self.dataset.lock().await;
        let pending = dataset.clients.iter().filter(|e| e.is_pending()).count();

        match kind {
            ReportKind::Clients => {
                let mut by_status = BTreeMap::new();
                for client in &dataset.clients {
                    *by_status.entry(client.status().to_string()).or_insert(0) += 1;
                }
                OfflineReport::Clients(ClientsReport {
                    total: dataset.clients.len(),
                    synced: dataset.clients.len() - pending,
                    pending_sync: pending,
                    by_status,
                    data: dataset.clients.clone(),
                })
            }
            ReportKind::Users => {
                let mut by_role = BTreeMap::new();
                for user in &dataset.users {
                    *by_role.entry(user.role.clone()).or_insert(0) += 1;
                }
                OfflineReport::Users(UsersReport {
                    total: dataset.users.len(),
                    by_role,
                    data: dataset.users.clone(),
                })
            }
            ReportKind::Summary => OfflineReport::Summary(SummaryReport {
                total_clients: dataset.clients.len(),
                pending_sync: pending,
                total_users: dataset.users.len(),
                last_sync: dataset.last_sync,
                offline_capabilities: self.capabilities.clone(),
            }),
        }
    }

    /// Human-readable warnings about unsynchronized or stale local data
    pub async fn get_offline_notifications(&self) -> Vec<String> {
        let dataset = self.dataset.lock().await;
        let mut notifications = Vec::new();

        let pending = dataset.clients.iter().filter(|e| e.is_pending()).count();
        if pending > 0 && pending >= self.config.pending_notice_threshold {
            notifications.push(format!("{} client(s) awaiting synchronization", pending));
        }

        let since_sync = Utc::now().signed_duration_since(dataset.last_sync);
        let stale = since_sync
            .to_std()
            .map(|elapsed| elapsed > self.config.stale_after)
            .unwrap_or(false);
        if stale {
            notifications.push(format!(
                "Data not synchronized for more than {} hours",
                self.config.stale_after.as_secs() / 3600
            ));
        }

        notifications
    }

    pub fn get_offline_capabilities(&self) -> &[OfflineCapability] {
        &self.capabilities
    }

    pub fn is_capability_available(&self, name: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.name == name && c.available)
    }

    /// Discard local changes and return to the built-in seed
    pub async fn clear_offline_data(&self) -> Result<()> {
        self.mutate(|dataset| {
            *dataset = FallbackDataset::seed();
            Ok(())
        })
        .await?;
        warn!("Offline data cleared");
        Ok(())
    }

    /// Size in bytes of the serialized dataset
    pub async fn offline_data_size(&self) -> usize {
        let dataset = self.dataset.lock().await;
        serde_json::to_vec(&*dataset).map(|b| b.len()).unwrap_or(0)
    }

    /// Pretty JSON snapshot of the dataset with totals, for manual backup
    pub async fn export_data(&self) -> Result<String> {
        let dataset = self.dataset.lock().await;
        let pending = dataset.clients.iter().filter(|e| e.is_pending()).count();
        let export = json!({
            "exportedAt": Utc::now(),
            "version": "1.0",
            "users": dataset.users,
            "clients": dataset.clients,
            "lastSync": dataset.last_sync,
            "totalClients": dataset.clients.len(),
            "totalPending": pending,
        });
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Append clients from an export as new pending records. Entries that are
    /// not JSON objects are skipped. Ids are reassigned.
    pub async fn import_entities(&self, raw: &str) -> Result<ImportSummary> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| GuardError::Config(format!("invalid import document: {}", e)))?;
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut root) => match root.remove("clients").or_else(|| root.remove("entities")) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => {
                return Err(GuardError::Config(
                    "import document must be an object or an array".to_string(),
                ))
            }
        };

        let summary = self
            .mutate(|dataset| {
                let mut summary = ImportSummary::default();
                let now = Utc::now();
                for item in items {
                    let Value::Object(fields) = item else {
                        summary.skipped += 1;
                        continue;
                    };
                    let entity = EntityRecord {
                        id: models::next_entity_id(&dataset.clients)?,
                        sync_status: SyncStatus::PendingSync,
                        created_at: now,
                        updated_at: None,
                        synced_at: None,
                        fields: models::strip_reserved(fields),
                    };
                    dataset.clients.push(entity);
                    summary.imported += 1;
                }
                Ok(summary)
            })
            .await?;

        info!(imported = summary.imported, skipped = summary.skipped, "Clients imported");
        Ok(summary)
    }
}
