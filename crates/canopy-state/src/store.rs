//! StateStore: redb-backed persistence for Canopy.
//!
//! Provides typed operations over object blobs, parameters, deployment
//! records, compute versions and alias bindings. Blobs are stored raw;
//! other values are JSON-serialized into redb's `&[u8]` value columns.
//! The store supports both on-disk and in-memory backends (the latter
//! for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use canopy_core::{ComputeVersion, epoch_secs};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Key-value blob storage with overwrite-by-key semantics.
///
/// Writes are idempotent: putting the same bytes under the same key twice
/// leaves the store unchanged. No multi-key atomicity is offered.
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> StateResult<()>;
    fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>>;
}

/// Named configuration values with a per-name version counter.
pub trait ParameterStore: Send + Sync {
    fn put_parameter(&self, name: &str, value: &str) -> StateResult<Parameter>;
    fn get_parameter(&self, name: &str) -> StateResult<Option<Parameter>>;
}

/// Durable record of a compute function's published versions and alias
/// bindings, written as they happen so a restart sees every id handed out.
pub trait ComputeJournal: Send + Sync {
    fn record_version(&self, function: &str, version: &ComputeVersion) -> StateResult<()>;
    fn record_alias(&self, record: &AliasRecord) -> StateResult<()>;
}

/// Thread-safe store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        txn.open_table(PARAMETERS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        txn.open_table(ALIASES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or overwrite one JSON value.
    fn put_json<T: serde::Serialize>(
        &self,
        table_def: KvTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        table_def: KvTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All JSON values whose key starts with `prefix`, in key order.
    fn list_json<T: serde::de::DeserializeOwned>(
        &self,
        table_def: KvTable,
        prefix: &str,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    // ── Objects ────────────────────────────────────────────────────

    /// Store a blob, overwriting any previous value under the key.
    pub fn put_object(&self, key: &str, bytes: &[u8]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            table.insert(key, bytes).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, size = bytes.len(), "object stored");
        Ok(())
    }

    /// Fetch a blob by key.
    pub fn get_object(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        Ok(table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec()))
    }

    /// List object keys under a prefix, in key order.
    pub fn list_object_keys(&self, prefix: &str) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                keys.push(key.value().to_string());
            }
        }
        Ok(keys)
    }

    /// Delete every object under a prefix. Returns number deleted.
    pub fn delete_objects_with_prefix(&self, prefix: &str) -> StateResult<u32> {
        // Collect keys in a read transaction first.
        let keys = self.list_object_keys(prefix)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%prefix, count, "objects deleted");
        Ok(count)
    }

    // ── Parameters ─────────────────────────────────────────────────

    /// Write a parameter, bumping its version if it already exists.
    pub fn put_parameter(&self, name: &str, value: &str) -> StateResult<Parameter> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let param;
        {
            let mut table = txn.open_table(PARAMETERS).map_err(map_err!(Table))?;
            let previous_version = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    let existing: Parameter =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                    existing.version
                }
                None => 0,
            };
            param = Parameter {
                name: name.to_string(),
                value: value.to_string(),
                version: previous_version + 1,
                updated_at: epoch_secs(),
            };
            let bytes = serde_json::to_vec(&param).map_err(map_err!(Encode))?;
            table
                .insert(name, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, version = param.version, "parameter stored");
        Ok(param)
    }

    pub fn get_parameter(&self, name: &str) -> StateResult<Option<Parameter>> {
        self.get_json(PARAMETERS, name)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment record.
    pub fn put_deployment_record(&self, record: &DeploymentRecord) -> StateResult<()> {
        self.put_json(DEPLOYMENTS, &record.id, record)?;
        debug!(id = %record.id, state = %record.state, "deployment record stored");
        Ok(())
    }

    pub fn get_deployment_record(&self, id: &str) -> StateResult<Option<DeploymentRecord>> {
        self.get_json(DEPLOYMENTS, id)
    }

    /// List all deployment records, oldest first.
    pub fn list_deployment_records(&self) -> StateResult<Vec<DeploymentRecord>> {
        let mut records: Vec<DeploymentRecord> = self.list_json(DEPLOYMENTS, "")?;
        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }

    // ── Compute ────────────────────────────────────────────────────

    /// Record a published compute version.
    pub fn put_version(&self, function: &str, version: &ComputeVersion) -> StateResult<()> {
        self.put_json(VERSIONS, &version_key(function, version.version_id), version)
    }

    /// All published versions of a function, ordered by version id.
    pub fn list_versions(&self, function: &str) -> StateResult<Vec<ComputeVersion>> {
        self.list_json(VERSIONS, &format!("{function}:"))
    }

    pub fn put_alias(&self, record: &AliasRecord) -> StateResult<()> {
        self.put_json(ALIASES, &record.table_key(), record)
    }

    pub fn get_alias(&self, function: &str, alias: &str) -> StateResult<Option<AliasRecord>> {
        self.get_json(ALIASES, &alias_key(function, alias))
    }
}

impl BlobStore for StateStore {
    fn put(&self, key: &str, bytes: &[u8]) -> StateResult<()> {
        self.put_object(key, bytes)
    }

    fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        self.get_object(key)
    }
}

impl ParameterStore for StateStore {
    fn put_parameter(&self, name: &str, value: &str) -> StateResult<Parameter> {
        StateStore::put_parameter(self, name, value)
    }

    fn get_parameter(&self, name: &str) -> StateResult<Option<Parameter>> {
        StateStore::get_parameter(self, name)
    }
}

impl ComputeJournal for StateStore {
    fn record_version(&self, function: &str, version: &ComputeVersion) -> StateResult<()> {
        self.put_version(function, version)
    }

    fn record_alias(&self, record: &AliasRecord) -> StateResult<()> {
        self.put_alias(record)
    }
}
