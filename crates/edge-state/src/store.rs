//! ProfileStore: redb-backed persistence for server and client profiles.
//!
//! Values are the JSON form of [`Profile`], written into the table that
//! matches the profile kind. Both on-disk and in-memory backends are
//! supported (the latter for tests).

use std::path::Path;
use std::sync::Arc;

use edge_core::{Profile, ProfileId, ProfileKind};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::{self, CLIENT_PROFILES, SERVER_PROFILES};

fn storage<E: std::fmt::Display>(op: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Storage {
        op,
        reason: e.to_string(),
    }
}

fn open_failed<E: std::fmt::Display>(location: &Path) -> impl FnOnce(E) -> StoreError + '_ {
    move |e| StoreError::Open {
        location: location.display().to_string(),
        reason: e.to_string(),
    }
}

fn decode(id: &ProfileId, bytes: &[u8]) -> StoreResult<Profile> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        profile: id.clone(),
        reason: e.to_string(),
    })
}

#[derive(Clone)]
pub struct ProfileStore {
    db: Arc<Database>,
}

impl ProfileStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(open_failed(path))?;
        }
        let db = Database::create(path).map_err(open_failed(path))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "profile store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(open_failed(Path::new(":memory:")))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory profile store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(storage("begin write"))?;
        txn.open_table(SERVER_PROFILES).map_err(storage("open table"))?;
        txn.open_table(CLIENT_PROFILES).map_err(storage("open table"))?;
        txn.commit().map_err(storage("commit"))?;
        Ok(())
    }

    /// Load one profile, failing with `NotFound` if it was never saved.
    pub fn load(&self, id: &ProfileId) -> StoreResult<Profile> {
        self.get(id)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Like [`load`](Self::load) but absence is not an error.
    pub fn get(&self, id: &ProfileId) -> StoreResult<Option<Profile>> {
        let txn = self.db.begin_read().map_err(storage("begin read"))?;
        let table = txn
            .open_table(tables::for_kind(id.kind()))
            .map_err(storage("open table"))?;
        match table.get(id.name()).map_err(storage("read"))? {
            Some(guard) => decode(id, guard.value()).map(Some),
            None => Ok(None),
        }
    }

    /// Insert or replace a profile.
    pub fn save(&self, profile: &Profile) -> StoreResult<()> {
        let id = profile.id();
        if let Profile::Server(server) = profile {
            server.validate().map_err(|source| StoreError::Invalid {
                profile: id.clone(),
                source,
            })?;
        }
        let value = serde_json::to_vec(profile).map_err(|e| StoreError::Encode {
            profile: id.clone(),
            reason: e.to_string(),
        })?;
        let txn = self.db.begin_write().map_err(storage("begin write"))?;
        {
            let mut table = txn
                .open_table(tables::for_kind(profile.kind()))
                .map_err(storage("open table"))?;
            table
                .insert(profile.name(), value.as_slice())
                .map_err(storage("write"))?;
        }
        txn.commit().map_err(storage("commit"))?;
        debug!(profile = %id, "profile stored");
        Ok(())
    }

    /// All profiles of one kind, ordered by name.
    pub fn list(&self, kind: ProfileKind) -> StoreResult<Vec<Profile>> {
        let txn = self.db.begin_read().map_err(storage("begin read"))?;
        let table = txn
            .open_table(tables::for_kind(kind))
            .map_err(storage("open table"))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(storage("read"))? {
            let (name, value) = entry.map_err(storage("read"))?;
            let id = ProfileId::new(kind, name.value());
            results.push(decode(&id, value.value())?);
        }
        Ok(results)
    }

    /// Every stored profile, servers first.
    pub fn list_all(&self) -> StoreResult<Vec<Profile>> {
        let mut all = self.list(ProfileKind::Server)?;
        all.extend(self.list(ProfileKind::Client)?);
        Ok(all)
    }

    /// Delete a profile. Returns true if it existed.
    pub fn delete(&self, id: &ProfileId) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(storage("begin write"))?;
        let existed;
        {
            let mut table = txn
                .open_table(tables::for_kind(id.kind()))
                .map_err(storage("open table"))?;
            existed = table.remove(id.name()).map_err(storage("delete"))?.is_some();
        }
        txn.commit().map_err(storage("commit"))?;
        debug!(profile = %id, existed, "profile deleted");
        Ok(existed)
    }
}
