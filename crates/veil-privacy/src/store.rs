//! In-memory privacy list storage.
//!
//! Production deployments back the [`PrivacyHost`](crate::PrivacyHost) store
//! methods with their own persistence; this backend keeps everything in
//! process memory and exists for tests, examples, and single-node setups.
//!
//! Store semantics (shared by every backend):
//! - one row per `(owner, name)`; names are unique per owner
//! - storing a list with no items removes the row
//! - at most one list per owner carries the default flag
//! - transient lists are never handed to a store

use dashmap::DashMap;
use jid::BareJid;
use tracing::debug;

use crate::list::PrivacyList;

/// In-process privacy list store keyed by bare JID.
#[derive(Debug, Default)]
pub struct MemoryListStore {
    lists: DashMap<String, Vec<PrivacyList>>,
}

impl MemoryListStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All lists owned by an account.
    pub fn list_all(&self, owner: &BareJid) -> Vec<PrivacyList> {
        self.lists
            .get(&owner.to_string())
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Load one named list.
    pub fn load(&self, owner: &BareJid, name: &str) -> Option<PrivacyList> {
        self.lists
            .get(&owner.to_string())
            .and_then(|entry| entry.value().iter().find(|l| l.name == name).cloned())
    }

    /// Load the account's default list.
    pub fn load_default(&self, owner: &BareJid) -> Option<PrivacyList> {
        self.lists
            .get(&owner.to_string())
            .and_then(|entry| entry.value().iter().find(|l| l.default).cloned())
    }

    /// Store or remove a list.
    ///
    /// An empty `items` sequence removes the row. Setting the default flag
    /// clears it from every other list of the same owner. Returns whether a
    /// row remains for this name afterwards.
    pub fn store(&self, owner: &BareJid, list: &PrivacyList) -> bool {
        let mut entry = self.lists.entry(owner.to_string()).or_default();
        let rows = entry.value_mut();

        rows.retain(|l| l.name != list.name);

        if list.is_empty() {
            debug!(owner = %owner, list = %list.name, "Privacy list removed");
            return false;
        }

        if list.default {
            for row in rows.iter_mut() {
                row.default = false;
            }
        }

        debug!(owner = %owner, list = %list.name, items = list.items.len(), "Privacy list stored");
        rows.push(list.clone());
        true
    }
}
