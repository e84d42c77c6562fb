//! Session- and account-indexed cache of effective privacy lists.
//!
//! Two keyspaces share one structure: full-JID strings map to the active
//! list a session selected, bare-JID strings map to the account default.
//! Default lookups cache negatively, so an account with no default list is
//! not re-fetched from the store on every stanza.
//!
//! List values are `Arc` snapshots; mutation replaces the binding, never the
//! list body, so readers holding a snapshot are unaffected.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use jid::FullJid;
use tracing::debug;

use crate::list::PrivacyList;

/// Cached default-list state for one account.
#[derive(Debug, Clone)]
enum DefaultEntry {
    /// The account has this default list.
    Present(Arc<PrivacyList>),
    /// The store was consulted and the account has no default.
    Absent,
}

/// Cache of active and default privacy lists, plus the set of sessions that
/// asked for the Blocking view of their rules.
#[derive(Debug, Default)]
pub struct ListCache {
    /// Full-JID string → session's active list.
    active: DashMap<String, Arc<PrivacyList>>,
    /// Bare-JID string → account default (with negative caching).
    default: DashMap<String, DefaultEntry>,
    /// Full-JID strings of sessions that queried the block list.
    blocklist_users: DashSet<String>,
}

impl ListCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the active list bound to a session.
    pub fn get_active(&self, full: &str) -> Option<Arc<PrivacyList>> {
        self.active.get(full).map(|entry| entry.value().clone())
    }

    /// Bind or clear a session's active list.
    pub fn set_active(&self, full: &str, list: Option<Arc<PrivacyList>>) {
        match list {
            Some(list) => {
                debug!(session = %full, list = %list.name, "Active list bound");
                self.active.insert(full.to_string(), list);
            }
            None => {
                if self.active.remove(full).is_some() {
                    debug!(session = %full, "Active list unbound");
                }
            }
        }
    }

    /// Get the cached default state for an account.
    ///
    /// Outer `None` means the store has not been consulted yet; `Some(None)`
    /// is a cached negative.
    pub fn get_default(&self, bare: &str) -> Option<Option<Arc<PrivacyList>>> {
        self.default.get(bare).map(|entry| match entry.value() {
            DefaultEntry::Present(list) => Some(list.clone()),
            DefaultEntry::Absent => None,
        })
    }

    /// Record the default state for an account (`None` caches a negative).
    pub fn set_default(&self, bare: &str, list: Option<Arc<PrivacyList>>) {
        let entry = match list {
            Some(list) => {
                debug!(account = %bare, list = %list.name, "Default list cached");
                DefaultEntry::Present(list)
            }
            None => DefaultEntry::Absent,
        };
        self.default.insert(bare.to_string(), entry);
    }

    /// Whether the cache holds a list with this name under the given key
    /// (either keyspace).
    pub fn is_cached_with_name(&self, key: &str, name: &str) -> bool {
        if let Some(entry) = self.active.get(key) {
            if entry.value().name == name {
                return true;
            }
        }
        matches!(
            self.default.get(key).map(|e| e.value().clone()),
            Some(DefaultEntry::Present(list)) if list.name == name
        )
    }

    /// Full-JID keys of active bindings for sessions of `bare` whose bound
    /// list carries `name`.
    pub fn active_sessions_using(&self, bare: &str, name: &str) -> Vec<String> {
        let prefix = format!("{}/", bare);
        self.active
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix) && entry.value().name == name)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Replace every binding that refers to a list by name with a new
    /// snapshot. Used after a list body is replaced through the admin
    /// surface, so sessions bound to the old snapshot observe the new one.
    pub fn swap_named(&self, bare: &str, name: &str, list: Arc<PrivacyList>) {
        for key in self.active_sessions_using(bare, name) {
            self.active.insert(key, list.clone());
        }
        if let Some(entry) = self.default.get(bare) {
            if matches!(entry.value(), DefaultEntry::Present(existing) if existing.name == name) {
                drop(entry);
                self.default
                    .insert(bare.to_string(), DefaultEntry::Present(list));
            }
        }
    }

    /// Mark a session as a block-list user (receives Blocking-shaped pushes).
    pub fn add_blocklist_user(&self, full: &str) {
        self.blocklist_users.insert(full.to_string());
    }

    /// Whether a session asked for the Blocking view.
    pub fn is_blocklist_user(&self, full: &str) -> bool {
        self.blocklist_users.contains(full)
    }

    /// Evict all session-scoped state for a departing connection.
    pub fn evict_session(&self, full: &FullJid) {
        let key = full.to_string();
        let had_active = self.active.remove(&key).is_some();
        let was_user = self.blocklist_users.remove(&key).is_some();
        if had_active || was_user {
            debug!(session = %full, "Evicted session privacy state");
        }
    }

    /// Number of active bindings (for monitoring).
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
