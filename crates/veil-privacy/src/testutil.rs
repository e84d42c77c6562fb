//! Shared test host for unit tests.

use std::sync::Mutex;

use dashmap::{DashMap, DashSet};
use jid::{BareJid, FullJid};

use crate::error::PrivacyError;
use crate::list::PrivacyList;
use crate::roster::RosterItem;
use crate::store::MemoryListStore;
use crate::types::Stanza;
use crate::PrivacyHost;

/// A host stub backed by [`MemoryListStore`] that records every stanza the
/// engine emits.
pub(crate) struct TestHost {
    pub store: MemoryListStore,
    roster: DashMap<String, Vec<RosterItem>>,
    sessions: Mutex<Vec<FullJid>>,
    available: DashSet<String>,
    /// Stanzas delivered to a specific bound session.
    pub sent: Mutex<Vec<(FullJid, Stanza)>>,
    /// Stanzas handed to the routing pipeline.
    pub routed: Mutex<Vec<Stanza>>,
    fail_roster: bool,
    fail_store: bool,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            store: MemoryListStore::new(),
            roster: DashMap::new(),
            sessions: Mutex::new(Vec::new()),
            available: DashSet::new(),
            sent: Mutex::new(Vec::new()),
            routed: Mutex::new(Vec::new()),
            fail_roster: false,
            fail_store: false,
        }
    }

    pub fn failing_roster() -> Self {
        Self {
            fail_roster: true,
            ..Self::new()
        }
    }

    pub fn failing_store() -> Self {
        Self {
            fail_store: true,
            ..Self::new()
        }
    }

    /// Register a bound session, optionally past initial presence.
    pub fn add_session(&self, full: &str, available: bool) {
        let jid: FullJid = full.parse().unwrap();
        if available {
            self.available.insert(jid.to_string());
        }
        self.sessions.lock().unwrap().push(jid);
    }

    /// Add a roster entry for an owner.
    pub fn add_roster_item(&self, owner: &str, item: RosterItem) {
        self.roster.entry(owner.to_string()).or_default().push(item);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn routed_count(&self) -> usize {
        self.routed.lock().unwrap().len()
    }

    fn roster_of(&self, owner: &BareJid) -> Vec<RosterItem> {
        self.roster
            .get(&owner.to_string())
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

impl PrivacyHost for TestHost {
    async fn list_privacy_lists(&self, owner: &BareJid) -> Result<Vec<PrivacyList>, PrivacyError> {
        if self.fail_store {
            return Err(PrivacyError::store("test store failure"));
        }
        Ok(self.store.list_all(owner))
    }

    async fn load_privacy_list(
        &self,
        owner: &BareJid,
        name: &str,
    ) -> Result<Option<PrivacyList>, PrivacyError> {
        if self.fail_store {
            return Err(PrivacyError::store("test store failure"));
        }
        Ok(self.store.load(owner, name))
    }

    async fn load_default_privacy_list(
        &self,
        owner: &BareJid,
    ) -> Result<Option<PrivacyList>, PrivacyError> {
        if self.fail_store {
            return Err(PrivacyError::store("test store failure"));
        }
        Ok(self.store.load_default(owner))
    }

    async fn store_privacy_list(
        &self,
        owner: &BareJid,
        list: &PrivacyList,
    ) -> Result<bool, PrivacyError> {
        if self.fail_store {
            return Err(PrivacyError::store("test store failure"));
        }
        Ok(self.store.store(owner, list))
    }

    async fn roster_item(
        &self,
        owner: &BareJid,
        other: &BareJid,
    ) -> Result<Option<RosterItem>, PrivacyError> {
        if self.fail_roster {
            return Err(PrivacyError::roster("test roster failure"));
        }
        Ok(self
            .roster_of(owner)
            .into_iter()
            .find(|item| item.jid == *other))
    }

    async fn roster_to_items(&self, owner: &BareJid) -> Result<Vec<RosterItem>, PrivacyError> {
        if self.fail_roster {
            return Err(PrivacyError::roster("test roster failure"));
        }
        Ok(self
            .roster_of(owner)
            .into_iter()
            .filter(|item| item.subscription.has_to())
            .collect())
    }

    async fn roster_from_items(&self, owner: &BareJid) -> Result<Vec<RosterItem>, PrivacyError> {
        if self.fail_roster {
            return Err(PrivacyError::roster("test roster failure"));
        }
        Ok(self
            .roster_of(owner)
            .into_iter()
            .filter(|item| item.subscription.has_from())
            .collect())
    }

    fn sessions_of(&self, owner: &BareJid) -> Vec<FullJid> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|jid| jid.to_bare() == *owner)
            .cloned()
            .collect()
    }

    fn session_is_available(&self, session: &FullJid) -> bool {
        self.available.contains(&session.to_string())
    }

    async fn send_to_session(&self, to: &FullJid, stanza: Stanza) -> Result<(), PrivacyError> {
        self.sent.lock().unwrap().push((to.clone(), stanza));
        Ok(())
    }

    async fn route_stanza(&self, stanza: Stanza) -> Result<(), PrivacyError> {
        self.routed.lock().unwrap().push(stanza);
        Ok(())
    }
}
