//! Test utilities for privacy engine integration testing.
//!
//! Provides a mock host exposing an in-memory list store, a fixed roster,
//! a session registry, and capture of every stanza the engine emits.

use std::future::Future;
use std::sync::Mutex;

use jid::{BareJid, FullJid};
use veil_privacy::roster::RosterItem;
use veil_privacy::store::MemoryListStore;
use veil_privacy::{PrivacyError, PrivacyHost, PrivacyList, Stanza};

/// Mock host backed by [`MemoryListStore`].
pub struct MockHost {
    pub store: MemoryListStore,
    roster: Mutex<Vec<(String, RosterItem)>>,
    sessions: Mutex<Vec<(FullJid, bool)>>,
    /// Stanzas delivered to specific bound sessions.
    pub sent: Mutex<Vec<(FullJid, Stanza)>>,
    /// Stanzas handed to the routing pipeline.
    pub routed: Mutex<Vec<Stanza>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            store: MemoryListStore::new(),
            roster: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            routed: Mutex::new(Vec::new()),
        }
    }

    /// Register a bound session; `available` marks it past initial presence.
    pub fn add_session(&self, full: &str, available: bool) {
        self.sessions
            .lock()
            .unwrap()
            .push((full.parse().unwrap(), available));
    }

    /// Add a roster entry under an owner's bare JID.
    pub fn add_roster_item(&self, owner: &str, item: RosterItem) {
        self.roster.lock().unwrap().push((owner.to_string(), item));
    }

    /// Stanzas routed so far, cloned out for assertions.
    pub fn routed_stanzas(&self) -> Vec<Stanza> {
        self.routed.lock().unwrap().clone()
    }

    /// Stanzas sent to bound sessions so far, cloned out for assertions.
    pub fn sent_stanzas(&self) -> Vec<(FullJid, Stanza)> {
        self.sent.lock().unwrap().clone()
    }

    fn roster_of(&self, owner: &BareJid) -> Vec<RosterItem> {
        let owner = owner.to_string();
        self.roster
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| *key == owner)
            .map(|(_, item)| item.clone())
            .collect()
    }
}

impl PrivacyHost for MockHost {
    fn list_privacy_lists(
        &self,
        owner: &BareJid,
    ) -> impl Future<Output = Result<Vec<PrivacyList>, PrivacyError>> + Send {
        let lists = self.store.list_all(owner);
        async move { Ok(lists) }
    }

    fn load_privacy_list(
        &self,
        owner: &BareJid,
        name: &str,
    ) -> impl Future<Output = Result<Option<PrivacyList>, PrivacyError>> + Send {
        let list = self.store.load(owner, name);
        async move { Ok(list) }
    }

    fn load_default_privacy_list(
        &self,
        owner: &BareJid,
    ) -> impl Future<Output = Result<Option<PrivacyList>, PrivacyError>> + Send {
        let list = self.store.load_default(owner);
        async move { Ok(list) }
    }

    fn store_privacy_list(
        &self,
        owner: &BareJid,
        list: &PrivacyList,
    ) -> impl Future<Output = Result<bool, PrivacyError>> + Send {
        let remains = self.store.store(owner, list);
        async move { Ok(remains) }
    }

    fn roster_item(
        &self,
        owner: &BareJid,
        other: &BareJid,
    ) -> impl Future<Output = Result<Option<RosterItem>, PrivacyError>> + Send {
        let item = self
            .roster_of(owner)
            .into_iter()
            .find(|item| item.jid == *other);
        async move { Ok(item) }
    }

    fn roster_to_items(
        &self,
        owner: &BareJid,
    ) -> impl Future<Output = Result<Vec<RosterItem>, PrivacyError>> + Send {
        let items: Vec<_> = self
            .roster_of(owner)
            .into_iter()
            .filter(|item| item.subscription.has_to())
            .collect();
        async move { Ok(items) }
    }

    fn roster_from_items(
        &self,
        owner: &BareJid,
    ) -> impl Future<Output = Result<Vec<RosterItem>, PrivacyError>> + Send {
        let items: Vec<_> = self
            .roster_of(owner)
            .into_iter()
            .filter(|item| item.subscription.has_from())
            .collect();
        async move { Ok(items) }
    }

    fn sessions_of(&self, owner: &BareJid) -> Vec<FullJid> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(jid, _)| jid.to_bare() == *owner)
            .map(|(jid, _)| jid.clone())
            .collect()
    }

    fn session_is_available(&self, session: &FullJid) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .any(|(jid, available)| jid == session && *available)
    }

    fn send_to_session(
        &self,
        to: &FullJid,
        stanza: Stanza,
    ) -> impl Future<Output = Result<(), PrivacyError>> + Send {
        self.sent.lock().unwrap().push((to.clone(), stanza));
        async { Ok(()) }
    }

    fn route_stanza(&self, stanza: Stanza) -> impl Future<Output = Result<(), PrivacyError>> + Send {
        self.routed.lock().unwrap().push(stanza);
        async { Ok(()) }
    }
}
