//! Hook points wiring the privacy engine into the host stanza pipeline.
//!
//! The host registers the engine at four places:
//!
//! 1. **Client ingress** ([`PrivacyEngine::handle_client_stanza`]): admin
//!    IQs with no `to` are consumed here; addressed stanzas are checked
//!    against the local recipient's list.
//! 2. **Pre-write egress** ([`PrivacyEngine::filter_outbound`]): stanzas
//!    leaving a client connection are checked against the sender's list.
//! 3. **Delivery** ([`PrivacyEngine::filter_delivery`]): both endpoints are
//!    checked, recipient first. The host MUST run this before any other
//!    delivery handler; privacy takes protocol precedence.
//! 4. **Connection close** ([`PrivacyEngine::handle_session_closed`]):
//!    evicts session-scoped cache state.
//!
//! Denials are bounced or silently dropped per stanza kind by the
//! side-effect emitter; hooks report only whether the stanza survives.

use std::sync::Arc;

use jid::{BareJid, FullJid, Jid};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::ListCache;
use crate::commands;
use crate::error::PrivacyError;
use crate::list::PrivacyList;
use crate::matcher;
use crate::notify;
use crate::types::{Direction, Stanza, Verdict};
use crate::PrivacyHost;

/// Configuration for the privacy engine.
#[derive(Debug, Clone, Deserialize)]
pub struct PrivacyConfig {
    /// The local domain this engine serves.
    pub local_domain: String,
    /// Name given to the auto-created blocking list.
    #[serde(default = "default_block_list_name")]
    pub block_list_name: String,
    /// Name given to transient invisibility lists.
    #[serde(default = "default_invisible_list_name")]
    pub invisible_list_name: String,
}

fn default_block_list_name() -> String {
    "block".to_string()
}

fn default_invisible_list_name() -> String {
    "invisible".to_string()
}

impl PrivacyConfig {
    /// Create a configuration for one local domain.
    pub fn new(local_domain: String) -> Self {
        Self {
            local_domain,
            block_list_name: default_block_list_name(),
            invisible_list_name: default_invisible_list_name(),
        }
    }

    /// Override the auto-created blocking list name.
    pub fn with_block_list_name(mut self, name: String) -> Self {
        self.block_list_name = name;
        self
    }

    /// Override the transient invisibility list name.
    pub fn with_invisible_list_name(mut self, name: String) -> Self {
        self.invisible_list_name = name;
        self
    }
}

/// What a hook decided about a stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// The stanza proceeds through the pipeline.
    Pass,
    /// The stanza was an admin request and has been fully handled.
    Handled,
    /// A privacy rule denied the stanza; it must not travel further.
    /// Any error bounce has already been emitted.
    Drop,
}

/// Privacy engine for one virtual host.
///
/// Owns the list cache; everything else is reached through the
/// [`PrivacyHost`] capability passed into each call.
#[derive(Debug)]
pub struct PrivacyEngine {
    config: PrivacyConfig,
    cache: ListCache,
}

impl PrivacyEngine {
    /// Create an engine for one virtual host.
    pub fn new(config: PrivacyConfig) -> Self {
        info!(domain = %config.local_domain, "Privacy engine initialized");
        Self {
            config,
            cache: ListCache::new(),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &PrivacyConfig {
        &self.config
    }

    /// The list cache.
    pub fn cache(&self) -> &ListCache {
        &self.cache
    }

    /// Whether a JID belongs to this engine's domain.
    pub fn is_local(&self, jid: &Jid) -> bool {
        jid.domain().as_str() == self.config.local_domain
    }

    /// The account default list, consulting the store on a cache miss and
    /// caching negatively.
    pub(crate) async fn default_list<H: PrivacyHost>(
        &self,
        host: &H,
        bare: &BareJid,
    ) -> Result<Option<Arc<PrivacyList>>, PrivacyError> {
        let key = bare.to_string();
        if let Some(cached) = self.cache.get_default(&key) {
            return Ok(cached);
        }
        let loaded = host.load_default_privacy_list(bare).await?.map(Arc::new);
        self.cache.set_default(&key, loaded.clone());
        Ok(loaded)
    }

    /// Resolve a named list: the session's own active binding first (this is
    /// how transient lists stay reachable), then the cached default, then
    /// the store.
    pub(crate) async fn resolve_list<H: PrivacyHost>(
        &self,
        host: &H,
        session: &FullJid,
        name: &str,
    ) -> Result<Option<Arc<PrivacyList>>, PrivacyError> {
        if let Some(active) = self.cache.get_active(&session.to_string()) {
            if active.name == name {
                return Ok(Some(active));
            }
        }
        let bare = session.to_bare();
        if let Some(Some(default)) = self.cache.get_default(&bare.to_string()) {
            if default.name == name {
                return Ok(Some(default));
            }
        }
        Ok(host.load_privacy_list(&bare, name).await?.map(Arc::new))
    }

    /// Store a list, keeping the in-memory view authoritative on failure.
    ///
    /// A lost write means a restart may forget the change; the running
    /// session keeps a consistent view either way.
    pub(crate) async fn store_best_effort<H: PrivacyHost>(
        &self,
        host: &H,
        bare: &BareJid,
        list: &PrivacyList,
    ) {
        if let Err(err) = host.store_privacy_list(bare, list).await {
            warn!(
                account = %bare,
                list = %list.name,
                error = %err,
                "List store write failed; in-memory view stays authoritative"
            );
        }
    }

    /// Whether another session of the same account has no active binding
    /// and therefore relies on the account default.
    pub(crate) fn other_session_on_default<H: PrivacyHost>(
        &self,
        host: &H,
        session: &FullJid,
    ) -> bool {
        host.sessions_of(&session.to_bare())
            .iter()
            .any(|other| other != session && self.cache.get_active(&other.to_string()).is_none())
    }

    /// Whether another session of the same account has the named list
    /// active.
    pub(crate) fn other_session_has_active<H: PrivacyHost>(
        &self,
        host: &H,
        session: &FullJid,
        name: &str,
    ) -> bool {
        host.sessions_of(&session.to_bare()).iter().any(|other| {
            other != session
                && self
                    .cache
                    .get_active(&other.to_string())
                    .map(|list| list.name == name)
                    .unwrap_or(false)
        })
    }

    /// The list effective for an owner-side check: the session's active
    /// list when the owner is a full JID with a binding, else the account
    /// default. Store failures degrade to "no list" for mid-flight checks.
    async fn effective_list<H: PrivacyHost>(
        &self,
        host: &H,
        owner: &Jid,
    ) -> Option<Arc<PrivacyList>> {
        if owner.resource().is_some() {
            if let Some(active) = self.cache.get_active(&owner.to_string()) {
                return Some(active);
            }
        }
        match self.default_list(host, &owner.to_bare()).await {
            Ok(default) => default,
            Err(err) => {
                warn!(owner = %owner, error = %err, "Default list load failed during filtering");
                None
            }
        }
    }

    /// Evaluate one owner side of a stanza. Returns the verdict; `Deny`
    /// means the owner's list rejected it.
    async fn check_side<H: PrivacyHost>(
        &self,
        host: &H,
        stanza: &Stanza,
        direction: Direction,
        owner: &Jid,
        other: &Jid,
    ) -> Verdict {
        let Some(list) = self.effective_list(host, owner).await else {
            return Verdict::Allow;
        };
        matcher::evaluate(host, &list, stanza, direction, owner, other).await
    }

    /// Hook 1: stanza arriving from a local client connection.
    ///
    /// Admin IQs (no `to`) are consumed; anything addressed is checked
    /// against the local recipient's list in the inbound direction.
    #[instrument(skip(self, host, stanza), fields(session = %session, kind = stanza.name()))]
    pub async fn handle_client_stanza<H: PrivacyHost>(
        &self,
        host: &H,
        session: &FullJid,
        stanza: &Stanza,
    ) -> FilterVerdict {
        if let Stanza::Iq(iq) = stanza {
            if iq.to.is_none() && commands::is_admin_iq(iq) {
                if let Err(err) = commands::handle_admin_iq(self, host, session, iq).await {
                    warn!(error = %err, "Failed to reply to admin IQ");
                }
                return FilterVerdict::Handled;
            }
        }

        let Some(to) = stanza.to() else {
            return FilterVerdict::Pass;
        };
        if !self.is_local(to) {
            return FilterVerdict::Pass;
        }

        let sender = Jid::from(session.clone());
        let recipient = to.clone();
        if self
            .check_side(host, stanza, Direction::Inbound, &recipient, &sender)
            .await
            .is_deny()
        {
            debug!(to = %recipient, "Stanza denied at client ingress");
            notify::bounce_denied(host, stanza, false).await;
            return FilterVerdict::Drop;
        }

        FilterVerdict::Pass
    }

    /// Hook 2: stanza about to be written out on behalf of a local sender.
    #[instrument(skip(self, host, stanza), fields(sender = %sender, kind = stanza.name()))]
    pub async fn filter_outbound<H: PrivacyHost>(
        &self,
        host: &H,
        sender: &FullJid,
        stanza: &Stanza,
    ) -> FilterVerdict {
        let Some(to) = stanza.to() else {
            return FilterVerdict::Pass;
        };

        let owner = Jid::from(sender.clone());
        let other = to.clone();
        if self
            .check_side(host, stanza, Direction::Outbound, &owner, &other)
            .await
            .is_deny()
        {
            debug!(to = %other, "Stanza denied before write");
            notify::bounce_denied(host, stanza, true).await;
            return FilterVerdict::Drop;
        }

        FilterVerdict::Pass
    }

    /// Hook 3: stanza in transit with both endpoints known. Recipient side
    /// first, then sender side; either deny kills the stanza.
    #[instrument(skip(self, host, stanza), fields(kind = stanza.name()))]
    pub async fn filter_delivery<H: PrivacyHost>(
        &self,
        host: &H,
        stanza: &Stanza,
    ) -> FilterVerdict {
        let (Some(from), Some(to)) = (stanza.from(), stanza.to()) else {
            return FilterVerdict::Pass;
        };
        let from = from.clone();
        let to = to.clone();

        if self.is_local(&to)
            && self
                .check_side(host, stanza, Direction::Inbound, &to, &from)
                .await
                .is_deny()
        {
            debug!(owner = %to, "Stanza denied by recipient list");
            notify::bounce_denied(host, stanza, false).await;
            return FilterVerdict::Drop;
        }

        if self.is_local(&from)
            && self
                .check_side(host, stanza, Direction::Outbound, &from, &to)
                .await
                .is_deny()
        {
            debug!(owner = %from, "Stanza denied by sender list");
            notify::bounce_denied(host, stanza, true).await;
            return FilterVerdict::Drop;
        }

        FilterVerdict::Pass
    }

    /// Connection-close hook: drop the session's active binding and its
    /// block-list-user marker.
    pub fn handle_session_closed(&self, session: &FullJid) {
        self.cache.evict_session(session);
    }
}
