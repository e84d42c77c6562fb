//! # veil-privacy
//!
//! Privacy and blocking engine for XMPP servers.
//!
//! This crate implements the server-side core of three interoperating
//! protocols sharing one rule space:
//!
//! - XEP-0016 Privacy Lists (`jabber:iq:privacy`)
//! - XEP-0191 Blocking Command (`urn:xmpp:blocking`)
//! - Invisible Command (`urn:xmpp:invisible:0` / `urn:xmpp:invisible:1`)
//!
//! ## Architecture
//!
//! - **Rule model**: ordered per-user lists of allow/deny items with JID,
//!   roster and stanza-kind predicates
//! - **Match engine**: deterministic first-match evaluation of a list
//!   against a stanza and direction
//! - **Cache**: active lists keyed by full JID (session scope), defaults
//!   keyed by bare JID (account scope, negatively cached)
//! - **Hook points**: the host pipeline calls into [`PrivacyEngine`] on
//!   client ingress, pre-write egress, delivery, and connection teardown
//!
//! The engine owns no I/O. Roster data, list persistence, session discovery
//! and the stanza write path are reached through the [`PrivacyHost`] trait,
//! so the host server provides them without circular dependencies. One
//! engine instance serves one virtual host.

pub mod cache;
pub mod commands;
pub mod list;
pub mod matcher;
pub mod notify;
pub mod pipeline;
pub mod roster;
pub mod store;

mod error;
#[cfg(test)]
mod testutil;
mod types;

pub use error::{
    iq_error_from, iq_error_reply, PrivacyError, StanzaErrorCondition, StanzaErrorType, NS_STANZAS,
};
pub use list::{Action, Predicate, PrivacyItem, PrivacyList, StanzaMask, NS_PRIVACY};
pub use pipeline::{FilterVerdict, PrivacyConfig, PrivacyEngine};
pub use types::{Direction, Stanza, Verdict};

use std::future::Future;

use jid::{BareJid, FullJid};

use crate::roster::RosterItem;

/// Host server capabilities required by the privacy engine.
///
/// This trait lets the embedding server provide list persistence, roster
/// access, session discovery and the stanza write path. Engine methods take
/// the host by reference per call; the engine never keeps a host pointer.
pub trait PrivacyHost: Send + Sync + 'static {
    /// All privacy lists owned by an account.
    fn list_privacy_lists(
        &self,
        owner: &BareJid,
    ) -> impl Future<Output = Result<Vec<PrivacyList>, PrivacyError>> + Send;

    /// Load one named privacy list, or None if absent.
    fn load_privacy_list(
        &self,
        owner: &BareJid,
        name: &str,
    ) -> impl Future<Output = Result<Option<PrivacyList>, PrivacyError>> + Send;

    /// Load the account's default privacy list, or None if none is flagged.
    fn load_default_privacy_list(
        &self,
        owner: &BareJid,
    ) -> impl Future<Output = Result<Option<PrivacyList>, PrivacyError>> + Send;

    /// Store a privacy list.
    ///
    /// A list with no items removes the stored row. Returns whether a row
    /// remains for this name afterwards.
    fn store_privacy_list(
        &self,
        owner: &BareJid,
        list: &PrivacyList,
    ) -> impl Future<Output = Result<bool, PrivacyError>> + Send;

    /// Look up a single roster entry for `(owner, other)`.
    fn roster_item(
        &self,
        owner: &BareJid,
        other: &BareJid,
    ) -> impl Future<Output = Result<Option<RosterItem>, PrivacyError>> + Send;

    /// Roster entries whose presence the owner receives
    /// (subscription `to` or `both`).
    fn roster_to_items(
        &self,
        owner: &BareJid,
    ) -> impl Future<Output = Result<Vec<RosterItem>, PrivacyError>> + Send;

    /// Roster entries that receive the owner's presence
    /// (subscription `from` or `both`).
    fn roster_from_items(
        &self,
        owner: &BareJid,
    ) -> impl Future<Output = Result<Vec<RosterItem>, PrivacyError>> + Send;

    /// All currently bound sessions of an account.
    fn sessions_of(&self, owner: &BareJid) -> Vec<FullJid>;

    /// Whether a session has sent its initial presence.
    fn session_is_available(&self, session: &FullJid) -> bool;

    /// Deliver a stanza to one locally bound session.
    fn send_to_session(
        &self,
        to: &FullJid,
        stanza: Stanza,
    ) -> impl Future<Output = Result<(), PrivacyError>> + Send;

    /// Hand a stanza to the host routing pipeline (any destination).
    fn route_stanza(&self, stanza: Stanza) -> impl Future<Output = Result<(), PrivacyError>> + Send;
}

/// Feature namespaces the host should advertise in its disco#info response.
pub fn advertised_features() -> [&'static str; 4] {
    [
        NS_PRIVACY,
        commands::blocking::NS_BLOCKING,
        commands::visibility::NS_INVISIBLE_0,
        commands::visibility::NS_INVISIBLE_1,
    ]
}
