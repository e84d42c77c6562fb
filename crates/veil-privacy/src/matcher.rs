//! Predicate evaluation and the ordered match engine.
//!
//! [`evaluate`] walks a privacy list in stored order and returns the action
//! of the first item that applies to the stanza. Three predicate families
//! exist: JID patterns (resolved structurally), roster predicates (group and
//! subscription, resolved against the host roster), and the catch-all.
//!
//! ## JID pattern precedence
//!
//! A pattern is tried against the candidate in this order, returning on the
//! first hit: full JID, bare JID, `domain/resource`, bare domain. The order
//! is observable: it decides which rule wins when patterns overlap.
//!
//! Roster lookups happen at most once per evaluation and suspend the task
//! while the host fetches; a failed lookup degrades to "not in roster", so
//! `subscription=none` still matches unknown users and group predicates
//! never match.

use jid::Jid;
use tracing::{debug, warn};
use xmpp_parsers::presence::Type as PresenceType;

use crate::list::{Action, Predicate, PrivacyItem, PrivacyList};
use crate::roster::{RosterItem, Subscription};
use crate::types::{Direction, Stanza, Verdict};
use crate::PrivacyHost;

/// Match a candidate JID against a rule pattern.
pub fn jid_pattern_matches(pattern: &str, candidate: &Jid) -> bool {
    if candidate.to_string() == pattern {
        return true;
    }
    if candidate.to_bare().to_string() == pattern {
        return true;
    }
    if let Some(resource) = candidate.resource() {
        if format!("{}/{}", candidate.domain(), resource) == pattern {
            return true;
        }
    }
    candidate.domain().as_str() == pattern
}

/// Match a subscription predicate against an optional roster entry.
///
/// Only the to/from bits are compared; pending (`ask`) state is carried
/// separately on [`RosterItem`] and never participates. An absent roster
/// entry matches `none`.
pub fn subscription_matches(wanted: Subscription, entry: Option<&RosterItem>) -> bool {
    match entry {
        Some(item) => item.subscription == wanted,
        None => wanted == Subscription::None,
    }
}

/// Match a group predicate against an optional roster entry.
pub fn group_matches(group: &str, entry: Option<&RosterItem>) -> bool {
    entry.map_or(false, |item| item.in_group(group))
}

/// Whether an item's stanza mask applies to this stanza and direction.
///
/// An empty mask applies to every stanza kind. Presence gating only covers
/// presence *states* (available/unavailable); subscription-flow presences
/// pass through. Probes are gated only by probe-marked items.
pub fn mask_applies(item: &PrivacyItem, stanza: &Stanza, direction: Direction) -> bool {
    if item.mask.is_empty() {
        return true;
    }

    match stanza {
        Stanza::Iq(_) => item.mask.iq,
        Stanza::Message(_) => item.mask.message,
        Stanza::Presence(p) => match direction {
            Direction::Inbound => {
                item.mask.presence_in
                    && matches!(p.type_, PresenceType::None | PresenceType::Unavailable)
            }
            Direction::Outbound => {
                item.mask.presence_out
                    && (matches!(p.type_, PresenceType::None | PresenceType::Unavailable)
                        || (p.type_ == PresenceType::Probe && item.probe))
            }
        },
    }
}

/// Whether the directed-presence carve-out skips this item.
///
/// A directed presence state (explicit `to`, sent by the owner) bypasses
/// catch-all items, so invisibility does not swallow presences the owner
/// addressed deliberately. Probe-marked items are exempt: probes are always
/// directed, and the marker exists precisely to deny them.
fn directed_presence_bypass(item: &PrivacyItem, stanza: &Stanza, direction: Direction) -> bool {
    if direction != Direction::Outbound || !item.predicate.is_any() || item.probe {
        return false;
    }
    match stanza {
        Stanza::Presence(p) => {
            p.to.is_some() && matches!(p.type_, PresenceType::None | PresenceType::Unavailable)
        }
        _ => false,
    }
}

/// Evaluate an ordered privacy list against a stanza.
///
/// `owner` is the JID whose list is applied; `other` is the counterparty.
/// Items are visited in stored order and the first applicable item decides.
/// A stanza between two resources of the same account is always allowed.
pub async fn evaluate<H: PrivacyHost>(
    host: &H,
    list: &PrivacyList,
    stanza: &Stanza,
    direction: Direction,
    owner: &Jid,
    other: &Jid,
) -> Verdict {
    if owner.to_bare() == other.to_bare() {
        return Verdict::Allow;
    }

    // Fetched at most once, on the first roster predicate.
    let mut roster_entry: Option<Option<RosterItem>> = None;

    for item in &list.items {
        if !mask_applies(item, stanza, direction) {
            continue;
        }
        if directed_presence_bypass(item, stanza, direction) {
            continue;
        }

        let hit = match &item.predicate {
            Predicate::Any => true,
            Predicate::Jid(pattern) => jid_pattern_matches(pattern, other),
            predicate => {
                if roster_entry.is_none() {
                    let fetched = match host
                        .roster_item(&owner.to_bare(), &other.to_bare())
                        .await
                    {
                        Ok(entry) => entry,
                        Err(err) => {
                            warn!(
                                owner = %owner,
                                other = %other,
                                error = %err,
                                "Roster lookup failed, treating counterparty as not in roster"
                            );
                            None
                        }
                    };
                    roster_entry = Some(fetched);
                }
                let entry = roster_entry.as_ref().and_then(|e| e.as_ref());
                match predicate {
                    Predicate::Group(group) => group_matches(group, entry),
                    Predicate::Subscription(sub) => subscription_matches(*sub, entry),
                    _ => unreachable!("jid and catch-all predicates handled above"),
                }
            }
        };

        if hit {
            debug!(
                list = %list.name,
                order = item.order,
                action = item.action.as_str(),
                "Privacy item matched"
            );
            return match item.action {
                Action::Allow => Verdict::Allow,
                Action::Deny => Verdict::Deny,
            };
        }
    }

    Verdict::Allow
}
