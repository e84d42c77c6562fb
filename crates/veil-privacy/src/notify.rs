//! Side effects of privacy decisions: denial bounces, presence synthesis
//! and multi-session broadcast.
//!
//! Ordering within one admin operation is fixed: the result reply reaches
//! the requesting session first, then other sessions get their list-change
//! push, then synthesized presence goes out.
//!
//! ## Denial bounces
//!
//! ```xml
//! <message type='error' id='m1'>
//!   <error type='cancel'>
//!     <not-acceptable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>
//!     <blocked xmlns='urn:xmpp:blocking:errors'/>
//!   </error>
//! </message>
//! ```

use std::collections::HashSet;

use jid::{FullJid, Jid};
use minidom::Element;
use tracing::{debug, warn};
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::message::MessageType;
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use crate::cache::ListCache;
use crate::commands::blocking::NS_BLOCKING_ERRORS;
use crate::error::{StanzaErrorCondition, StanzaErrorType, NS_STANZAS};
use crate::error::iq_error_reply;
use crate::list::{Action, Predicate, PrivacyItem, PrivacyList, NS_PRIVACY};
use crate::roster::RosterItem;
use crate::types::Stanza;
use crate::PrivacyHost;

/// Namespace of client stanzas, used for embedded `<error/>` children.
const NS_CLIENT: &str = "jabber:client";

/// Bounce a denied stanza back to its sender, or drop it silently.
///
/// Presence is always dropped. Messages (except `groupchat`) and IQ
/// requests bounce with `service-unavailable`; when the sender's own list
/// caused the denial of a message, the bounce is `not-acceptable` with the
/// Blocking `blocked` marker instead, so the sender can tell their own rules
/// were at fault.
pub async fn bounce_denied<H: PrivacyHost>(host: &H, stanza: &Stanza, denied_by_sender: bool) {
    let reply = match stanza {
        Stanza::Presence(_) => return,
        Stanza::Message(m) => {
            if m.type_ == MessageType::Groupchat || m.from.is_none() {
                return;
            }

            let mut error = Element::builder("error", NS_CLIENT);
            if denied_by_sender {
                error = error
                    .attr("type", StanzaErrorType::Cancel.as_str())
                    .append(
                        Element::builder(StanzaErrorCondition::NotAcceptable.as_str(), NS_STANZAS)
                            .build(),
                    )
                    .append(Element::builder("blocked", NS_BLOCKING_ERRORS).build());
            } else {
                error = error
                    .attr("type", StanzaErrorType::Cancel.as_str())
                    .append(
                        Element::builder(
                            StanzaErrorCondition::ServiceUnavailable.as_str(),
                            NS_STANZAS,
                        )
                        .build(),
                    );
            }

            let mut bounce = xmpp_parsers::message::Message::new(m.from.clone());
            bounce.from = m.to.clone();
            bounce.id = m.id.clone();
            bounce.type_ = MessageType::Error;
            bounce.payloads.push(error.build());
            Stanza::Message(bounce)
        }
        Stanza::Iq(iq) => match iq.payload {
            IqType::Get(_) | IqType::Set(_) => Stanza::Iq(iq_error_reply(
                iq,
                StanzaErrorType::Cancel,
                StanzaErrorCondition::ServiceUnavailable,
                None,
            )),
            _ => return,
        },
    };

    if let Err(err) = host.route_stanza(reply).await {
        warn!(error = %err, "Failed to route denial bounce");
    }
}

/// Build an unavailable presence between two parties.
pub fn unavailable_presence(from: &Jid, to: &Jid) -> Presence {
    let mut pres = Presence::new(PresenceType::Unavailable);
    pres.from = Some(from.clone());
    pres.to = Some(to.clone());
    pres
}

/// Build an available presence between two parties.
pub fn available_presence(from: &Jid, to: &Jid) -> Presence {
    let mut pres = Presence::new(PresenceType::None);
    pres.from = Some(from.clone());
    pres.to = Some(to.clone());
    pres
}

/// Build a Privacy-shaped list-change push.
///
/// Carries only the list name; sessions re-fetch the body on demand.
pub fn privacy_push(to: &FullJid, list_name: &str) -> Iq {
    let query = Element::builder("query", NS_PRIVACY)
        .append(
            Element::builder("list", NS_PRIVACY)
                .attr("name", list_name)
                .build(),
        )
        .build();

    Iq {
        from: None,
        to: Some(Jid::from(to.clone())),
        id: format!("push-privacy-{}", uuid::Uuid::new_v4()),
        payload: IqType::Set(query),
    }
}

/// Re-address a block/unblock IQ as a push toward another session.
pub fn blocking_push(original: &Iq, to: &FullJid) -> Option<Iq> {
    let payload = match &original.payload {
        IqType::Set(elem) => elem.clone(),
        _ => return None,
    };

    Some(Iq {
        from: None,
        to: Some(Jid::from(to.clone())),
        id: format!("push-block-{}", uuid::Uuid::new_v4()),
        payload: IqType::Set(payload),
    })
}

/// What shape of list-change push other sessions receive.
#[derive(Debug, Clone, Copy)]
pub enum ListChange<'a> {
    /// A privacy list was created, replaced, or removed.
    Privacy {
        /// Name of the affected list.
        list_name: &'a str,
    },
    /// The change came in through the Blocking protocol.
    Blocking {
        /// The block/unblock IQ as submitted.
        original: &'a Iq,
        /// Name of the affected (default) list.
        list_name: &'a str,
    },
}

/// Push a list change to every *other* session of the same account.
///
/// Sessions that queried the block list get the Blocking view of a
/// block/unblock mutation; everyone else gets the Privacy-shaped name push.
pub async fn broadcast_list_change<H: PrivacyHost>(
    host: &H,
    cache: &ListCache,
    requester: &FullJid,
    change: ListChange<'_>,
) {
    for session in host.sessions_of(&requester.to_bare()) {
        if session == *requester {
            continue;
        }

        let push = match change {
            ListChange::Privacy { list_name } => privacy_push(&session, list_name),
            ListChange::Blocking {
                original,
                list_name,
            } => {
                if cache.is_blocklist_user(&session.to_string()) {
                    match blocking_push(original, &session) {
                        Some(push) => push,
                        None => privacy_push(&session, list_name),
                    }
                } else {
                    privacy_push(&session, list_name)
                }
            }
        };

        debug!(to = %session, "Pushing list change to sibling session");
        if let Err(err) = host.send_to_session(&session, Stanza::Iq(push)).await {
            warn!(to = %session, error = %err, "Failed to push list change");
        }
    }
}

/// Synthesize the presence updates a newly effective list requires.
///
/// Each `presence-in` deny yields an unavailable presence from the matching
/// counterparties to the owner; each `presence-out` deny yields one from the
/// owner to the counterparties. JID predicates name the counterparty
/// directly; roster predicates walk the owner's to-items (inbound) or
/// from-items (outbound). Counterparties are deduplicated per direction.
pub async fn presence_updates<H: PrivacyHost>(
    host: &H,
    owner: &Jid,
    list: &PrivacyList,
) -> Vec<Presence> {
    let bare = owner.to_bare();
    let mut to_items = None;
    let mut from_items = None;
    let mut seen_in: HashSet<String> = HashSet::new();
    let mut seen_out: HashSet<String> = HashSet::new();
    let mut updates = Vec::new();

    for item in &list.items {
        if item.action != Action::Deny {
            continue;
        }
        let denies_in = item.mask.presence_in || item.mask.is_empty();
        let denies_out = item.mask.presence_out || item.mask.is_empty();
        if !denies_in && !denies_out {
            continue;
        }

        if denies_in {
            if to_items.is_none() {
                to_items = Some(host.roster_to_items(&bare).await.unwrap_or_else(|err| {
                    warn!(owner = %bare, error = %err, "Roster walk failed");
                    Vec::new()
                }));
            }
            let roster = to_items.as_deref().unwrap_or_default();
            for counterparty in counterparties(item, roster) {
                if seen_in.insert(counterparty.to_string()) {
                    updates.push(unavailable_presence(&counterparty, owner));
                }
            }
        }

        if denies_out {
            if from_items.is_none() {
                from_items = Some(host.roster_from_items(&bare).await.unwrap_or_else(|err| {
                    warn!(owner = %bare, error = %err, "Roster walk failed");
                    Vec::new()
                }));
            }
            let roster = from_items.as_deref().unwrap_or_default();
            for counterparty in counterparties(item, roster) {
                if seen_out.insert(counterparty.to_string()) {
                    updates.push(unavailable_presence(owner, &counterparty));
                }
            }
        }
    }

    updates
}

/// The counterparty JIDs an item applies to, given the roster slice for its
/// direction.
fn counterparties(item: &PrivacyItem, roster: &[RosterItem]) -> Vec<Jid> {
    match &item.predicate {
        Predicate::Jid(pattern) => pattern.parse::<Jid>().into_iter().collect(),
        Predicate::Any => roster.iter().map(|entry| Jid::from(entry.jid.clone())).collect(),
        Predicate::Group(group) => roster
            .iter()
            .filter(|entry| entry.in_group(group))
            .map(|entry| Jid::from(entry.jid.clone()))
            .collect(),
        Predicate::Subscription(sub) => roster
            .iter()
            .filter(|entry| entry.subscription == *sub)
            .map(|entry| Jid::from(entry.jid.clone()))
            .collect(),
    }
}

/// Route a batch of synthesized presences through the host.
pub async fn route_presences<H: PrivacyHost>(host: &H, presences: Vec<Presence>) {
    for presence in presences {
        if let Err(err) = host.route_stanza(Stanza::Presence(presence)).await {
            warn!(error = %err, "Failed to route synthesized presence");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::Subscription;
    use crate::testutil::TestHost;
    use xmpp_parsers::message::Message;

    fn full(s: &str) -> FullJid {
        s.parse().unwrap()
    }

    fn jid(s: &str) -> Jid {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_presence_denial_is_silent() {
        let host = TestHost::new();
        let pres = unavailable_presence(&jid("a@veil.im/r"), &jid("b@veil.im"));
        bounce_denied(&host, &Stanza::Presence(pres), false).await;
        assert_eq!(host.routed_count(), 0);
    }

    #[tokio::test]
    async fn test_groupchat_message_denial_is_silent() {
        let host = TestHost::new();
        let mut msg = Message::new(Some(jid("a@veil.im")));
        msg.from = Some(jid("b@veil.im/r"));
        msg.type_ = MessageType::Groupchat;
        bounce_denied(&host, &Stanza::Message(msg), false).await;
        assert_eq!(host.routed_count(), 0);
    }

    #[tokio::test]
    async fn test_message_denial_bounces_service_unavailable() {
        let host = TestHost::new();
        let mut msg = Message::new(Some(jid("a@veil.im")));
        msg.from = Some(jid("b@veil.im/r"));
        msg.id = Some("m1".to_string());
        bounce_denied(&host, &Stanza::Message(msg), false).await;

        let routed = host.routed.lock().unwrap();
        assert_eq!(routed.len(), 1);
        match &routed[0] {
            Stanza::Message(bounce) => {
                assert_eq!(bounce.type_, MessageType::Error);
                assert_eq!(bounce.to.as_ref().unwrap().to_string(), "b@veil.im/r");
                assert_eq!(bounce.id.as_deref(), Some("m1"));
                let error = &bounce.payloads[0];
                assert_eq!(error.name(), "error");
                assert!(error.has_child("service-unavailable", NS_STANZAS));
            }
            other => panic!("Expected message bounce, got {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_sender_side_message_denial_carries_blocked_marker() {
        let host = TestHost::new();
        let mut msg = Message::new(Some(jid("c@veil.im")));
        msg.from = Some(jid("a@veil.im/r"));
        bounce_denied(&host, &Stanza::Message(msg), true).await;

        let routed = host.routed.lock().unwrap();
        match &routed[0] {
            Stanza::Message(bounce) => {
                let error = &bounce.payloads[0];
                assert!(error.has_child("not-acceptable", NS_STANZAS));
                assert!(error.has_child("blocked", NS_BLOCKING_ERRORS));
            }
            other => panic!("Expected message bounce, got {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_iq_denial_bounces_error() {
        let host = TestHost::new();
        let iq = Iq {
            from: Some(jid("b@veil.im/r")),
            to: Some(jid("a@veil.im")),
            id: "v1".to_string(),
            payload: IqType::Get(Element::builder("vCard", "vcard-temp").build()),
        };
        bounce_denied(&host, &Stanza::Iq(iq), false).await;

        let routed = host.routed.lock().unwrap();
        match &routed[0] {
            Stanza::Iq(bounce) => {
                assert_eq!(bounce.id, "v1");
                assert!(matches!(bounce.payload, IqType::Error(_)));
            }
            other => panic!("Expected IQ bounce, got {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_iq_result_denial_is_dropped() {
        let host = TestHost::new();
        let iq = Iq {
            from: Some(jid("b@veil.im/r")),
            to: Some(jid("a@veil.im")),
            id: "r1".to_string(),
            payload: IqType::Result(None),
        };
        bounce_denied(&host, &Stanza::Iq(iq), false).await;
        assert_eq!(host.routed_count(), 0);
    }

    #[test]
    fn test_privacy_push_shape() {
        let push = privacy_push(&full("a@veil.im/desk"), "work");
        assert!(push.id.starts_with("push-privacy-"));
        match &push.payload {
            IqType::Set(query) => {
                assert_eq!(query.name(), "query");
                let list = query.children().next().unwrap();
                assert_eq!(list.attr("name"), Some("work"));
                assert!(list.children().next().is_none());
            }
            _ => panic!("Expected set payload"),
        }
    }

    #[test]
    fn test_blocking_push_readdresses_original() {
        let block = Element::builder("block", crate::commands::blocking::NS_BLOCKING)
            .append(
                Element::builder("item", crate::commands::blocking::NS_BLOCKING)
                    .attr("jid", "c@veil.im")
                    .build(),
            )
            .build();
        let original = Iq {
            from: Some(jid("a@veil.im/desk")),
            to: None,
            id: "b1".to_string(),
            payload: IqType::Set(block),
        };

        let push = blocking_push(&original, &full("a@veil.im/phone")).unwrap();
        assert_eq!(push.to.as_ref().unwrap().to_string(), "a@veil.im/phone");
        assert_ne!(push.id, "b1");
        match &push.payload {
            IqType::Set(elem) => assert_eq!(elem.name(), "block"),
            _ => panic!("Expected set payload"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_requester() {
        let host = TestHost::new();
        host.add_session("a@veil.im/desk", true);
        host.add_session("a@veil.im/phone", true);
        let cache = ListCache::new();

        broadcast_list_change(
            &host,
            &cache,
            &full("a@veil.im/desk"),
            ListChange::Privacy { list_name: "work" },
        )
        .await;

        let sent = host.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.to_string(), "a@veil.im/phone");
    }

    #[tokio::test]
    async fn test_broadcast_blocking_view_only_for_blocklist_users() {
        let host = TestHost::new();
        host.add_session("a@veil.im/desk", true);
        host.add_session("a@veil.im/phone", true);
        host.add_session("a@veil.im/tablet", true);
        let cache = ListCache::new();
        cache.add_blocklist_user("a@veil.im/phone");

        let block = Element::builder("block", crate::commands::blocking::NS_BLOCKING).build();
        let original = Iq {
            from: Some(jid("a@veil.im/desk")),
            to: None,
            id: "b1".to_string(),
            payload: IqType::Set(block),
        };

        broadcast_list_change(
            &host,
            &cache,
            &full("a@veil.im/desk"),
            ListChange::Blocking {
                original: &original,
                list_name: "block",
            },
        )
        .await;

        let sent = host.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        for (to, stanza) in sent.iter() {
            let iq = match stanza {
                Stanza::Iq(iq) => iq,
                other => panic!("Expected IQ push, got {}", other.name()),
            };
            let elem = match &iq.payload {
                IqType::Set(elem) => elem,
                _ => panic!("Expected set payload"),
            };
            if to.to_string() == "a@veil.im/phone" {
                assert_eq!(elem.name(), "block");
            } else {
                assert_eq!(elem.name(), "query");
            }
        }
    }

    #[tokio::test]
    async fn test_presence_updates_for_invisibility_walks_from_items() {
        let host = TestHost::new();
        host.add_roster_item(
            "a@veil.im",
            RosterItem::new("b@veil.im".parse().unwrap())
                .set_subscription(Subscription::Both),
        );
        host.add_roster_item(
            "a@veil.im",
            RosterItem::new("c@veil.im".parse().unwrap())
                .set_subscription(Subscription::From),
        );
        host.add_roster_item(
            "a@veil.im",
            RosterItem::new("d@veil.im".parse().unwrap())
                .set_subscription(Subscription::To),
        );

        let list = PrivacyList::from_items("inv", vec![PrivacyItem::invisibility(false)]);
        let updates = presence_updates(&host, &jid("a@veil.im/desk"), &list).await;

        let mut targets: Vec<_> = updates
            .iter()
            .map(|p| p.to.as_ref().unwrap().to_string())
            .collect();
        targets.sort();
        // Only from-subscribers see the owner's presence; d@ (to-only) does not.
        assert_eq!(targets, vec!["b@veil.im", "c@veil.im"]);
        for update in &updates {
            assert_eq!(update.type_, PresenceType::Unavailable);
            assert_eq!(update.from.as_ref().unwrap().to_string(), "a@veil.im/desk");
        }
    }

    #[tokio::test]
    async fn test_presence_updates_jid_deny_both_directions() {
        let host = TestHost::new();
        let mut item = PrivacyItem::blocking("c@veil.im");
        item.order = 1;
        let list = PrivacyList::from_items("block", vec![item]);

        let updates = presence_updates(&host, &jid("a@veil.im/desk"), &list).await;

        // Empty mask denies both presence directions for the literal JID.
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].from.as_ref().unwrap().to_string(), "c@veil.im");
        assert_eq!(updates[0].to.as_ref().unwrap().to_string(), "a@veil.im/desk");
        assert_eq!(updates[1].from.as_ref().unwrap().to_string(), "a@veil.im/desk");
        assert_eq!(updates[1].to.as_ref().unwrap().to_string(), "c@veil.im");
    }

    #[tokio::test]
    async fn test_presence_updates_deduplicates_counterparties() {
        let host = TestHost::new();
        host.add_roster_item(
            "a@veil.im",
            RosterItem::new("b@veil.im".parse().unwrap())
                .set_subscription(Subscription::Both),
        );

        let by_jid = PrivacyItem {
            order: 2,
            action: Action::Deny,
            predicate: Predicate::Jid("b@veil.im".to_string()),
            mask: crate::list::StanzaMask::PRESENCE_OUT,
            probe: false,
        };
        let list = PrivacyList::from_items(
            "inv",
            vec![PrivacyItem::invisibility(false), by_jid],
        );

        let updates = presence_updates(&host, &jid("a@veil.im/desk"), &list).await;
        assert_eq!(updates.len(), 1);
    }
}
