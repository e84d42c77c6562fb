//! XEP-0191 Blocking Command.
//!
//! The Blocking protocol is a flat view of the account's default privacy
//! list: only items of blocking shape (deny a JID for every stanza kind)
//! are visible through it. Blocks are prepended so they win over any other
//! rules in the list; everything else in the list is left untouched.
//!
//! ## XML Format
//!
//! ```xml
//! <!-- Get blocklist -->
//! <iq type='get' id='blocklist1'>
//!   <blocklist xmlns='urn:xmpp:blocking'/>
//! </iq>
//!
//! <!-- Block a JID -->
//! <iq type='set' id='block1'>
//!   <block xmlns='urn:xmpp:blocking'>
//!     <item jid='romeo@montague.net'/>
//!   </block>
//! </iq>
//!
//! <!-- Unblock all JIDs -->
//! <iq type='set' id='unblock2'>
//!   <unblock xmlns='urn:xmpp:blocking'/>
//! </iq>
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use jid::{FullJid, Jid};
use minidom::Element;
use tracing::debug;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::presence::Presence;

use super::{result_reply, result_with, Broadcast, Outcome};
use crate::error::PrivacyError;
use crate::list::{PrivacyItem, PrivacyList};
use crate::notify;
use crate::pipeline::PrivacyEngine;
use crate::PrivacyHost;

/// Namespace for XEP-0191 Blocking Command.
pub const NS_BLOCKING: &str = "urn:xmpp:blocking";

/// Namespace for the Blocking error marker (`<blocked/>`).
pub const NS_BLOCKING_ERRORS: &str = "urn:xmpp:blocking:errors";

/// Check if an IQ stanza is a blocking query (XEP-0191).
pub fn is_blocking_iq(iq: &Iq) -> bool {
    match &iq.payload {
        IqType::Get(elem) => elem.name() == "blocklist" && elem.ns() == NS_BLOCKING,
        IqType::Set(elem) => {
            (elem.name() == "block" || elem.name() == "unblock") && elem.ns() == NS_BLOCKING
        }
        _ => false,
    }
}

/// Handle a blocklist get or a block/unblock set.
pub(crate) async fn handle<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
) -> Result<Outcome, PrivacyError> {
    match &iq.payload {
        IqType::Get(elem) if elem.name() == "blocklist" => {
            handle_blocklist_get(engine, host, session, iq).await
        }
        IqType::Set(elem) if elem.name() == "block" => {
            handle_block(engine, host, session, iq, elem).await
        }
        IqType::Set(elem) if elem.name() == "unblock" => {
            handle_unblock(engine, host, session, iq, elem).await
        }
        _ => Err(PrivacyError::bad_request_cancel(
            "Expected blocklist, block or unblock",
        )),
    }
}

/// Extract JIDs from item children of a blocking element.
fn extract_item_jids(elem: &Element) -> Result<Vec<String>, PrivacyError> {
    let mut jids = Vec::new();
    for child in elem.children() {
        if child.name() == "item" {
            match child.attr("jid") {
                Some(jid) => jids.push(jid.to_string()),
                None => {
                    return Err(PrivacyError::bad_request_cancel(
                        "Item element missing jid attribute",
                    ))
                }
            }
        }
    }
    Ok(jids)
}

/// Parse and canonicalize submitted JIDs, rejecting unparseable ones.
fn canonicalize(jids: &[String]) -> Result<Vec<Jid>, PrivacyError> {
    let mut parsed = Vec::with_capacity(jids.len());
    for raw in jids {
        let jid: Jid = raw
            .parse()
            .map_err(|_| PrivacyError::jid_malformed(format!("Invalid JID '{}'", raw)))?;
        parsed.push(jid);
    }
    Ok(parsed)
}

/// Reply with the Blocking view of the default list and subscribe the
/// session to Blocking-shaped pushes.
async fn handle_blocklist_get<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
) -> Result<Outcome, PrivacyError> {
    let bare = session.to_bare();
    let blocked = engine
        .default_list(host, &bare)
        .await?
        .map(|list| list.blocked_jids())
        .unwrap_or_default();

    let mut builder = Element::builder("blocklist", NS_BLOCKING);
    for jid in &blocked {
        builder = builder.append(
            Element::builder("item", NS_BLOCKING)
                .attr("jid", jid.as_str())
                .build(),
        );
    }

    engine.cache().add_blocklist_user(&session.to_string());
    debug!(session = %session, blocked = blocked.len(), "Blocklist queried");

    Ok(Outcome::reply_only(result_with(iq, builder.build())))
}

/// Prepend blocking-shape items to the default list, creating it if needed.
async fn handle_block<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
    elem: &Element,
) -> Result<Outcome, PrivacyError> {
    let raw = extract_item_jids(elem)?;
    if raw.is_empty() {
        return Err(PrivacyError::bad_request_cancel(
            "Block request must contain at least one item",
        ));
    }
    let targets = canonicalize(&raw)?;

    let bare = session.to_bare();
    let base = match engine.default_list(host, &bare).await? {
        Some(list) => (*list).clone(),
        None => PrivacyList::new(engine.config().block_list_name.clone()).as_default(true),
    };

    let mut seen: HashSet<String> = base.blocked_jids().into_iter().collect();
    let mut new_items = Vec::new();
    let mut newly_blocked = Vec::new();
    for jid in &targets {
        if seen.insert(jid.to_string()) {
            new_items.push(PrivacyItem::blocking(jid.to_string()));
            newly_blocked.push(jid.clone());
        }
    }

    if new_items.is_empty() {
        return Ok(Outcome::reply_only(result_reply(iq)));
    }

    let updated = Arc::new(base.with_prepended(new_items));
    engine.store_best_effort(host, &bare, &updated).await;
    engine
        .cache()
        .set_default(&bare.to_string(), Some(updated.clone()));
    engine
        .cache()
        .swap_named(&bare.to_string(), &updated.name, updated.clone());

    debug!(account = %bare, count = newly_blocked.len(), "JIDs blocked");

    Ok(Outcome {
        reply: result_reply(iq),
        broadcast: Some(Broadcast::Blocking {
            original: iq.clone(),
            list_name: updated.name.clone(),
        }),
        presences: session_presences(host, &bare, &newly_blocked, false),
    })
}

/// Remove blocking-shape items from the default list.
async fn handle_unblock<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
    elem: &Element,
) -> Result<Outcome, PrivacyError> {
    let raw = extract_item_jids(elem)?;
    let bare = session.to_bare();

    let current = match engine.default_list(host, &bare).await? {
        Some(list) => list,
        None => {
            if raw.is_empty() {
                // Nothing to strip.
                return Ok(Outcome::reply_only(result_reply(iq)));
            }
            return Err(PrivacyError::bad_request_cancel(
                "No blocklist to remove items from",
            ));
        }
    };

    let targets: Option<HashSet<String>> = if raw.is_empty() {
        None
    } else {
        Some(
            canonicalize(&raw)?
                .into_iter()
                .map(|jid| jid.to_string())
                .collect(),
        )
    };

    let (updated, removed) = current.without(|item| match item.blocked_jid() {
        Some(jid) => targets.as_ref().map_or(true, |t| t.contains(jid)),
        None => false,
    });

    if removed.is_empty() {
        return Ok(Outcome::reply_only(result_reply(iq)));
    }

    let unblocked: Vec<Jid> = removed
        .iter()
        .filter_map(|item| item.blocked_jid().and_then(|j| j.parse().ok()))
        .collect();

    let updated = Arc::new(updated);
    engine.store_best_effort(host, &bare, &updated).await;
    engine
        .cache()
        .swap_named(&bare.to_string(), &updated.name, updated.clone());
    if updated.is_empty() {
        engine.cache().set_default(&bare.to_string(), None);
    } else {
        engine
            .cache()
            .set_default(&bare.to_string(), Some(updated.clone()));
    }

    debug!(account = %bare, count = removed.len(), "JIDs unblocked");

    Ok(Outcome {
        reply: result_reply(iq),
        broadcast: Some(Broadcast::Blocking {
            original: iq.clone(),
            list_name: updated.name.clone(),
        }),
        presences: session_presences(host, &bare, &unblocked, true),
    })
}

/// Presence toward affected counterparties from every available session:
/// unavailable on block, available on unblock.
fn session_presences<H: PrivacyHost>(
    host: &H,
    bare: &jid::BareJid,
    counterparties: &[Jid],
    available: bool,
) -> Vec<Presence> {
    let mut presences = Vec::new();
    for session in host.sessions_of(bare) {
        if !host.session_is_available(&session) {
            continue;
        }
        let from = Jid::from(session);
        for counterparty in counterparties {
            presences.push(if available {
                notify::available_presence(&from, counterparty)
            } else {
                notify::unavailable_presence(&from, counterparty)
            });
        }
    }
    presences
}
