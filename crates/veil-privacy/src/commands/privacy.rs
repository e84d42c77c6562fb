//! XEP-0016 Privacy Lists administration.
//!
//! ## XML Format
//!
//! ```xml
//! <!-- Enumerate lists -->
//! <iq type='get' id='getlist1'>
//!   <query xmlns='jabber:iq:privacy'/>
//! </iq>
//!
//! <!-- Enumeration response -->
//! <iq type='result' id='getlist1'>
//!   <query xmlns='jabber:iq:privacy'>
//!     <active name='work'/>
//!     <default name='block'/>
//!     <list name='work'/>
//!     <list name='block'/>
//!   </query>
//! </iq>
//!
//! <!-- Replace a list -->
//! <iq type='set' id='edit1'>
//!   <query xmlns='jabber:iq:privacy'>
//!     <list name='work'>
//!       <item type='jid' value='tybalt@capulet.lit' action='deny' order='1'/>
//!     </list>
//!   </query>
//! </iq>
//!
//! <!-- Activate / set default -->
//! <iq type='set' id='active1'>
//!   <query xmlns='jabber:iq:privacy'><active name='work'/></query>
//! </iq>
//! ```
//!
//! Deletion is a `set` of a named list with no items. Conflict rules protect
//! sibling sessions: the default cannot be changed away underneath a session
//! relying on it, and a list another session has active cannot be removed.

use std::sync::Arc;

use jid::{FullJid, Jid};
use minidom::Element;
use tracing::debug;
use xmpp_parsers::iq::{Iq, IqType};

use super::{result_reply, result_with, Broadcast, Outcome};
use crate::error::PrivacyError;
use crate::list::{PrivacyItem, PrivacyList, NS_PRIVACY};
use crate::notify;
use crate::pipeline::PrivacyEngine;
use crate::PrivacyHost;

/// Check if an IQ is a privacy list query (XEP-0016).
pub fn is_privacy_iq(iq: &Iq) -> bool {
    match &iq.payload {
        IqType::Get(elem) | IqType::Set(elem) => {
            elem.name() == "query" && elem.ns() == NS_PRIVACY
        }
        _ => false,
    }
}

/// Handle a privacy list get or set.
pub(crate) async fn handle<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
) -> Result<Outcome, PrivacyError> {
    match &iq.payload {
        IqType::Get(query) => handle_get(engine, host, session, iq, query).await,
        IqType::Set(query) => handle_set(engine, host, session, iq, query).await,
        _ => Err(PrivacyError::bad_request_cancel(
            "Expected IQ get or set for privacy query",
        )),
    }
}

async fn handle_get<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
    query: &Element,
) -> Result<Outcome, PrivacyError> {
    let named: Vec<&Element> = query.children().filter(|c| c.name() == "list").collect();
    let bare = session.to_bare();

    match named.len() {
        // Empty body: enumerate active, default and all owned list names.
        0 => {
            let mut reply = Element::builder("query", NS_PRIVACY);

            if let Some(active) = engine.cache().get_active(&session.to_string()) {
                reply = reply.append(
                    Element::builder("active", NS_PRIVACY)
                        .attr("name", active.name.as_str())
                        .build(),
                );
            }
            if let Some(default) = engine.default_list(host, &bare).await? {
                reply = reply.append(
                    Element::builder("default", NS_PRIVACY)
                        .attr("name", default.name.as_str())
                        .build(),
                );
            }
            for list in host.list_privacy_lists(&bare).await? {
                reply = reply.append(
                    Element::builder("list", NS_PRIVACY)
                        .attr("name", list.name.as_str())
                        .build(),
                );
            }

            Ok(Outcome::reply_only(result_with(iq, reply.build())))
        }
        // Exactly one named list: return its items.
        1 => {
            let name = named[0].attr("name").ok_or_else(|| {
                PrivacyError::bad_request_modify("List element requires a name")
            })?;
            let list = engine
                .resolve_list(host, session, name)
                .await?
                .ok_or_else(|| {
                    PrivacyError::item_not_found(format!("No privacy list named '{}'", name))
                })?;

            let reply = Element::builder("query", NS_PRIVACY)
                .append(list.to_element())
                .build();
            Ok(Outcome::reply_only(result_with(iq, reply)))
        }
        _ => Err(PrivacyError::bad_request_modify(
            "At most one list may be fetched per query",
        )),
    }
}

async fn handle_set<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
    query: &Element,
) -> Result<Outcome, PrivacyError> {
    let children: Vec<&Element> = query.children().collect();
    if children.len() != 1 {
        return Err(PrivacyError::bad_request_modify(
            "Privacy set must contain exactly one child",
        ));
    }

    let child = children[0];
    match child.name() {
        "active" => set_active(engine, host, session, iq, child).await,
        "default" => set_default(engine, host, session, iq, child).await,
        "list" => set_list(engine, host, session, iq, child).await,
        other => Err(PrivacyError::bad_request_modify(format!(
            "Unexpected privacy set child: {}",
            other
        ))),
    }
}

/// Bind or clear the session's active list.
async fn set_active<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
    child: &Element,
) -> Result<Outcome, PrivacyError> {
    let name = child.attr("name").unwrap_or("");
    let session_key = session.to_string();

    if name.is_empty() {
        engine.cache().set_active(&session_key, None);
        return Ok(Outcome::reply_only(result_reply(iq)));
    }

    let list = engine
        .resolve_list(host, session, name)
        .await?
        .ok_or_else(|| {
            PrivacyError::item_not_found(format!("No privacy list named '{}'", name))
        })?;
    engine.cache().set_active(&session_key, Some(list));

    Ok(Outcome::reply_only(result_reply(iq)))
}

/// Set or detach the account default list.
async fn set_default<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
    child: &Element,
) -> Result<Outcome, PrivacyError> {
    let name = child.attr("name").unwrap_or("");
    let bare = session.to_bare();
    let current = engine.default_list(host, &bare).await?;

    if name.is_empty() {
        if let Some(current) = current {
            let detached = (*current).clone().as_default(false);
            engine.store_best_effort(host, &bare, &detached).await;
            engine.cache().set_default(&bare.to_string(), None);
            debug!(account = %bare, list = %current.name, "Default list detached");
        }
        return Ok(Outcome::reply_only(result_reply(iq)));
    }

    if let Some(current) = &current {
        if current.name == name {
            return Ok(Outcome::reply_only(result_reply(iq)));
        }
        // Sessions with no active binding are using the current default.
        if engine.other_session_on_default(host, session) {
            return Err(PrivacyError::conflict(
                "Default list is in use by another session",
            ));
        }
    }

    let list = engine
        .resolve_list(host, session, name)
        .await?
        .ok_or_else(|| {
            PrivacyError::item_not_found(format!("No privacy list named '{}'", name))
        })?;
    let promoted = Arc::new((*list).clone().as_default(true));
    engine.store_best_effort(host, &bare, &promoted).await;
    engine.cache().set_default(&bare.to_string(), Some(promoted));

    Ok(Outcome::reply_only(result_reply(iq)))
}

/// Create, replace or delete a named list.
async fn set_list<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
    child: &Element,
) -> Result<Outcome, PrivacyError> {
    let name = child
        .attr("name")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| PrivacyError::bad_request_modify("List element requires a name"))?;

    let bare = session.to_bare();
    let session_key = session.to_string();
    let current_default = engine.default_list(host, &bare).await?;
    let is_default = current_default
        .as_ref()
        .map(|d| d.name == name)
        .unwrap_or(false);

    // No children: delete semantics.
    if child.children().next().is_none() {
        if is_default && engine.other_session_on_default(host, session) {
            return Err(PrivacyError::conflict(
                "Default list is in use by another session",
            ));
        }
        if engine.other_session_has_active(host, session, name) {
            return Err(PrivacyError::conflict(
                "List is active on another session",
            ));
        }

        engine
            .store_best_effort(host, &bare, &PrivacyList::new(name))
            .await;
        if is_default {
            engine.cache().set_default(&bare.to_string(), None);
        }
        if engine
            .cache()
            .get_active(&session_key)
            .map(|l| l.name == name)
            .unwrap_or(false)
        {
            engine.cache().set_active(&session_key, None);
        }
        debug!(account = %bare, list = %name, "Privacy list removed");

        return Ok(Outcome {
            reply: result_reply(iq),
            broadcast: Some(Broadcast::Privacy {
                list_name: name.to_string(),
            }),
            presences: Vec::new(),
        });
    }

    // Create or replace: validate everything before any state changes.
    let mut items = Vec::with_capacity(child.children().count());
    for item_el in child.children() {
        items.push(PrivacyItem::from_element(item_el)?);
    }

    let list = Arc::new(PrivacyList::from_items(name, items).as_default(is_default));
    engine.store_best_effort(host, &bare, &list).await;
    engine
        .cache()
        .swap_named(&bare.to_string(), name, list.clone());
    if is_default {
        engine.cache().set_default(&bare.to_string(), Some(list.clone()));
    }

    let active_matches = engine
        .cache()
        .get_active(&session_key)
        .map(|l| l.name == name)
        .unwrap_or(false);
    let presences = if is_default || active_matches {
        notify::presence_updates(host, &Jid::from(session.clone()), &list).await
    } else {
        Vec::new()
    };

    debug!(account = %bare, list = %name, items = list.items.len(), "Privacy list stored");

    Ok(Outcome {
        reply: result_reply(iq),
        broadcast: Some(Broadcast::Privacy {
            list_name: name.to_string(),
        }),
        presences,
    })
}
