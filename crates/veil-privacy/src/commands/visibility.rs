//! Invisible Command (`urn:xmpp:invisible:0` / `urn:xmpp:invisible:1`).
//!
//! Invisibility is a session-scoped profile expressed through the privacy
//! rule space: going invisible injects an invisibility-shape item (deny
//! outbound presence to everyone) into the session's active list, creating
//! a transient in-memory list when the session has none. Version 1 adds the
//! `probe` attribute, which extends the deny to presence probes.
//!
//! ## XML Format
//!
//! ```xml
//! <iq type='set' id='inv1'>
//!   <invisible xmlns='urn:xmpp:invisible:1' probe='true'/>
//! </iq>
//!
//! <iq type='set' id='vis1'>
//!   <visible xmlns='urn:xmpp:invisible:1'/>
//! </iq>
//! ```

use std::sync::Arc;

use jid::{FullJid, Jid};
use tracing::debug;
use xmpp_parsers::iq::{Iq, IqType};

use super::{result_reply, Broadcast, Outcome};
use crate::error::PrivacyError;
use crate::list::{PrivacyItem, PrivacyList};
use crate::notify;
use crate::pipeline::PrivacyEngine;
use crate::PrivacyHost;

/// Namespace for the invisible command, version 0.
pub const NS_INVISIBLE_0: &str = "urn:xmpp:invisible:0";

/// Namespace for the invisible command, version 1 (probe attribute).
pub const NS_INVISIBLE_1: &str = "urn:xmpp:invisible:1";

/// Check if an IQ is a visibility toggle.
pub fn is_visibility_iq(iq: &Iq) -> bool {
    match &iq.payload {
        IqType::Set(elem) => {
            (elem.ns() == NS_INVISIBLE_0 || elem.ns() == NS_INVISIBLE_1)
                && (elem.name() == "invisible" || elem.name() == "visible")
        }
        _ => false,
    }
}

/// Handle an invisible/visible set.
pub(crate) async fn handle<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
) -> Result<Outcome, PrivacyError> {
    match &iq.payload {
        IqType::Set(elem) if elem.name() == "invisible" => {
            let probe = matches!(elem.attr("probe"), Some("true") | Some("1"));
            handle_invisible(engine, host, session, iq, probe).await
        }
        IqType::Set(elem) if elem.name() == "visible" => {
            handle_visible(engine, host, session, iq).await
        }
        _ => Err(PrivacyError::bad_request_cancel(
            "Expected invisible or visible",
        )),
    }
}

async fn handle_invisible<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
    probe: bool,
) -> Result<Outcome, PrivacyError> {
    let session_key = session.to_string();
    let bare = session.to_bare();

    match engine.cache().get_active(&session_key) {
        // Already invisible: only the probe marker may need adjusting.
        Some(active) if active.invisibility_item().is_some() => {
            let current_probe = active.invisibility_item().map(|i| i.probe).unwrap_or(false);
            if current_probe != probe {
                let mut items = active.items.clone();
                for item in items.iter_mut() {
                    if item.is_invisibility_shape() {
                        item.probe = probe;
                    }
                }
                let adjusted = Arc::new(PrivacyList {
                    name: active.name.clone(),
                    items,
                    default: active.default,
                    transient: active.transient,
                });
                engine.cache().set_active(&session_key, Some(adjusted));
                debug!(session = %session, probe = probe, "Invisibility probe marker adjusted");
            }
            Ok(Outcome::reply_only(result_reply(iq)))
        }
        // Named active list without an invisibility item: inject one.
        Some(active) => {
            let updated = Arc::new(active.with_prepended(vec![PrivacyItem::invisibility(probe)]));
            if !updated.transient {
                engine.store_best_effort(host, &bare, &updated).await;
                engine
                    .cache()
                    .swap_named(&bare.to_string(), &updated.name, updated.clone());
            }
            engine.cache().set_active(&session_key, Some(updated.clone()));
            debug!(session = %session, list = %updated.name, "Invisibility item injected");
            went_invisible(host, session, iq, &updated).await
        }
        // No active list: create a transient one.
        None => {
            let created = Arc::new(
                PrivacyList::new(engine.config().invisible_list_name.clone())
                    .with_prepended(vec![PrivacyItem::invisibility(probe)])
                    .as_transient(),
            );
            engine.cache().set_active(&session_key, Some(created.clone()));
            debug!(session = %session, "Transient invisibility list created");
            went_invisible(host, session, iq, &created).await
        }
    }
}

/// Outcome for a session that just became invisible.
///
/// A session past its initial presence broadcasts unavailable to everyone
/// who would otherwise see it; sessions that never went available have
/// nothing to retract. Persisted (named) lists also push the list name to
/// sibling sessions.
async fn went_invisible<H: PrivacyHost>(
    host: &H,
    session: &FullJid,
    iq: &Iq,
    list: &PrivacyList,
) -> Result<Outcome, PrivacyError> {
    let presences = if host.session_is_available(session) {
        notify::presence_updates(host, &Jid::from(session.clone()), list).await
    } else {
        Vec::new()
    };

    let broadcast = if list.transient {
        None
    } else {
        Some(Broadcast::Privacy {
            list_name: list.name.clone(),
        })
    };

    Ok(Outcome {
        reply: result_reply(iq),
        broadcast,
        presences,
    })
}

async fn handle_visible<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
) -> Result<Outcome, PrivacyError> {
    let session_key = session.to_string();
    let bare = session.to_bare();

    let active = match engine.cache().get_active(&session_key) {
        Some(active) => active,
        None => return Ok(Outcome::reply_only(result_reply(iq))),
    };

    let (updated, removed) = active.without(|item| item.is_invisibility_shape());
    if removed.is_empty() {
        return Ok(Outcome::reply_only(result_reply(iq)));
    }

    if active.transient || updated.is_empty() {
        engine.cache().set_active(&session_key, None);
        debug!(session = %session, "Invisibility binding discarded");
        return Ok(Outcome::reply_only(result_reply(iq)));
    }

    let updated = Arc::new(updated);
    engine.store_best_effort(host, &bare, &updated).await;
    engine
        .cache()
        .swap_named(&bare.to_string(), &updated.name, updated.clone());
    engine.cache().set_active(&session_key, Some(updated.clone()));
    debug!(session = %session, list = %updated.name, "Invisibility items removed");

    Ok(Outcome {
        reply: result_reply(iq),
        broadcast: Some(Broadcast::Privacy {
            list_name: updated.name.clone(),
        }),
        presences: Vec::new(),
    })
}
