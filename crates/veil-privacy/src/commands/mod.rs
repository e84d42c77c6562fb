//! Administrative IQ handling for the privacy protocols.
//!
//! Five operations arrive here from the ingress hook: privacy list query and
//! set (`jabber:iq:privacy`), block-list query and block/unblock
//! (`urn:xmpp:blocking`), and the visibility toggle
//! (`urn:xmpp:invisible:0|1`). Every operation replies exactly once; on
//! success the reply is emitted before the sibling-session broadcast, and
//! the broadcast before any synthesized presence.

pub mod blocking;
pub mod privacy;
pub mod visibility;

use jid::FullJid;
use tracing::{instrument, warn};
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::presence::Presence;

use crate::error::{iq_error_from, PrivacyError};
use crate::notify::{self, ListChange};
use crate::pipeline::PrivacyEngine;
use crate::types::Stanza;
use crate::PrivacyHost;

/// Sibling-session push attached to a command outcome.
#[derive(Debug)]
pub(crate) enum Broadcast {
    /// Privacy-shaped push carrying only the list name.
    Privacy { list_name: String },
    /// The original block/unblock IQ, re-addressed per receiving session.
    Blocking { original: Iq, list_name: String },
}

/// What a successful admin command produces.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub reply: Iq,
    pub broadcast: Option<Broadcast>,
    pub presences: Vec<Presence>,
}

impl Outcome {
    pub fn reply_only(reply: Iq) -> Self {
        Self {
            reply,
            broadcast: None,
            presences: Vec::new(),
        }
    }
}

/// Build an empty result reply for an admin IQ.
pub(crate) fn result_reply(original: &Iq) -> Iq {
    Iq {
        from: original.to.clone(),
        to: original.from.clone(),
        id: original.id.clone(),
        payload: IqType::Result(None),
    }
}

/// Build a result reply carrying a payload element.
pub(crate) fn result_with(original: &Iq, payload: minidom::Element) -> Iq {
    Iq {
        from: original.to.clone(),
        to: original.from.clone(),
        id: original.id.clone(),
        payload: IqType::Result(Some(payload)),
    }
}

/// Whether an IQ is one of the admin methods this engine owns.
pub fn is_admin_iq(iq: &Iq) -> bool {
    privacy::is_privacy_iq(iq) || blocking::is_blocking_iq(iq) || visibility::is_visibility_iq(iq)
}

/// Handle an admin IQ bound to a connected session.
///
/// The submitting session receives exactly one reply, result or error. The
/// returned error covers only write-path failures toward that session.
#[instrument(skip(engine, host, iq), fields(session = %session, id = %iq.id))]
pub async fn handle_admin_iq<H: PrivacyHost>(
    engine: &PrivacyEngine,
    host: &H,
    session: &FullJid,
    iq: &Iq,
) -> Result<(), PrivacyError> {
    let outcome = if privacy::is_privacy_iq(iq) {
        privacy::handle(engine, host, session, iq).await
    } else if blocking::is_blocking_iq(iq) {
        blocking::handle(engine, host, session, iq).await
    } else if visibility::is_visibility_iq(iq) {
        visibility::handle(engine, host, session, iq).await
    } else {
        return Ok(());
    };

    match outcome {
        Ok(outcome) => {
            host.send_to_session(session, Stanza::Iq(outcome.reply))
                .await?;

            if let Some(broadcast) = &outcome.broadcast {
                let change = match broadcast {
                    Broadcast::Privacy { list_name } => ListChange::Privacy {
                        list_name: list_name.as_str(),
                    },
                    Broadcast::Blocking {
                        original,
                        list_name,
                    } => ListChange::Blocking {
                        original,
                        list_name: list_name.as_str(),
                    },
                };
                notify::broadcast_list_change(host, engine.cache(), session, change).await;
            }

            notify::route_presences(host, outcome.presences).await;
            Ok(())
        }
        Err(err) => {
            warn!(error = %err, "Admin command rejected");
            host.send_to_session(session, Stanza::Iq(iq_error_from(iq, &err)))
                .await
        }
    }
}
