//! Common stanza types for the privacy engine.

use jid::Jid;
use xmpp_parsers::iq::Iq;
use xmpp_parsers::message::Message;
use xmpp_parsers::presence::Presence;

/// A top-level XMPP stanza.
#[derive(Debug, Clone)]
pub enum Stanza {
    /// Message stanza
    Message(Message),
    /// Presence stanza
    Presence(Presence),
    /// IQ (info/query) stanza
    Iq(Iq),
}

impl Stanza {
    /// Get the stanza type name for tracing.
    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
            Stanza::Iq(_) => "iq",
        }
    }

    /// Get the sender JID, if present.
    pub fn from(&self) -> Option<&Jid> {
        match self {
            Stanza::Message(m) => m.from.as_ref(),
            Stanza::Presence(p) => p.from.as_ref(),
            Stanza::Iq(iq) => iq.from.as_ref(),
        }
    }

    /// Get the recipient JID, if present.
    pub fn to(&self) -> Option<&Jid> {
        match self {
            Stanza::Message(m) => m.to.as_ref(),
            Stanza::Presence(p) => p.to.as_ref(),
            Stanza::Iq(iq) => iq.to.as_ref(),
        }
    }

    /// Convert the stanza to a minidom Element.
    pub fn to_element(&self) -> minidom::Element {
        match self {
            Stanza::Message(m) => m.clone().into(),
            Stanza::Presence(p) => p.clone().into(),
            Stanza::Iq(iq) => iq.clone().into(),
        }
    }
}

impl From<Message> for Stanza {
    fn from(m: Message) -> Self {
        Stanza::Message(m)
    }
}

impl From<Presence> for Stanza {
    fn from(p: Presence) -> Self {
        Stanza::Presence(p)
    }
}

impl From<Iq> for Stanza {
    fn from(iq: Iq) -> Self {
        Stanza::Iq(iq)
    }
}

/// Direction of a stanza relative to the list owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Stanza is addressed to the owner
    Inbound,
    /// Stanza originates from the owner
    Outbound,
}

/// Result of evaluating a privacy list against a stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Delivery proceeds
    Allow,
    /// Delivery is denied
    Deny,
}

impl Verdict {
    /// Whether this verdict denies delivery.
    pub fn is_deny(&self) -> bool {
        matches!(self, Verdict::Deny)
    }
}
