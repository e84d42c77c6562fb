//! Roster contact types consumed by the predicate evaluator.
//!
//! The roster itself lives in the host server; the engine only reads
//! per-contact subscription state and group memberships through the
//! [`PrivacyHost`](crate::PrivacyHost) contract. Pending subscription
//! requests (`ask`) never influence privacy decisions.

use jid::BareJid;
use serde::{Deserialize, Serialize};

use crate::error::PrivacyError;

/// Subscription state between a user and a roster contact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subscription {
    /// No subscription exists between user and contact.
    #[default]
    None,
    /// User is subscribed to contact's presence.
    To,
    /// Contact is subscribed to user's presence.
    From,
    /// Mutual subscription.
    Both,
}

impl Subscription {
    /// Get the XML attribute value for this subscription state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Subscription::None => "none",
            Subscription::To => "to",
            Subscription::From => "from",
            Subscription::Both => "both",
        }
    }

    /// Parse a subscription state from a string.
    pub fn from_str(s: &str) -> Result<Self, PrivacyError> {
        match s {
            "none" => Ok(Subscription::None),
            "to" => Ok(Subscription::To),
            "from" => Ok(Subscription::From),
            "both" => Ok(Subscription::Both),
            _ => Err(PrivacyError::bad_request_cancel(format!(
                "Invalid subscription state: {}",
                s
            ))),
        }
    }

    /// Whether the user receives the contact's presence.
    pub fn has_to(&self) -> bool {
        matches!(self, Subscription::To | Subscription::Both)
    }

    /// Whether the contact receives the user's presence.
    pub fn has_from(&self) -> bool {
        matches!(self, Subscription::From | Subscription::Both)
    }
}

/// Pending subscription request marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AskType {
    /// An outbound subscribe is pending approval.
    Subscribe,
}

/// A contact in a user's roster, as seen by the predicate evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterItem {
    /// The contact's bare JID.
    pub jid: BareJid,
    /// Optional human-readable name for the contact.
    pub name: Option<String>,
    /// Current subscription state (pending bits carried separately in `ask`).
    pub subscription: Subscription,
    /// Pending subscription request, ignored by predicate matching.
    pub ask: Option<AskType>,
    /// Groups this contact belongs to.
    pub groups: Vec<String>,
}

impl RosterItem {
    /// Create a new roster item with no subscription and no groups.
    pub fn new(jid: BareJid) -> Self {
        Self {
            jid,
            name: None,
            subscription: Subscription::None,
            ask: None,
            groups: Vec::new(),
        }
    }

    /// Set the subscription state.
    pub fn set_subscription(mut self, subscription: Subscription) -> Self {
        self.subscription = subscription;
        self
    }

    /// Add a group.
    pub fn add_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Whether this contact belongs to the named group.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}
