//! Privacy list rule model.
//!
//! A [`PrivacyList`] is an ordered collection of [`PrivacyItem`] rules owned
//! by one account. Three protocols project onto this rule space:
//!
//! - Privacy Lists (`jabber:iq:privacy`) manipulate items directly.
//! - Blocking Command (`urn:xmpp:blocking`) reads and writes only items of
//!   *blocking shape* (deny a JID for every stanza kind).
//! - The invisible command injects items of *invisibility shape* (deny
//!   outbound presence to everyone).
//!
//! Shape classification is purely structural; no state is read.
//!
//! ## XML Format
//!
//! ```xml
//! <list name='work'>
//!   <item type='jid' value='tybalt@capulet.lit' action='deny' order='1'>
//!     <message/>
//!   </item>
//!   <item action='allow' order='2'/>
//! </list>
//! ```

use minidom::Element;
use serde::{Deserialize, Serialize};

use crate::error::PrivacyError;
use crate::roster::Subscription;

/// Namespace for XEP-0016 Privacy Lists.
pub const NS_PRIVACY: &str = "jabber:iq:privacy";

/// Rule action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Delivery proceeds.
    Allow,
    /// Delivery is denied.
    Deny,
}

impl Action {
    /// Get the XML attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
        }
    }

    /// Parse an action from a string.
    pub fn from_str(s: &str) -> Result<Self, PrivacyError> {
        match s {
            "allow" => Ok(Action::Allow),
            "deny" => Ok(Action::Deny),
            _ => Err(PrivacyError::bad_request_cancel(format!(
                "Invalid action: {}",
                s
            ))),
        }
    }
}

/// Who a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    /// Matches any counterparty.
    Any,
    /// Matches a JID pattern (full, bare, domain/resource, or domain).
    Jid(String),
    /// Matches contacts in the named roster group.
    Group(String),
    /// Matches contacts with exactly this subscription state.
    Subscription(Subscription),
}

impl Predicate {
    /// Whether this is the catch-all predicate.
    pub fn is_any(&self) -> bool {
        matches!(self, Predicate::Any)
    }

    /// Whether matching this predicate requires a roster lookup.
    pub fn needs_roster(&self) -> bool {
        matches!(self, Predicate::Group(_) | Predicate::Subscription(_))
    }
}

/// The set of stanza kinds a rule applies to.
///
/// An empty mask means the rule applies to every stanza kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StanzaMask {
    /// IQ stanzas
    pub iq: bool,
    /// Message stanzas
    pub message: bool,
    /// Inbound presence states
    pub presence_in: bool,
    /// Outbound presence states
    pub presence_out: bool,
}

impl StanzaMask {
    /// The empty mask (applies to everything).
    pub const ALL: StanzaMask = StanzaMask {
        iq: false,
        message: false,
        presence_in: false,
        presence_out: false,
    };

    /// Mask covering only outbound presence.
    pub const PRESENCE_OUT: StanzaMask = StanzaMask {
        iq: false,
        message: false,
        presence_in: false,
        presence_out: true,
    };

    /// Whether no stanza kind is selected (rule applies to everything).
    pub fn is_empty(&self) -> bool {
        !(self.iq || self.message || self.presence_in || self.presence_out)
    }
}

/// One rule in a privacy list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyItem {
    /// Position within the list, ascending.
    pub order: u32,
    /// What happens when the rule matches.
    pub action: Action,
    /// Who the rule applies to.
    pub predicate: Predicate,
    /// Which stanza kinds the rule applies to.
    pub mask: StanzaMask,
    /// Extends a `presence-out` rule to presence probes (invisibility
    /// extension; not part of the XEP-0016 wire format).
    pub probe: bool,
}

impl PrivacyItem {
    /// A blocking-shape item: deny a JID for every stanza kind.
    pub fn blocking(jid: impl Into<String>) -> Self {
        Self {
            order: 0,
            action: Action::Deny,
            predicate: Predicate::Jid(jid.into()),
            mask: StanzaMask::ALL,
            probe: false,
        }
    }

    /// An invisibility-shape item: deny outbound presence to everyone.
    pub fn invisibility(probe: bool) -> Self {
        Self {
            order: 0,
            action: Action::Deny,
            predicate: Predicate::Any,
            mask: StanzaMask::PRESENCE_OUT,
            probe,
        }
    }

    /// Whether this item has blocking shape.
    pub fn is_blocking_shape(&self) -> bool {
        matches!(self.predicate, Predicate::Jid(_))
            && self.action == Action::Deny
            && self.mask.is_empty()
    }

    /// Whether this item has invisibility shape.
    pub fn is_invisibility_shape(&self) -> bool {
        self.predicate.is_any()
            && self.action == Action::Deny
            && self.mask == StanzaMask::PRESENCE_OUT
    }

    /// Whether this item has invisibility shape restricted to probes.
    pub fn is_invisibility_probe_shape(&self) -> bool {
        self.is_invisibility_shape() && self.probe
    }

    /// The blocked JID pattern, for blocking-shape items.
    pub fn blocked_jid(&self) -> Option<&str> {
        if self.is_blocking_shape() {
            match &self.predicate {
                Predicate::Jid(jid) => Some(jid),
                _ => None,
            }
        } else {
            None
        }
    }

    /// Parse a privacy item from an XML element.
    ///
    /// Enforces the admin-set validation rules: `order` present and
    /// non-negative, `action` one of allow/deny, `type` (when present) one of
    /// jid/subscription/group with a `value`, and mask children restricted to
    /// the four stanza kinds.
    pub fn from_element(elem: &Element) -> Result<Self, PrivacyError> {
        if elem.name() != "item" {
            return Err(PrivacyError::bad_request_cancel(format!(
                "Unexpected element in list: {}",
                elem.name()
            )));
        }

        let order = elem
            .attr("order")
            .ok_or_else(|| {
                PrivacyError::bad_request_cancel("Privacy item missing 'order' attribute")
            })?
            .parse::<u32>()
            .map_err(|_| PrivacyError::bad_request_cancel("Privacy item 'order' is not a non-negative integer"))?;

        let action = elem
            .attr("action")
            .ok_or_else(|| {
                PrivacyError::bad_request_cancel("Privacy item missing 'action' attribute")
            })
            .and_then(Action::from_str)?;

        let predicate = match elem.attr("type") {
            None => Predicate::Any,
            Some(kind) => {
                let value = elem.attr("value").ok_or_else(|| {
                    PrivacyError::bad_request_cancel(format!(
                        "Privacy item of type '{}' missing 'value' attribute",
                        kind
                    ))
                })?;
                match kind {
                    "jid" => Predicate::Jid(value.to_string()),
                    "group" => Predicate::Group(value.to_string()),
                    "subscription" => Predicate::Subscription(Subscription::from_str(value)?),
                    _ => {
                        return Err(PrivacyError::bad_request_cancel(format!(
                            "Invalid privacy item type: {}",
                            kind
                        )))
                    }
                }
            }
        };

        let mut mask = StanzaMask::default();
        for child in elem.children() {
            match child.name() {
                "iq" => mask.iq = true,
                "message" => mask.message = true,
                "presence-in" => mask.presence_in = true,
                "presence-out" => mask.presence_out = true,
                other => {
                    return Err(PrivacyError::bad_request_cancel(format!(
                        "Invalid stanza kind in privacy item: {}",
                        other
                    )))
                }
            }
        }

        Ok(Self {
            order,
            action,
            predicate,
            mask,
            probe: false,
        })
    }

    /// Convert this item to an XML element.
    ///
    /// The probe marker is session-internal and has no wire representation.
    pub fn to_element(&self) -> Element {
        let mut builder = Element::builder("item", NS_PRIVACY)
            .attr("action", self.action.as_str())
            .attr("order", self.order.to_string());

        match &self.predicate {
            Predicate::Any => {}
            Predicate::Jid(value) => {
                builder = builder.attr("type", "jid").attr("value", value.as_str());
            }
            Predicate::Group(value) => {
                builder = builder.attr("type", "group").attr("value", value.as_str());
            }
            Predicate::Subscription(sub) => {
                builder = builder.attr("type", "subscription").attr("value", sub.as_str());
            }
        }

        for (set, name) in [
            (self.mask.message, "message"),
            (self.mask.iq, "iq"),
            (self.mask.presence_in, "presence-in"),
            (self.mask.presence_out, "presence-out"),
        ] {
            if set {
                builder = builder.append(Element::builder(name, NS_PRIVACY).build());
            }
        }

        builder.build()
    }
}

/// An identified, ordered privacy list.
///
/// Lists are copy-on-replace: mutation helpers build a fresh value and the
/// cache swaps bindings atomically. A list with no items means removal at the
/// store layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyList {
    /// List name, unique per owner.
    pub name: String,
    /// Items sorted by `order` ascending.
    pub items: Vec<PrivacyItem>,
    /// Whether this list is the account's default.
    pub default: bool,
    /// Whether this list exists only in memory for the session's lifetime
    /// (auto-created invisibility lists the user did not name).
    pub transient: bool,
}

impl PrivacyList {
    /// Create an empty list.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
            default: false,
            transient: false,
        }
    }

    /// Create a list from items, sorting them by `order` ascending.
    ///
    /// The sort is stable, so items sharing an `order` keep their submitted
    /// relative position.
    pub fn from_items(name: impl Into<String>, mut items: Vec<PrivacyItem>) -> Self {
        items.sort_by_key(|item| item.order);
        Self {
            name: name.into(),
            items,
            default: false,
            transient: false,
        }
    }

    /// Mark this list as the account default.
    pub fn as_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    /// Mark this list as session-transient.
    pub fn as_transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Whether the list has no items (removal sentinel at the store layer).
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The JID patterns of all blocking-shape items, in list order.
    pub fn blocked_jids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| item.blocked_jid().map(|j| j.to_string()))
            .collect()
    }

    /// Find the invisibility-shape item, if any.
    pub fn invisibility_item(&self) -> Option<&PrivacyItem> {
        self.items.iter().find(|item| item.is_invisibility_shape())
    }

    /// Build a new list with `new_items` placed before every existing item.
    ///
    /// New items receive orders below the current minimum; when the minimum
    /// leaves no room, existing orders are shifted up. Relative order is
    /// preserved on both sides.
    pub fn with_prepended(&self, new_items: Vec<PrivacyItem>) -> Self {
        let n = new_items.len() as u32;
        if n == 0 {
            return self.clone();
        }

        let min = self.items.first().map(|item| item.order).unwrap_or(n);
        let mut items = Vec::with_capacity(self.items.len() + new_items.len());

        if min >= n {
            let base = min - n;
            for (idx, mut item) in new_items.into_iter().enumerate() {
                item.order = base + idx as u32;
                items.push(item);
            }
            items.extend(self.items.iter().cloned());
        } else {
            let shift = n - min;
            for (idx, mut item) in new_items.into_iter().enumerate() {
                item.order = idx as u32;
                items.push(item);
            }
            items.extend(self.items.iter().cloned().map(|mut item| {
                item.order += shift;
                item
            }));
        }

        Self {
            name: self.name.clone(),
            items,
            default: self.default,
            transient: self.transient,
        }
    }

    /// Build a new list with items removed by predicate, returning the
    /// removed items alongside.
    pub fn without<F>(&self, mut remove: F) -> (Self, Vec<PrivacyItem>)
    where
        F: FnMut(&PrivacyItem) -> bool,
    {
        let mut kept = Vec::with_capacity(self.items.len());
        let mut removed = Vec::new();
        for item in &self.items {
            if remove(item) {
                removed.push(item.clone());
            } else {
                kept.push(item.clone());
            }
        }
        (
            Self {
                name: self.name.clone(),
                items: kept,
                default: self.default,
                transient: self.transient,
            },
            removed,
        )
    }

    /// Convert this list to a `<list/>` element with all items.
    pub fn to_element(&self) -> Element {
        let mut builder = Element::builder("list", NS_PRIVACY).attr("name", self.name.as_str());
        for item in &self.items {
            builder = builder.append(item.to_element());
        }
        builder.build()
    }
}
