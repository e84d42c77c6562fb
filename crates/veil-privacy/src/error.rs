//! Error types for the privacy engine.

use thiserror::Error;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};

/// Namespace for RFC 6120 stanza error conditions.
pub const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// Privacy engine errors.
#[derive(Debug, Error)]
pub enum PrivacyError {
    /// A stanza-level error to be reported to the requesting session.
    #[error("stanza error: {condition:?} ({error_type:?})")]
    Stanza {
        /// RFC 6120 error type attribute
        error_type: StanzaErrorType,
        /// RFC 6120 defined condition
        condition: StanzaErrorCondition,
        /// Optional human-readable text
        text: Option<String>,
    },

    /// Persistent list store failure
    #[error("list store error: {0}")]
    Store(String),

    /// Roster store failure
    #[error("roster error: {0}")]
    Roster(String),

    /// Stanza write path failure
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Internal engine error
    #[error("internal error: {0}")]
    Internal(String),
}

impl PrivacyError {
    /// Create a stanza error with the given type and condition.
    pub fn stanza(error_type: StanzaErrorType, condition: StanzaErrorCondition) -> Self {
        Self::Stanza {
            error_type,
            condition,
            text: None,
        }
    }

    /// Create a stanza error carrying explanatory text.
    pub fn stanza_with_text(
        error_type: StanzaErrorType,
        condition: StanzaErrorCondition,
        text: impl Into<String>,
    ) -> Self {
        Self::Stanza {
            error_type,
            condition,
            text: Some(text.into()),
        }
    }

    /// `bad-request (modify)`: malformed query shape.
    pub fn bad_request_modify(text: impl Into<String>) -> Self {
        Self::stanza_with_text(
            StanzaErrorType::Modify,
            StanzaErrorCondition::BadRequest,
            text,
        )
    }

    /// `bad-request (cancel)`: malformed item or empty block request.
    pub fn bad_request_cancel(text: impl Into<String>) -> Self {
        Self::stanza_with_text(
            StanzaErrorType::Cancel,
            StanzaErrorCondition::BadRequest,
            text,
        )
    }

    /// `item-not-found (cancel)`: referenced named list absent.
    pub fn item_not_found(text: impl Into<String>) -> Self {
        Self::stanza_with_text(
            StanzaErrorType::Cancel,
            StanzaErrorCondition::ItemNotFound,
            text,
        )
    }

    /// `conflict (cancel)`: change would affect another live session.
    pub fn conflict(text: impl Into<String>) -> Self {
        Self::stanza_with_text(StanzaErrorType::Cancel, StanzaErrorCondition::Conflict, text)
    }

    /// `jid-malformed (modify)`: unparseable JID in a block request.
    pub fn jid_malformed(text: impl Into<String>) -> Self {
        Self::stanza_with_text(
            StanzaErrorType::Modify,
            StanzaErrorCondition::JidMalformed,
            text,
        )
    }

    /// Create a new store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a new roster error.
    pub fn roster(msg: impl Into<String>) -> Self {
        Self::Roster(msg.into())
    }

    /// Create a new delivery error.
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// RFC 6120 stanza error type attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorType {
    /// Retry after changing the request
    Modify,
    /// Do not retry
    Cancel,
    /// Retry after providing credentials
    Auth,
    /// Retry after waiting
    Wait,
}

impl StanzaErrorType {
    /// Get the XML attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            StanzaErrorType::Modify => "modify",
            StanzaErrorType::Cancel => "cancel",
            StanzaErrorType::Auth => "auth",
            StanzaErrorType::Wait => "wait",
        }
    }

    fn to_parsed(self) -> ErrorType {
        match self {
            StanzaErrorType::Modify => ErrorType::Modify,
            StanzaErrorType::Cancel => ErrorType::Cancel,
            StanzaErrorType::Auth => ErrorType::Auth,
            StanzaErrorType::Wait => ErrorType::Wait,
        }
    }
}

/// RFC 6120 defined error conditions used by the privacy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorCondition {
    /// Malformed request
    BadRequest,
    /// Referenced entity does not exist
    ItemNotFound,
    /// Request conflicts with server state
    Conflict,
    /// A JID failed to parse
    JidMalformed,
    /// Service cannot be provided; also the generic denial condition
    ServiceUnavailable,
    /// Request does not meet acceptance criteria (sender-side block)
    NotAcceptable,
    /// Unexpected internal failure
    InternalServerError,
}

impl StanzaErrorCondition {
    /// Get the condition element name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StanzaErrorCondition::BadRequest => "bad-request",
            StanzaErrorCondition::ItemNotFound => "item-not-found",
            StanzaErrorCondition::Conflict => "conflict",
            StanzaErrorCondition::JidMalformed => "jid-malformed",
            StanzaErrorCondition::ServiceUnavailable => "service-unavailable",
            StanzaErrorCondition::NotAcceptable => "not-acceptable",
            StanzaErrorCondition::InternalServerError => "internal-server-error",
        }
    }

    fn to_parsed(self) -> DefinedCondition {
        match self {
            StanzaErrorCondition::BadRequest => DefinedCondition::BadRequest,
            StanzaErrorCondition::ItemNotFound => DefinedCondition::ItemNotFound,
            StanzaErrorCondition::Conflict => DefinedCondition::Conflict,
            StanzaErrorCondition::JidMalformed => DefinedCondition::JidMalformed,
            StanzaErrorCondition::ServiceUnavailable => DefinedCondition::ServiceUnavailable,
            StanzaErrorCondition::NotAcceptable => DefinedCondition::NotAcceptable,
            StanzaErrorCondition::InternalServerError => DefinedCondition::InternalServerError,
        }
    }
}

/// Build an error reply IQ for an admin request.
///
/// The reply swaps the from/to of the original IQ and carries the original id.
pub fn iq_error_reply(
    original: &Iq,
    error_type: StanzaErrorType,
    condition: StanzaErrorCondition,
    text: Option<&str>,
) -> Iq {
    let stanza_error = StanzaError::new(
        error_type.to_parsed(),
        condition.to_parsed(),
        "en",
        text.unwrap_or(""),
    );

    Iq {
        from: original.to.clone(),
        to: original.from.clone(),
        id: original.id.clone(),
        payload: IqType::Error(stanza_error),
    }
}

/// Build an error reply IQ from a [`PrivacyError`].
///
/// Non-stanza errors collapse to `internal-server-error (wait)`; the engine
/// treats the in-memory view as authoritative, so these are rare.
pub fn iq_error_from(original: &Iq, error: &PrivacyError) -> Iq {
    match error {
        PrivacyError::Stanza {
            error_type,
            condition,
            text,
        } => iq_error_reply(original, *error_type, *condition, text.as_deref()),
        PrivacyError::Store(_) => iq_error_reply(
            original,
            StanzaErrorType::Cancel,
            StanzaErrorCondition::ServiceUnavailable,
            None,
        ),
        other => iq_error_reply(
            original,
            StanzaErrorType::Wait,
            StanzaErrorCondition::InternalServerError,
            Some(&other.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minidom::Element;

    fn privacy_get_iq() -> Iq {
        let query = Element::builder("query", "jabber:iq:privacy").build();
        Iq {
            from: Some("user@veil.im/desk".parse().unwrap()),
            to: None,
            id: "q1".to_string(),
            payload: IqType::Get(query),
        }
    }

    #[test]
    fn test_iq_error_reply_swaps_addressing() {
        let iq = privacy_get_iq();
        let reply = iq_error_reply(
            &iq,
            StanzaErrorType::Cancel,
            StanzaErrorCondition::ItemNotFound,
            None,
        );

        assert_eq!(reply.id, "q1");
        assert_eq!(reply.to, iq.from);
        match reply.payload {
            IqType::Error(err) => {
                assert_eq!(
                    err.defined_condition,
                    DefinedCondition::ItemNotFound
                );
                assert_eq!(err.type_, ErrorType::Cancel);
            }
            _ => panic!("Expected error payload"),
        }
    }

    #[test]
    fn test_iq_error_from_stanza_variant() {
        let iq = privacy_get_iq();
        let err = PrivacyError::conflict("default list in use");
        let reply = iq_error_from(&iq, &err);

        match reply.payload {
            IqType::Error(err) => {
                assert_eq!(err.defined_condition, DefinedCondition::Conflict);
                assert_eq!(err.type_, ErrorType::Cancel);
            }
            _ => panic!("Expected error payload"),
        }
    }

    #[test]
    fn test_iq_error_from_store_failure() {
        let iq = privacy_get_iq();
        let err = PrivacyError::store("backend down");
        let reply = iq_error_from(&iq, &err);

        match reply.payload {
            IqType::Error(err) => {
                assert_eq!(
                    err.defined_condition,
                    DefinedCondition::ServiceUnavailable
                );
            }
            _ => panic!("Expected error payload"),
        }
    }

    #[test]
    fn test_condition_element_names() {
        assert_eq!(StanzaErrorCondition::BadRequest.as_str(), "bad-request");
        assert_eq!(StanzaErrorCondition::JidMalformed.as_str(), "jid-malformed");
        assert_eq!(
            StanzaErrorCondition::ServiceUnavailable.as_str(),
            "service-unavailable"
        );
        assert_eq!(StanzaErrorType::Modify.as_str(), "modify");
    }
}
