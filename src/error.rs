use crate::envelope::ConnackCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broker and connector errors.
///
/// # Error Categories
///
/// - **Validation**: `InvalidTopic`, `InvalidPattern`, `InvalidIntent`,
///   `InvalidApplication`
/// - **Routing**: `NotQualified`, `NullProvider`, `RequestReply`,
///   `UnknownSubscriber`; synchronous rejections of a publishing operation,
///   reported back to the publisher as a failure status and never broadcast
/// - **Connection**: `ConnectRefused`, `OriginMismatch`, `NotConnected`
/// - **Timeouts**: `DiscoveryTimeout`, `DeliveryTimeout`, raised on the
///   client side only
/// - **Transport**: `ChannelClosed`, `BrokerBusy`
///
/// The display text of a routing error is what the publisher receives as
/// delivery-status details, verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("invalid topic pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    #[error("invalid application: {0}")]
    InvalidApplication(String),

    #[error("application '{app}' is not qualified to publish intents of type '{kind}'; no matching intention is declared")]
    NotQualified { app: String, kind: String },

    #[error("no application provides a capability matching intents of type '{kind}'")]
    NullProvider { kind: String },

    #[error("request cannot be answered: {0}")]
    RequestReply(String),

    #[error("no subscription is registered under subscriber id '{0}'")]
    UnknownSubscriber(String),

    #[error("connect refused ({code}): {details}")]
    ConnectRefused { code: ConnackCode, details: String },

    #[error("asserted origin '{asserted}' does not match the registered origin of the connected application")]
    OriginMismatch { asserted: String },

    #[error("broker discovery timed out")]
    DiscoveryTimeout,

    #[error("delivery acknowledgment timed out")]
    DeliveryTimeout,

    #[error("not connected to a broker")]
    NotConnected,

    #[error("context channel closed")]
    ChannelClosed,

    #[error("broker inbox is full")]
    BrokerBusy,

    /// A failure reported by the broker for an acknowledged operation. The
    /// payload is the delivery-status details, verbatim; interceptor
    /// rejections surface through this variant unchanged.
    #[error("{0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_errors_render_their_cause() {
        let err = Error::NotQualified {
            app: "shop".to_string(),
            kind: "print".to_string(),
        };
        assert!(err.to_string().contains("not qualified"));
        assert!(err.to_string().contains("print"));

        let err = Error::NullProvider {
            kind: "print".to_string(),
        };
        assert!(err.to_string().contains("capability"));
    }

    #[test]
    fn rejected_renders_details_verbatim() {
        let err = Error::Rejected("payload too large".to_string());
        assert_eq!(err.to_string(), "payload too large");
    }

    #[test]
    fn connect_refusal_carries_the_wire_code() {
        let err = Error::ConnectRefused {
            code: ConnackCode::Blocked,
            details: "origin mismatch".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "connect refused (refused:blocked): origin mismatch"
        );
    }
}
