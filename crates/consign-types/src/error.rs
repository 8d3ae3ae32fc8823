use serde::{Deserialize, Serialize};
use thiserror::Error;

use consign_retry::ErrorClass;

/// Longest body excerpt rendered into logs.
const EXCERPT_LIMIT: usize = 4096;

/// Failure taxonomy shared by every carrier adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required credential or URL is absent; nothing was sent.
    ConfigurationMissing,
    /// The payload cannot be turned into a carrier request; nothing was sent.
    InvalidRequest,
    /// Connection, DNS or timeout error.
    TransportFailure,
    /// Non-2xx status, unexpected content type or unparsable body.
    ProtocolFailure,
    /// 2xx response carrying a carrier failure code.
    BusinessRejection,
    /// No label could be obtained.
    LabelUnavailable,
    /// The attempt's cancel token fired.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigurationMissing => "configuration missing",
            ErrorKind::InvalidRequest => "invalid request",
            ErrorKind::TransportFailure => "transport failure",
            ErrorKind::ProtocolFailure => "protocol failure",
            ErrorKind::BusinessRejection => "business rejection",
            ErrorKind::LabelUnavailable => "label unavailable",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Retry classification when no remote shipment is known to exist.
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorKind::TransportFailure => ErrorClass::Retryable,
            ErrorKind::ConfigurationMissing
            | ErrorKind::InvalidRequest
            | ErrorKind::ProtocolFailure
            | ErrorKind::BusinessRejection => ErrorClass::Permanent,
            ErrorKind::LabelUnavailable | ErrorKind::Cancelled => ErrorClass::Ambiguous,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw carrier response kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub body: String,
}

impl RawResponse {
    /// Body cut to a loggable size on a char boundary.
    pub fn excerpt(&self) -> &str {
        if self.body.len() <= EXCERPT_LIMIT {
            return &self.body;
        }
        let mut end = EXCERPT_LIMIT;
        while !self.body.is_char_boundary(end) {
            end -= 1;
        }
        &self.body[..end]
    }
}

/// Typed failure of a carrier adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{carrier}] {kind}: {message}")]
pub struct CarrierError {
    /// Adapter code (`GLS`, `DHL`, ...).
    pub carrier: String,
    pub kind: ErrorKind,
    /// Diagnostic; carrier-supplied text when available.
    pub message: String,
    /// Raw response when one was received.
    pub response: Option<RawResponse>,
    /// Shipment number the carrier already created, if any.
    pub remote_shipment: Option<String>,
}

impl CarrierError {
    pub fn new(carrier: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            carrier: carrier.into(),
            kind,
            message: message.into(),
            response: None,
            remote_shipment: None,
        }
    }

    pub fn configuration(carrier: &str, message: impl Into<String>) -> Self {
        Self::new(carrier, ErrorKind::ConfigurationMissing, message)
    }

    pub fn invalid_request(carrier: &str, message: impl Into<String>) -> Self {
        Self::new(carrier, ErrorKind::InvalidRequest, message)
    }

    pub fn transport(carrier: &str, message: impl Into<String>) -> Self {
        Self::new(carrier, ErrorKind::TransportFailure, message)
    }

    pub fn protocol(carrier: &str, message: impl Into<String>) -> Self {
        Self::new(carrier, ErrorKind::ProtocolFailure, message)
    }

    pub fn rejected(carrier: &str, message: impl Into<String>) -> Self {
        Self::new(carrier, ErrorKind::BusinessRejection, message)
    }

    pub fn label_unavailable(carrier: &str, message: impl Into<String>) -> Self {
        Self::new(carrier, ErrorKind::LabelUnavailable, message)
    }

    pub fn cancelled(carrier: &str) -> Self {
        Self::new(carrier, ErrorKind::Cancelled, "attempt cancelled")
    }

    pub fn with_response(mut self, response: RawResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_remote_shipment(mut self, shipment_number: impl Into<String>) -> Self {
        self.remote_shipment = Some(shipment_number.into());
        self
    }

    /// The carrier holds a shipment this attempt could not finish.
    pub fn is_orphaned(&self) -> bool {
        self.remote_shipment.is_some()
    }

    /// Whether re-running the whole attempt is safe.
    pub fn class(&self) -> ErrorClass {
        if self.is_orphaned() {
            ErrorClass::Ambiguous
        } else {
            self.kind.class()
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}
