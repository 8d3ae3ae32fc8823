use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::cancel::CancelToken;
use crate::payload::ShipmentDetails;

/// Free-form shipment payload (addresses, parcels, amounts, hints).
pub type Payload = Map<String, Value>;

/// Label rendering hints (`label_type`, `display_mode`, `carrier_short_name`).
pub type Options = BTreeMap<String, String>;

/// Label type used when the caller gives none.
pub const DEFAULT_LABEL_TYPE: &str = "pdf";

/// Immutable input for one shipment-generation attempt.
///
/// Built once by the caller through [`ShipmentContext::builder`]; adapters
/// only ever borrow it.
#[derive(Debug, Clone)]
pub struct ShipmentContext {
    carrier_code: String,
    order_id: String,
    order_reference: Option<String>,
    shipment_number: String,
    payload: Payload,
    options: Options,
    cancel: CancelToken,
}

impl ShipmentContext {
    pub fn builder(
        carrier_code: impl Into<String>,
        order_id: impl Into<String>,
    ) -> ShipmentContextBuilder {
        ShipmentContextBuilder {
            carrier_code: carrier_code.into(),
            order_id: order_id.into(),
            order_reference: None,
            shipment_number: None,
            payload: Payload::new(),
            options: Options::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Carrier code as given by the caller (not normalized).
    pub fn carrier_code(&self) -> &str {
        &self.carrier_code
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn order_reference(&self) -> Option<&str> {
        self.order_reference.as_deref()
    }

    /// Pre-assigned or generated shipment number. Never empty.
    pub fn shipment_number(&self) -> &str {
        &self.shipment_number
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn label_type(&self) -> &str {
        self.option("label_type").unwrap_or(DEFAULT_LABEL_TYPE)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Typed view over the payload.
    pub fn details(&self) -> ShipmentDetails {
        ShipmentDetails::from_payload(&self.payload)
    }

    /// Customer reference: payload `reference`, then order reference, then
    /// order id.
    pub fn reference(&self) -> String {
        self.details()
            .reference
            .or_else(|| self.order_reference.clone())
            .unwrap_or_else(|| self.order_id.clone())
    }
}

/// Builder for [`ShipmentContext`].
#[derive(Debug, Clone)]
pub struct ShipmentContextBuilder {
    carrier_code: String,
    order_id: String,
    order_reference: Option<String>,
    shipment_number: Option<String>,
    payload: Payload,
    options: Options,
    cancel: CancelToken,
}

impl ShipmentContextBuilder {
    pub fn order_reference(mut self, reference: Option<impl Into<String>>) -> Self {
        self.order_reference = reference.map(Into::into);
        self
    }

    pub fn shipment_number(mut self, number: Option<impl Into<String>>) -> Self {
        self.shipment_number = number.map(Into::into);
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> ShipmentContext {
        let shipment_number = self
            .shipment_number
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| generate_shipment_number(&self.order_id));

        ShipmentContext {
            carrier_code: self.carrier_code,
            order_id: self.order_id,
            order_reference: self
                .order_reference
                .filter(|r| !r.trim().is_empty()),
            shipment_number,
            payload: self.payload,
            options: self.options,
            cancel: self.cancel,
        }
    }
}

/// `<order id><UTC yyyymmddHHMMSS>`, or just the timestamp for an empty id.
fn generate_shipment_number(order_id: &str) -> String {
    format!("{}{}", order_id.trim(), Utc::now().format("%Y%m%d%H%M%S"))
}
