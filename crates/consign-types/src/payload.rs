//! Lenient typed views over the free-form shipment payload.
//!
//! Callers feed payloads assembled from web forms and order records, so
//! numbers arrive both as JSON numbers and as strings (sometimes with a
//! decimal comma). Readers here never fail: unusable values read as absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Payload;

/// Postal address of the sender or receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub contact: String,
    pub address: String,
    pub city: String,
    pub postcode: String,
    /// ISO 3166-1 alpha-2, uppercased. Empty when unknown.
    pub country: String,
    pub phone: String,
    pub email: String,
    pub vat: String,
}

impl Address {
    pub fn from_value(value: Option<&Value>) -> Self {
        let Some(Value::Object(map)) = value else {
            return Self::default();
        };
        let field = |key: &str| map.get(key).and_then(text).unwrap_or_default();

        Self {
            name: field("name"),
            contact: field("contact"),
            address: field("address"),
            city: field("city"),
            postcode: field("postcode"),
            country: field("country").to_ascii_uppercase(),
            phone: field("phone"),
            email: field("email"),
            vat: field("vat"),
        }
    }

    /// An address without a country is treated as domestic.
    pub fn is_domestic(&self, domestic_country: &str) -> bool {
        self.country.is_empty() || self.country.eq_ignore_ascii_case(domestic_country)
    }

    /// Postcode as the carrier expects it: zero-padded to `width` for
    /// domestic addresses, untouched otherwise.
    pub fn carrier_postcode(&self, domestic_country: &str, width: usize) -> String {
        if self.is_domestic(domestic_country) {
            pad_postcode(&self.postcode, width)
        } else {
            self.postcode.trim().to_string()
        }
    }

    /// Country code, defaulting to the carrier's domestic country.
    pub fn country_or<'a>(&'a self, domestic_country: &'a str) -> &'a str {
        if self.country.is_empty() {
            domestic_country
        } else {
            &self.country
        }
    }

    /// Name to print on the label: company name, else contact person.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.contact
        } else {
            &self.name
        }
    }
}

/// Left-pad an all-digit postcode with zeros up to `width`.
///
/// Codes containing anything but ASCII digits (`1000-001`, `SW1A 1AA`) are
/// only trimmed.
pub fn pad_postcode(code: &str, width: usize) -> String {
    let code = code.trim();
    if !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit()) {
        format!("{code:0>width$}")
    } else {
        code.to_string()
    }
}

/// Typed reading of the payload keys the adapters understand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentDetails {
    pub sender: Address,
    pub receiver: Address,
    /// Package count, at least 1.
    pub packages: u32,
    /// Total weight in kg.
    pub weight: Option<f64>,
    /// Per-package dimensions in cm.
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    /// Cash-on-delivery amount; only set when positive.
    pub cod_amount: Option<f64>,
    /// Declared insured value; only set when positive.
    pub insured_value: Option<f64>,
    pub message: Option<String>,
    pub reference: Option<String>,
    pub pickup_date: Option<String>,
    pub pickup_from: Option<String>,
    pub pickup_to: Option<String>,
    pub shipment_type: Option<String>,
    pub incoterm: Option<String>,
}

impl ShipmentDetails {
    pub fn from_payload(payload: &Payload) -> Self {
        let str_field = |key: &str| payload.get(key).and_then(text);
        let num_field = |key: &str| payload.get(key).and_then(number);
        let positive = |key: &str| num_field(key).filter(|n| *n > 0.0);

        Self {
            sender: Address::from_value(payload.get("sender")),
            receiver: Address::from_value(payload.get("receiver")),
            packages: package_count(payload.get("packages")),
            weight: positive("weight"),
            length: positive("length"),
            width: positive("width"),
            height: positive("height"),
            cod_amount: positive("cod_amount"),
            insured_value: positive("insured_value"),
            message: str_field("message"),
            reference: str_field("reference"),
            pickup_date: str_field("pickup_date"),
            pickup_from: str_field("pickup_from"),
            pickup_to: str_field("pickup_to"),
            shipment_type: str_field("shipment_type"),
            incoterm: str_field("incoterm"),
        }
    }

    /// Total weight divided evenly across packages, rounded to 2 decimals
    /// with a floor of 0.01 kg.
    pub fn per_package_weight(&self) -> Option<f64> {
        self.weight
            .map(|w| round2(w / f64::from(self.packages.max(1))).max(0.01))
    }

    /// Total weight, or `fallback` when the payload carries none.
    pub fn weight_or(&self, fallback: f64) -> f64 {
        self.weight.map(round2).unwrap_or(fallback)
    }

    /// Combined volume of all packages in cubic metres, when every dimension
    /// is known.
    pub fn volume_m3(&self) -> Option<f64> {
        let (l, w, h) = (self.length?, self.width?, self.height?);
        let per_package = l * w * h / 1_000_000.0;
        Some((per_package * f64::from(self.packages) * 1000.0).round() / 1000.0)
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn package_count(value: Option<&Value>) -> u32 {
    value
        .and_then(number)
        .map(|n| n.round().clamp(1.0, f64::from(u32::MAX)) as u32)
        .unwrap_or(1)
}
