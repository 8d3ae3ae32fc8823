use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::context::Payload;

/// One printable package label.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub package_id: String,
    /// Key under which the caller stores the label, usually the package id.
    pub storage_key: String,
    /// Carrier-issued tracking code, or a synthesized one.
    pub tracker_code: String,
    pub label_type: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl Label {
    /// Label whose storage key equals its package id.
    pub fn new(
        package_id: impl Into<String>,
        tracker_code: impl Into<String>,
        label_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        let package_id = package_id.into();
        Self {
            storage_key: package_id.clone(),
            package_id,
            tracker_code: tracker_code.into(),
            label_type: label_type.into(),
            content,
        }
    }

    pub fn is_pdf(&self) -> bool {
        self.content.starts_with(b"%PDF")
    }
}

impl std::fmt::Debug for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Label")
            .field("package_id", &self.package_id)
            .field("storage_key", &self.storage_key)
            .field("tracker_code", &self.tracker_code)
            .field("label_type", &self.label_type)
            .field("content_len", &self.content.len())
            .finish()
    }
}

/// Tracker code for carriers that do not issue one per package:
/// `<shipment number><1-based index, 3 digits>`.
pub fn synthesize_tracker(shipment_number: &str, package_index: u32) -> String {
    format!("{shipment_number}{package_index:03}")
}

/// Copy of `payload` with the carrier request fragment appended under
/// `<code>_request`. The caller's payload is left untouched.
pub fn request_snapshot(payload: &Payload, carrier_code: &str, fragment: Value) -> Payload {
    let mut snapshot = payload.clone();
    snapshot.insert(
        format!("{}_request", carrier_code.to_ascii_lowercase()),
        fragment,
    );
    snapshot
}

/// Rejected attempt to build a [`ShipmentResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidResult {
    #[error("shipment number is empty")]
    EmptyShipmentNumber,
}

/// Immutable outcome of a successful shipment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentResult {
    shipment_number: String,
    request: Payload,
    response: Option<Value>,
    labels: Vec<Label>,
}

impl ShipmentResult {
    pub fn new(
        shipment_number: impl Into<String>,
        request: Payload,
        response: Option<Value>,
        labels: Vec<Label>,
    ) -> Result<Self, InvalidResult> {
        let shipment_number = shipment_number.into().trim().to_string();
        if shipment_number.is_empty() {
            return Err(InvalidResult::EmptyShipmentNumber);
        }

        Ok(Self {
            shipment_number,
            request,
            response,
            labels,
        })
    }

    pub fn shipment_number(&self) -> &str {
        &self.shipment_number
    }

    /// Original payload plus the carrier request fragment.
    pub fn request(&self) -> &Payload {
        &self.request
    }

    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Split into `(shipment number, request snapshot, response snapshot, labels)`.
    pub fn into_parts(self) -> (String, Payload, Option<Value>, Vec<Label>) {
        (self.shipment_number, self.request, self.response, self.labels)
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_rejects_empty_shipment_number() {
        let err = ShipmentResult::new("  ", Payload::new(), None, vec![]).expect_err("must fail");
        assert_eq!(err, InvalidResult::EmptyShipmentNumber);
    }

    #[test]
    fn request_snapshot_appends_without_mutating() {
        let original = json!({"packages": 2}).as_object().cloned().expect("object");
        let snapshot = request_snapshot(&original, "GLS", json!("<Servicios/>"));

        assert_eq!(original.len(), 1);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["packages"], json!(2));
        assert_eq!(snapshot["gls_request"], json!("<Servicios/>"));
    }

    #[test]
    fn synthesized_tracker_pads_index() {
        assert_eq!(synthesize_tracker("SN1", 1), "SN1001");
        assert_eq!(synthesize_tracker("SN1", 12), "SN1012");
    }

    #[test]
    fn label_debug_hides_content() {
        let label = Label::new("P1", "T1", "pdf", b"%PDF-1.4 secret bytes".to_vec());
        let rendered = format!("{label:?}");
        assert!(rendered.contains("content_len: 21"));
        assert!(!rendered.contains("secret"));
        assert!(label.is_pdf());
        assert_eq!(label.storage_key, "P1");
    }

    #[test]
    fn label_serializes_content_as_base64() {
        let label = Label::new("P1", "T1", "pdf", b"%PDF".to_vec());
        let value = serde_json::to_value(&label).expect("serialize");
        assert_eq!(value["content"], json!("JVBERg=="));

        let back: Label = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, label);
    }

    #[test]
    fn into_parts_preserves_everything() {
        let labels = vec![Label::new("P1", "T1", "pdf", vec![1])];
        let result = ShipmentResult::new(
            "SN",
            Payload::new(),
            Some(json!({"ok": true})),
            labels.clone(),
        )
        .expect("result");
        let (number, request, response, out) = result.into_parts();
        assert_eq!(number, "SN");
        assert!(request.is_empty());
        assert_eq!(response, Some(json!({"ok": true})));
        assert_eq!(out, labels);
    }
}
