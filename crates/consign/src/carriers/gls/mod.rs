//! GLS: hand-built SOAP request, labels returned inline as base64.
//!
//! Settings: `url`, `guid` (secret), and optionally `domestic_country`,
//! `postcode_width`. The legacy keys are `GLS_URL[_TEST]` and
//! `GLS_GUID[_TEST]`.

use chrono::Utc;
use consign_config::CarrierSettings;
use consign_http::{HttpClient, Request};
use consign_types::{
    CarrierError, Label, ShipmentContext, ShipmentResult, request_snapshot, synthesize_tracker,
};
use serde_json::Value;
use tracing::debug;

use super::{
    AddressRules, ensure_not_cancelled, ensure_package_count, http_error, orphaned, package_limit,
    settings_error, unexpected_status,
};
use crate::adapter::CarrierAdapter;

mod labels;
mod request;

pub use labels::{ExtractedLabel, LABEL_TAGS, ParsedResponse, ResponseError, parse_response};
pub use request::{ECONOMY_SERVICE, build_request, service_codes};

pub const CODE: &str = "GLS";

pub struct GlsAdapter {
    settings: CarrierSettings,
    http: HttpClient,
}

struct GlsConfig {
    url: String,
    guid: String,
    rules: AddressRules,
    max_packages: u32,
}

impl GlsAdapter {
    pub fn new(settings: CarrierSettings, http: HttpClient) -> Self {
        Self { settings, http }
    }

    fn config(&self) -> Result<GlsConfig, CarrierError> {
        let view = self.settings.view().map_err(|e| settings_error(CODE, e))?;
        Ok(GlsConfig {
            url: view.require("url").map_err(|e| settings_error(CODE, e))?,
            guid: view.require_secret("guid").map_err(|e| settings_error(CODE, e))?,
            rules: AddressRules::from_view(CODE, &view)?,
            max_packages: package_limit(CODE, &view)?,
        })
    }
}

/// Tracker for the `index`-th (1-based) of `count` labels.
fn tracker(label: &ExtractedLabel, shipment_number: &str, index: u32, count: usize) -> String {
    match &label.package_id {
        Some(id) if id.len() > 3 => id.clone(),
        _ if count == 1 => shipment_number.to_string(),
        _ => synthesize_tracker(shipment_number, index),
    }
}

impl CarrierAdapter for GlsAdapter {
    fn code(&self) -> &str {
        CODE
    }

    fn generate_shipment(&self, context: &ShipmentContext) -> Result<ShipmentResult, CarrierError> {
        let config = self.config()?;
        let details = context.details();
        ensure_package_count(CODE, details.packages, config.max_packages)?;
        let xml = build_request(
            context,
            &details,
            &config.guid,
            Utc::now().date_naive(),
            &config.rules,
        );

        ensure_not_cancelled(CODE, context.cancel_token())?;
        debug!(carrier = CODE, order_id = context.order_id(), "posting shipment");
        let response = self
            .http
            .send(Request::post_xml(config.url.as_str(), xml.clone()), context.cancel_token())
            .map_err(|e| http_error(CODE, e))?;
        if !response.is_success() {
            return Err(unexpected_status(CODE, "shipment creation", &response));
        }

        let body = response.text();
        let parsed = parse_response(&body).map_err(|e| match e {
            ResponseError::Malformed(_) => {
                CarrierError::protocol(CODE, e.to_string()).with_response(response.snapshot())
            }
            ResponseError::Rejected { .. } => {
                CarrierError::rejected(CODE, e.to_string()).with_response(response.snapshot())
            }
        })?;

        let shipment_number = parsed
            .shipment_number
            .clone()
            .unwrap_or_else(|| context.shipment_number().to_string());
        if parsed.labels.is_empty() {
            return Err(orphaned(
                CarrierError::label_unavailable(CODE, "response carries no decodable label")
                    .with_response(response.snapshot()),
                context,
                &shipment_number,
            ));
        }

        let count = parsed.labels.len();
        let labels = parsed
            .labels
            .into_iter()
            .enumerate()
            .map(|(i, label)| {
                let index = i as u32 + 1;
                let tracker = tracker(&label, &shipment_number, index, count);
                let package_id = label
                    .package_id
                    .unwrap_or_else(|| synthesize_tracker(&shipment_number, index));
                Label::new(package_id, tracker, context.label_type(), label.content)
            })
            .collect();

        let request = request_snapshot(context.payload(), CODE, Value::String(xml));
        ShipmentResult::new(
            shipment_number,
            request,
            Some(Value::String(body.into_owned())),
            labels,
        )
        .map_err(|e| CarrierError::protocol(CODE, e.to_string()))
    }
}
