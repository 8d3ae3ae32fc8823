//! Adapter for shipments handled outside any carrier API.
//!
//! Nothing leaves the process: labels come from the injected renderer and
//! the response snapshot is whatever the caller put under `response`.

use std::sync::Arc;

use consign_types::{
    CarrierError, Label, ShipmentContext, ShipmentResult, request_snapshot, synthesize_tracker,
};
use serde_json::json;
use tracing::{debug, warn};

use super::{DEFAULT_MAX_PACKAGES, ensure_not_cancelled, ensure_package_count};
use crate::adapter::CarrierAdapter;
use crate::render::{LabelRenderer, RenderRequest};

pub const CODE: &str = "DEFAULT";

pub struct DefaultAdapter {
    renderer: Arc<dyn LabelRenderer>,
    max_packages: u32,
}

impl DefaultAdapter {
    pub fn new(renderer: Arc<dyn LabelRenderer>) -> Self {
        Self {
            renderer,
            max_packages: DEFAULT_MAX_PACKAGES,
        }
    }

    /// Refuse payloads declaring more than `limit` packages.
    pub fn with_max_packages(mut self, limit: u32) -> Self {
        self.max_packages = limit;
        self
    }
}

impl CarrierAdapter for DefaultAdapter {
    fn code(&self) -> &str {
        CODE
    }

    fn generate_shipment(&self, context: &ShipmentContext) -> Result<ShipmentResult, CarrierError> {
        ensure_not_cancelled(CODE, context.cancel_token())?;

        let details = context.details();
        ensure_package_count(CODE, details.packages, self.max_packages)?;
        let shipment_number = context.shipment_number();
        let mut labels = Vec::new();

        for index in 1..=details.packages {
            ensure_not_cancelled(CODE, context.cancel_token())?;

            let request = RenderRequest {
                context,
                shipment_number,
                package_index: index,
                package_count: details.packages,
                seed: None,
            };
            match self.renderer.render(&request) {
                Ok(content) if !content.is_empty() => {
                    let tracker = synthesize_tracker(shipment_number, index);
                    labels.push(Label::new(
                        tracker.clone(),
                        tracker,
                        context.label_type(),
                        content,
                    ));
                }
                Ok(_) => {
                    debug!(carrier = CODE, shipment = shipment_number, package = index, "empty label render skipped");
                }
                Err(e) => {
                    warn!(carrier = CODE, shipment = shipment_number, package = index, error = %e, "label render failed; package skipped");
                }
            }
        }

        let request = request_snapshot(
            context.payload(),
            CODE,
            json!({
                "shipment_number": shipment_number,
                "packages": details.packages,
                "label_type": context.label_type(),
            }),
        );
        let response = context.payload().get("response").cloned();

        ShipmentResult::new(shipment_number, request, response, labels)
            .map_err(|e| CarrierError::protocol(CODE, e.to_string()))
    }
}
