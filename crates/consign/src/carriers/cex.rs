//! CEX: single JSON call with HTTP Basic credentials.
//!
//! The carrier assigns the shipment number and returns per-package metadata
//! but no label; labels are rendered locally from that metadata.
//!
//! Settings: `url`, `username`, `password` (secret), `customer_code`, and
//! optionally `product` (default `63`), `payment` (default `P`),
//! `channel`, `domestic_country`, `postcode_width`.

use std::sync::Arc;

use chrono::Utc;
use consign_config::CarrierSettings;
use consign_http::{Auth, HttpClient, Request};
use consign_types::{
    Address, CarrierError, Label, ShipmentContext, ShipmentDetails, ShipmentResult,
    request_snapshot, synthesize_tracker,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::{
    AddressRules, decimal, ensure_not_cancelled, ensure_package_count, http_error, json_body,
    package_limit, settings_error, unexpected_status,
};
use crate::adapter::CarrierAdapter;
use crate::render::{LabelRenderer, RenderRequest};

pub const CODE: &str = "CEX";

const DEFAULT_PRODUCT: &str = "63";
const DEFAULT_PAYMENT: &str = "P";

pub struct CexAdapter {
    settings: CarrierSettings,
    http: HttpClient,
    renderer: Arc<dyn LabelRenderer>,
}

struct CexConfig {
    url: String,
    username: String,
    password: String,
    customer_code: String,
    product: String,
    payment: String,
    channel: String,
    rules: AddressRules,
    max_packages: u32,
}

/// Creation response. Both the long carrier names and the short aliases are
/// accepted.
#[derive(Debug, Deserialize)]
struct CexResponse {
    #[serde(rename = "codigoRetorno", alias = "status")]
    code: Option<Value>,
    #[serde(rename = "mensajeRetorno", alias = "message", default)]
    message: Option<String>,
    #[serde(rename = "datosResultado", alias = "result", default)]
    result: Option<Value>,
    #[serde(rename = "listaBultos", alias = "packages", default)]
    packages: Vec<Value>,
}

impl CexAdapter {
    pub fn new(
        settings: CarrierSettings,
        http: HttpClient,
        renderer: Arc<dyn LabelRenderer>,
    ) -> Self {
        Self {
            settings,
            http,
            renderer,
        }
    }

    fn config(&self) -> Result<CexConfig, CarrierError> {
        let view = self.settings.view().map_err(|e| settings_error(CODE, e))?;
        let require = |field: &str| view.require(field).map_err(|e| settings_error(CODE, e));

        Ok(CexConfig {
            url: require("url")?,
            username: require("username")?,
            password: view
                .require_secret("password")
                .map_err(|e| settings_error(CODE, e))?,
            customer_code: require("customer_code")?,
            product: view.get_or("product", DEFAULT_PRODUCT),
            payment: view.get_or("payment", DEFAULT_PAYMENT),
            channel: view.get_or("channel", ""),
            rules: AddressRules::from_view(CODE, &view)?,
            max_packages: package_limit(CODE, &view)?,
        })
    }
}

fn build_request(
    context: &ShipmentContext,
    details: &ShipmentDetails,
    config: &CexConfig,
    today: &str,
) -> Value {
    let rules = &config.rules;
    let party = |prefix: &str, address: &Address| {
        let postcode = rules.postcode(address);
        let (national, international) = if address.is_domestic(&rules.domestic_country) {
            (postcode, String::new())
        } else {
            (String::new(), postcode)
        };
        let fields = [
            ("nom", address.display_name().to_string()),
            ("nif", address.vat.clone()),
            ("dir", address.address.clone()),
            ("pob", address.city.clone()),
            ("codPosNac", national),
            ("codPosInt", international),
            ("paisISO", rules.country(address).to_string()),
            ("contac", address.contact.clone()),
            ("telef", address.phone.clone()),
            ("email", address.email.clone()),
        ];
        fields
            .into_iter()
            .map(|(name, value)| (format!("{name}{prefix}"), Value::String(value)))
            .collect::<Map<String, Value>>()
    };

    let per_package = details.per_package_weight();
    let dims = |v: Option<f64>| v.map(decimal).unwrap_or_default();
    let bultos: Vec<Value> = (1..=details.packages)
        .map(|orden| {
            json!({
                "orden": orden,
                "kilos": per_package.map(decimal).unwrap_or_default(),
                "alto": dims(details.height),
                "largo": dims(details.length),
                "ancho": dims(details.width),
                "referencia": context.reference(),
            })
        })
        .collect();

    let mut body = json!({
        "solicitante": config.customer_code,
        "canalEntrada": config.channel,
        "numEnvio": "",
        "ref": context.reference(),
        "refCliente": context.order_id(),
        "fecha": details.pickup_date.clone().unwrap_or_else(|| today.to_string()),
        "codRte": config.customer_code,
        "observac": details.message.clone().unwrap_or_default(),
        "numBultos": details.packages.to_string(),
        "kilos": decimal(details.weight_or(0.0)),
        "volumen": details.volume_m3().map(|v| format!("{v:.3}")).unwrap_or_default(),
        "alto": dims(details.height),
        "largo": dims(details.length),
        "ancho": dims(details.width),
        "producto": details.shipment_type.clone().unwrap_or_else(|| config.product.clone()),
        "portes": config.payment,
        "reembolso": details.cod_amount.map(decimal).unwrap_or_default(),
        "listaBultos": bultos,
    });

    if let Value::Object(fields) = &mut body {
        fields.extend(party("Rte", &details.sender));
        fields.extend(party("Dest", &details.receiver));
    }

    body
}

/// Carrier return code; numbers and numeric strings are both seen.
fn return_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl CarrierAdapter for CexAdapter {
    fn code(&self) -> &str {
        CODE
    }

    fn generate_shipment(&self, context: &ShipmentContext) -> Result<ShipmentResult, CarrierError> {
        let config = self.config()?;
        let cancel = context.cancel_token();
        let details = context.details();
        ensure_package_count(CODE, details.packages, config.max_packages)?;
        let today = Utc::now().format("%d%m%Y").to_string();
        let body = build_request(context, &details, &config, &today);

        ensure_not_cancelled(CODE, cancel)?;
        debug!(carrier = CODE, order_id = context.order_id(), "creating shipment");
        let response = self
            .http
            .send(
                Request::post_json(config.url.clone(), body.clone())
                    .auth(Auth::Basic {
                        username: config.username.clone(),
                        password: config.password.clone(),
                    })
                    .accept("application/json"),
                cancel,
            )
            .map_err(|e| http_error(CODE, e))?;

        if !response.is_success() {
            return Err(unexpected_status(CODE, "shipment creation", &response));
        }

        let raw: Value = json_body(CODE, "shipment creation", &response)?;
        let parsed: CexResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            CarrierError::protocol(CODE, format!("unexpected creation response: {e}"))
                .with_response(response.snapshot())
        })?;

        let code = parsed.code.as_ref().and_then(return_code).ok_or_else(|| {
            CarrierError::protocol(CODE, "creation response carries no return code")
                .with_response(response.snapshot())
        })?;
        if code != 0 {
            let message = parsed
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("carrier returned code {code}"));
            return Err(CarrierError::rejected(CODE, message).with_response(response.snapshot()));
        }

        let shipment_number = parsed
            .result
            .as_ref()
            .and_then(scalar_text)
            .ok_or_else(|| {
                CarrierError::protocol(CODE, "creation response carries no shipment number")
                    .with_response(response.snapshot())
            })?;

        let mut labels = Vec::new();
        for index in 1..=details.packages {
            let seed = parsed.packages.get(index as usize - 1);
            let tracker = seed
                .and_then(|s| s.get("codUnico"))
                .and_then(scalar_text)
                .unwrap_or_else(|| synthesize_tracker(&shipment_number, index));

            let request = RenderRequest {
                context,
                shipment_number: &shipment_number,
                package_index: index,
                package_count: details.packages,
                seed,
            };
            match self.renderer.render(&request) {
                Ok(content) if !content.is_empty() => {
                    labels.push(Label::new(
                        tracker.clone(),
                        tracker,
                        context.label_type(),
                        content,
                    ));
                }
                Ok(_) => {
                    warn!(carrier = CODE, shipment = %shipment_number, package = index, "empty label render skipped");
                }
                Err(e) => {
                    warn!(carrier = CODE, shipment = %shipment_number, package = index, error = %e, "label render failed; package skipped");
                }
            }
        }

        let request = request_snapshot(context.payload(), CODE, body);
        ShipmentResult::new(shipment_number, request, Some(raw), labels)
            .map_err(|e| CarrierError::protocol(CODE, e.to_string()))
    }
}
