//! CTT: client-credentials login, JSON shipment creation, then the label is
//! polled until the carrier has rendered it.
//!
//! Settings: `url`, `client_id`, `client_secret` (secret), and optionally
//! `service` (default `24H`), `label_poll_interval`, `label_poll_attempts`,
//! `domestic_country`, `postcode_width`.

use std::time::Duration;

use consign_config::CarrierSettings;
use consign_http::{Auth, HttpClient, HttpResponse, Request};
use consign_retry::{PollOutcome, PollPolicy, poll_until};
use consign_types::{
    Address, CarrierError, Label, ShipmentContext, ShipmentDetails, ShipmentResult,
    request_snapshot,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{
    AddressRules, decimal, ensure_not_cancelled, ensure_package_count, http_error, json_body,
    orphaned, package_limit, settings_error, unexpected_status,
};
use crate::adapter::CarrierAdapter;
use crate::token::{BearerToken, TokenCache};

pub const CODE: &str = "CTT";

const DEFAULT_SERVICE: &str = "24H";

/// Creation statuses that mean the carrier refused the shipment.
const FAILED_STATUSES: &[&str] = &["error", "failed", "rejected"];

pub struct CttAdapter {
    settings: CarrierSettings,
    http: HttpClient,
    tokens: TokenCache,
}

struct CttConfig {
    base: String,
    client_id: String,
    client_secret: String,
    service: String,
    poll: PollPolicy,
    rules: AddressRules,
    max_packages: u32,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    /// Seconds.
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    shipment_code: Option<String>,
    status: Option<String>,
    error: Option<Value>,
    #[serde(default)]
    packages: Vec<PackageRef>,
}

#[derive(Debug, Deserialize)]
struct PackageRef {
    tracking_code: Option<String>,
}

impl CreateResponse {
    /// Carrier failure text, when the body reports one.
    fn failure(&self) -> Option<String> {
        let error = match &self.error {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Null) | Some(Value::String(_)) | Some(Value::Bool(false)) | None => None,
            Some(other) => other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some(other.to_string())),
        };
        let failed_status = self
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| FAILED_STATUSES.iter().any(|f| f.eq_ignore_ascii_case(s)));

        match (error, failed_status) {
            (Some(error), _) => Some(error),
            (None, Some(status)) => Some(format!("shipment status '{status}'")),
            (None, None) => None,
        }
    }
}

impl CttAdapter {
    pub fn new(settings: CarrierSettings, http: HttpClient) -> Self {
        Self {
            settings,
            http,
            tokens: TokenCache::new(),
        }
    }

    fn config(&self) -> Result<CttConfig, CarrierError> {
        let view = self.settings.view().map_err(|e| settings_error(CODE, e))?;
        let require = |field: &str| view.require(field).map_err(|e| settings_error(CODE, e));

        Ok(CttConfig {
            base: require("url")?.trim_end_matches('/').to_string(),
            client_id: require("client_id")?,
            client_secret: view
                .require_secret("client_secret")
                .map_err(|e| settings_error(CODE, e))?,
            service: view.get_or("service", DEFAULT_SERVICE),
            poll: view.poll_policy().map_err(|e| settings_error(CODE, e))?,
            rules: AddressRules::from_view(CODE, &view)?,
            max_packages: package_limit(CODE, &view)?,
        })
    }

    fn login(&self, config: &CttConfig, context: &ShipmentContext) -> Result<BearerToken, CarrierError> {
        debug!(carrier = CODE, order_id = context.order_id(), "requesting access token");
        let response = self
            .http
            .send(
                Request::post_json(
                    format!("{}/auth/token", config.base),
                    json!({
                        "client_id": config.client_id,
                        "client_secret": config.client_secret,
                    }),
                ),
                context.cancel_token(),
            )
            .map_err(|e| http_error(CODE, e))?;
        if !response.is_success() {
            return Err(unexpected_status(CODE, "authentication", &response));
        }

        let token: TokenResponse = json_body(CODE, "authentication", &response)?;
        let value = token
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                CarrierError::rejected(CODE, "authentication response carries no access token")
                    .with_response(response.snapshot())
            })?;
        Ok(BearerToken {
            value,
            expires_in: token.expires_in.map(Duration::from_secs),
        })
    }

    fn authorized(
        &self,
        request: Request,
        token: &str,
        context: &ShipmentContext,
    ) -> Result<HttpResponse, CarrierError> {
        let response = self
            .http
            .send(
                request.auth(Auth::Bearer(token.to_string())),
                context.cancel_token(),
            )
            .map_err(|e| http_error(CODE, e))?;
        if response.is_auth_rejected() {
            warn!(carrier = CODE, status = response.status, "access token rejected; cache cleared");
            self.tokens.invalidate();
        }
        Ok(response)
    }

    /// Poll the label endpoint until it serves a PDF.
    fn await_label(
        &self,
        config: &CttConfig,
        token: &str,
        shipment_code: &str,
        context: &ShipmentContext,
    ) -> Result<Vec<u8>, CarrierError> {
        let url = format!("{}/shipments/{shipment_code}/label?format=pdf", config.base);
        let cancel = context.cancel_token();

        let outcome = poll_until(
            &config.poll,
            |delay| cancel.sleep(delay),
            |attempt| {
                let response = self.authorized(
                    Request::get(url.as_str()).accept("application/pdf"),
                    token,
                    context,
                )?;
                if response.is_auth_rejected() {
                    return Err(unexpected_status(CODE, "label retrieval", &response));
                }
                if response.is_success() && response.is_pdf() && !response.body.is_empty() {
                    return Ok(Some(response.body));
                }
                debug!(
                    carrier = CODE,
                    shipment = shipment_code,
                    attempt,
                    status = response.status,
                    content_type = response.content_type.as_deref().unwrap_or(""),
                    "label not ready"
                );
                Ok(None)
            },
        )?;

        match outcome {
            PollOutcome::Ready { value, attempts } => {
                debug!(carrier = CODE, shipment = shipment_code, attempts, "label ready");
                Ok(value)
            }
            PollOutcome::Exhausted { attempts } => Err(CarrierError::label_unavailable(
                CODE,
                format!("label still not available after {attempts} attempts"),
            )),
            PollOutcome::Interrupted { .. } => Err(CarrierError::cancelled(CODE)),
        }
    }
}

fn party(address: &Address, rules: &AddressRules) -> Value {
    json!({
        "name": address.display_name(),
        "contact": address.contact,
        "address": address.address,
        "city": address.city,
        "postal_code": rules.postcode(address),
        "country": rules.country(address),
        "phone": address.phone,
        "email": address.email,
        "vat": address.vat,
    })
}

fn build_request(context: &ShipmentContext, details: &ShipmentDetails, config: &CttConfig) -> Value {
    let package = json!({
        "weight": details.per_package_weight(),
        "length": details.length,
        "width": details.width,
        "height": details.height,
    });

    let mut body = json!({
        "client_reference": context.reference(),
        "service": details.shipment_type.clone().unwrap_or_else(|| config.service.clone()),
        "sender": party(&details.sender, &config.rules),
        "recipient": party(&details.receiver, &config.rules),
        "packages_count": details.packages,
        "weight": details.weight_or(1.0),
        "packages": vec![package; details.packages as usize],
    });
    if let Some(cod) = details.cod_amount {
        body["cod_amount"] = json!(decimal(cod));
    }
    if let Some(message) = &details.message {
        body["observations"] = json!(message);
    }
    if let Some(date) = &details.pickup_date {
        body["pickup_date"] = json!(date);
    }
    body
}

impl CarrierAdapter for CttAdapter {
    fn code(&self) -> &str {
        CODE
    }

    fn generate_shipment(&self, context: &ShipmentContext) -> Result<ShipmentResult, CarrierError> {
        let config = self.config()?;
        let details = context.details();
        ensure_package_count(CODE, details.packages, config.max_packages)?;
        let body = build_request(context, &details, &config);

        ensure_not_cancelled(CODE, context.cancel_token())?;
        let token = self.tokens.get_or_fetch(|| self.login(&config, context))?;

        ensure_not_cancelled(CODE, context.cancel_token())?;
        debug!(carrier = CODE, order_id = context.order_id(), "creating shipment");
        let response = self.authorized(
            Request::post_json(format!("{}/shipments", config.base), body.clone())
                .accept("application/json"),
            &token,
            context,
        )?;
        if !response.is_success() {
            return Err(unexpected_status(CODE, "shipment creation", &response));
        }

        let raw: Value = json_body(CODE, "shipment creation", &response)?;
        let created: CreateResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            CarrierError::protocol(CODE, format!("unexpected creation response: {e}"))
                .with_response(response.snapshot())
        })?;
        if let Some(reason) = created.failure() {
            return Err(CarrierError::rejected(CODE, reason).with_response(response.snapshot()));
        }
        let shipment_code = created
            .shipment_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                CarrierError::protocol(CODE, "creation response carries no shipment_code")
                    .with_response(response.snapshot())
            })?
            .to_string();

        let content = self
            .await_label(&config, &token, &shipment_code, context)
            .map_err(|e| orphaned(e, context, &shipment_code))?;

        let tracker = created
            .packages
            .iter()
            .filter_map(|p| p.tracking_code.as_deref())
            .map(str::trim)
            .find(|t| !t.is_empty())
            .unwrap_or(&shipment_code)
            .to_string();
        let label = Label::new(shipment_code.as_str(), tracker, context.label_type(), content);

        let request = request_snapshot(context.payload(), CODE, body);
        ShipmentResult::new(shipment_code, request, Some(raw), vec![label])
            .map_err(|e| CarrierError::protocol(CODE, e.to_string()))
    }
}
