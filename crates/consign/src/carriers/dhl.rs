//! DHL: API-key login for a bearer token, JSON shipment creation, then one
//! label download per piece.
//!
//! Settings: `url` (API base), `user_id`, `key` (secret), `account_id`, and
//! optionally `parcel_type` (default `SMALL`), `domestic_country`,
//! `postcode_width`.

use std::time::Duration;

use chrono::Utc;
use consign_config::CarrierSettings;
use consign_http::{Auth, HttpClient, HttpResponse, Request};
use consign_types::{
    Address, CarrierError, Label, ShipmentContext, ShipmentDetails, ShipmentResult,
    request_snapshot, synthesize_tracker,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{
    AddressRules, decimal, decode_label, ensure_not_cancelled, ensure_package_count, http_error,
    json_body, orphaned, package_limit, settings_error, unexpected_status,
};
use crate::adapter::CarrierAdapter;
use crate::token::{BearerToken, TokenCache};

pub const CODE: &str = "DHL";

const DEFAULT_PARCEL_TYPE: &str = "SMALL";

pub struct DhlAdapter {
    settings: CarrierSettings,
    http: HttpClient,
    tokens: TokenCache,
}

struct DhlConfig {
    base: String,
    user_id: String,
    key: String,
    account_id: String,
    parcel_type: String,
    rules: AddressRules,
    max_packages: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: Option<String>,
    /// Unix seconds.
    access_token_expiration: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    shipment_id: Option<Value>,
    #[serde(default)]
    pieces: Vec<Piece>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Piece {
    label_id: Option<String>,
    tracker_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    pdf: Option<String>,
}

impl DhlAdapter {
    pub fn new(settings: CarrierSettings, http: HttpClient) -> Self {
        Self {
            settings,
            http,
            tokens: TokenCache::new(),
        }
    }

    fn config(&self) -> Result<DhlConfig, CarrierError> {
        let view = self.settings.view().map_err(|e| settings_error(CODE, e))?;
        let require = |field: &str| view.require(field).map_err(|e| settings_error(CODE, e));

        Ok(DhlConfig {
            base: require("url")?.trim_end_matches('/').to_string(),
            user_id: require("user_id")?,
            key: view.require_secret("key").map_err(|e| settings_error(CODE, e))?,
            account_id: require("account_id")?,
            parcel_type: view.get_or("parcel_type", DEFAULT_PARCEL_TYPE),
            rules: AddressRules::from_view(CODE, &view)?,
            max_packages: package_limit(CODE, &view)?,
        })
    }

    fn login(&self, config: &DhlConfig, context: &ShipmentContext) -> Result<BearerToken, CarrierError> {
        debug!(carrier = CODE, order_id = context.order_id(), "requesting access token");
        let response = self
            .http
            .send(
                Request::post_json(
                    format!("{}/authenticate/api-key", config.base),
                    json!({ "userId": config.user_id, "key": config.key }),
                ),
                context.cancel_token(),
            )
            .map_err(|e| http_error(CODE, e))?;

        if !response.is_success() {
            return Err(unexpected_status(CODE, "authentication", &response));
        }

        let login: LoginResponse = json_body(CODE, "authentication", &response)?;
        let value = login
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                CarrierError::rejected(CODE, "authentication response carries no access token")
                    .with_response(response.snapshot())
            })?;
        let expires_in = login.access_token_expiration.map(|at| {
            let left = at.saturating_sub(Utc::now().timestamp());
            Duration::from_secs(u64::try_from(left).unwrap_or(0))
        });

        Ok(BearerToken { value, expires_in })
    }

    /// Bearer-authenticated call; a 401/403 drops the cached token.
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

    fn download_label(
        &self,
        config: &DhlConfig,
        token: &str,
        label_id: &str,
        context: &ShipmentContext,
    ) -> Result<Vec<u8>, CarrierError> {
        ensure_not_cancelled(CODE, context.cancel_token())?;
        let response = self.authorized(
            Request::get(format!("{}/labels/{label_id}", config.base)).accept("application/json"),
            token,
            context,
        )?;
        if !response.is_success() {
            return Err(unexpected_status(CODE, "label download", &response));
        }

        let label: LabelResponse = json_body(CODE, "label download", &response)?;
        let encoded = label.pdf.filter(|p| !p.trim().is_empty()).ok_or_else(|| {
            CarrierError::label_unavailable(CODE, format!("label {label_id} has no pdf content"))
                .with_response(response.snapshot())
        })?;
        decode_label(&encoded).map_err(|e| {
            CarrierError::protocol(CODE, format!("label {label_id} is not valid base64: {e}"))
                .with_response(response.snapshot())
        })
    }
}

fn party(address: &Address, rules: &AddressRules) -> Value {
    json!({
        "name": {
            "firstName": address.contact,
            "companyName": address.name,
        },
        "address": {
            "countryCode": rules.country(address),
            "postalCode": rules.postcode(address),
            "city": address.city,
            "street": address.address,
            "isBusiness": !address.name.is_empty(),
        },
        "email": address.email,
        "phoneNumber": address.phone,
        "vatNumber": address.vat,
    })
}

fn build_request(context: &ShipmentContext, details: &ShipmentDetails, config: &DhlConfig) -> Value {
    let reference = context.reference();
    let mut options = vec![json!({ "key": "REFERENCE", "input": reference })];
    if let Some(cod) = details.cod_amount {
        options.push(json!({ "key": "COD_CASH", "input": decimal(cod) }));
    }
    if let Some(insured) = details.insured_value {
        options.push(json!({ "key": "INS", "input": decimal(insured) }));
    }

    let mut piece = json!({
        "parcelType": details.shipment_type.clone().unwrap_or_else(|| config.parcel_type.clone()),
        "quantity": details.packages,
    });
    if let Some(weight) = details.per_package_weight() {
        piece["weight"] = json!(weight);
    }
    if let (Some(length), Some(width), Some(height)) = (details.length, details.width, details.height) {
        piece["dimensions"] = json!({ "length": length, "width": width, "height": height });
    }

    json!({
        "shipmentId": context.shipment_number(),
        "orderReference": reference,
        "receiver": party(&details.receiver, &config.rules),
        "shipper": party(&details.sender, &config.rules),
        "accountId": config.account_id,
        "options": options,
        "returnLabel": false,
        "pieces": [piece],
    })
}

impl CarrierAdapter for DhlAdapter {
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

        let shipment_number = created
            .shipment_id
            .as_ref()
            .and_then(|id| match id {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| context.shipment_number().to_string());
        let orphan = |err: CarrierError| orphaned(err, context, &shipment_number);

        if created.pieces.is_empty() {
            return Err(orphan(
                CarrierError::label_unavailable(CODE, "creation response lists no pieces")
                    .with_response(response.snapshot()),
            ));
        }
        let label_ids = created
            .pieces
            .iter()
            .enumerate()
            .map(|(i, piece)| {
                piece
                    .label_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .ok_or(i + 1)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|piece| {
                orphan(
                    CarrierError::label_unavailable(
                        CODE,
                        format!("piece {piece} has no label identifier"),
                    )
                    .with_response(response.snapshot()),
                )
            })?;

        let mut labels = Vec::with_capacity(label_ids.len());
        for (index, (label_id, piece)) in label_ids.iter().zip(&created.pieces).enumerate() {
            let content = self
                .download_label(&config, &token, label_id, context)
                .map_err(orphan)?;
            let tracker = piece
                .tracker_code
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| synthesize_tracker(&shipment_number, index as u32 + 1));
            labels.push(Label::new(*label_id, tracker, context.label_type(), content));
        }

        let request = request_snapshot(context.payload(), CODE, body);
        ShipmentResult::new(shipment_number, request, Some(raw), labels)
            .map_err(|e| CarrierError::protocol(CODE, e.to_string()))
    }
}
