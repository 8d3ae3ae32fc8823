//! Concrete carrier adapters and the plumbing they share.
//!
//! | Code | Protocol | Labels |
//! |---|---|---|
//! | `DEFAULT` | none | rendered locally |
//! | `CEX` | JSON, HTTP Basic | rendered locally |
//! | `DHL` | JSON, bearer login | downloaded per piece |
//! | `GLS` | XML | inline base64 in the response |
//! | `CTT` | JSON, bearer login | polled until ready |

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use consign_config::{CarrierSettings, ConfigSource, SecretDecryptor, SettingsError, SettingsView};
use consign_http::{HttpClient, HttpError, HttpOptions, HttpResponse};
use consign_types::{CancelToken, CarrierError, ShipmentContext};
use serde::de::DeserializeOwned;
use tracing::error;

use crate::adapter::CarrierAdapter;
use crate::registry::AdapterRegistry;
use crate::render::LabelRenderer;

pub mod cex;
pub mod ctt;
pub mod default;
pub mod dhl;
pub mod gls;

pub use cex::CexAdapter;
pub use ctt::CttAdapter;
pub use default::DefaultAdapter;
pub use dhl::DhlAdapter;
pub use gls::GlsAdapter;

/// Domestic country assumed when a carrier does not configure one.
pub const DEFAULT_DOMESTIC_COUNTRY: &str = "ES";

/// Width domestic all-digit postcodes are padded to.
pub const DEFAULT_POSTCODE_WIDTH: usize = 5;

/// Largest package count accepted when a carrier sets no `max_packages`.
/// Synthesized trackers carry a three-digit package index.
pub const DEFAULT_MAX_PACKAGES: u32 = 999;

/// Build a registry with every built-in carrier and the Default adapter as
/// fallback.
///
/// Each carrier gets its own HTTP client; a carrier-level `timeout` setting
/// (humantime, e.g. `45s`) overrides the timeout in `http`.
pub fn standard_registry(
    source: Arc<dyn ConfigSource>,
    secrets: Arc<dyn SecretDecryptor>,
    renderer: Arc<dyn LabelRenderer>,
    http: HttpOptions,
) -> Result<AdapterRegistry, CarrierError> {
    let settings = |code: &str| CarrierSettings::new(code, Arc::clone(&source), Arc::clone(&secrets));
    let client = |settings: &CarrierSettings| -> Result<HttpClient, CarrierError> {
        let code = settings.code();
        let timeout = settings
            .view()
            .and_then(|view| view.duration("timeout"))
            .map_err(|e| settings_error(code, e))?;
        let options = match timeout {
            Some(timeout) => http.clone().with_timeout(timeout),
            None => http.clone(),
        };
        HttpClient::new(options).map_err(|e| http_error(code, e))
    };

    let cex = settings(cex::CODE);
    let dhl = settings(dhl::CODE);
    let gls = settings(gls::CODE);
    let ctt = settings(ctt::CODE);
    let default_limit = settings(default::CODE)
        .view()
        .map_err(|e| settings_error(default::CODE, e))
        .and_then(|view| package_limit(default::CODE, &view))?;
    let default: Arc<DefaultAdapter> = Arc::new(
        DefaultAdapter::new(Arc::clone(&renderer)).with_max_packages(default_limit),
    );

    let adapters: Vec<Arc<dyn CarrierAdapter>> = vec![
        Arc::new(CexAdapter::new(cex.clone(), client(&cex)?, renderer)),
        Arc::new(DhlAdapter::new(dhl.clone(), client(&dhl)?)),
        Arc::new(GlsAdapter::new(gls.clone(), client(&gls)?)),
        Arc::new(CttAdapter::new(ctt.clone(), client(&ctt)?)),
        default.clone(),
    ];

    Ok(AdapterRegistry::new(adapters).with_fallback(default))
}

/// Carrier-independent settings every remote adapter reads.
#[derive(Debug, Clone)]
pub(crate) struct AddressRules {
    pub domestic_country: String,
    pub postcode_width: usize,
}

impl AddressRules {
    pub(crate) fn from_view(code: &str, view: &SettingsView<'_>) -> Result<Self, CarrierError> {
        Ok(Self {
            domestic_country: view
                .get_or("domestic_country", DEFAULT_DOMESTIC_COUNTRY)
                .to_ascii_uppercase(),
            postcode_width: view
                .parse("postcode_width")
                .map_err(|e| settings_error(code, e))?
                .unwrap_or(DEFAULT_POSTCODE_WIDTH),
        })
    }

    pub(crate) fn postcode(&self, address: &consign_types::Address) -> String {
        address.carrier_postcode(&self.domestic_country, self.postcode_width)
    }

    pub(crate) fn country<'a>(&'a self, address: &'a consign_types::Address) -> &'a str {
        address.country_or(&self.domestic_country)
    }
}

/// `max_packages` for a carrier, defaulting to [`DEFAULT_MAX_PACKAGES`].
pub(crate) fn package_limit(carrier: &str, view: &SettingsView<'_>) -> Result<u32, CarrierError> {
    Ok(view
        .parse("max_packages")
        .map_err(|e| settings_error(carrier, e))?
        .unwrap_or(DEFAULT_MAX_PACKAGES))
}

/// Refuse package counts above `limit` before any request is built.
pub(crate) fn ensure_package_count(
    carrier: &str,
    packages: u32,
    limit: u32,
) -> Result<(), CarrierError> {
    if packages > limit {
        return Err(CarrierError::invalid_request(
            carrier,
            format!("{packages} packages exceed the limit of {limit}"),
        ));
    }
    Ok(())
}

pub(crate) fn settings_error(carrier: &str, err: SettingsError) -> CarrierError {
    CarrierError::configuration(carrier, err.to_string())
}

pub(crate) fn http_error(carrier: &str, err: HttpError) -> CarrierError {
    match err {
        HttpError::Cancelled => CarrierError::cancelled(carrier),
        HttpError::Build(message) => CarrierError::configuration(carrier, message),
        other => CarrierError::transport(carrier, other.to_string()),
    }
}

pub(crate) fn ensure_not_cancelled(carrier: &str, cancel: &CancelToken) -> Result<(), CarrierError> {
    if cancel.is_cancelled() {
        return Err(CarrierError::cancelled(carrier));
    }
    Ok(())
}

/// Non-2xx answer to `step`.
pub(crate) fn unexpected_status(carrier: &str, step: &str, response: &HttpResponse) -> CarrierError {
    CarrierError::protocol(
        carrier,
        format!("{step} returned HTTP {}", response.status),
    )
    .with_response(response.snapshot())
}

/// Parse a JSON body, keeping the raw response on failure.
pub(crate) fn json_body<T: DeserializeOwned>(
    carrier: &str,
    step: &str,
    response: &HttpResponse,
) -> Result<T, CarrierError> {
    response.json().map_err(|e| {
        CarrierError::protocol(carrier, format!("{step} returned an unreadable body: {e}"))
            .with_response(response.snapshot())
    })
}

/// Decode base64 label content, ignoring embedded whitespace and line breaks.
pub(crate) fn decode_label(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact)
}

/// Mark `err` as leaving a shipment behind at the carrier and log it.
pub(crate) fn orphaned(
    err: CarrierError,
    context: &ShipmentContext,
    shipment_number: &str,
) -> CarrierError {
    error!(
        carrier = %err.carrier,
        order_id = context.order_id(),
        shipment = shipment_number,
        kind = %err.kind,
        message = %err.message,
        "orphaned remote shipment: carrier created the shipment but no label was produced"
    );
    err.with_remote_shipment(shipment_number)
}

/// Join non-empty parts with a space.
pub(crate) fn join_nonempty<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decimal rendering used in carrier bodies: two decimals, dot separator.
pub(crate) fn decimal(value: f64) -> String {
    format!("{value:.2}")
}
