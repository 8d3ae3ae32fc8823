//! # Consign
//!
//! One contract for creating an outbound shipment with an external carrier
//! and collecting its printable labels.
//!
//! Carrier APIs disagree on almost everything: JSON with HTTP Basic, JSON
//! behind a bearer-token login, hand-built XML with base64 labels inlined in
//! the response, or labels that only appear after polling. Each carrier gets a
//! [`CarrierAdapter`]; callers pick one through the [`AdapterRegistry`] and
//! always get back the same [`ShipmentResult`](types::ShipmentResult) or a
//! typed [`CarrierError`](types::CarrierError).
//!
//! ## Flow
//!
//! 1. Build a [`ShipmentContext`](types::ShipmentContext): carrier code, order
//!    id, optional reference and shipment number, a free-form payload and
//!    label options.
//! 2. Resolve the adapter with [`AdapterRegistry::get`].
//! 3. The adapter reads its settings through
//!    [`CarrierSettings`](config::CarrierSettings), talks to the carrier,
//!    validates the answer and returns the labels.
//!
//! [`generate_shipment`] does all three in one call.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use consign::{AdapterRegistry, RenderRequest, generate_shipment};
//! use consign::carriers::DefaultAdapter;
//! use serde_json::json;
//!
//! let renderer = |req: &RenderRequest<'_>| -> anyhow::Result<Vec<u8>> {
//!     Ok(format!("%PDF label {}/{}", req.package_index, req.package_count).into_bytes())
//! };
//! let registry = AdapterRegistry::default()
//!     .with_fallback(Arc::new(DefaultAdapter::new(Arc::new(renderer))));
//!
//! let payload = json!({ "packages": 2 }).as_object().cloned().unwrap();
//! let result = generate_shipment(
//!     &registry, "local", "ORD-1", None, Some("SHIP-1"), payload, Default::default(),
//! )
//! .unwrap();
//!
//! assert_eq!(result.shipment_number(), "SHIP-1");
//! assert_eq!(result.labels().len(), 2);
//! ```
//!
//! ## Modules
//!
//! - [`adapter`]: the [`CarrierAdapter`] contract
//! - [`registry`]: carrier code lookup and the one-call entry point
//! - [`carriers`]: the concrete adapters (Default, CEX, DHL, GLS, CTT)
//! - [`render`]: the injected label-rendering capability
//! - [`token`]: bearer token cache shared by two-step adapters

/// The carrier adapter contract.
pub mod adapter;

/// Concrete carrier adapters.
pub mod carriers;

/// Carrier code lookup with optional fallback.
pub mod registry;

/// Label rendering capability for carriers that do not return labels.
pub mod render;

/// Bearer token cache with expiry and invalidation.
pub mod token;

/// Shipment context, result, label and error types.
/// Re-exported from consign-types microcrate.
pub use consign_types as types;

/// Configuration sources and per-carrier settings.
/// Re-exported from consign-config microcrate.
pub use consign_config as config;

/// Blocking HTTP client used by the adapters.
/// Re-exported from consign-http microcrate.
pub use consign_http as http;

/// Retry strategies and the label poll policy.
/// Re-exported from consign-retry microcrate.
pub use consign_retry as retry;

/// Secret encryption for stored carrier credentials.
/// Re-exported from consign-encrypt microcrate.
pub use consign_encrypt as encryption;

pub use adapter::CarrierAdapter;
pub use registry::{AdapterRegistry, RegistryError, ShipmentError, generate_shipment};
pub use render::{LabelRenderer, RenderRequest};
pub use token::{BearerToken, TokenCache};

/// Shared fixtures for carrier tests.
#[cfg(test)]
mod test_support;
