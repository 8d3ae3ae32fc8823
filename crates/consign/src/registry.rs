use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use consign_types::{CarrierError, Options, Payload, ShipmentContext, ShipmentResult};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapter::CarrierAdapter;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no carrier adapter registered for code '{0}'")]
    UnknownCarrier(String),
}

/// Failure of the one-call entry point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShipmentError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Carrier(#[from] CarrierError),
}

/// Carrier code to adapter lookup.
///
/// Codes are stored uppercased; lookups trim and ignore case.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn CarrierAdapter>>,
    fallback: Option<Arc<dyn CarrierAdapter>>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("codes", &self.codes())
            .field("fallback", &self.fallback.as_ref().map(|a| a.code().to_string()))
            .finish()
    }
}

fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

impl AdapterRegistry {
    pub fn new(adapters: impl IntoIterator<Item = Arc<dyn CarrierAdapter>>) -> Self {
        let mut registry = Self::default();
        for adapter in adapters {
            registry.register(adapter);
        }
        registry
    }

    /// Adapter used for codes nobody registered.
    pub fn with_fallback(mut self, adapter: Arc<dyn CarrierAdapter>) -> Self {
        self.fallback = Some(adapter);
        self
    }

    /// Register an adapter under its own code. A later registration for the
    /// same code replaces the earlier one.
    pub fn register(&mut self, adapter: Arc<dyn CarrierAdapter>) {
        let code = normalize(adapter.code());
        if self.adapters.insert(code.clone(), adapter).is_some() {
            warn!(carrier = %code, "duplicate carrier adapter registration; keeping the last one");
        }
    }

    pub fn get(&self, code: &str) -> Result<&dyn CarrierAdapter, RegistryError> {
        let key = normalize(code);
        if let Some(adapter) = self.adapters.get(&key) {
            return Ok(adapter.as_ref());
        }
        if let Some(fallback) = &self.fallback {
            debug!(carrier = %key, fallback = fallback.code(), "using fallback carrier adapter");
            return Ok(fallback.as_ref());
        }
        Err(RegistryError::UnknownCarrier(code.trim().to_string()))
    }

    /// Registered codes, sorted. The fallback is not listed.
    pub fn codes(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    /// Whether an adapter is registered for `code` (ignoring the fallback).
    pub fn contains(&self, code: &str) -> bool {
        self.adapters.contains_key(&normalize(code))
    }

    pub fn fallback(&self) -> Option<&dyn CarrierAdapter> {
        self.fallback.as_deref()
    }

    /// Resolve the context's carrier and run it.
    pub fn generate(&self, context: &ShipmentContext) -> Result<ShipmentResult, ShipmentError> {
        let adapter = self.get(context.carrier_code())?;

        debug!(
            carrier = adapter.code(),
            order_id = context.order_id(),
            shipment = context.shipment_number(),
            "generating shipment"
        );

        let result = adapter.generate_shipment(context)?;

        info!(
            carrier = adapter.code(),
            order_id = context.order_id(),
            shipment = result.shipment_number(),
            labels = result.labels().len(),
            "shipment created"
        );

        Ok(result)
    }
}

/// Build a context from loose arguments and run the matching adapter.
///
/// The result splits into `(shipment number, request snapshot, response
/// snapshot, labels)` with [`ShipmentResult::into_parts`].
pub fn generate_shipment(
    registry: &AdapterRegistry,
    carrier_code: &str,
    order_id: &str,
    order_reference: Option<&str>,
    shipment_number: Option<&str>,
    payload: Payload,
    options: Options,
) -> Result<ShipmentResult, ShipmentError> {
    let context = ShipmentContext::builder(carrier_code, order_id)
        .order_reference(order_reference)
        .shipment_number(shipment_number)
        .payload(payload)
        .options(options)
        .build();

    registry.generate(&context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use consign_types::{ErrorKind, request_snapshot};
    use serde_json::json;

    struct Fixed {
        code: &'static str,
        number: &'static str,
    }

    impl CarrierAdapter for Fixed {
        fn code(&self) -> &str {
            self.code
        }

        fn generate_shipment(
            &self,
            context: &ShipmentContext,
        ) -> Result<ShipmentResult, CarrierError> {
            let request = request_snapshot(context.payload(), self.code, json!({}));
            ShipmentResult::new(self.number, request, None, Vec::new())
                .map_err(|e| CarrierError::protocol(self.code, e.to_string()))
        }
    }

    struct Failing;

    impl CarrierAdapter for Failing {
        fn code(&self) -> &str {
            "FAIL"
        }

        fn generate_shipment(&self, _: &ShipmentContext) -> Result<ShipmentResult, CarrierError> {
            Err(CarrierError::rejected("FAIL", "nope"))
        }
    }

    fn fixed(code: &'static str, number: &'static str) -> Arc<dyn CarrierAdapter> {
        Arc::new(Fixed { code, number })
    }

    #[test]
    fn lookup_is_case_insensitive_and_trimmed() {
        let registry = AdapterRegistry::new([fixed("CEX", "X1")]);
        for code in ["cex", "CEX", " Cex "] {
            assert_eq!(registry.get(code).expect("adapter").code(), "CEX");
        }
    }

    #[test]
    fn unknown_code_without_fallback_fails() {
        let registry = AdapterRegistry::new([fixed("CEX", "X1")]);
        let err = registry.get("ups").err().expect("unknown");
        assert_eq!(err, RegistryError::UnknownCarrier("ups".to_string()));
        assert_eq!(err.to_string(), "no carrier adapter registered for code 'ups'");
    }

    #[test]
    fn unknown_code_uses_fallback() {
        let registry =
            AdapterRegistry::new([fixed("CEX", "X1")]).with_fallback(fixed("DEFAULT", "D1"));
        assert_eq!(registry.get("ups").expect("fallback").code(), "DEFAULT");
        assert!(!registry.contains("ups"));
        assert_eq!(registry.fallback().map(|a| a.code()), Some("DEFAULT"));
    }

    #[test]
    fn last_registration_wins() {
        let registry = AdapterRegistry::new([fixed("GLS", "first"), fixed("gls", "second")]);
        assert_eq!(registry.codes(), vec!["GLS"]);

        let context = ShipmentContext::builder("gls", "ORD-1").build();
        let result = registry.generate(&context).expect("generate");
        assert_eq!(result.shipment_number(), "second");
    }

    #[test]
    fn codes_are_sorted() {
        let registry = AdapterRegistry::new([
            fixed("GLS", "1"),
            fixed("CEX", "2"),
            fixed("DHL", "3"),
        ]);
        assert_eq!(registry.codes(), vec!["CEX", "DHL", "GLS"]);
        assert!(registry.contains("dhl"));
    }

    #[test]
    fn entry_point_builds_context_and_dispatches() {
        let registry = AdapterRegistry::new([fixed("CEX", "X1")]);
        let payload = json!({"packages": 1}).as_object().cloned().expect("object");

        let result = generate_shipment(
            &registry,
            "cex",
            "ORD-9",
            Some("REF-9"),
            None,
            payload.clone(),
            Options::new(),
        )
        .expect("generate");

        let (number, request, response, labels) = result.into_parts();
        assert_eq!(number, "X1");
        assert_eq!(request.len(), payload.len() + 1);
        assert!(request.contains_key("cex_request"));
        assert_eq!(response, None);
        assert!(labels.is_empty());
    }

    #[test]
    fn entry_point_reports_unknown_carrier() {
        let registry = AdapterRegistry::default();
        let err = generate_shipment(
            &registry,
            "nope",
            "ORD-1",
            None,
            None,
            Payload::new(),
            Options::new(),
        )
        .expect_err("unknown");
        assert!(matches!(err, ShipmentError::Registry(RegistryError::UnknownCarrier(_))));
    }

    #[test]
    fn carrier_errors_pass_through() {
        let registry = AdapterRegistry::new([Arc::new(Failing) as Arc<dyn CarrierAdapter>]);
        let context = ShipmentContext::builder("FAIL", "ORD-1").build();
        match registry.generate(&context) {
            Err(ShipmentError::Carrier(err)) => {
                assert_eq!(err.kind, ErrorKind::BusinessRejection);
                assert_eq!(err.message, "nope");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
