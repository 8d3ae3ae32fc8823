use consign_types::{CarrierError, ShipmentContext, ShipmentResult};

/// Uniform interface over one carrier API.
///
/// Implementations keep only read-only collaborators (settings, HTTP client,
/// renderer) plus internally synchronized caches, so one adapter instance
/// serves concurrent attempts for distinct contexts.
pub trait CarrierAdapter: Send + Sync {
    /// Stable uppercase short identifier (`GLS`, `CTT`, ...).
    fn code(&self) -> &str;

    /// Create the shipment and collect its labels.
    ///
    /// The context is only read. On success the result carries the final
    /// shipment number, the payload plus this carrier's request fragment,
    /// the raw response when there was one, and the labels in package order.
    fn generate_shipment(&self, context: &ShipmentContext)
    -> Result<ShipmentResult, CarrierError>;
}
