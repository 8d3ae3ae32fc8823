use anyhow::Result;
use consign_types::ShipmentContext;
use serde_json::Value;

/// What to render: one package label of a shipment.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub context: &'a ShipmentContext,
    /// Shipment number the label is for; may differ from the context's when
    /// the carrier assigned one.
    pub shipment_number: &'a str,
    /// 1-based.
    pub package_index: u32,
    pub package_count: u32,
    /// Carrier metadata for this package, when the carrier returned any.
    pub seed: Option<&'a Value>,
}

/// Produces PDF bytes for carriers that leave label composition to us.
///
/// An empty buffer means "nothing to print" and the package is skipped.
pub trait LabelRenderer: Send + Sync {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Vec<u8>>;
}

impl<F> LabelRenderer for F
where
    F: Fn(&RenderRequest<'_>) -> Result<Vec<u8>> + Send + Sync,
{
    fn render(&self, request: &RenderRequest<'_>) -> Result<Vec<u8>> {
        self(request)
    }
}
