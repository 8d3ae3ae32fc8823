//! Core value types for consign.
//!
//! - [`ShipmentContext`]: immutable input for one shipment attempt
//! - [`ShipmentResult`] and [`Label`]: immutable output of an adapter
//! - [`ShipmentDetails`] and [`Address`]: typed, lenient views over the
//!   free-form payload
//! - [`CancelToken`]: shared cancellation flag with optional deadline
//! - [`CarrierError`] and [`ErrorKind`]: the uniform failure taxonomy

mod cancel;
mod context;
mod error;
mod payload;
mod result;

pub use cancel::CancelToken;
pub use consign_retry::ErrorClass;
pub use context::{Options, Payload, ShipmentContext, ShipmentContextBuilder};
pub use error::{CarrierError, ErrorKind, RawResponse};
pub use payload::{Address, ShipmentDetails, pad_postcode};
pub use result::{InvalidResult, Label, ShipmentResult, request_snapshot, synthesize_tracker};
