#![no_main]

use consign_types::{pad_postcode, Payload, ShipmentDetails};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(payload) = serde_json::from_slice::<Payload>(data) else {
        return;
    };

    let details = ShipmentDetails::from_payload(&payload);
    assert!(details.packages >= 1);

    if let Some(weight) = details.per_package_weight() {
        assert!(weight >= 0.01);
        assert!(weight.is_finite());
    }
    for value in [details.cod_amount, details.insured_value].into_iter().flatten() {
        assert!(value > 0.0);
    }

    let padded = pad_postcode(&details.receiver.postcode, 5);
    assert!(padded.len() >= details.receiver.postcode.trim().len());
});
