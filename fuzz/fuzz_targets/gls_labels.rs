#![no_main]

use consign::carriers::gls::{parse_response, ResponseError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(xml) = std::str::from_utf8(data) else {
        return;
    };

    match parse_response(xml) {
        Ok(parsed) => {
            // Every extracted label carries content, and no block twice
            for (i, label) in parsed.labels.iter().enumerate() {
                assert!(!label.content.is_empty());
                assert!(parsed.labels[..i].iter().all(|l| l.content != label.content));
            }
            if let Some(number) = parsed.shipment_number {
                assert!(!number.trim().is_empty());
            }
        }
        Err(ResponseError::Rejected { message, .. }) => assert!(!message.is_empty()),
        Err(ResponseError::Malformed(_)) => {}
    }
});
