#![no_main]

use consign_config::{ConfigSource, TomlSource};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(source) = text.parse::<TomlSource>() {
        // Lookups on a parsed file never panic, whatever the key shape
        for key in ["carriers.gls.guid", "carriers", "", ".", "carriers..url"] {
            let _ = source.get(key);
        }
    }
});
