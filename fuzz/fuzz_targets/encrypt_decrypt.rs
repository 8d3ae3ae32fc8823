#![no_main]

use consign_encrypt::{decrypt, encrypt, is_encrypted, SecretCipher};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let passphrase = "consign-fuzz-passphrase";

    if let Ok(sealed) = encrypt(data, passphrase) {
        let sealed = String::from_utf8(sealed).expect("sealed output is base64");
        assert!(is_encrypted(&sealed));
        let opened = decrypt(&sealed, passphrase).expect("roundtrip");
        assert_eq!(data, opened.as_slice());
    }

    // Arbitrary stored values must never panic when revealed
    if let Ok(stored) = std::str::from_utf8(data) {
        let _ = SecretCipher::new(passphrase).reveal(stored);
    }
});
