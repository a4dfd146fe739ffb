#![no_main]

use libfuzzer_sys::fuzz_target;
use vigia::config::VigiaConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Must reject or accept without panicking
        let _ = VigiaConfig::from_toml_str(input);
    }
});
