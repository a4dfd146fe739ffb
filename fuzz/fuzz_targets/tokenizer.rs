#![no_main]

use libfuzzer_sys::fuzz_target;
use vigia::vocabulary::{records, Vocabulary};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Adapting to a text and tokenizing it back must round trip every record
        let vocab = Vocabulary::adapt([input]);
        let ids = vocab.tokenize(input);
        let decoded = vocab.decode(&ids);
        assert_eq!(decoded, records(input).collect::<Vec<_>>());
    }
});
