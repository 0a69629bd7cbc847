#![no_main]

use libfuzzer_sys::fuzz_target;
use shipwatch::Version;
use shipwatch::registry::PublishedTag;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(v) = s.parse::<Version>() {
        // Accepted strings print back in canonical form and parse to the same value
        let printed = v.to_string();
        assert_eq!(printed.parse::<Version>().ok(), Some(v));
        assert_eq!(PublishedTag::new(printed).version(), Some(v));
    }

    // Tag names never panic, whatever they contain
    let _ = PublishedTag::new(s).version();
});
