#![no_main]

use libfuzzer_sys::fuzz_target;
use shipwatch::catalog::Catalog;
use shipwatch::feed::UpstreamRecord;

fuzz_target!(|data: &[u8]| {
    // Arbitrary JSON record lists must either build a catalog or fail cleanly
    let Ok(records) = serde_json::from_slice::<Vec<UpstreamRecord>>(data) else {
        return;
    };
    if let Ok(catalog) = Catalog::from_records(&records) {
        assert!(!catalog.representatives.is_empty());
        assert_eq!(catalog.representatives.iter().max(), Some(&catalog.latest));
        assert!(catalog.rejected <= records.len() * 2);
    }
});
