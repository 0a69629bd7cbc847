#![no_main]

use libfuzzer_sys::fuzz_target;
use shipwatch::Version;
use shipwatch::catalog::Catalog;
use shipwatch::feed::UpstreamRecord;
use shipwatch::labels::{LATEST_TAG, STABLE_TAG, derive};

fuzz_target!(|data: &[u8]| {
    // Three bytes per record; the high bit of the first marks it stable
    let mut records = Vec::new();
    for chunk in data.chunks_exact(3) {
        let v = Version::new(u64::from(chunk[0] % 4), u64::from(chunk[1] % 8), u64::from(chunk[2]));
        if chunk[0] & 0x80 != 0 {
            records.push(UpstreamRecord::stable(&v.to_string()));
        } else {
            records.push(UpstreamRecord::to(&v.to_string()));
        }
    }

    let Ok(catalog) = Catalog::from_records(&records) else {
        return;
    };
    let labeled = derive(&catalog.representatives, catalog.stable);

    assert_eq!(labeled.iter().filter(|r| r.carries(LATEST_TAG)).count(), 1);
    let stable_carriers = labeled.iter().filter(|r| r.carries(STABLE_TAG)).count();
    assert_eq!(stable_carriers, usize::from(catalog.stable.is_some()));
    assert!(labeled.windows(2).all(|w| w[0].version <= w[1].version));
});
