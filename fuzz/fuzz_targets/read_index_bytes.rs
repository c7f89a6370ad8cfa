#![no_main]

use libfuzzer_sys::fuzz_target;
use triplex_core::Index;

fuzz_target!(|data: &[u8]| {
    if let Ok(index) = Index::from_bytes(data) {
        let mut out = Vec::new();
        index.write_to(&mut out).expect("write loaded index");
        let reloaded = Index::from_bytes(&out).expect("reload written index");
        assert_eq!(reloaded, index);
    }
});
