#![no_main]

use libfuzzer_sys::fuzz_target;
use odata_uri::decoder;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = decoder::decode(s);
        let _ = decoder::split_and_decode_path(s);
        let _ = decoder::split_and_decode_options(s);
    }
});
