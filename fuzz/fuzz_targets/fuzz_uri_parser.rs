#![no_main]

use std::sync::LazyLock;

use libfuzzer_sys::fuzz_target;
use odata_edm::Edm;
use odata_uri::Parser;

static EDM: LazyLock<Option<Edm>> =
    LazyLock::new(|| Edm::from_json(include_str!("../../testdata/demo/edm.json")).ok());

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 {
        return;
    }
    let Some(edm) = EDM.as_ref() else {
        return;
    };
    if let Ok(s) = std::str::from_utf8(data) {
        let (path, query) = s.split_once('?').unwrap_or((s, ""));
        let _ = Parser::new(edm).parse_uri(path, query);
    }
});
