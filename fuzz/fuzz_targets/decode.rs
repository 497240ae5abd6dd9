#![no_main]

use fallible_streaming_iterator::FallibleStreamingIterator;
use flatgeobuf_codec::*;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let fgb = match FgbReader::open(data) {
        Ok(n) => n,
        Err(_) => return,
    };
    let _ = fgb.header();
    let _ = fgb.index();
    if let Ok(mut selected) = FgbReader::open(data).and_then(|f| f.select_bbox(-1e9, -1e9, 1e9, 1e9)) {
        while let Ok(Some(_feature)) = selected.next() {}
    }
    let mut fgb = match fgb.select_all() {
        Ok(n) => n,
        Err(_) => return,
    };
    while let Ok(Some(_feature)) = fgb.next() {}
});
