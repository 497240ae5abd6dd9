#![no_main]

use flatgeobuf_codec::*;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let header = HeaderMeta {
        geometry_type: GeometryType::Unknown,
        has_z: data.first().map_or(false, |b| b & 1 == 1),
        columns: vec![
            ColumnMeta::new("i", ColumnType::Int),
            ColumnMeta::new("s", ColumnType::String),
        ],
        ..Default::default()
    };
    let _ = decode_feature(data, 0, &header);
    let _ = read_properties(data, &header.columns);
});
