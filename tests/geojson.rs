use fallible_streaming_iterator::FallibleStreamingIterator;
use flatgeobuf_codec::*;
use geozero::geojson::GeoJsonWriter;
use geozero::{GeozeroDatasource, ToWkt};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn countries(write_index: bool) -> flatgeobuf_codec::Result<Vec<u8>> {
    let columns = vec![
        ColumnMeta::new("id", ColumnType::String),
        ColumnMeta::new("name", ColumnType::String),
        ColumnMeta::new("pop", ColumnType::Long),
    ];
    let options = FgbWriterOptions {
        write_index,
        crs: FgbCrs {
            code: 4326,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut fgb = FgbWriter::create_with_options("countries", columns, options)?;
    let ring = vec![
        Coord::xy(-59.5, -80.0),
        Coord::xy(-59.8, -80.5),
        Coord::xy(-60.1, -81.0),
        Coord::xy(-59.5, -80.0),
    ];
    fgb.add_feature(
        Some(&Geometry::MultiPolygon(vec![vec![ring]])),
        &vec![
            Some(ColumnValue::String("ATA")),
            Some(ColumnValue::String("Antarctica")),
            None,
        ],
    )?;
    let ring = vec![
        Coord::xy(6.0, 45.8),
        Coord::xy(10.5, 45.8),
        Coord::xy(10.5, 47.8),
        Coord::xy(6.0, 45.8),
    ];
    fgb.add_feature(
        Some(&Geometry::MultiPolygon(vec![vec![ring]])),
        &vec![
            Some(ColumnValue::String("CHE")),
            Some(ColumnValue::String("Switzerland")),
            Some(ColumnValue::Long(8_700_000)),
        ],
    )?;
    fgb.finish()
}

#[test]
fn fgb_to_geojson() -> Result<()> {
    let buf = countries(false)?;
    let mut fgb = FgbReader::open(&buf)?.select_all()?;
    let mut json_data: Vec<u8> = Vec::new();
    let mut json = GeoJsonWriter::new(&mut json_data);
    fgb.process_features(&mut json)?;
    let json = std::str::from_utf8(&json_data)?;
    assert_eq!(
        &json[0..217],
        r#"{
"type": "FeatureCollection",
"name": "countries",
"features": [{"type": "Feature", "properties": {"id": "ATA", "name": "Antarctica"}, "geometry": {"type": "MultiPolygon", "coordinates": [[[[-59.5,-80],[-59.8,-80.5],"#
    );
    assert!(json.contains(r#""properties": {"id": "CHE", "name": "Switzerland", "pop": 8700000}"#));
    Ok(())
}

#[test]
fn datasource_bbox_selection() -> Result<()> {
    let buf = countries(true)?;
    let fgb = FgbReader::open(&buf)?;
    assert_eq!(fgb.srid(), 4326);
    let mut fgb = fgb.select_bbox(8.0, 46.0, 9.0, 47.0)?;
    let mut json_data: Vec<u8> = Vec::new();
    fgb.process(&mut GeoJsonWriter::new(&mut json_data))?;
    let json = std::str::from_utf8(&json_data)?;
    assert!(json.contains("Switzerland"));
    assert!(!json.contains("Antarctica"));
    Ok(())
}

#[test]
fn geometry_to_wkt() -> Result<()> {
    let buf = countries(false)?;
    let mut fgb = FgbReader::open(&buf)?.select_all()?;
    let feature = fgb.next()?.ok_or("no feature")?;
    let wkt = feature.geometry.as_ref().ok_or("no geometry")?.to_wkt()?;
    assert!(wkt.starts_with("MULTIPOLYGON(((-59.5 -80,-59.8 -80.5,"));

    let point = Geometry::Point(Some(Coord::xy(1.0, 2.0)));
    assert_eq!(point.to_wkt()?, "POINT(1 2)");
    Ok(())
}

#[test]
fn index_to_geojson() -> Result<()> {
    let buf = countries(true)?;
    let fgb = FgbReader::open(&buf)?;
    let mut json_data: Vec<u8> = Vec::new();
    fgb.process_index(&mut GeoJsonWriter::new(&mut json_data))?;
    let json = std::str::from_utf8(&json_data)?;
    // 2 leaves and the root
    assert_eq!(json.matches(r#""levelno""#).count(), 3);
    assert!(json.contains(r#""name": "PackedRTree""#));
    Ok(())
}
