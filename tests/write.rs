use fallible_streaming_iterator::FallibleStreamingIterator;
use flatgeobuf_codec::*;
use std::io::{Read, Seek, SeekFrom};

fn point(x: f64, y: f64) -> Geometry {
    Geometry::Point(Some(Coord::xy(x, y)))
}

#[test]
fn single_point() -> Result<()> {
    let mut fgb = FgbWriter::create("point", vec![])?;
    fgb.add_feature(Some(&point(1.0, 2.0)), &())?;
    let buf = fgb.finish()?;
    assert_eq!(&buf[0..8], &MAGIC_BYTES);

    let fgb = FgbReader::open(&buf)?;
    assert_eq!(fgb.header().geometry_type, GeometryType::Point);
    assert!(!fgb.header().has_z);
    assert!(!fgb.header().has_index());
    let mut fgb = fgb.select_all()?;
    let feature = fgb.next()?.expect("one feature");
    assert_eq!(feature.geometry.as_deref(), Some(&point(1.0, 2.0)));
    assert!(feature.properties.is_empty());
    assert!(fgb.next()?.is_none());
    Ok(())
}

#[test]
fn header_only_dataset() -> Result<()> {
    let columns = vec![ColumnMeta::new("id", ColumnType::Int)];
    let fgb = FgbWriter::create("empty", columns.clone())?;
    assert_eq!(fgb.bytes_written(), 0);
    let buf = fgb.finish()?;
    assert!(check_magic_bytes(&buf));

    let (header, offset) = decode_header(&buf, MAGIC_BYTES.len())?;
    assert_eq!(offset, buf.len());
    assert_eq!(header.name, "empty");
    assert_eq!(header.geometry_type, GeometryType::Unknown);
    assert_eq!(header.features_count, 0);
    assert_eq!(header.columns, columns);

    let mut fgb = FgbReader::open(&buf)?.select_all()?;
    assert!(fgb.next()?.is_none());
    Ok(())
}

#[test]
fn empty_indexed_dataset_has_no_index() -> Result<()> {
    let options = FgbWriterOptions {
        write_index: true,
        ..Default::default()
    };
    let buf = FgbWriter::create_with_options("empty", vec![], options)?.finish()?;
    let fgb = FgbReader::open(&buf)?;
    assert!(!fgb.header().has_index());
    assert!(matches!(fgb.index(), Err(Error::NoIndex)));
    Ok(())
}

#[test]
fn mixed_geometry_types_are_rejected() -> Result<()> {
    let columns = vec![ColumnMeta::new("name", ColumnType::String)];
    let mut fgb = FgbWriter::create("mixed", columns)?;
    fgb.add_feature(Some(&point(1.0, 1.0)), &vec![Some(ColumnValue::String("a"))])?;
    let written = fgb.bytes_written();

    let line = Geometry::LineString(vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0)]);
    let err = fgb
        .add_feature(Some(&line), &vec![Some(ColumnValue::String("b"))])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::MixedGeometryType {
            expected: GeometryType::Point,
            found: GeometryType::LineString
        }
    ));
    assert_eq!(fgb.features_count(), 1);
    assert_eq!(fgb.bytes_written(), written);

    // the writer stays usable
    fgb.add_feature(Some(&point(2.0, 2.0)), &vec![None::<ColumnValue>])?;
    let buf = fgb.finish()?;
    let mut fgb = FgbReader::open(&buf)?.select_all()?;
    let mut cnt = 0;
    while fgb.next()?.is_some() {
        cnt += 1;
    }
    assert_eq!(cnt, 2);
    Ok(())
}

#[test]
fn schema_violations() -> Result<()> {
    let columns = vec![
        ColumnMeta::new("id", ColumnType::Int),
        ColumnMeta::new("name", ColumnType::String),
    ];
    let mut fgb = FgbWriter::create("schema", columns)?;
    let p = point(0.0, 0.0);
    assert!(matches!(
        fgb.add_feature(Some(&p), &vec![Some(ColumnValue::Int(1))]),
        Err(Error::ColumnCountMismatch {
            expected: 2,
            found: 1
        })
    ));
    assert!(matches!(
        fgb.add_feature(
            Some(&p),
            &vec![Some(ColumnValue::String("1")), Some(ColumnValue::String("a"))]
        ),
        Err(Error::PropertyTypeMismatch {
            column: 0,
            expected: ColumnType::Int
        })
    ));
    assert_eq!(fgb.features_count(), 0);
    assert_eq!(fgb.bytes_written(), 0);
    Ok(())
}

#[test]
fn first_feature_without_geometry() -> Result<()> {
    let mut fgb = FgbWriter::create("unknown", vec![])?;
    fgb.add_feature(None, &())?;
    fgb.add_feature(Some(&point(1.0, 1.0)), &())?;
    let line = Geometry::LineString(vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0)]);
    fgb.add_feature(Some(&line), &())?;
    assert_eq!(fgb.header().geometry_type, GeometryType::Unknown);
    let buf = fgb.finish()?;

    let mut fgb = FgbReader::open(&buf)?.select_all()?;
    let mut next_geometry = || -> Result<Option<Geometry>> {
        let feature = fgb.next()?.expect("feature");
        Ok(feature.geometry.clone().map(|g| g.geometry))
    };
    assert_eq!(next_geometry()?, None);
    assert_eq!(next_geometry()?, Some(point(1.0, 1.0)));
    assert_eq!(next_geometry()?, Some(line));
    Ok(())
}

#[test]
fn header_options() -> Result<()> {
    let options = FgbWriterOptions {
        crs: FgbCrs {
            code: 4326,
            ..Default::default()
        },
        title: Some("Places"),
        description: Some("A few points"),
        metadata: Some(r#"{"source":"test"}"#),
        ..Default::default()
    };
    let mut fgb = FgbWriter::create_with_options("places", vec![], options)?;
    fgb.add_feature(Some(&point(8.5, 47.4)), &())?;
    let buf = fgb.finish()?;

    let fgb = FgbReader::open(&buf)?;
    assert_eq!(fgb.srid(), 4326);
    let header = fgb.header();
    assert_eq!(header.name, "places");
    assert_eq!(header.title.as_deref(), Some("Places"));
    assert_eq!(header.description.as_deref(), Some("A few points"));
    assert_eq!(header.metadata.as_deref(), Some(r#"{"source":"test"}"#));
    Ok(())
}

#[test]
fn illegal_node_size() {
    let options = FgbWriterOptions {
        write_index: true,
        index_node_size: 1,
        ..Default::default()
    };
    assert!(matches!(
        FgbWriter::create_with_options("bad", vec![], options),
        Err(Error::IllegalNodeSize(1))
    ));
}

#[test]
fn write_to_file() -> Result<()> {
    let mut fgb = FgbWriter::create(
        "file",
        vec![ColumnMeta::new("label", ColumnType::String)],
    )?;
    for i in 0..10 {
        let label = format!("p{i}");
        fgb.add_feature(
            Some(&point(i as f64, -(i as f64))),
            &vec![Some(ColumnValue::String(&label))],
        )?;
    }
    let mut tmpfile = tempfile::tempfile()?;
    fgb.write(&mut tmpfile)?;
    tmpfile.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    tmpfile.read_to_end(&mut buf)?;

    let mut fgb = FgbReader::open(&buf)?.select_all()?;
    let mut labels = Vec::new();
    while let Some(feature) = fgb.next()? {
        if let Some(ColumnValue::String(label)) = feature.property(0) {
            labels.push(label.to_string());
        }
    }
    assert_eq!(labels.len(), 10);
    assert_eq!(labels[9], "p9");
    Ok(())
}
