use criterion::{criterion_group, criterion_main, Criterion};
use fallible_streaming_iterator::FallibleStreamingIterator;
use flatgeobuf_codec::*;
use geozero::ProcessorSink;
use geozero::GeozeroGeometry;

const GRID: usize = 100;

fn cell(x: usize, y: usize) -> Geometry {
    let (x, y) = (x as f64, y as f64);
    Geometry::Polygon(vec![vec![
        Coord::xy(x, y),
        Coord::xy(x + 0.9, y),
        Coord::xy(x + 0.9, y + 0.9),
        Coord::xy(x, y + 0.9),
        Coord::xy(x, y),
    ]])
}

fn encode_grid(write_index: bool) -> Result<Vec<u8>> {
    let columns = vec![
        ColumnMeta::new("fid", ColumnType::ULong),
        ColumnMeta::new("label", ColumnType::String),
    ];
    let options = FgbWriterOptions {
        write_index,
        ..Default::default()
    };
    let mut fgb = FgbWriter::create_with_options("grid", columns, options)?;
    for y in 0..GRID {
        for x in 0..GRID {
            let label = format!("{x}/{y}");
            fgb.add_feature(
                Some(&cell(x, y)),
                &vec![
                    Some(ColumnValue::ULong((y * GRID + x) as u64)),
                    Some(ColumnValue::String(&label)),
                ],
            )?;
        }
    }
    fgb.finish()
}

fn read_all(buf: &[u8]) -> Result<()> {
    let mut fgb = FgbReader::open(buf)?.select_all()?;
    let mut null_reader = ProcessorSink;
    while let Some(feature) = fgb.next()? {
        if let Some(geometry) = &feature.geometry {
            geometry.process_geom(&mut null_reader)?;
        }
    }
    Ok(())
}

fn select_bbox(buf: &[u8]) -> Result<usize> {
    let mut fgb = FgbReader::open(buf)?.select_bbox(40.0, 40.0, 45.0, 45.0)?;
    let mut cnt = 0;
    while fgb.next()?.is_some() {
        cnt += 1;
    }
    Ok(cnt)
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("encode", |b| b.iter(|| encode_grid(false)));
    c.bench_function("encode_indexed", |b| b.iter(|| encode_grid(true)));
    let Ok(buf) = encode_grid(true) else {
        return;
    };
    c.bench_function("read_all", |b| b.iter(|| read_all(&buf)));
    c.bench_function("select_bbox", |b| b.iter(|| select_bbox(&buf)));
}

criterion_group!(name=benches; config=Criterion::default().sample_size(10); targets=criterion_benchmark);
criterion_main!(benches);
