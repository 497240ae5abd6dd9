use fallible_streaming_iterator::FallibleStreamingIterator;
use flatgeobuf_codec::packed_r_tree::{calc_extent, hilbert_bbox, hilbert_sort, HILBERT_MAX};
use flatgeobuf_codec::*;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

fn rect(x1: f64, y1: f64, x2: f64, y2: f64) -> Geometry {
    Geometry::Polygon(vec![vec![
        Coord::xy(x1, y1),
        Coord::xy(x2, y1),
        Coord::xy(x2, y2),
        Coord::xy(x1, y2),
        Coord::xy(x1, y1),
    ]])
}

fn indexed(node_size: u16) -> FgbWriterOptions<'static> {
    FgbWriterOptions {
        write_index: true,
        index_node_size: node_size,
        ..Default::default()
    }
}

fn same_box(a: &NodeItem, b: &NodeItem) -> bool {
    a.min_x == b.min_x && a.min_y == b.min_y && a.max_x == b.max_x && a.max_y == b.max_y
}

#[test]
fn three_polygons() -> Result<()> {
    let polygons = vec![
        rect(0.0, 0.0, 1.0, 1.0),
        rect(50.0, 50.0, 60.0, 55.0),
        rect(-20.0, 10.0, -10.0, 30.0),
    ];
    let mut fgb = FgbWriter::create_with_options("polygons", vec![], indexed(4))?;
    for polygon in &polygons {
        fgb.add_feature(Some(polygon), &())?;
    }
    let buf = fgb.finish()?;

    let fgb = FgbReader::open(&buf)?;
    assert_eq!(fgb.header().features_count, 3);
    assert_eq!(fgb.header().index_node_size, 4);
    assert_eq!(fgb.header().envelope, Some([-20.0, 0.0, 60.0, 55.0]));
    let mut fgb = fgb.select_all()?;
    let mut found = Vec::new();
    while let Some(feature) = fgb.next()? {
        found.push(feature.geometry.clone().expect("geometry").geometry);
    }
    assert_eq!(found.len(), 3);
    for polygon in &polygons {
        assert!(found.contains(polygon));
        let bbox = polygon.bbox();
        assert!(found.iter().any(|g| same_box(&g.bbox(), &bbox)));
    }
    Ok(())
}

#[test]
fn index_size_matches_written_index() -> Result<()> {
    for node_size in [2u16, 4, 16] {
        let n = node_size as usize;
        for count in [0, 1, 2, n - 1, n, n + 1, n * n] {
            let mut fgb =
                FgbWriter::create_with_options("points", vec![], indexed(node_size))?;
            let mut nodes = Vec::new();
            for i in 0..count {
                let p = Geometry::Point(Some(Coord::xy(i as f64, (i % 7) as f64)));
                nodes.push(p.bbox());
                fgb.add_feature(Some(&p), &())?;
            }
            let buf = fgb.finish()?;
            let (header, features_start) = decode_header(&buf, 8)?;
            let header_end = 8 + 4 + u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
            let index_size = PackedRTree::index_size(count, node_size);
            assert_eq!(features_start - header_end, index_size, "{count} items, node size {node_size}");

            if count > 0 {
                let extent = calc_extent(&nodes);
                hilbert_sort(&mut nodes, &extent);
                let tree = PackedRTree::build(&nodes, &extent, node_size)?;
                assert_eq!(tree.size(), index_size);
                let mut out = Vec::new();
                tree.stream_write(&mut out)?;
                assert_eq!(out.len(), index_size);
                assert_eq!(header.features_count, count as u64);
            } else {
                assert_eq!(index_size, 0);
            }
        }
    }
    Ok(())
}

#[test]
fn features_follow_hilbert_order() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let mut fgb = FgbWriter::create_with_options("random", vec![], indexed(16))?;
    for _ in 0..200 {
        let x = rng.gen_range(-180.0..180.0);
        let y = rng.gen_range(-90.0..90.0);
        fgb.add_feature(Some(&Geometry::Point(Some(Coord::xy(x, y)))), &())?;
    }
    let buf = fgb.finish()?;

    let fgb = FgbReader::open(&buf)?;
    let [min_x, min_y, max_x, max_y] = fgb.header().envelope.expect("envelope");
    let extent = NodeItem::bounds(min_x, min_y, max_x, max_y);
    let mut fgb = fgb.select_all()?;
    let mut last = 0;
    while let Some(feature) = fgb.next()? {
        let bbox = feature.geometry.as_ref().expect("geometry").bbox();
        let h = hilbert_bbox(&bbox, HILBERT_MAX, &extent);
        assert!(h >= last);
        last = h;
    }
    Ok(())
}

#[test]
fn parents_contain_children() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut fgb = FgbWriter::create_with_options("boxes", vec![], indexed(4))?;
    for _ in 0..100 {
        let x = rng.gen_range(0.0..1000.0);
        let y = rng.gen_range(0.0..1000.0);
        let w = rng.gen_range(0.1..20.0);
        let h = rng.gen_range(0.1..20.0);
        fgb.add_feature(Some(&rect(x, y, x + w, y + h)), &())?;
    }
    let buf = fgb.finish()?;
    let tree = FgbReader::open(&buf)?.index()?;
    let nodes = tree.node_items();
    let levels = tree.level_bounds();
    assert_eq!(levels.last().map(|l| l.start), Some(0));
    assert_eq!(levels[0].end, nodes.len());
    for level in 1..levels.len() {
        for parent in levels[level].clone() {
            let node = &nodes[parent];
            let first = node.offset as usize;
            let last = (first + 4).min(levels[level - 1].end);
            assert!(levels[level - 1].contains(&first));
            for child in &nodes[first..last] {
                assert!(node.contains(child));
            }
        }
    }
    Ok(())
}

#[test]
fn bbox_search_matches_brute_force() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(1234);
    let columns = vec![ColumnMeta::new("fid", ColumnType::UInt)];
    let mut fgb = FgbWriter::create_with_options("boxes", columns, indexed(8))?;
    let mut boxes = Vec::new();
    for fid in 0..300u32 {
        let x = rng.gen_range(-100.0..100.0);
        let y = rng.gen_range(-100.0..100.0);
        let size = rng.gen_range(0.0..5.0);
        let geometry = rect(x, y, x + size, y + size);
        boxes.push(geometry.bbox());
        fgb.add_feature(Some(&geometry), &vec![Some(ColumnValue::UInt(fid))])?;
    }
    let buf = fgb.finish()?;

    for _ in 0..20 {
        let x = rng.gen_range(-110.0..90.0);
        let y = rng.gen_range(-110.0..90.0);
        let query = NodeItem::bounds(x, y, x + 20.0, y + 20.0);
        let mut expected: Vec<u32> = boxes
            .iter()
            .enumerate()
            .filter(|(_, bbox)| bbox.intersects(&query))
            .map(|(fid, _)| fid as u32)
            .collect();

        let mut fgb = FgbReader::open(&buf)?.select_bbox(
            query.min_x,
            query.min_y,
            query.max_x,
            query.max_y,
        )?;
        assert_eq!(fgb.features_count(), Some(expected.len()));
        let mut found = Vec::new();
        while let Some(feature) = fgb.next()? {
            if let Some(ColumnValue::UInt(fid)) = feature.property(0) {
                found.push(*fid);
            }
        }
        found.sort_unstable();
        expected.sort_unstable();
        assert_eq!(found, expected);
    }
    Ok(())
}

#[test]
fn select_bbox_outside_extent() -> Result<()> {
    let mut fgb = FgbWriter::create_with_options("one", vec![], indexed(16))?;
    fgb.add_feature(Some(&rect(0.0, 0.0, 1.0, 1.0)), &())?;
    let buf = fgb.finish()?;
    let mut fgb = FgbReader::open(&buf)?.select_bbox(5.0, 5.0, 6.0, 6.0)?;
    assert_eq!(fgb.features_count(), Some(0));
    assert!(fgb.next()?.is_none());
    Ok(())
}
